//! Dialect selection and identifier normalization.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sqlparser::ast::Ident;

/// SQL dialect used to parse unit text.
///
/// Only affects tokenization and grammar; CTE semantics are the standard ones
/// for every dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    Generic,
    Ansi,
    Bigquery,
    Clickhouse,
    Databricks,
    Duckdb,
    Hive,
    Mssql,
    Mysql,
    Postgres,
    Redshift,
    Snowflake,
    Sqlite,
}

impl Dialect {
    pub fn to_sqlparser_dialect(&self) -> Box<dyn sqlparser::dialect::Dialect> {
        use sqlparser::dialect::{
            AnsiDialect, BigQueryDialect, ClickHouseDialect, DatabricksDialect, DuckDbDialect,
            GenericDialect, HiveDialect, MsSqlDialect, MySqlDialect, PostgreSqlDialect,
            RedshiftSqlDialect, SQLiteDialect, SnowflakeDialect,
        };
        match self {
            Self::Generic => Box::new(GenericDialect {}),
            Self::Ansi => Box::new(AnsiDialect {}),
            Self::Bigquery => Box::new(BigQueryDialect {}),
            Self::Clickhouse => Box::new(ClickHouseDialect {}),
            Self::Databricks => Box::new(DatabricksDialect {}),
            Self::Duckdb => Box::new(DuckDbDialect {}),
            Self::Hive => Box::new(HiveDialect {}),
            Self::Mssql => Box::new(MsSqlDialect {}),
            Self::Mysql => Box::new(MySqlDialect {}),
            Self::Postgres => Box::new(PostgreSqlDialect {}),
            Self::Redshift => Box::new(RedshiftSqlDialect {}),
            Self::Snowflake => Box::new(SnowflakeDialect {}),
            Self::Sqlite => Box::new(SQLiteDialect {}),
        }
    }
}

/// Normalizes a name as written in SQL to the key used for matching.
///
/// Quoted names (`"Name"`, `` `Name` ``, `[Name]`) keep their exact inner text;
/// unquoted names fold to lowercase.
pub fn normalize_name(name: &str) -> String {
    let trimmed = name.trim();
    let mut chars = trimmed.chars();
    let (Some(first), Some(last)) = (chars.next(), chars.next_back()) else {
        return trimmed.to_lowercase();
    };

    let quoted = matches!((first, last), ('"', '"') | ('`', '`') | ('[', ']'));
    if quoted {
        trimmed[first.len_utf8()..trimmed.len() - last.len_utf8()].to_string()
    } else {
        trimmed.to_lowercase()
    }
}

/// Lookup key for a parsed identifier, consistent with [`normalize_name`].
pub(crate) fn ident_key(ident: &Ident) -> String {
    if ident.quote_style.is_some() {
        ident.value.clone()
    } else {
        ident.value.to_lowercase()
    }
}
