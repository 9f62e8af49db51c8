//! SQL AST provider backed by `sqlparser`.
//!
//! Parses statements and exposes the pieces the engine needs: the CTE
//! definitions of a `WITH` clause, the trailing main query, and the relations
//! any query node references.

use crate::error::ParseError;
use crate::types::common::ident_key;
use crate::types::Dialect;
use sqlparser::ast::{Query, Statement};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

pub(crate) mod projection;
pub(crate) mod references;
mod source;

pub use references::{referenced_relations, statement_relations};

/// Parse SQL using the specified dialect.
pub fn parse_sql_with_dialect(sql: &str, dialect: Dialect) -> Result<Vec<Statement>, ParseError> {
    let sqlparser_dialect = dialect.to_sqlparser_dialect();
    match Parser::parse_sql(sqlparser_dialect.as_ref(), sql) {
        Ok(statements) => Ok(statements),
        Err(primary_err) => {
            // Generic trips over Postgres-only operators that are common in
            // warehouse SQL; retry those with the Postgres grammar.
            if matches!(dialect, Dialect::Generic) && looks_like_postgres_syntax(sql) {
                let postgres = PostgreSqlDialect {};
                if let Ok(statements) = Parser::parse_sql(&postgres, sql) {
                    return Ok(statements);
                }
            }
            Err(ParseError::from(primary_err).with_dialect(dialect))
        }
    }
}

fn looks_like_postgres_syntax(sql: &str) -> bool {
    sql.contains("::") || sql.contains("->") || sql.contains("?|") || sql.contains("?&")
}

/// Parse SQL using the generic dialect.
pub fn parse_sql(sql: &str) -> Result<Vec<Statement>, ParseError> {
    parse_sql_with_dialect(sql, Dialect::Generic)
}

/// Parse `sql` into statements that remember their source text.
///
/// Callers needing exactly one statement check the length themselves; the
/// decomposer reports blank input and scripts with dedicated errors.
pub fn parse_statements(sql: &str, dialect: Dialect) -> Result<Vec<ParsedStatement>, ParseError> {
    Ok(parse_sql_with_dialect(sql, dialect)?
        .into_iter()
        .map(|statement| ParsedStatement::new(sql, statement, dialect))
        .collect())
}

/// One CTE entry of a parsed `WITH` clause.
#[derive(Debug, Clone)]
pub struct CteDefinition {
    /// Name as written, quotes retained.
    pub name: String,
    /// Normalized lookup key.
    pub key: String,
    /// Declared column list, as written.
    pub declared_columns: Vec<String>,
    /// Body text without the surrounding parentheses.
    pub body: String,
    pub query: Query,
    /// Declared under `WITH RECURSIVE` and reads from itself.
    pub recursive: bool,
}

/// A single parsed statement together with the text it came from.
#[derive(Debug, Clone)]
pub struct ParsedStatement {
    sql: String,
    statement: Statement,
    dialect: Dialect,
}

impl ParsedStatement {
    pub fn new(sql: impl Into<String>, statement: Statement, dialect: Dialect) -> Self {
        Self {
            sql: sql.into(),
            statement,
            dialect,
        }
    }

    pub fn statement(&self) -> &Statement {
        &self.statement
    }

    /// The statement as a query, if it is one.
    pub fn query(&self) -> Option<&Query> {
        match &self.statement {
            Statement::Query(query) => Some(query),
            _ => None,
        }
    }

    pub fn is_query(&self) -> bool {
        self.query().is_some()
    }

    /// True for a query carrying a `WITH` clause.
    pub fn has_with_clause(&self) -> bool {
        self.query().is_some_and(|query| query.with.is_some())
    }

    /// True for `WITH RECURSIVE`.
    pub fn is_recursive(&self) -> bool {
        self.query()
            .and_then(|query| query.with.as_ref())
            .is_some_and(|with| with.recursive)
    }

    /// CTE definitions in declaration order.
    ///
    /// Bodies are sliced from the source text so formatting and comments
    /// survive; the AST rendering is used when slicing is not possible.
    pub fn cte_definitions(&self) -> Vec<CteDefinition> {
        let Some(with) = self.query().and_then(|query| query.with.as_ref()) else {
            return Vec::new();
        };
        let recursive = with.recursive;

        let sliced = source::slice_with_clause(&self.sql, self.dialect)
            .filter(|slices| slices.cte_bodies.len() == with.cte_tables.len());

        with.cte_tables
            .iter()
            .enumerate()
            .map(|(index, cte)| {
                let key = ident_key(&cte.alias.name);
                CteDefinition {
                    name: cte.alias.name.to_string(),
                    recursive: recursive && referenced_relations(&cte.query).contains(&key),
                    key,
                    declared_columns: cte
                        .alias
                        .columns
                        .iter()
                        .map(|column| column.name.to_string())
                        .collect(),
                    body: sliced
                        .as_ref()
                        .map(|slices| slices.cte_bodies[index].clone())
                        .unwrap_or_else(|| cte.query.to_string()),
                    query: (*cte.query).clone(),
                }
            })
            .collect()
    }

    /// The trailing query with any `WITH` clause removed.
    pub fn main_query(&self) -> Option<Query> {
        self.query().map(|query| {
            let mut main = query.clone();
            main.with = None;
            main
        })
    }

    /// Text of the main unit: the trailing query for a `WITH` statement,
    /// otherwise the whole statement.
    pub fn main_body(&self) -> String {
        if self.has_with_clause() {
            if let Some(slices) = source::slice_with_clause(&self.sql, self.dialect) {
                return slices.main;
            }
            if let Some(main) = self.main_query() {
                return main.to_string();
            }
        }

        source::statement_text(&self.sql, self.dialect)
            .unwrap_or_else(|| self.statement.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsed(sql: &str) -> ParsedStatement {
        let mut statements = parse_sql(sql).unwrap();
        ParsedStatement::new(sql, statements.remove(0), Dialect::Generic)
    }

    #[test]
    fn test_parse_invalid_sql_carries_dialect() {
        let err = parse_sql_with_dialect("SELECT * FROM", Dialect::Postgres).unwrap_err();
        assert_eq!(err.dialect, Some(Dialect::Postgres));
    }

    #[test]
    fn test_generic_falls_back_for_postgres_cast() {
        assert!(parse_sql("SELECT workspace_id::text FROM usage").is_ok());
    }

    #[test]
    fn test_cte_definitions_preserve_source_text() {
        let sql = "WITH x AS (\n  SELECT 1 AS v -- one\n), y (a) AS (SELECT v FROM x)\nSELECT a FROM y;";
        let statement = parsed(sql);
        let ctes = statement.cte_definitions();

        assert_eq!(ctes.len(), 2);
        assert_eq!(ctes[0].name, "x");
        assert_eq!(ctes[0].body, "SELECT 1 AS v -- one");
        assert_eq!(ctes[1].declared_columns, vec!["a"]);
        assert_eq!(ctes[1].body, "SELECT v FROM x");
        assert_eq!(statement.main_body(), "SELECT a FROM y");
    }

    #[test]
    fn test_quoted_cte_name_keeps_quotes() {
        let statement = parsed("WITH \"Daily\" AS (SELECT 1 AS v) SELECT v FROM \"Daily\"");
        let ctes = statement.cte_definitions();
        assert_eq!(ctes[0].name, "\"Daily\"");
        assert_eq!(ctes[0].key, "Daily");
    }

    #[test]
    fn test_parse_statements_keeps_every_statement() {
        let statements = parse_statements("SELECT 1; SELECT 2", Dialect::Generic).unwrap();
        assert_eq!(statements.len(), 2);
        assert!(statements.iter().all(ParsedStatement::is_query));
    }

    #[test]
    fn test_main_body_without_with_is_whole_statement() {
        let statement = parsed("SELECT id FROM users WHERE id > 1;");
        assert!(!statement.has_with_clause());
        assert_eq!(statement.main_body(), "SELECT id FROM users WHERE id > 1");
        assert!(statement.cte_definitions().is_empty());
    }

    #[test]
    fn test_recursive_flag() {
        let statement = parsed(
            "WITH RECURSIVE n AS (SELECT 1 AS i UNION ALL SELECT i + 1 FROM n WHERE i < 5) SELECT i FROM n",
        );
        assert!(statement.is_recursive());
        assert!(statement.cte_definitions()[0].recursive);
        assert_eq!(
            statement.cte_definitions()[0].body,
            "SELECT 1 AS i UNION ALL SELECT i + 1 FROM n WHERE i < 5"
        );
    }
}
