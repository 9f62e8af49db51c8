//! CLI argument parsing using clap.

use clap::{ArgAction, Args as ClapArgs, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// ctesplit - edit the CTEs of a SQL statement as separate files
#[derive(Parser, Debug)]
#[command(name = "ctesplit")]
#[command(about = "Split SQL WITH clauses into unit files and put them back together", long_about = None)]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// SQL dialect (defaults to the saved workspace's, then generic)
    #[arg(short, long, value_enum, global = true)]
    pub dialect: Option<DialectArg>,

    /// Output format
    #[arg(short, long, default_value = "table", value_enum, global = true)]
    pub format: OutputFormat,

    /// Compact JSON output (no pretty-printing)
    #[arg(short, long, global = true)]
    pub compact: bool,

    /// Suppress progress messages on stderr
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Log more (-v info, -vv debug); RUST_LOG overrides
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Write one file per unit of a SQL file
    Decompose {
        /// SQL file holding a single statement
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Root directory of the unit layout
        #[arg(long, value_name = "DIR")]
        out: PathBuf,

        /// Mock tables (JSON) stored with the workspace
        #[arg(long, value_name = "FILE")]
        test_values: Option<PathBuf>,
    },

    /// Rebuild a SQL file from its unit files
    Recompose {
        /// SQL file the units were decomposed from
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Root directory of the unit layout
        #[arg(long, value_name = "DIR")]
        from: PathBuf,

        #[command(flatten)]
        destination: Destination,
    },

    /// Assemble a unit directory (`<DIR>/<group>/<feature>.sql`)
    Compose {
        #[arg(value_name = "UNIT_DIR")]
        dir: PathBuf,

        /// Output file (defaults to stdout)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Validate every unit of a SQL file or unit directory
    Validate {
        #[command(flatten)]
        source: Source,
    },

    /// Show the unit dependency graph
    Graph {
        #[command(flatten)]
        source: Source,
    },

    /// Print the SQL running one unit against mock tables
    Run {
        #[command(flatten)]
        source: Source,

        /// Unit to run
        #[arg(short, long, value_name = "NAME")]
        unit: String,

        /// Execute the SQL in an in-memory DuckDB and print the rows
        /// (requires the `sandbox` feature)
        #[arg(long)]
        execute: bool,
    },
}

/// A SQL file or a unit directory, plus optional mock tables.
#[derive(ClapArgs, Debug)]
pub struct Source {
    /// SQL file or unit directory
    #[arg(value_name = "PATH")]
    pub path: PathBuf,

    /// Mock tables (JSON); replaces any saved with the workspace
    #[arg(long, value_name = "FILE")]
    pub test_values: Option<PathBuf>,
}

/// Where `recompose` writes its result.
#[derive(ClapArgs, Debug)]
#[group(multiple = false)]
pub struct Destination {
    /// Output file (defaults to overwriting FILE)
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Print to stdout instead of writing a file
    #[arg(long)]
    pub stdout: bool,
}

/// SQL dialect options
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DialectArg {
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

impl From<DialectArg> for ctesplit_core::Dialect {
    fn from(d: DialectArg) -> Self {
        match d {
            DialectArg::Generic => ctesplit_core::Dialect::Generic,
            DialectArg::Ansi => ctesplit_core::Dialect::Ansi,
            DialectArg::Bigquery => ctesplit_core::Dialect::Bigquery,
            DialectArg::Clickhouse => ctesplit_core::Dialect::Clickhouse,
            DialectArg::Databricks => ctesplit_core::Dialect::Databricks,
            DialectArg::Duckdb => ctesplit_core::Dialect::Duckdb,
            DialectArg::Hive => ctesplit_core::Dialect::Hive,
            DialectArg::Mssql => ctesplit_core::Dialect::Mssql,
            DialectArg::Mysql => ctesplit_core::Dialect::Mysql,
            DialectArg::Postgres => ctesplit_core::Dialect::Postgres,
            DialectArg::Redshift => ctesplit_core::Dialect::Redshift,
            DialectArg::Snowflake => ctesplit_core::Dialect::Snowflake,
            DialectArg::Sqlite => ctesplit_core::Dialect::Sqlite,
        }
    }
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table format
    Table,
    /// JSON output
    Json,
    /// Mermaid diagram (graph only)
    Mermaid,
}
