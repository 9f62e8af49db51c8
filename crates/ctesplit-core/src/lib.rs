//! Split SQL `WITH` clauses into independently editable units and put them
//! back together in dependency order.
//!
//! [`decompose`] turns one statement into a [`Workspace`] of [`SqlUnit`]s, one
//! per CTE plus the trailing main query. Units can be edited, validated against
//! each other and mock tables, and reassembled with [`recompose`] or
//! [`Workspace::generate_final_sql`].

pub mod decomposer;
pub mod error;
pub mod parser;
pub mod recomposer;
pub mod resolver;
pub mod types;
pub mod validator;
pub mod workspace;

// Re-export main types and functions
pub use decomposer::{decompose, decompose_units};
pub use error::{
    CycleError, DecomposeError, ParseError, ParseErrorKind, Position, RecomposeError,
    WorkspaceError,
};
pub use parser::{parse_sql, parse_sql_with_dialect, parse_statements, ParsedStatement};
pub use recomposer::recompose;
pub use resolver::{resolve, DependencyGraph, ResolvedGraph};
pub use validator::{validate_all, validate_unit};
pub use workspace::{Command, CommandOutput, Workspace, WorkspaceSnapshot, SNAPSHOT_VERSION};

pub use types::{
    normalize_name,
    // Request types
    DecomposeOptions,
    Dialect,
    MockTable,
    RecomposeOptions,
    SqlUnit,
    TestValueSet,
    UnitKind,
    // Validation
    ValidationError,
    ValidationOutcome,
    ValidationState,
    MAIN_UNIT_NAME,
};
