//! Error types for decomposition, recomposition and workspace commands.
//!
//! # Error Handling Strategy
//!
//! Two patterns live side by side in this crate:
//!
//! - Structural operations ([`crate::decompose`], [`crate::recompose`], workspace
//!   commands) are all-or-nothing. They return `Result<T, E>` with one of the
//!   enums below, and a failure leaves the caller's state untouched.
//!
//! - Validation is collect-all. Per-unit failures are values
//!   ([`crate::ValidationOutcome`]) gathered into a map so every failing unit can
//!   be reported in one pass.

use crate::types::Dialect;
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;
#[cfg(feature = "tracing")]
use tracing::trace;

/// Error reported by the SQL parser for a piece of unit text.
///
/// Keeps the structured position information sqlparser embeds in its messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    /// Human-readable error message.
    pub message: String,
    /// Location of the error, if the parser reported one.
    pub position: Option<Position>,
    /// The SQL dialect in effect when parsing failed.
    pub dialect: Option<Dialect>,
    /// The specific category of parse error.
    pub kind: ParseErrorKind,
}

/// Position information for a parse error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    /// Line number (1-indexed).
    pub line: usize,
    /// Column number (1-indexed).
    pub column: usize,
}

/// Category of parse error for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParseErrorKind {
    #[default]
    SyntaxError,
    MissingClause,
    UnexpectedEof,
    UnsupportedFeature,
    LexerError,
}

impl ParseError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            position: None,
            dialect: None,
            kind: ParseErrorKind::SyntaxError,
        }
    }

    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = Some(dialect);
        self
    }

    pub fn with_kind(mut self, kind: ParseErrorKind) -> Self {
        self.kind = kind;
        self
    }

    /// Extracts `Line: X, Column: Y` from a sqlparser message.
    ///
    /// Coupled to sqlparser's message format; returns `None` when the format
    /// is not found rather than guessing.
    fn position_from_message(message: &str) -> Option<Position> {
        static POSITION_REGEX: OnceLock<Regex> = OnceLock::new();
        let re = POSITION_REGEX.get_or_init(|| {
            Regex::new(r"Line:\s*(\d+)\s*,\s*Column:\s*(\d+)").expect("Invalid regex pattern")
        });

        let result = re.captures(message).and_then(|caps| {
            let line: usize = caps.get(1)?.as_str().parse().ok()?;
            let column: usize = caps.get(2)?.as_str().parse().ok()?;
            Some(Position { line, column })
        });

        #[cfg(feature = "tracing")]
        if result.is_none() && message.contains("Line") {
            trace!(message, "parse error message carried no usable position");
        }

        result
    }

    fn kind_from_message(message: &str) -> ParseErrorKind {
        let lower = message.to_lowercase();
        if lower.contains("unexpected end") || lower.contains("eof") {
            ParseErrorKind::UnexpectedEof
        } else if lower.contains("expected") {
            ParseErrorKind::MissingClause
        } else if lower.contains("not supported") || lower.contains("unsupported") {
            ParseErrorKind::UnsupportedFeature
        } else if lower.contains("lexer") || lower.contains("token") {
            ParseErrorKind::LexerError
        } else {
            ParseErrorKind::SyntaxError
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Parse error")?;

        if let Some(dialect) = self.dialect {
            write!(f, " ({dialect:?})")?;
        }

        if let Some(pos) = self.position {
            write!(f, " at line {}, column {}", pos.line, pos.column)?;
        }

        write!(f, ": {}", self.message)
    }
}

impl std::error::Error for ParseError {}

impl From<sqlparser::parser::ParserError> for ParseError {
    fn from(err: sqlparser::parser::ParserError) -> Self {
        let message = err.to_string();
        Self {
            position: Self::position_from_message(&message),
            kind: Self::kind_from_message(&message),
            message,
            dialect: None,
        }
    }
}

impl From<sqlparser::tokenizer::TokenizerError> for ParseError {
    fn from(err: sqlparser::tokenizer::TokenizerError) -> Self {
        let message = err.to_string();
        Self {
            position: Self::position_from_message(&message),
            kind: ParseErrorKind::LexerError,
            message,
            dialect: None,
        }
    }
}

/// A dependency cycle among units, listed in cycle order.
///
/// The first name is repeated at the end, so `a -> b -> a` is `["a", "b", "a"]`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("dependency cycle detected: {}", .path.join(" -> "))]
pub struct CycleError {
    pub path: Vec<String>,
}

impl CycleError {
    /// Unit names taking part in the cycle, without the closing repeat.
    pub fn members(&self) -> &[String] {
        match self.path.split_last() {
            Some((_, rest)) if !rest.is_empty() => rest,
            _ => &self.path,
        }
    }
}

/// Failure to split a statement into units.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecomposeError {
    #[error("input SQL is empty")]
    Empty,

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("expected exactly one statement, found {count}")]
    MultipleStatements { count: usize },

    #[error("unit '{name}' is defined more than once")]
    DuplicateUnit { name: String },

    #[error("'{name}' is reserved for the main query and cannot name a CTE")]
    ReservedName { name: String },
}

/// Failure to assemble units into one statement.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecomposeError {
    #[error(transparent)]
    Cycle(#[from] CycleError),

    #[error("unit '{unit}' depends on '{dependency}', which is not a unit")]
    UnknownDependency { unit: String, dependency: String },

    #[error("unit '{unit}' does not parse: {error}")]
    Parse { unit: String, error: ParseError },

    #[error("workspace has no main unit")]
    MissingMain,

    #[error("unknown unit '{name}'")]
    UnknownUnit { name: String },

    #[error("mock table '{name}' is invalid: {reason}")]
    InvalidMock { name: String, reason: String },
}

/// Failure of a workspace command.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WorkspaceError {
    #[error(transparent)]
    Decompose(#[from] DecomposeError),

    #[error(transparent)]
    Recompose(#[from] RecomposeError),

    #[error("unknown unit '{name}'")]
    UnknownUnit { name: String },

    #[error("the main unit cannot be removed")]
    CannotRemoveMain,

    #[error("invalid workspace snapshot: {0}")]
    Snapshot(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_from_sqlparser_message() {
        let msg = "Expected: ), found: EOF at Line: 3, Column: 12";
        assert_eq!(
            ParseError::position_from_message(msg),
            Some(Position {
                line: 3,
                column: 12
            })
        );
    }

    #[test]
    fn test_position_missing_or_malformed() {
        assert_eq!(ParseError::position_from_message("Unexpected token"), None);
        assert_eq!(
            ParseError::position_from_message("Error at Line: abc, Column: 5"),
            None
        );
        assert_eq!(ParseError::position_from_message("Error at Line: 5"), None);
    }

    #[test]
    fn test_kind_from_message() {
        assert_eq!(
            ParseError::kind_from_message("Unexpected end of input"),
            ParseErrorKind::UnexpectedEof
        );
        assert_eq!(
            ParseError::kind_from_message("Expected SELECT keyword"),
            ParseErrorKind::MissingClause
        );
        assert_eq!(
            ParseError::kind_from_message("Something went wrong"),
            ParseErrorKind::SyntaxError
        );
    }

    #[test]
    fn test_parse_error_display() {
        let mut err = ParseError::new("Bad syntax").with_dialect(Dialect::Postgres);
        err.position = Some(Position { line: 1, column: 5 });
        assert_eq!(
            err.to_string(),
            "Parse error (Postgres) at line 1, column 5: Bad syntax"
        );
    }

    #[test]
    fn test_cycle_error_display_and_members() {
        let err = CycleError {
            path: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "dependency cycle detected: a -> b -> a");
        assert_eq!(err.members(), &["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_recompose_error_wraps_cycle() {
        let err: RecomposeError = CycleError {
            path: vec!["x".into(), "x".into()],
        }
        .into();
        assert!(matches!(err, RecomposeError::Cycle(_)));
    }
}
