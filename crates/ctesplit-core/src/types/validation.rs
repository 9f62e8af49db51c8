use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a unit failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ValidationError {
    /// The body is not valid SQL.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Column references that match no available source.
    #[error("unresolved columns: {}", .columns.join(", "))]
    UnresolvedColumns { columns: Vec<String> },

    /// Structurally valid but semantically inconsistent, e.g. an ambiguous reference.
    #[error("analysis error: {message}")]
    Analysis { message: String },
}

/// Result of validating a single unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ValidationOutcome {
    Valid { columns: Vec<String> },
    Invalid { error: ValidationError },
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid { .. })
    }

    pub fn error(&self) -> Option<&ValidationError> {
        match self {
            Self::Valid { .. } => None,
            Self::Invalid { error } => Some(error),
        }
    }
}

/// Per-unit validation state.
///
/// A unit only moves between `Valid` and `Invalid` through `Unvalidated`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ValidationState {
    #[default]
    Unvalidated,
    Valid,
    Invalid { error: ValidationError },
}

impl From<&ValidationOutcome> for ValidationState {
    fn from(outcome: &ValidationOutcome) -> Self {
        match outcome {
            ValidationOutcome::Valid { .. } => Self::Valid,
            ValidationOutcome::Invalid { error } => Self::Invalid {
                error: error.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unresolved_columns_display() {
        let err = ValidationError::UnresolvedColumns {
            columns: vec!["missing_col".into(), "x.other".into()],
        };
        assert_eq!(err.to_string(), "unresolved columns: missing_col, x.other");
    }

    #[test]
    fn test_outcome_json_shape() {
        let outcome = ValidationOutcome::Invalid {
            error: ValidationError::UnresolvedColumns {
                columns: vec!["missing_col".into()],
            },
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "invalid");
        assert_eq!(json["error"]["kind"], "unresolvedColumns");
        assert_eq!(json["error"]["columns"][0], "missing_col");

        let back: ValidationOutcome = serde_json::from_value(json).unwrap();
        assert_eq!(back, outcome);
    }

    #[test]
    fn test_state_from_outcome() {
        let valid = ValidationOutcome::Valid {
            columns: vec!["v".into()],
        };
        assert_eq!(ValidationState::from(&valid), ValidationState::Valid);
        assert!(valid.is_valid());
        assert!(valid.error().is_none());
    }
}
