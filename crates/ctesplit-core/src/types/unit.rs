use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::common::normalize_name;
use super::validation::ValidationState;

/// Reserved name of the unit holding the trailing main query.
pub const MAIN_UNIT_NAME: &str = "main";

/// Whether a unit is the trailing query or one CTE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum UnitKind {
    Main,
    Cte,
}

/// One independently editable piece of a decomposed statement.
///
/// `used_by` and `depth` are derived from the dependency sets of the whole unit
/// collection and only ever written by the workspace after resolving the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SqlUnit {
    /// Name as written in SQL (quotes retained for quoted identifiers).
    pub name: String,

    pub kind: UnitKind,

    /// Body as produced by the last decomposition, without any WITH wrapper.
    pub original_body: String,

    /// Body including in-progress edits.
    pub body: String,

    /// Output column names, empty until known.
    #[serde(default)]
    pub columns: Vec<String>,

    /// Column list declared on the CTE itself, e.g. `WITH x (a, b) AS (...)`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub declared_columns: Vec<String>,

    /// Names of the units this unit's body references.
    #[serde(default)]
    pub dependencies: BTreeSet<String>,

    #[serde(default)]
    pub(crate) used_by: BTreeSet<String>,

    /// Longest dependency chain below this unit; `None` while the graph has a cycle.
    #[serde(default)]
    pub(crate) depth: Option<usize>,

    /// True when the body references its own name (`WITH RECURSIVE`).
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub recursive: bool,

    #[serde(default)]
    pub(crate) validation: ValidationState,
}

impl SqlUnit {
    /// Creates a CTE unit with no known dependencies.
    pub fn cte(name: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(name.into(), UnitKind::Cte, body.into())
    }

    /// Creates the main unit.
    pub fn main(body: impl Into<String>) -> Self {
        Self::new(MAIN_UNIT_NAME.to_string(), UnitKind::Main, body.into())
    }

    fn new(name: String, kind: UnitKind, body: String) -> Self {
        Self {
            name,
            kind,
            original_body: body.clone(),
            body,
            columns: Vec::new(),
            declared_columns: Vec::new(),
            dependencies: BTreeSet::new(),
            used_by: BTreeSet::new(),
            depth: None,
            recursive: false,
            validation: ValidationState::Unvalidated,
        }
    }

    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Normalized lookup key of this unit's name.
    pub fn key(&self) -> String {
        normalize_name(&self.name)
    }

    pub fn is_main(&self) -> bool {
        self.kind == UnitKind::Main
    }

    /// Units that reference this unit.
    pub fn used_by(&self) -> &BTreeSet<String> {
        &self.used_by
    }

    pub fn depth(&self) -> Option<usize> {
        self.depth
    }

    pub fn validation(&self) -> &ValidationState {
        &self.validation
    }

    /// True when the current body differs from the decomposed one.
    pub fn is_dirty(&self) -> bool {
        self.body != self.original_body
    }

    /// True when `name` is one of this unit's dependencies.
    pub fn depends_on(&self, name: &str) -> bool {
        let key = normalize_name(name);
        self.dependencies.iter().any(|dep| normalize_name(dep) == key)
    }
}
