//! Options accepted by decomposition and recomposition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::Dialect;
use super::test_values::TestValueSet;

/// Options controlling how a statement is split.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DecomposeOptions {
    #[serde(default)]
    pub dialect: Dialect,
}

/// Options controlling how units are assembled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RecomposeOptions {
    /// Mock bodies for this call only.
    ///
    /// A mock whose name matches a unit replaces that unit's body. Every other
    /// mock is emitted as a leading CTE, shadowing the real table.
    #[serde(default, skip_serializing_if = "TestValueSet::is_empty")]
    pub mocks: TestValueSet,

    /// Emit only this unit (as the trailing query) and what it depends on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

impl RecomposeOptions {
    /// Sandbox options: every test value becomes a mock.
    pub fn sandbox(test_values: &TestValueSet) -> Self {
        Self {
            mocks: test_values.clone(),
            target: None,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }
}
