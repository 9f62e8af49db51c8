//! Explicit command objects driving a workspace.
//!
//! Every state change a front end can make is one `Command`, so a browser
//! editor, the CLI and tests all go through the same entry point.

use super::Workspace;
use crate::error::WorkspaceError;
use crate::types::{RecomposeOptions, TestValueSet, ValidationOutcome};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Command {
    /// Replace every unit with the decomposition of `sql`.
    Decompose { sql: String },
    EditUnit { name: String, body: String },
    RevertUnit { name: String },
    /// Hoist a `WITH` clause typed into a unit into new units.
    ReanalyzeUnit { name: String },
    /// Refresh dependencies from the current bodies.
    Reanalyze,
    RemoveUnit { name: String },
    ValidateAll,
    Recompose {
        #[serde(default)]
        options: RecomposeOptions,
    },
    SetTestValues {
        #[serde(rename = "testValues")]
        test_values: TestValueSet,
    },
    OpenUnit { name: String },
    CloseUnit { name: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CommandOutput {
    /// The command changed state and has nothing else to report.
    Done,
    /// Names of units the command created.
    Units { names: Vec<String> },
    Validation {
        results: BTreeMap<String, ValidationOutcome>,
    },
    Sql { sql: String },
}

impl Workspace {
    /// Runs one command. A failed command leaves the workspace unchanged.
    pub fn execute(&mut self, command: Command) -> Result<CommandOutput, WorkspaceError> {
        let output = match command {
            Command::Decompose { sql } => {
                self.decompose(&sql)?;
                CommandOutput::Done
            }
            Command::EditUnit { name, body } => {
                self.edit_unit(&name, body)?;
                CommandOutput::Done
            }
            Command::RevertUnit { name } => {
                self.revert_unit(&name)?;
                CommandOutput::Done
            }
            Command::ReanalyzeUnit { name } => CommandOutput::Units {
                names: self.reanalyze_unit(&name)?,
            },
            Command::Reanalyze => {
                self.reanalyze()?;
                CommandOutput::Done
            }
            Command::RemoveUnit { name } => {
                self.remove_unit(&name)?;
                CommandOutput::Done
            }
            Command::ValidateAll => CommandOutput::Validation {
                results: self.validate_all().clone(),
            },
            Command::Recompose { options } => CommandOutput::Sql {
                sql: self.generate_final_sql(&options)?,
            },
            Command::SetTestValues { test_values } => {
                self.set_test_values(test_values);
                CommandOutput::Done
            }
            Command::OpenUnit { name } => {
                self.open_unit(&name)?;
                CommandOutput::Done
            }
            Command::CloseUnit { name } => {
                self.close_unit(&name);
                CommandOutput::Done
            }
        };
        Ok(output)
    }
}
