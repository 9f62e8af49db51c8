//! Serializable workspace snapshot.

use super::Workspace;
use crate::error::WorkspaceError;
use crate::types::{Dialect, SqlUnit, TestValueSet, ValidationOutcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Everything needed to restore a workspace.
///
/// `usedBy` and `depth` on each unit are written for readers of the JSON but
/// recomputed from `dependencies` when loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceSnapshot {
    pub version: u32,
    #[serde(default)]
    pub dialect: Dialect,
    pub saved_at: DateTime<Utc>,
    pub units: Vec<SqlUnit>,
    #[serde(default)]
    pub test_values: TestValueSet,
    #[serde(default)]
    pub open_units: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_unit: Option<String>,
    #[serde(default)]
    pub validation_results: BTreeMap<String, ValidationOutcome>,
}

impl Workspace {
    pub fn to_snapshot(&self) -> WorkspaceSnapshot {
        self.snapshot_at(Utc::now())
    }

    pub(crate) fn snapshot_at(&self, saved_at: DateTime<Utc>) -> WorkspaceSnapshot {
        WorkspaceSnapshot {
            version: SNAPSHOT_VERSION,
            dialect: self.dialect,
            saved_at,
            units: self.units.clone(),
            test_values: self.test_values.clone(),
            open_units: self.open_units.clone(),
            active_unit: self.active_unit.clone(),
            validation_results: self.validation_results.clone(),
        }
    }

    /// Restores a workspace, checking the unit invariants.
    pub fn from_snapshot(snapshot: WorkspaceSnapshot) -> Result<Self, WorkspaceError> {
        if snapshot.version > SNAPSHOT_VERSION {
            return Err(WorkspaceError::Snapshot(format!(
                "unsupported snapshot version {} (newest known is {SNAPSHOT_VERSION})",
                snapshot.version
            )));
        }

        let mut workspace = Workspace {
            dialect: snapshot.dialect,
            units: snapshot.units,
            test_values: snapshot.test_values,
            open_units: snapshot.open_units,
            active_unit: snapshot.active_unit,
            validation_results: snapshot.validation_results,
        };
        workspace.check_invariants()?;
        workspace.refresh_graph();
        Ok(workspace)
    }

    pub fn to_json(&self) -> Result<String, WorkspaceError> {
        serde_json::to_string_pretty(&self.to_snapshot())
            .map_err(|err| WorkspaceError::Snapshot(err.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, WorkspaceError> {
        let snapshot: WorkspaceSnapshot =
            serde_json::from_str(json).map_err(|err| WorkspaceError::Snapshot(err.to_string()))?;
        Self::from_snapshot(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DecomposeOptions, MockTable};
    use chrono::TimeZone;
    use serde_json::json;

    fn sample() -> Workspace {
        let mut ws = crate::decompose(
            "WITH a AS (SELECT 1 AS v), b (w) AS (SELECT v FROM a) SELECT w FROM b",
            &DecomposeOptions::default(),
        )
        .unwrap();
        ws.set_test_values(TestValueSet::new(vec![MockTable::new(
            "users",
            ["id"],
            vec![vec![json!(1)]],
        )]));
        ws.edit_unit("b", "SELECT v + 1 FROM a").unwrap();
        ws.open_unit("b").unwrap();
        ws.validate_all();
        ws
    }

    #[test]
    fn test_json_round_trip_is_lossless() {
        let ws = sample();
        let restored = Workspace::from_json(&ws.to_json().unwrap()).unwrap();
        assert_eq!(restored, ws);
    }

    #[test]
    fn test_snapshot_shape() {
        let saved_at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let json = serde_json::to_value(sample().snapshot_at(saved_at)).unwrap();
        assert_eq!(json["version"], SNAPSHOT_VERSION);
        assert_eq!(json["dialect"], "generic");
        assert_eq!(json["savedAt"], "2024-01-02T03:04:05Z");
        assert_eq!(json["openUnits"], json!(["main", "b"]));
        assert_eq!(json["activeUnit"], "b");
        assert_eq!(json["units"][1]["body"], "SELECT v + 1 FROM a");
        assert_eq!(json["units"][1]["originalBody"], "SELECT v FROM a");
        assert_eq!(json["testValues"]["tables"][0]["name"], "users");
        assert_eq!(json["validationResults"]["b"]["status"], "valid");
    }

    #[test]
    fn test_derived_fields_are_recomputed() {
        let mut snapshot = sample().to_snapshot();
        for unit in &mut snapshot.units {
            unit.used_by.clear();
            unit.depth = None;
        }
        let restored = Workspace::from_snapshot(snapshot).unwrap();
        assert_eq!(restored.unit("b").unwrap().depth(), Some(1));
        assert_eq!(restored.unit("a").unwrap().used_by().len(), 1);
    }

    #[test]
    fn test_rejects_two_main_units() {
        let mut snapshot = sample().to_snapshot();
        snapshot.units.push(SqlUnit::main("SELECT 2"));
        assert!(matches!(
            Workspace::from_snapshot(snapshot),
            Err(WorkspaceError::Snapshot(_))
        ));
    }

    #[test]
    fn test_rejects_future_version() {
        let mut snapshot = sample().to_snapshot();
        snapshot.version = SNAPSHOT_VERSION + 1;
        assert!(Workspace::from_snapshot(snapshot).is_err());
    }
}
