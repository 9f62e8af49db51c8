//! The workspace aggregate: one editing session over a decomposed statement.
//!
//! A `Workspace` owns the unit collection, the test values, the open-unit
//! list and the latest validation results. It is created per session, mutated
//! in place by a single owner, and replaced wholesale by [`Workspace::decompose`].
//!
//! Dependencies are not recomputed on every edit. [`Workspace::edit_unit`] only
//! swaps the body and invalidates what it affects; the graph is refreshed by
//! [`Workspace::reanalyze`], which [`Workspace::generate_final_sql`] runs first.

use crate::decomposer::{decompose_units, units_from_statement};
use crate::error::{CycleError, DecomposeError, RecomposeError, WorkspaceError};
use crate::parser::{parse_statements, referenced_relations, statement_relations};
use crate::recomposer::recompose;
use crate::resolver::{DependencyGraph, ResolvedGraph};
use crate::types::{
    normalize_name, Dialect, RecomposeOptions, SqlUnit, TestValueSet, UnitKind,
    ValidationOutcome, ValidationState, MAIN_UNIT_NAME,
};
use crate::validator;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
#[cfg(feature = "tracing")]
use tracing::{debug, info_span};

mod command;
mod snapshot;

pub use command::{Command, CommandOutput};
pub use snapshot::{WorkspaceSnapshot, SNAPSHOT_VERSION};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Workspace {
    dialect: Dialect,
    units: Vec<SqlUnit>,
    test_values: TestValueSet,
    open_units: Vec<String>,
    active_unit: Option<String>,
    validation_results: BTreeMap<String, ValidationOutcome>,
}

impl Workspace {
    /// An empty workspace; populate it with [`Workspace::decompose`].
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            ..Self::default()
        }
    }

    /// Builds a workspace around already-split units, e.g. read back from disk.
    ///
    /// `used_by` and `depth` are derived from the units' dependencies. The main
    /// unit is opened.
    pub fn from_units(dialect: Dialect, units: Vec<SqlUnit>) -> Self {
        let mut workspace = Self::new(dialect);
        workspace.units = units;
        workspace.refresh_graph();
        workspace.open_main();
        workspace
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn units(&self) -> &[SqlUnit] {
        &self.units
    }

    pub fn unit(&self, name: &str) -> Option<&SqlUnit> {
        let key = normalize_name(name);
        self.units.iter().find(|unit| unit.key() == key)
    }

    fn unit_mut(&mut self, name: &str) -> Result<&mut SqlUnit, WorkspaceError> {
        let key = normalize_name(name);
        self.units
            .iter_mut()
            .find(|unit| unit.key() == key)
            .ok_or_else(|| WorkspaceError::UnknownUnit {
                name: name.to_string(),
            })
    }

    pub fn main_unit(&self) -> Option<&SqlUnit> {
        self.units.iter().find(|unit| unit.is_main())
    }

    pub fn test_values(&self) -> &TestValueSet {
        &self.test_values
    }

    pub fn open_units(&self) -> &[String] {
        &self.open_units
    }

    pub fn active_unit(&self) -> Option<&str> {
        self.active_unit.as_deref()
    }

    pub fn validation_results(&self) -> &BTreeMap<String, ValidationOutcome> {
        &self.validation_results
    }

    /// True when any unit has unsaved edits relative to its decomposed body.
    pub fn is_dirty(&self) -> bool {
        self.units.iter().any(SqlUnit::is_dirty)
    }

    /// Edges among units as of the last decomposition or reanalysis.
    pub fn graph(&self) -> DependencyGraph {
        DependencyGraph::build(&self.units)
    }

    pub fn resolve(&self) -> Result<ResolvedGraph, CycleError> {
        self.graph().resolve()
    }

    /// Replaces every unit with the decomposition of `sql`.
    ///
    /// Validation results are cleared and the main unit is opened. On failure
    /// the workspace is left as it was.
    pub fn decompose(&mut self, sql: &str) -> Result<(), DecomposeError> {
        let units = decompose_units(sql, self.dialect)?;
        self.units = units;
        self.validation_results.clear();
        self.open_units.clear();
        self.active_unit = None;
        self.refresh_graph();
        self.open_main();
        Ok(())
    }

    /// Replaces the current body of `name`.
    ///
    /// The unit and everything depending on it, directly or not, go back to
    /// `Unvalidated`. Dependencies are not recomputed.
    pub fn edit_unit(&mut self, name: &str, body: impl Into<String>) -> Result<(), WorkspaceError> {
        self.unit_mut(name)?.body = body.into();
        self.invalidate(name);

        #[cfg(feature = "tracing")]
        debug!(unit = name, "unit edited");

        Ok(())
    }

    /// Restores the body produced by the last decomposition.
    pub fn revert_unit(&mut self, name: &str) -> Result<(), WorkspaceError> {
        let unit = self.unit_mut(name)?;
        unit.body = unit.original_body.clone();
        self.invalidate(name);
        Ok(())
    }

    /// Removes a CTE unit.
    ///
    /// Units that depended on it keep the dependency, so recomposition reports
    /// it as dangling until their bodies stop referencing it.
    pub fn remove_unit(&mut self, name: &str) -> Result<SqlUnit, WorkspaceError> {
        let key = normalize_name(name);
        let position = self
            .units
            .iter()
            .position(|unit| unit.key() == key)
            .ok_or_else(|| WorkspaceError::UnknownUnit {
                name: name.to_string(),
            })?;
        if self.units[position].is_main() {
            return Err(WorkspaceError::CannotRemoveMain);
        }

        self.invalidate(name);
        let removed = self.units.remove(position);
        self.close_unit(&removed.name);
        self.validation_results.remove(&removed.name);
        self.refresh_graph();
        Ok(removed)
    }

    /// Recomputes every unit's dependencies from its current body.
    ///
    /// A referenced name is a dependency when it names a unit, or when it was
    /// already a dependency; the latter keeps references to removed units
    /// visible as dangling. All-or-nothing: if any body fails to parse nothing
    /// changes.
    pub fn reanalyze(&mut self) -> Result<(), RecomposeError> {
        #[cfg(feature = "tracing")]
        let _span = info_span!("reanalyze", units = self.units.len()).entered();

        let unit_names: HashMap<String, String> = self
            .units
            .iter()
            .filter(|unit| !unit.is_main())
            .map(|unit| (unit.key(), unit.name.clone()))
            .collect();

        let mut refreshed = Vec::with_capacity(self.units.len());
        for unit in &self.units {
            let references = self.body_references(unit)?;
            let own_key = unit.key();

            let mut known = unit_names.clone();
            for dependency in &unit.dependencies {
                known
                    .entry(normalize_name(dependency))
                    .or_insert_with(|| dependency.clone());
            }

            let dependencies: BTreeSet<String> = references
                .iter()
                .filter(|key| **key != own_key)
                .filter_map(|key| known.get(key).cloned())
                .collect();
            let recursive = !unit.is_main() && references.contains(&own_key);
            refreshed.push((dependencies, recursive));
        }

        for (unit, (dependencies, recursive)) in self.units.iter_mut().zip(refreshed) {
            unit.dependencies = dependencies;
            unit.recursive = recursive;
        }
        self.refresh_graph();
        Ok(())
    }

    fn body_references(&self, unit: &SqlUnit) -> Result<BTreeSet<String>, RecomposeError> {
        let statements =
            parse_statements(&unit.body, self.dialect).map_err(|error| RecomposeError::Parse {
                unit: unit.name.clone(),
                error,
            })?;
        Ok(statements
            .iter()
            .flat_map(|statement| match statement.query() {
                Some(query) => referenced_relations(query),
                None => statement_relations(statement.statement()),
            })
            .collect())
    }

    /// Re-decomposes one unit after an edit.
    ///
    /// A `WITH` clause typed into the unit is hoisted: each of its CTEs becomes
    /// a new unit, and the unit keeps only its trailing query. The new units
    /// are opened and their names returned. Dependencies of every unit are then
    /// refreshed.
    pub fn reanalyze_unit(&mut self, name: &str) -> Result<Vec<String>, WorkspaceError> {
        let unit = self.unit(name).ok_or_else(|| WorkspaceError::UnknownUnit {
            name: name.to_string(),
        })?;
        let unit_name = unit.name.clone();

        let mut statements =
            parse_statements(&unit.body, self.dialect).map_err(DecomposeError::from)?;
        let statement = match statements.len() {
            0 => return Err(DecomposeError::Empty.into()),
            1 => statements.swap_remove(0),
            count => return Err(DecomposeError::MultipleStatements { count }.into()),
        };

        let mut hoisted = Vec::new();
        let mut trailing_body = None;
        if statement.has_with_clause() {
            let mut split = units_from_statement(&statement)?;
            if let Some(main) = split.pop() {
                trailing_body = Some(main.body);
            }
            let existing: HashSet<String> = self.units.iter().map(SqlUnit::key).collect();
            for new_unit in &split {
                if existing.contains(&new_unit.key()) {
                    return Err(DecomposeError::DuplicateUnit {
                        name: new_unit.name.clone(),
                    }
                    .into());
                }
            }
            hoisted = split;
        }

        let previous = self.units.clone();
        if let Some(body) = trailing_body {
            self.unit_mut(&unit_name)?.body = body;
        }
        let names: Vec<String> = hoisted.iter().map(|unit| unit.name.clone()).collect();
        let insert_at = self
            .units
            .iter()
            .position(|unit| unit.key() == normalize_name(&unit_name))
            .unwrap_or(self.units.len());
        for (offset, unit) in hoisted.into_iter().enumerate() {
            self.units.insert(insert_at + offset, unit);
        }

        if let Err(err) = self.reanalyze() {
            self.units = previous;
            return Err(err.into());
        }
        self.invalidate(&unit_name);
        for new_name in &names {
            self.open_unit(new_name)?;
        }

        #[cfg(feature = "tracing")]
        debug!(unit = %unit_name, hoisted = names.len(), "unit reanalyzed");

        Ok(names)
    }

    /// Validates one unit and records the outcome.
    pub fn validate_unit(&mut self, name: &str) -> Result<ValidationOutcome, WorkspaceError> {
        let unit = self.unit(name).ok_or_else(|| WorkspaceError::UnknownUnit {
            name: name.to_string(),
        })?;
        let outcome =
            validator::validate_unit(unit, &self.units, &self.test_values, self.dialect);
        let unit_name = unit.name.clone();
        self.apply_outcome(&unit_name, &outcome);
        self.validation_results.insert(unit_name, outcome.clone());
        Ok(outcome)
    }

    /// Validates every unit, stores the results and returns them.
    pub fn validate_all(&mut self) -> &BTreeMap<String, ValidationOutcome> {
        let results = validator::validate_all(&self.units, &self.test_values, self.dialect);
        for (name, outcome) in &results {
            self.apply_outcome(name, outcome);
        }
        self.validation_results = results;
        &self.validation_results
    }

    fn apply_outcome(&mut self, name: &str, outcome: &ValidationOutcome) {
        let Ok(unit) = self.unit_mut(name) else {
            return;
        };
        unit.validation = ValidationState::from(outcome);
        if let ValidationOutcome::Valid { columns } = outcome {
            if !columns.is_empty() {
                unit.columns = columns.clone();
            }
        }
    }

    /// Refreshes dependencies from the current bodies, then assembles them.
    pub fn generate_final_sql(&mut self, options: &RecomposeOptions) -> Result<String, RecomposeError> {
        self.reanalyze()?;
        recompose(&self.units, options)
    }

    /// SQL running `name` against the workspace's test values.
    pub fn sandbox_sql(&mut self, name: &str) -> Result<String, RecomposeError> {
        let options = RecomposeOptions::sandbox(&self.test_values).with_target(name);
        self.generate_final_sql(&options)
    }

    /// Replaces the test values. Every unit becomes `Unvalidated`; validation
    /// is left to the caller.
    pub fn set_test_values(&mut self, test_values: TestValueSet) {
        self.test_values = test_values;
        for unit in &mut self.units {
            unit.validation = ValidationState::Unvalidated;
        }
        self.validation_results.clear();
    }

    /// Opens `name` and makes it active.
    pub fn open_unit(&mut self, name: &str) -> Result<(), WorkspaceError> {
        let unit_name = self
            .unit(name)
            .map(|unit| unit.name.clone())
            .ok_or_else(|| WorkspaceError::UnknownUnit {
                name: name.to_string(),
            })?;
        if !self.open_units.contains(&unit_name) {
            self.open_units.push(unit_name.clone());
        }
        self.active_unit = Some(unit_name);
        Ok(())
    }

    /// Closes `name`; the last remaining open unit becomes active.
    pub fn close_unit(&mut self, name: &str) {
        let key = normalize_name(name);
        self.open_units.retain(|open| normalize_name(open) != key);
        if self
            .active_unit
            .as_deref()
            .is_some_and(|active| normalize_name(active) == key)
        {
            self.active_unit = self.open_units.last().cloned();
        }
    }

    pub fn set_active_unit(&mut self, name: &str) -> Result<(), WorkspaceError> {
        self.open_unit(name)
    }

    fn open_main(&mut self) {
        let main = self
            .main_unit()
            .map(|unit| unit.name.clone())
            .unwrap_or_else(|| MAIN_UNIT_NAME.to_string());
        if self.unit(&main).is_some() && !self.open_units.contains(&main) {
            self.open_units.insert(0, main.clone());
        }
        if self.active_unit.is_none() && self.unit(&main).is_some() {
            self.active_unit = Some(main);
        }
    }

    /// Resets `name` and its transitive dependents to `Unvalidated`.
    fn invalidate(&mut self, name: &str) {
        let mut pending = vec![normalize_name(name)];
        let mut seen = HashSet::new();
        while let Some(key) = pending.pop() {
            if !seen.insert(key.clone()) {
                continue;
            }
            if let Some(unit) = self.units.iter_mut().find(|unit| unit.key() == key) {
                unit.validation = ValidationState::Unvalidated;
                self.validation_results.remove(&unit.name);
                pending.extend(unit.used_by.iter().map(|user| normalize_name(user)));
            }
        }
    }

    /// Recomputes `used_by` and `depth` from the current dependencies.
    fn refresh_graph(&mut self) {
        let graph = DependencyGraph::build(&self.units);
        let used_by: Vec<BTreeSet<String>> = self
            .units
            .iter()
            .map(|unit| {
                graph
                    .used_by(&unit.name)
                    .into_iter()
                    .map(str::to_string)
                    .collect()
            })
            .collect();
        let resolved = graph.resolve().ok();

        for (unit, used_by) in self.units.iter_mut().zip(used_by) {
            unit.used_by = used_by;
            unit.depth = resolved.as_ref().and_then(|graph| graph.depth(&unit.name));
        }
    }

    /// Checks the structural invariants a loaded workspace must hold.
    fn check_invariants(&self) -> Result<(), WorkspaceError> {
        let mains = self
            .units
            .iter()
            .filter(|unit| unit.kind == UnitKind::Main)
            .count();
        if mains != 1 {
            return Err(WorkspaceError::Snapshot(format!(
                "expected exactly one main unit, found {mains}"
            )));
        }

        let mut keys = HashSet::new();
        for unit in &self.units {
            if !keys.insert(unit.key()) {
                return Err(WorkspaceError::Snapshot(format!(
                    "unit '{}' appears more than once",
                    unit.name
                )));
            }
        }

        for name in self.open_units.iter().chain(self.active_unit.as_ref()) {
            if self.unit(name).is_none() {
                return Err(WorkspaceError::Snapshot(format!(
                    "open unit '{name}' does not exist"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decompose;
    use crate::types::{DecomposeOptions, MockTable, ValidationError};
    use serde_json::json;

    const CHAIN: &str = "WITH a AS (SELECT 1 AS v), b AS (SELECT v FROM a) SELECT v FROM b";

    fn workspace(sql: &str) -> Workspace {
        decompose(sql, &DecomposeOptions::default()).unwrap()
    }

    #[test]
    fn test_decompose_opens_main_and_computes_graph() {
        let ws = workspace(CHAIN);
        assert_eq!(ws.open_units(), ["main"]);
        assert_eq!(ws.active_unit(), Some("main"));
        assert_eq!(ws.unit("a").unwrap().depth(), Some(0));
        assert_eq!(ws.unit("b").unwrap().depth(), Some(1));
        assert_eq!(ws.main_unit().unwrap().depth(), Some(2));
        assert_eq!(
            ws.unit("a").unwrap().used_by(),
            &BTreeSet::from(["b".to_string()])
        );
    }

    #[test]
    fn test_edit_invalidates_transitive_dependents_only() {
        let mut ws = workspace(
            "WITH a AS (SELECT 1 AS v), b AS (SELECT v FROM a), c AS (SELECT 2 AS w) \
             SELECT v, w FROM b, c",
        );
        ws.validate_all();
        assert!(ws.units().iter().all(|u| *u.validation() == ValidationState::Valid));

        ws.edit_unit("a", "SELECT 1 AS v, 2 AS extra").unwrap();
        assert_eq!(*ws.unit("a").unwrap().validation(), ValidationState::Unvalidated);
        assert_eq!(*ws.unit("b").unwrap().validation(), ValidationState::Unvalidated);
        assert_eq!(*ws.unit("main").unwrap().validation(), ValidationState::Unvalidated);
        assert_eq!(*ws.unit("c").unwrap().validation(), ValidationState::Valid);
        assert!(ws.validation_results().contains_key("c"));
        assert!(!ws.validation_results().contains_key("b"));
        assert!(ws.is_dirty());
    }

    #[test]
    fn test_edit_does_not_touch_dependencies_until_reanalyze() {
        let mut ws = workspace(CHAIN);
        ws.edit_unit("main", "SELECT v FROM a").unwrap();
        assert!(ws.main_unit().unwrap().depends_on("b"));

        ws.reanalyze().unwrap();
        assert!(ws.main_unit().unwrap().depends_on("a"));
        assert!(!ws.main_unit().unwrap().depends_on("b"));
        assert_eq!(ws.main_unit().unwrap().depth(), Some(1));
    }

    #[test]
    fn test_revert_restores_original_body() {
        let mut ws = workspace(CHAIN);
        ws.edit_unit("b", "SELECT 3 AS v").unwrap();
        ws.revert_unit("b").unwrap();
        assert!(!ws.is_dirty());
        assert_eq!(ws.unit("b").unwrap().body, "SELECT v FROM a");
    }

    #[test]
    fn test_generate_final_sql_uses_edited_bodies() {
        let mut ws = workspace(CHAIN);
        ws.edit_unit("b", "SELECT v * 2 AS v FROM a").unwrap();
        let sql = ws.generate_final_sql(&RecomposeOptions::default()).unwrap();
        assert_eq!(
            sql,
            "WITH a AS (\nSELECT 1 AS v\n),\nb AS (\nSELECT v * 2 AS v FROM a\n)\nSELECT v FROM b"
        );
    }

    #[test]
    fn test_unparseable_edit_fails_recomposition_without_changes() {
        let mut ws = workspace(CHAIN);
        ws.edit_unit("b", "SELECT v FROM").unwrap();
        let before = ws.clone();
        let err = ws.generate_final_sql(&RecomposeOptions::default()).unwrap_err();
        assert!(matches!(err, RecomposeError::Parse { ref unit, .. } if unit == "b"));
        assert_eq!(ws, before);
    }

    #[test]
    fn test_removed_unit_surfaces_as_dangling_dependency() {
        let mut ws = workspace(CHAIN);
        ws.remove_unit("a").unwrap();
        let err = ws.generate_final_sql(&RecomposeOptions::default()).unwrap_err();
        assert_eq!(
            err,
            RecomposeError::UnknownDependency {
                unit: "b".into(),
                dependency: "a".into()
            }
        );
        assert_eq!(ws.remove_unit("main").unwrap_err(), WorkspaceError::CannotRemoveMain);
    }

    #[test]
    fn test_reanalyze_unit_hoists_new_cte() {
        let mut ws = workspace(CHAIN);
        ws.edit_unit(
            "main",
            "WITH doubled AS (SELECT v * 2 AS d FROM b) SELECT d FROM doubled",
        )
        .unwrap();

        let added = ws.reanalyze_unit("main").unwrap();
        assert_eq!(added, vec!["doubled"]);
        assert_eq!(ws.main_unit().unwrap().body, "SELECT d FROM doubled");
        assert!(ws.unit("doubled").unwrap().depends_on("b"));
        assert_eq!(ws.main_unit().unwrap().depth(), Some(3));
        assert_eq!(ws.active_unit(), Some("doubled"));
        assert!(ws.open_units().contains(&"doubled".to_string()));
    }

    #[test]
    fn test_reanalyze_unit_rejects_name_collision() {
        let mut ws = workspace(CHAIN);
        ws.edit_unit("main", "WITH a AS (SELECT 9 AS v) SELECT v FROM a")
            .unwrap();
        let err = ws.reanalyze_unit("main").unwrap_err();
        assert!(matches!(
            err,
            WorkspaceError::Decompose(DecomposeError::DuplicateUnit { .. })
        ));
    }

    #[test]
    fn test_validate_all_stores_every_outcome() {
        let mut ws = workspace("WITH x AS (SELECT 1 AS v) SELECT v FROM x");
        ws.edit_unit("main", "SELECT missing_col FROM x").unwrap();
        let results = ws.validate_all().clone();

        assert!(results["x"].is_valid());
        assert_eq!(
            results["main"].error(),
            Some(&ValidationError::UnresolvedColumns {
                columns: vec!["missing_col".into()]
            })
        );
        assert!(matches!(
            ws.main_unit().unwrap().validation(),
            ValidationState::Invalid { .. }
        ));
    }

    #[test]
    fn test_valid_unit_becomes_invalid_only_after_an_edit() {
        let mut ws = workspace("WITH x AS (SELECT 1 AS v) SELECT v FROM x");
        ws.validate_all();
        assert_eq!(*ws.main_unit().unwrap().validation(), ValidationState::Valid);

        ws.validate_all();
        assert_eq!(*ws.main_unit().unwrap().validation(), ValidationState::Valid);

        ws.edit_unit("x", "SELECT 1 AS w").unwrap();
        assert_eq!(
            *ws.main_unit().unwrap().validation(),
            ValidationState::Unvalidated
        );

        ws.validate_all();
        assert!(matches!(
            ws.main_unit().unwrap().validation(),
            ValidationState::Invalid { .. }
        ));
    }

    #[test]
    fn test_set_test_values_resets_validation() {
        let mut ws = workspace(CHAIN);
        ws.validate_all();
        ws.set_test_values(TestValueSet::new(vec![MockTable::new(
            "users",
            ["id"],
            vec![vec![json!(1)]],
        )]));
        assert!(ws.validation_results().is_empty());
        assert!(ws
            .units()
            .iter()
            .all(|u| *u.validation() == ValidationState::Unvalidated));
    }

    #[test]
    fn test_sandbox_sql_targets_one_unit() {
        let mut ws = workspace(
            "WITH active AS (SELECT id FROM users WHERE active) SELECT id FROM active",
        );
        ws.set_test_values(TestValueSet::new(vec![MockTable::new(
            "users",
            ["id", "active"],
            vec![vec![json!(1), json!(true)]],
        )]));
        let sql = ws.sandbox_sql("active").unwrap();
        assert_eq!(
            sql,
            "WITH users AS (\nSELECT * FROM (VALUES (1, TRUE)) AS users (id, active)\n)\n\
             SELECT id FROM users WHERE active"
        );
    }

    #[test]
    fn test_open_and_close_units() {
        let mut ws = workspace(CHAIN);
        ws.open_unit("A").unwrap();
        ws.open_unit("b").unwrap();
        assert_eq!(ws.open_units(), ["main", "a", "b"]);
        ws.close_unit("b");
        assert_eq!(ws.active_unit(), Some("a"));
        assert!(matches!(
            ws.open_unit("zzz"),
            Err(WorkspaceError::UnknownUnit { .. })
        ));
    }
}
