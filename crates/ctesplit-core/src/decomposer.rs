//! Splitting one statement into units.

use crate::error::DecomposeError;
use crate::parser::projection::projected_columns;
use crate::parser::{parse_statements, referenced_relations, statement_relations, ParsedStatement};
use crate::types::{normalize_name, DecomposeOptions, Dialect, SqlUnit, MAIN_UNIT_NAME};
use crate::workspace::Workspace;
use std::collections::{BTreeSet, HashMap};
#[cfg(feature = "tracing")]
use tracing::{debug, info_span};

/// Decomposes `sql` into a fresh workspace with the main unit open.
pub fn decompose(sql: &str, options: &DecomposeOptions) -> Result<Workspace, DecomposeError> {
    let units = decompose_units(sql, options.dialect)?;
    Ok(Workspace::from_units(options.dialect, units))
}

/// Decomposes `sql` into one unit per CTE followed by the main unit.
///
/// Dependencies only name CTEs of the same statement; real tables are left
/// out. Units come back in declaration order with the main unit last.
pub fn decompose_units(sql: &str, dialect: Dialect) -> Result<Vec<SqlUnit>, DecomposeError> {
    #[cfg(feature = "tracing")]
    let _span = info_span!("decompose", dialect = ?dialect, bytes = sql.len()).entered();

    if sql.trim().is_empty() {
        return Err(DecomposeError::Empty);
    }

    let mut statements = parse_statements(sql, dialect)?;
    match statements.len() {
        0 => return Err(DecomposeError::Empty),
        1 => {}
        count => return Err(DecomposeError::MultipleStatements { count }),
    }
    let statement = statements.swap_remove(0);

    let units = units_from_statement(&statement)?;

    #[cfg(feature = "tracing")]
    debug!(units = units.len(), "statement decomposed");

    Ok(units)
}

pub(crate) fn units_from_statement(
    statement: &ParsedStatement,
) -> Result<Vec<SqlUnit>, DecomposeError> {
    let ctes = statement.cte_definitions();

    let mut declared: HashMap<String, String> = HashMap::with_capacity(ctes.len());
    for cte in &ctes {
        if cte.key == MAIN_UNIT_NAME {
            return Err(DecomposeError::ReservedName {
                name: cte.name.clone(),
            });
        }
        if declared.insert(cte.key.clone(), cte.name.clone()).is_some() {
            return Err(DecomposeError::DuplicateUnit {
                name: cte.name.clone(),
            });
        }
    }

    let mut units = Vec::with_capacity(ctes.len() + 1);
    for cte in &ctes {
        let columns = if cte.declared_columns.is_empty() {
            projected_columns(&cte.query).unwrap_or_default()
        } else {
            cte.declared_columns.iter().map(|c| normalize_name(c)).collect()
        };

        let mut unit = SqlUnit::cte(cte.name.clone(), cte.body.clone()).with_columns(columns);
        unit.dependencies =
            unit_dependencies(referenced_relations(&cte.query), Some(&cte.key), &declared);
        unit.declared_columns = cte.declared_columns.clone();
        unit.recursive = cte.recursive;
        units.push(unit);
    }

    let mut main = SqlUnit::main(statement.main_body());
    match statement.main_query() {
        Some(query) => {
            main.columns = projected_columns(&query).unwrap_or_default();
            main.dependencies = unit_dependencies(referenced_relations(&query), None, &declared);
        }
        None => {
            main.dependencies =
                unit_dependencies(statement_relations(statement.statement()), None, &declared);
        }
    }
    units.push(main);

    Ok(units)
}

/// Referenced relations that name a declared CTE, other than the unit itself.
fn unit_dependencies(
    references: BTreeSet<String>,
    own_key: Option<&String>,
    declared: &HashMap<String, String>,
) -> BTreeSet<String> {
    references
        .into_iter()
        .filter(|key| Some(key) != own_key)
        .filter_map(|key| declared.get(&key).cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UnitKind;

    fn units(sql: &str) -> Vec<SqlUnit> {
        decompose_units(sql, Dialect::Generic).unwrap()
    }

    #[test]
    fn test_simple_decomposition() {
        let units = units("WITH x AS (SELECT 1 AS v) SELECT v FROM x");
        assert_eq!(units.len(), 2);

        assert_eq!(units[0].name, "x");
        assert_eq!(units[0].kind, UnitKind::Cte);
        assert_eq!(units[0].body, "SELECT 1 AS v");
        assert!(units[0].dependencies.is_empty());
        assert_eq!(units[0].columns, vec!["v"]);

        assert_eq!(units[1].name, MAIN_UNIT_NAME);
        assert_eq!(units[1].kind, UnitKind::Main);
        assert_eq!(units[1].body, "SELECT v FROM x");
        assert_eq!(units[1].dependencies, BTreeSet::from(["x".to_string()]));
    }

    #[test]
    fn test_no_with_clause_is_single_main_unit() {
        let units = units("SELECT id FROM users");
        assert_eq!(units.len(), 1);
        assert!(units[0].is_main());
        assert_eq!(units[0].body, "SELECT id FROM users");
        assert!(units[0].dependencies.is_empty());
    }

    #[test]
    fn test_real_tables_are_not_dependencies() {
        let units = units(
            "WITH active AS (SELECT * FROM users WHERE active) \
             SELECT a.id FROM active a JOIN orders o ON o.user_id = a.id",
        );
        assert!(units[0].dependencies.is_empty());
        assert_eq!(units[1].dependencies, BTreeSet::from(["active".to_string()]));
    }

    #[test]
    fn test_declared_columns_are_kept() {
        let units = units("WITH x (a, b) AS (SELECT 1, 2) SELECT a FROM x");
        assert_eq!(units[0].declared_columns, vec!["a", "b"]);
        assert_eq!(units[0].columns, vec!["a", "b"]);
    }

    #[test]
    fn test_recursive_cte_has_no_self_edge() {
        let units = units(
            "WITH RECURSIVE n AS (SELECT 1 AS i UNION ALL SELECT i + 1 FROM n WHERE i < 3) \
             SELECT i FROM n",
        );
        assert!(units[0].recursive);
        assert!(units[0].dependencies.is_empty());
        assert_eq!(units[0].columns, vec!["i"]);
    }

    #[test]
    fn test_blank_input_is_empty() {
        assert_eq!(
            decompose_units("  \n\t", Dialect::Generic).unwrap_err(),
            DecomposeError::Empty
        );
    }

    #[test]
    fn test_parse_failure() {
        assert!(matches!(
            decompose_units("WITH x AS (SELECT FROM", Dialect::Generic),
            Err(DecomposeError::Parse(_))
        ));
    }

    #[test]
    fn test_multiple_statements_are_rejected() {
        assert_eq!(
            decompose_units("SELECT 1; SELECT 2;", Dialect::Generic).unwrap_err(),
            DecomposeError::MultipleStatements { count: 2 }
        );
    }

    #[test]
    fn test_cte_named_main_is_reserved() {
        assert!(matches!(
            decompose_units("WITH main AS (SELECT 1) SELECT * FROM main", Dialect::Generic),
            Err(DecomposeError::ReservedName { .. })
        ));
    }

    #[test]
    fn test_duplicate_cte_names() {
        let result = decompose_units(
            "WITH x AS (SELECT 1), X AS (SELECT 2) SELECT * FROM x",
            Dialect::Generic,
        );
        assert!(matches!(result, Err(DecomposeError::DuplicateUnit { .. })));
    }

    #[test]
    fn test_insert_statement_is_main_only() {
        let units = units("INSERT INTO archive SELECT * FROM events");
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].body, "INSERT INTO archive SELECT * FROM events");
    }
}
