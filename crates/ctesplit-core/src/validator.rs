//! Per-unit validation against the columns of its dependencies.
//!
//! A unit is checked in isolation: its body is parsed, and every column
//! reference is resolved against the relations the body reads from. Those
//! are the unit's dependencies (with the columns known so far), any test
//! values, and CTEs declared inside the body itself. Real tables without test
//! values are open: any column may come from them.

use crate::error::CycleError;
use crate::parser::parse_sql_with_dialect;
use crate::recomposer::clean_body;
use crate::resolver::resolve;
use crate::types::{
    normalize_name, Dialect, SqlUnit, TestValueSet, ValidationError, ValidationOutcome,
};
use sqlparser::ast::{Query, Statement};
use std::collections::{BTreeMap, HashMap};
#[cfg(feature = "tracing")]
use tracing::{debug, info_span};

mod scope;

use scope::{Catalog, Checker};

/// Validates one unit against the columns currently recorded on `units`.
pub fn validate_unit(
    unit: &SqlUnit,
    units: &[SqlUnit],
    test_values: &TestValueSet,
    dialect: Dialect,
) -> ValidationOutcome {
    let known = known_columns(units);
    validate_with(unit, &known, test_values, dialect)
}

/// Validates every unit, collecting one outcome per unit name.
///
/// Units are visited dependencies first, so columns discovered while
/// validating a unit are available to the units that read from it. Units on a
/// dependency cycle fail with an analysis error; the rest are still checked.
pub fn validate_all(
    units: &[SqlUnit],
    test_values: &TestValueSet,
    dialect: Dialect,
) -> BTreeMap<String, ValidationOutcome> {
    #[cfg(feature = "tracing")]
    let _span = info_span!("validate_all", units = units.len()).entered();

    let find = |name: &str| {
        let key = normalize_name(name);
        units.iter().find(|unit| unit.key() == key)
    };

    let (order, cycle): (Vec<&SqlUnit>, Option<CycleError>) = match resolve(units) {
        Ok(resolved) => (resolved.ordered().into_iter().filter_map(find).collect(), None),
        Err(cycle) => {
            let mut order: Vec<&SqlUnit> = units.iter().collect();
            order.sort_by_key(|unit| unit.key());
            (order, Some(cycle))
        }
    };

    let mut known = known_columns(units);
    let mut results = BTreeMap::new();
    for unit in order {
        let on_cycle = cycle.as_ref().filter(|cycle| {
            cycle
                .members()
                .iter()
                .any(|member| normalize_name(member) == unit.key())
        });

        let outcome = match on_cycle {
            Some(cycle) => ValidationOutcome::Invalid {
                error: ValidationError::Analysis {
                    message: cycle.to_string(),
                },
            },
            None => validate_with(unit, &known, test_values, dialect),
        };

        if let ValidationOutcome::Valid { columns } = &outcome {
            if !columns.is_empty() {
                known.insert(unit.key(), columns.clone());
            }
        }
        results.insert(unit.name.clone(), outcome);
    }

    #[cfg(feature = "tracing")]
    debug!(
        invalid = results.values().filter(|o| !o.is_valid()).count(),
        "units validated"
    );

    results
}

fn known_columns(units: &[SqlUnit]) -> HashMap<String, Vec<String>> {
    units
        .iter()
        .map(|unit| (unit.key(), unit.columns.clone()))
        .collect()
}

/// The relations a unit may read: test values, its dependencies and, for a
/// recursive unit, itself.
fn catalog_for(
    unit: &SqlUnit,
    known: &HashMap<String, Vec<String>>,
    test_values: &TestValueSet,
) -> Catalog {
    let mut catalog = Catalog::default();

    for dependency in &unit.dependencies {
        let key = normalize_name(dependency);
        let columns = known.get(&key).filter(|columns| !columns.is_empty()).cloned();
        catalog.insert(key, columns);
    }

    if unit.recursive {
        let declared = (!unit.declared_columns.is_empty()).then(|| {
            unit.declared_columns
                .iter()
                .map(|column| normalize_name(column))
                .collect()
        });
        catalog.insert(unit.key(), declared);
    }

    for mock in test_values.iter() {
        catalog.insert(mock.key(), Some(mock.columns.clone()));
    }

    catalog
}

fn validate_with(
    unit: &SqlUnit,
    known: &HashMap<String, Vec<String>>,
    test_values: &TestValueSet,
    dialect: Dialect,
) -> ValidationOutcome {
    let invalid = |error| ValidationOutcome::Invalid { error };

    let mut statements = match parse_sql_with_dialect(clean_body(&unit.body), dialect) {
        Ok(statements) => statements,
        Err(err) => {
            return invalid(ValidationError::Parse {
                message: err.to_string(),
            })
        }
    };
    if statements.len() != 1 {
        return invalid(ValidationError::Parse {
            message: format!("expected one statement, found {}", statements.len()),
        });
    }
    let statement = statements.swap_remove(0);

    let Some(query) = statement_query(&statement) else {
        return ValidationOutcome::Valid {
            columns: Vec::new(),
        };
    };

    let catalog = catalog_for(unit, known, test_values);
    let mut checker = Checker::new(&catalog);
    let output = checker.check_query(query);

    let outcome = if !checker.unresolved().is_empty() {
        invalid(ValidationError::UnresolvedColumns {
            columns: checker.unresolved().to_vec(),
        })
    } else if !checker.ambiguous().is_empty() {
        invalid(ValidationError::Analysis {
            message: format!(
                "ambiguous column reference: {}",
                checker.ambiguous().join(", ")
            ),
        })
    } else if statement_is_query(&statement) {
        let columns = if unit.declared_columns.is_empty() {
            output.unwrap_or_default()
        } else {
            unit.declared_columns
                .iter()
                .map(|column| normalize_name(column))
                .collect()
        };
        ValidationOutcome::Valid { columns }
    } else {
        ValidationOutcome::Valid {
            columns: Vec::new(),
        }
    };

    #[cfg(feature = "tracing")]
    debug!(unit = %unit.name, valid = outcome.is_valid(), "unit validated");

    outcome
}

fn statement_is_query(statement: &Statement) -> bool {
    matches!(statement, Statement::Query(_))
}

/// The query whose columns a statement reads.
fn statement_query(statement: &Statement) -> Option<&Query> {
    match statement {
        Statement::Query(query) => Some(&**query),
        Statement::Insert(insert) => insert.source.as_deref(),
        Statement::CreateTable(create) => create.query.as_deref(),
        Statement::CreateView { query, .. } => Some(&**query),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MockTable;
    use rstest::rstest;

    fn x_unit() -> SqlUnit {
        SqlUnit::cte("x", "SELECT 1 AS v").with_columns(["v"])
    }

    fn check(body: &str, units: &[SqlUnit]) -> ValidationOutcome {
        let unit = SqlUnit::main(body).with_dependencies(
            units
                .iter()
                .filter(|u| !u.is_main())
                .map(|u| u.name.clone()),
        );
        validate_unit(&unit, units, &TestValueSet::default(), Dialect::Generic)
    }

    #[test]
    fn test_unresolved_column_scenario() {
        assert_eq!(
            check("SELECT missing_col FROM x", &[x_unit()]),
            ValidationOutcome::Invalid {
                error: ValidationError::UnresolvedColumns {
                    columns: vec!["missing_col".into()]
                }
            }
        );
    }

    #[rstest]
    #[case::bare_column("SELECT v FROM x")]
    #[case::qualified("SELECT x.v FROM x")]
    #[case::aliased_table("SELECT t.v FROM x AS t")]
    #[case::order_by_alias("SELECT v AS val FROM x ORDER BY val")]
    #[case::group_by_alias("SELECT v AS k, COUNT(*) AS n FROM x GROUP BY k")]
    #[case::real_table_is_open("SELECT anything FROM users")]
    #[case::correlated("SELECT v FROM x WHERE EXISTS (SELECT 1 FROM users u WHERE u.id = x.v)")]
    #[case::derived("SELECT d.w FROM (SELECT v AS w FROM x) AS d")]
    #[case::local_cte("WITH y AS (SELECT v FROM x) SELECT v FROM y")]
    #[case::using_join("SELECT v FROM x JOIN x AS other USING (v)")]
    #[case::struct_field("SELECT v.field FROM x")]
    #[case::lateral_sees_left_sources("SELECT l.w FROM x, LATERAL (SELECT x.v AS w) AS l")]
    #[case::lateral_join("SELECT l.w FROM x CROSS JOIN LATERAL (SELECT v + 1 AS w) AS l")]
    #[case::set_operation_order_by("SELECT v FROM x UNION SELECT v FROM x ORDER BY v")]
    #[case::any_subquery("SELECT v FROM x WHERE v = ANY(SELECT v FROM x)")]
    fn test_valid_bodies(#[case] body: &str) {
        let outcome = check(body, &[x_unit()]);
        assert!(outcome.is_valid(), "{body}: {outcome:?}");
    }

    #[rstest]
    #[case::unknown_qualifier("SELECT y.v FROM x", "y.v")]
    #[case::missing_on_alias("SELECT t.w FROM x AS t", "t.w")]
    #[case::derived_hides_columns("SELECT v FROM (SELECT v AS w FROM x) AS d", "v")]
    #[case::in_where("SELECT v FROM x WHERE nope > 1", "nope")]
    #[case::set_operation_order_by("SELECT v FROM x UNION SELECT v FROM x ORDER BY nope", "nope")]
    #[case::substring("SELECT SUBSTRING(nope FROM 1 FOR 2) AS s FROM x", "nope")]
    #[case::trim("SELECT TRIM(nope) AS s FROM x", "nope")]
    #[case::at_time_zone("SELECT nope AT TIME ZONE 'UTC' AS ts FROM x", "nope")]
    #[case::any_op("SELECT v FROM x WHERE nope = ANY(SELECT v FROM x)", "nope")]
    #[case::inside_any_subquery("SELECT v FROM x WHERE v = ANY(SELECT nope FROM x)", "nope")]
    #[case::non_lateral_derived("SELECT d.w FROM x, (SELECT x.v AS w) AS d", "x.v")]
    fn test_unresolved_bodies(#[case] body: &str, #[case] expected: &str) {
        assert_eq!(
            check(body, &[x_unit()]),
            ValidationOutcome::Invalid {
                error: ValidationError::UnresolvedColumns {
                    columns: vec![expected.to_string()]
                }
            }
        );
    }

    #[test]
    fn test_ambiguous_reference_is_analysis_error() {
        let y = SqlUnit::cte("y", "SELECT 2 AS v").with_columns(["v"]);
        let outcome = check("SELECT v FROM x, y", &[x_unit(), y]);
        assert!(matches!(
            outcome.error(),
            Some(ValidationError::Analysis { message }) if message.contains("ambiguous")
        ));
    }

    #[test]
    fn test_parse_error() {
        let outcome = check("SELECT * FROM (", &[]);
        assert!(matches!(outcome.error(), Some(ValidationError::Parse { .. })));
    }

    #[test]
    fn test_output_columns_are_derived() {
        assert_eq!(
            check("SELECT v, v + 1 AS plus_one, x.* FROM x", &[x_unit()]),
            ValidationOutcome::Valid {
                columns: vec!["v".into(), "plus_one".into(), "v".into()]
            }
        );
    }

    #[test]
    fn test_mock_columns_close_real_tables() {
        let mocks = TestValueSet::new(vec![MockTable::new("users", ["id"], vec![])]);
        let unit = SqlUnit::main("SELECT email FROM users");
        let outcome = validate_unit(&unit, &[], &mocks, Dialect::Generic);
        assert_eq!(
            outcome.error(),
            Some(&ValidationError::UnresolvedColumns {
                columns: vec!["email".into()]
            })
        );
    }

    #[test]
    fn test_validate_all_propagates_columns_and_collects_every_failure() {
        let units = vec![
            SqlUnit::cte("a", "SELECT 1 AS v"),
            SqlUnit::cte("b", "SELECT v, nope FROM a").with_dependencies(["a"]),
            SqlUnit::cte("c", "SELECT v AS w FROM a").with_dependencies(["a"]),
            SqlUnit::main("SELECT w, zzz FROM c").with_dependencies(["c"]),
        ];
        let results = validate_all(&units, &TestValueSet::default(), Dialect::Generic);
        assert_eq!(results.len(), 4);
        assert!(results["a"].is_valid());
        assert_eq!(
            results["b"].error(),
            Some(&ValidationError::UnresolvedColumns {
                columns: vec!["nope".into()]
            })
        );
        assert!(results["c"].is_valid());
        assert_eq!(
            results["main"].error(),
            Some(&ValidationError::UnresolvedColumns {
                columns: vec!["zzz".into()]
            })
        );
    }

    #[test]
    fn test_validate_all_reports_cycle_members() {
        let units = vec![
            SqlUnit::cte("a", "SELECT * FROM b").with_dependencies(["b"]),
            SqlUnit::cte("b", "SELECT * FROM a").with_dependencies(["a"]),
            SqlUnit::main("SELECT 1 AS one"),
        ];
        let results = validate_all(&units, &TestValueSet::default(), Dialect::Generic);
        assert!(matches!(
            results["a"].error(),
            Some(ValidationError::Analysis { .. })
        ));
        assert!(results["main"].is_valid());
    }

    #[test]
    fn test_recursive_unit_reads_itself() {
        let mut n = SqlUnit::cte(
            "n",
            "SELECT 1 AS i UNION ALL SELECT i + 1 FROM n WHERE i < 3",
        );
        n.recursive = true;
        let outcome = validate_unit(&n, &[], &TestValueSet::default(), Dialect::Generic);
        assert_eq!(
            outcome,
            ValidationOutcome::Valid {
                columns: vec!["i".into()]
            }
        );
    }
}
