//! Assembling units back into one statement.

use crate::error::RecomposeError;
use crate::resolver::resolve;
use crate::types::{normalize_name, MockTable, RecomposeOptions, SqlUnit};
use std::collections::HashSet;
#[cfg(feature = "tracing")]
use tracing::debug;

/// Emits `WITH a AS (...), b AS (...) <main>` from `units`.
///
/// CTEs appear in dependency order (ascending depth, then name). Without
/// CTEs the trailing body is returned alone. With `options.target` only the
/// target's transitive dependencies are emitted and the target's body is the
/// trailing query.
///
/// Pure: the same units and options always produce the same text.
pub fn recompose(units: &[SqlUnit], options: &RecomposeOptions) -> Result<String, RecomposeError> {
    let main = units
        .iter()
        .find(|unit| unit.is_main())
        .ok_or(RecomposeError::MissingMain)?;

    check_dependencies(units)?;
    let resolved = resolve(units)?;

    let find = |name: &str| {
        let key = normalize_name(name);
        units.iter().find(|unit| unit.key() == key)
    };

    let trailing = match &options.target {
        Some(target) => find(target).ok_or_else(|| RecomposeError::UnknownUnit {
            name: target.clone(),
        })?,
        None => main,
    };

    let mut emitted: Vec<&SqlUnit> = match &options.target {
        Some(_) => resolved
            .transitive_dependencies(&trailing.name)
            .into_iter()
            .filter_map(find)
            .collect(),
        None => resolved
            .ordered()
            .into_iter()
            .filter_map(find)
            .filter(|unit| !unit.is_main())
            .collect(),
    };

    // A recursive unit cannot be the bare trailing query: it reads from its own name.
    let trailing_body = if trailing.recursive && !trailing.is_main() {
        emitted.push(trailing);
        format!("SELECT * FROM {}", trailing.name)
    } else {
        match options.mocks.get(&trailing.name) {
            Some(mock) => mock.to_values_sql()?,
            None => clean_body(&trailing.body).to_string(),
        }
    };

    let unit_keys: HashSet<String> = units.iter().map(SqlUnit::key).collect();
    let mut definitions = Vec::new();
    for mock in options.mocks.iter() {
        if !unit_keys.contains(&mock.key()) {
            definitions.push(mock_definition(mock)?);
        }
    }

    let mut recursive = false;
    for unit in &emitted {
        match options.mocks.get(&unit.name) {
            Some(mock) => definitions.push(mock_definition(mock)?),
            None => {
                recursive |= unit.recursive;
                definitions.push(cte_definition(unit));
            }
        }
    }

    #[cfg(feature = "tracing")]
    debug!(
        ctes = definitions.len(),
        target = options.target.as_deref().unwrap_or("main"),
        "units recomposed"
    );

    if definitions.is_empty() {
        return Ok(trailing_body);
    }

    let keyword = if recursive { "WITH RECURSIVE" } else { "WITH" };
    Ok(format!(
        "{keyword} {}\n{trailing_body}",
        definitions.join(",\n")
    ))
}

/// Every dependency must name a unit.
fn check_dependencies(units: &[SqlUnit]) -> Result<(), RecomposeError> {
    let keys: HashSet<String> = units.iter().map(SqlUnit::key).collect();
    for unit in units {
        for dependency in &unit.dependencies {
            if !keys.contains(&normalize_name(dependency)) {
                return Err(RecomposeError::UnknownDependency {
                    unit: unit.name.clone(),
                    dependency: dependency.clone(),
                });
            }
        }
    }
    Ok(())
}

fn cte_definition(unit: &SqlUnit) -> String {
    let columns = if unit.declared_columns.is_empty() {
        String::new()
    } else {
        format!(" ({})", unit.declared_columns.join(", "))
    };
    format!("{}{columns} AS (\n{}\n)", unit.name, clean_body(&unit.body))
}

fn mock_definition(mock: &MockTable) -> Result<String, RecomposeError> {
    Ok(format!("{} AS (\n{}\n)", mock.name, mock.to_values_sql()?))
}

/// Body text without surrounding whitespace or a trailing semicolon.
pub(crate) fn clean_body(body: &str) -> &str {
    let trimmed = body.trim();
    trimmed.strip_suffix(';').unwrap_or(trimmed).trim_end()
}
