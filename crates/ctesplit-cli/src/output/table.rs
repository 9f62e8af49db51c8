//! Human-readable table output formatting.

use ctesplit_core::{ValidationOutcome, Workspace};
use owo_colors::OwoColorize;
use std::collections::BTreeMap;
use std::fmt::Write;
use tabled::settings::Style;
use tabled::{Table, Tabled};

#[derive(Tabled)]
struct GraphRow {
    #[tabled(rename = "Unit")]
    name: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Depth")]
    depth: String,
    #[tabled(rename = "Depends on")]
    dependencies: String,
    #[tabled(rename = "Used by")]
    used_by: String,
}

#[derive(Tabled)]
struct ValidationRow {
    #[tabled(rename = "Unit")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Columns / error")]
    detail: String,
}

/// Units with depth and both directions of the dependency graph, in the
/// order they would be recomposed.
pub fn format_graph(workspace: &Workspace, colored: bool) -> String {
    let mut units: Vec<_> = workspace.units().iter().collect();
    units.sort_by_key(|unit| (unit.is_main(), unit.depth(), unit.key()));

    let rows = units.into_iter().map(|unit| GraphRow {
        name: unit.name.clone(),
        kind: if unit.is_main() { "main" } else { "cte" }.to_string(),
        depth: unit
            .depth()
            .map_or_else(|| "cycle".to_string(), |depth| depth.to_string()),
        dependencies: join(unit.dependencies.iter()),
        used_by: join(unit.used_by().iter()),
    });

    let mut out = String::new();
    write_header(&mut out, "Unit Graph", colored);
    writeln!(out, "{}", Table::new(rows).with(Style::rounded())).unwrap();
    out
}

/// Per-unit validation outcomes followed by a PASS/FAIL summary.
pub fn format_validation(results: &BTreeMap<String, ValidationOutcome>, colored: bool) -> String {
    let invalid = results.values().filter(|outcome| !outcome.is_valid()).count();

    let rows = results.iter().map(|(name, outcome)| {
        let (status, detail) = match outcome {
            ValidationOutcome::Valid { columns } => ("ok", join(columns.iter())),
            ValidationOutcome::Invalid { error } => ("invalid", error.to_string()),
        };
        ValidationRow {
            name: name.clone(),
            status: status.to_string(),
            detail,
        }
    });

    let mut out = String::new();
    write_header(&mut out, "Validation", colored);
    writeln!(out, "{}", Table::new(rows).with(Style::rounded())).unwrap();
    writeln!(out).unwrap();

    let summary = format!("{} units, {invalid} invalid", results.len());
    match (invalid, colored) {
        (0, true) => writeln!(out, "{} {summary}", "PASS".green().bold()).unwrap(),
        (0, false) => writeln!(out, "PASS {summary}").unwrap(),
        (_, true) => writeln!(out, "{} {summary}", "FAIL".red().bold()).unwrap(),
        (_, false) => writeln!(out, "FAIL {summary}").unwrap(),
    }
    out
}

/// Query results as a table.
#[cfg(feature = "sandbox")]
pub fn format_rows(columns: &[String], rows: &[Vec<String>]) -> String {
    let mut builder = tabled::builder::Builder::default();
    builder.push_record(columns.iter().cloned());
    for row in rows {
        builder.push_record(row.iter().cloned());
    }
    let mut table = builder.build();
    table.with(Style::rounded());
    format!("{table}\n{} rows\n", rows.len())
}

fn write_header(out: &mut String, title: &str, colored: bool) {
    if colored {
        writeln!(out, "{}", title.bold()).unwrap();
    } else {
        writeln!(out, "{title}").unwrap();
    }
}

fn join<'a>(names: impl Iterator<Item = &'a String>) -> String {
    names.map(String::as_str).collect::<Vec<_>>().join(", ")
}
