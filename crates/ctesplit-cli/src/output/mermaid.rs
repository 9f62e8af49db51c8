//! Mermaid diagram of the unit dependency graph.

use ctesplit_core::{UnitKind, Workspace};
use std::fmt::Write;

/// Format the workspace's units as a Mermaid flowchart, dependencies
/// pointing at the units that read them.
pub fn format_mermaid(workspace: &Workspace) -> String {
    let mut out = String::from("flowchart LR\n");

    for unit in workspace.units() {
        let id = sanitize_id(&unit.name);
        let label = match unit.depth() {
            Some(depth) => format!("{} (depth {depth})", unit.name),
            None => unit.name.clone(),
        };
        let label = escape_label(&label);
        match unit.kind {
            UnitKind::Main => writeln!(out, "    {id}[[\"{label}\"]]").unwrap(),
            UnitKind::Cte => writeln!(out, "    {id}[\"{label}\"]").unwrap(),
        }
    }

    for unit in workspace.units() {
        for dependency in &unit.dependencies {
            writeln!(
                out,
                "    {} --> {}",
                sanitize_id(dependency),
                sanitize_id(&unit.name)
            )
            .unwrap();
        }
    }

    out
}

/// Sanitize node ID for Mermaid (remove special chars)
fn sanitize_id(id: &str) -> String {
    let cleaned: String = id
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    format!("u_{cleaned}")
}

/// Escape label for Mermaid
fn escape_label(label: &str) -> String {
    label.replace('"', "#quot;").replace('\n', " ")
}
