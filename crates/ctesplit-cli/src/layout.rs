//! On-disk unit layout.
//!
//! A statement decomposed from `<src>/<group>/<feature>.sql` lives under
//! `<root>/<group>/<feature>.sql/`:
//!
//! ```text
//! main.sql            trailing query
//! cte/<name>.sql      one file per CTE
//! workspace.json      snapshot: original bodies, test values, open units
//! ```
//!
//! The unit files are the source of truth for bodies; the snapshot only
//! supplies what the files cannot carry.

use anyhow::{Context, Result};
use ctesplit_core::{
    Dialect, SqlUnit, UnitKind, Workspace, WorkspaceSnapshot, MAIN_UNIT_NAME,
};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

pub const MAIN_FILE: &str = "main.sql";
pub const CTE_DIR: &str = "cte";
pub const SNAPSHOT_FILE: &str = "workspace.json";

/// Group used for sources at the filesystem root.
const ROOT_GROUP: &str = "_";

#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("no {MAIN_FILE} in unit directory {}", .0.display())]
    MissingMain(PathBuf),

    #[error("unit name '{0}' cannot be used as a file name")]
    UnsafeName(String),
}

/// Unit directory for `source` under `root`.
pub fn feature_dir(root: &Path, source: &Path) -> Result<PathBuf> {
    let absolute = std::path::absolute(source)
        .with_context(|| format!("Failed to resolve path: {}", source.display()))?;
    let group = absolute
        .parent()
        .and_then(Path::file_name)
        .and_then(|name| name.to_str())
        .unwrap_or(ROOT_GROUP);
    let feature = absolute
        .file_stem()
        .and_then(|stem| stem.to_str())
        .with_context(|| format!("Not a SQL file path: {}", source.display()))?;
    Ok(root.join(group).join(format!("{feature}.sql")))
}

/// File stem of a unit: its name without identifier quotes.
pub fn file_stem(name: &str) -> Result<String> {
    let inner = ['"', '`']
        .iter()
        .find_map(|quote| {
            name.strip_prefix(*quote)
                .and_then(|rest| rest.strip_suffix(*quote))
        })
        .or_else(|| name.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')))
        .unwrap_or(name);

    if inner.is_empty() || inner.contains(['/', '\\']) || inner == "." || inner == ".." {
        return Err(LayoutError::UnsafeName(name.to_string()).into());
    }
    Ok(inner.to_string())
}

/// Unit name for a file stem; anything but a plain identifier is quoted.
pub fn unit_name(stem: &str) -> String {
    let mut chars = stem.chars();
    let plain = chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if plain {
        stem.to_string()
    } else {
        format!("\"{}\"", stem.replace('"', "\"\""))
    }
}

/// Writes every unit and the snapshot, removing files of units that no
/// longer exist.
pub fn write_workspace(dir: &Path, workspace: &Workspace) -> Result<()> {
    let cte_dir = dir.join(CTE_DIR);
    fs::create_dir_all(&cte_dir)
        .with_context(|| format!("Failed to create directory: {}", cte_dir.display()))?;

    let mut wanted = Vec::new();
    for unit in workspace.units() {
        let path = match unit.kind {
            UnitKind::Main => dir.join(MAIN_FILE),
            UnitKind::Cte => cte_dir.join(format!("{}.sql", file_stem(&unit.name)?)),
        };
        write_unit_file(&path, &unit.body)?;
        wanted.push(path);
    }

    for path in sql_files(&cte_dir) {
        if !wanted.contains(&path) {
            debug!(path = %path.display(), "removing stale unit file");
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove file: {}", path.display()))?;
        }
    }

    let snapshot_path = dir.join(SNAPSHOT_FILE);
    fs::write(&snapshot_path, workspace.to_json()?)
        .with_context(|| format!("Failed to write file: {}", snapshot_path.display()))?;

    info!(dir = %dir.display(), units = workspace.units().len(), "unit files written");
    Ok(())
}

/// Rebuilds a workspace from a unit directory.
///
/// Bodies come from the files. With a snapshot, units keep their original
/// bodies and validation state, edited files count as edits, deleted files
/// remove their unit and new files add one. Dependencies are refreshed from
/// the bodies.
pub fn read_workspace(dir: &Path, dialect: Option<Dialect>) -> Result<Workspace> {
    let main_path = dir.join(MAIN_FILE);
    if !main_path.is_file() {
        return Err(LayoutError::MissingMain(dir.to_path_buf()).into());
    }
    let main_body = read_unit_file(&main_path)?;

    let mut cte_bodies = BTreeMap::new();
    for path in sql_files(&dir.join(CTE_DIR)) {
        let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };
        cte_bodies.insert(stem.to_string(), read_unit_file(&path)?);
    }

    let snapshot_path = dir.join(SNAPSHOT_FILE);
    let snapshot = if snapshot_path.is_file() {
        let json = fs::read_to_string(&snapshot_path)
            .with_context(|| format!("Failed to read file: {}", snapshot_path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("Invalid snapshot: {}", snapshot_path.display()))?
    } else {
        Workspace::new(dialect.unwrap_or_default()).to_snapshot()
    };

    let (snapshot, edits) = merge_files(snapshot, main_body, cte_bodies, dialect)?;
    let mut workspace = Workspace::from_snapshot(snapshot)
        .with_context(|| format!("Invalid unit directory: {}", dir.display()))?;
    for (name, body) in edits {
        workspace.edit_unit(&name, body)?;
    }
    if workspace.active_unit().is_none() {
        workspace.open_unit(MAIN_UNIT_NAME)?;
    }
    workspace
        .reanalyze()
        .with_context(|| format!("Failed to analyze units in {}", dir.display()))?;
    Ok(workspace)
}

/// Lines the snapshot up with the files on disk. Returns the snapshot holding
/// exactly the units on disk plus the body edits to replay.
fn merge_files(
    mut snapshot: WorkspaceSnapshot,
    main_body: String,
    mut cte_bodies: BTreeMap<String, String>,
    dialect: Option<Dialect>,
) -> Result<(WorkspaceSnapshot, Vec<(String, String)>)> {
    let mut units = Vec::with_capacity(cte_bodies.len() + 1);
    let mut edits = Vec::new();
    let mut main = None;

    for unit in std::mem::take(&mut snapshot.units) {
        let body = match unit.kind {
            UnitKind::Main => Some(main_body.clone()),
            UnitKind::Cte => cte_bodies.remove(&file_stem(&unit.name)?),
        };
        let Some(body) = body else {
            debug!(unit = %unit.name, "unit file deleted");
            continue;
        };
        if body != unit.body {
            edits.push((unit.name.clone(), body));
        }
        match unit.kind {
            UnitKind::Main => main = Some(unit),
            UnitKind::Cte => units.push(unit),
        }
    }

    for (stem, body) in cte_bodies {
        debug!(unit = %stem, "new unit file");
        units.push(SqlUnit::cte(unit_name(&stem), body));
    }
    units.push(main.unwrap_or_else(|| SqlUnit::main(main_body)));

    let exists = |name: &str| units.iter().any(|unit| unit.name == name);
    snapshot.open_units.retain(|name| exists(name));
    snapshot.active_unit = snapshot.active_unit.filter(|name| exists(name));
    snapshot.validation_results.retain(|name, _| exists(name));
    snapshot.units = units;
    if let Some(dialect) = dialect {
        snapshot.dialect = dialect;
    }

    Ok((snapshot, edits))
}

fn sql_files(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "sql"))
        .collect()
}

fn read_unit_file(path: &Path) -> Result<String> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {}", path.display()))?;
    Ok(content.trim_end().to_string())
}

fn write_unit_file(path: &Path, body: &str) -> Result<()> {
    fs::write(path, format!("{}\n", body.trim_end()))
        .with_context(|| format!("Failed to write file: {}", path.display()))
}
