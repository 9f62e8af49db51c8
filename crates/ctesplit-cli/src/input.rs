//! Reading SQL sources and mock tables.

use anyhow::{Context, Result};
use ctesplit_core::{decompose, DecomposeOptions, Dialect, TestValueSet, Workspace};
use std::path::Path;

use crate::layout;

/// Read a SQL file.
pub fn read_sql(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {}", path.display()))
}

/// Read mock tables from a JSON file.
///
/// Accepts either `{"tables": [...]}` or a bare array of tables.
pub fn read_test_values(path: &Path) -> Result<TestValueSet> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read test values: {}", path.display()))?;
    parse_test_values(&content)
        .with_context(|| format!("Invalid test values in {}", path.display()))
}

fn parse_test_values(content: &str) -> Result<TestValueSet> {
    let value: serde_json::Value = serde_json::from_str(content)?;
    let set = if value.is_array() {
        TestValueSet::new(serde_json::from_value(value)?)
    } else {
        serde_json::from_value(value)?
    };
    Ok(set)
}

/// Load a workspace from a SQL file (decomposed on the fly) or a unit
/// directory written by `decompose`.
pub fn load_workspace(path: &Path, dialect: Option<Dialect>) -> Result<Workspace> {
    if path.is_dir() {
        return layout::read_workspace(path, dialect);
    }

    let sql = read_sql(path)?;
    let options = DecomposeOptions {
        dialect: dialect.unwrap_or_default(),
    };
    decompose(&sql, &options).with_context(|| format!("Failed to decompose {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_test_values_both_shapes() {
        let wrapped = r#"{"tables": [{"name": "users", "columns": ["id"], "rows": [[1]]}]}"#;
        let bare = r#"[{"name": "users", "columns": ["id"], "rows": [[1]]}]"#;
        assert_eq!(
            parse_test_values(wrapped).unwrap(),
            parse_test_values(bare).unwrap()
        );
        assert!(parse_test_values(bare).unwrap().get("USERS").is_some());
    }

    #[test]
    fn test_load_workspace_from_sql_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "WITH a AS (SELECT 1 AS v) SELECT v FROM a;").unwrap();

        let ws = load_workspace(file.path(), Some(Dialect::Duckdb)).unwrap();
        assert_eq!(ws.units().len(), 2);
        assert_eq!(ws.dialect(), Dialect::Duckdb);
    }

    #[test]
    fn test_read_missing_file() {
        let err = read_sql(&PathBuf::from("/nonexistent/file.sql")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/file.sql"));
    }
}
