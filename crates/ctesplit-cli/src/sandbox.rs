//! Running sandboxed unit SQL in an in-memory DuckDB.

use anyhow::{Context, Result};
use duckdb::Connection;
use serde_json::{Map, Value};
use tracing::debug;

/// Rows returned by a sandboxed query, values rendered as text.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Executes `sql` and collects every row.
///
/// Each row is fetched as one JSON object so column names and values come
/// back without per-type decoding.
pub fn execute(sql: &str) -> Result<QueryRows> {
    let conn = Connection::open_in_memory().context("Failed to open in-memory DuckDB")?;
    let wrapped = format!("SELECT CAST(to_json(sandbox_row) AS VARCHAR) FROM (\n{sql}\n) AS sandbox_row");
    debug!(bytes = wrapped.len(), "executing sandbox query");

    let mut stmt = conn
        .prepare(&wrapped)
        .context("DuckDB rejected the sandbox query")?;
    let objects = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to run the sandbox query")?;

    let mut columns: Vec<String> = Vec::new();
    let mut rows = Vec::with_capacity(objects.len());
    for object in objects {
        let object: Map<String, Value> =
            serde_json::from_str(&object).context("DuckDB returned a malformed row")?;
        if columns.is_empty() {
            columns = object.keys().cloned().collect();
        }
        rows.push(object.values().map(render_value).collect());
    }

    Ok(QueryRows { columns, rows })
}

fn render_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execute_with_mock_cte() {
        let result = execute(
            "WITH users AS (SELECT * FROM (VALUES (1, 'ada'), (2, NULL)) AS users (id, name))\n\
             SELECT id, name FROM users ORDER BY id",
        )
        .unwrap();
        assert_eq!(result.columns, vec!["id", "name"]);
        assert_eq!(
            result.rows,
            vec![
                vec!["1".to_string(), "ada".to_string()],
                vec!["2".to_string(), "NULL".to_string()]
            ]
        );
    }

    #[test]
    fn test_execute_reports_bad_sql() {
        assert!(execute("SELECT * FROM missing_table").is_err());
    }
}
