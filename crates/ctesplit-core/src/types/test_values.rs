//! Mock tables used to stand in for real tables during sandboxed runs.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::common::normalize_name;
use crate::error::RecomposeError;

/// A named collection of mock table definitions.
///
/// Edited directly by the author; never derived from decomposition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TestValueSet {
    #[serde(default)]
    pub tables: Vec<MockTable>,
}

/// Literal rows standing in for one table or unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MockTable {
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Vec<Value>>,
}

impl TestValueSet {
    pub fn new(tables: Vec<MockTable>) -> Self {
        Self { tables }
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Looks up a mock by normalized name.
    pub fn get(&self, name: &str) -> Option<&MockTable> {
        let key = normalize_name(name);
        self.tables.iter().find(|table| table.key() == key)
    }

    /// Adds a mock, replacing any existing one with the same normalized name.
    pub fn insert(&mut self, table: MockTable) {
        let key = table.key();
        match self.tables.iter_mut().find(|existing| existing.key() == key) {
            Some(existing) => *existing = table,
            None => self.tables.push(table),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<MockTable> {
        let key = normalize_name(name);
        let index = self.tables.iter().position(|table| table.key() == key)?;
        Some(self.tables.remove(index))
    }

    pub fn iter(&self) -> impl Iterator<Item = &MockTable> {
        self.tables.iter()
    }
}

impl MockTable {
    pub fn new<I, S>(name: impl Into<String>, columns: I, rows: Vec<Vec<Value>>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            rows,
        }
    }

    pub fn key(&self) -> String {
        normalize_name(&self.name)
    }

    /// Renders the mock as a standalone query body.
    ///
    /// `SELECT * FROM (VALUES ...) AS name (c1, c2)`, or a typed-less empty
    /// projection filtered by `WHERE 1 = 0` when there are no rows.
    pub fn to_values_sql(&self) -> Result<String, RecomposeError> {
        if !is_single_identifier(&self.name) {
            return Err(self.invalid("name must be a single identifier".to_string()));
        }
        if self.columns.is_empty() {
            return Err(self.invalid("no columns declared".to_string()));
        }
        if let Some(column) = self.columns.iter().find(|c| !is_single_identifier(c)) {
            return Err(self.invalid(format!("column '{column}' is not a single identifier")));
        }

        if self.rows.is_empty() {
            let projection = self
                .columns
                .iter()
                .map(|column| format!("NULL AS {column}"))
                .collect::<Vec<_>>()
                .join(", ");
            return Ok(format!("SELECT {projection} WHERE 1 = 0"));
        }

        let mut tuples = Vec::with_capacity(self.rows.len());
        for (index, row) in self.rows.iter().enumerate() {
            if row.len() != self.columns.len() {
                return Err(self.invalid(format!(
                    "row {} has {} values, expected {}",
                    index + 1,
                    row.len(),
                    self.columns.len()
                )));
            }
            let values: Vec<String> = row.iter().map(json_to_sql_literal).collect();
            tuples.push(format!("({})", values.join(", ")));
        }

        Ok(format!(
            "SELECT * FROM (VALUES {}) AS {} ({})",
            tuples.join(", "),
            self.name,
            self.columns.join(", ")
        ))
    }

    fn invalid(&self, reason: String) -> RecomposeError {
        RecomposeError::InvalidMock {
            name: self.name.clone(),
            reason,
        }
    }
}

/// Converts a JSON scalar into a SQL literal.
///
/// Arrays and objects become quoted JSON text.
fn json_to_sql_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(true) => "TRUE".to_string(),
        Value::Bool(false) => "FALSE".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => quote_string(s),
        Value::Array(_) | Value::Object(_) => quote_string(&value.to_string()),
    }
}

/// A bare identifier, or one quoted identifier such as `"Order Items"`.
fn is_single_identifier(name: &str) -> bool {
    let Some(first) = name.chars().next() else {
        return false;
    };
    let close = match first {
        '"' => Some('"'),
        '`' => Some('`'),
        '[' => Some(']'),
        _ => None,
    };
    match close {
        Some(close) => {
            name.len() > 2
                && name.ends_with(close)
                && !name[first.len_utf8()..name.len() - close.len_utf8()].contains(close)
        }
        None => {
            (first.is_alphabetic() || first == '_')
                && name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '$')
        }
    }
}

fn quote_string(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}
