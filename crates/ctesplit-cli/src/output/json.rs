//! JSON output formatting.

use anyhow::{Context, Result};
use serde::Serialize;

/// Format any serializable value as JSON.
///
/// If `compact` is true, outputs minified JSON without whitespace.
pub fn format_json<T: Serialize + ?Sized>(value: &T, compact: bool) -> Result<String> {
    let json = if compact {
        serde_json::to_string(value)
    } else {
        serde_json::to_string_pretty(value)
    };
    json.context("Failed to serialize JSON output")
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctesplit_core::{decompose, DecomposeOptions};

    #[test]
    fn test_json_pretty_and_compact() {
        let ws = decompose("WITH a AS (SELECT 1 AS v) SELECT v FROM a", &DecomposeOptions::default())
            .unwrap();

        let pretty = format_json(ws.units(), false).unwrap();
        assert!(pretty.contains('\n'));
        assert!(pretty.contains("\"usedBy\""));

        let compact = format_json(ws.units(), true).unwrap();
        assert!(!compact.contains('\n'));
    }
}
