use ctesplit_core::{
    decompose, recompose, Command, CommandOutput, DecomposeOptions, RecomposeOptions, SqlUnit,
    Workspace, WorkspaceSnapshot,
};
use serde::{Deserialize, Serialize};
use wasm_bindgen::prelude::*;

/// Installs the panic hook (and console tracing with the `tracing` feature).
#[wasm_bindgen(start)]
pub fn init() {
    console_error_panic_hook::set_once();
    #[cfg(feature = "tracing")]
    tracing_wasm::set_as_global_default();
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DecomposeRequest {
    sql: String,
    #[serde(default)]
    options: DecomposeOptions,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecomposeRequest {
    units: Vec<SqlUnit>,
    #[serde(default)]
    options: RecomposeOptions,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CommandResult {
    snapshot: WorkspaceSnapshot,
    output: CommandOutput,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorPayload {
    code: &'static str,
    message: String,
}

/// Every response is `{"ok": true, "result": ...}` or
/// `{"ok": false, "error": {"code", "message"}}`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Response<T> {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorPayload>,
}

fn success<T: Serialize>(result: T) -> String {
    serde_json::to_string(&Response {
        ok: true,
        result: Some(result),
        error: None,
    })
    .unwrap_or_else(|e| failure("SERIALIZATION_ERROR", e))
}

fn failure(code: &'static str, message: impl ToString) -> String {
    let response: Response<()> = Response {
        ok: false,
        result: None,
        error: Some(ErrorPayload {
            code,
            message: message.to_string(),
        }),
    };
    serde_json::to_string(&response)
        .unwrap_or_else(|_| r#"{"ok":false,"error":{"code":"SERIALIZATION_ERROR","message":"Failed to serialize error result"}}"#.to_string())
}

/// Decomposes `{"sql", "options"?}` into a fresh workspace snapshot.
/// This function never throws - errors are returned in the response.
#[wasm_bindgen]
pub fn decompose_json(request_json: &str) -> String {
    let request: DecomposeRequest = match serde_json::from_str(request_json) {
        Ok(req) => req,
        Err(e) => return failure("REQUEST_PARSE_ERROR", format!("Invalid request format: {e}")),
    };

    match decompose(&request.sql, &request.options) {
        Ok(workspace) => success(workspace.to_snapshot()),
        Err(e) => failure("DECOMPOSE_ERROR", e),
    }
}

/// Runs one command against a workspace snapshot and returns the new
/// snapshot with the command's output. A failed command returns an error and
/// the caller keeps its previous snapshot.
#[wasm_bindgen]
pub fn execute_command_json(snapshot_json: &str, command_json: &str) -> String {
    let mut workspace = match Workspace::from_json(snapshot_json) {
        Ok(workspace) => workspace,
        Err(e) => return failure("SNAPSHOT_ERROR", e),
    };
    let command: Command = match serde_json::from_str(command_json) {
        Ok(command) => command,
        Err(e) => return failure("REQUEST_PARSE_ERROR", format!("Invalid command: {e}")),
    };

    match workspace.execute(command) {
        Ok(output) => success(CommandResult {
            snapshot: workspace.to_snapshot(),
            output,
        }),
        Err(e) => failure("COMMAND_ERROR", e),
    }
}

/// Stateless recomposition of `{"units", "options"?}`.
#[wasm_bindgen]
pub fn recompose_json(request_json: &str) -> String {
    let request: RecomposeRequest = match serde_json::from_str(request_json) {
        Ok(req) => req,
        Err(e) => return failure("REQUEST_PARSE_ERROR", format!("Invalid request format: {e}")),
    };

    match recompose(&request.units, &request.options) {
        Ok(sql) => success(sql),
        Err(e) => failure("RECOMPOSE_ERROR", e),
    }
}

/// Get version information
#[wasm_bindgen]
pub fn get_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn parse(json: &str) -> Value {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_decompose_json() {
        let response = parse(&decompose_json(
            r#"{"sql": "WITH a AS (SELECT 1 AS v) SELECT v FROM a", "options": {"dialect": "duckdb"}}"#,
        ));
        assert_eq!(response["ok"], true);
        assert_eq!(response["result"]["dialect"], "duckdb");
        assert_eq!(response["result"]["units"].as_array().unwrap().len(), 2);
        assert!(response.get("error").is_none());
    }

    #[test]
    fn test_decompose_json_errors() {
        let response = parse(&decompose_json(r#"{"sql": "WITH a AS (SELECT"}"#));
        assert_eq!(response["ok"], false);
        assert_eq!(response["error"]["code"], "DECOMPOSE_ERROR");

        let response = parse(&decompose_json(r#"{"not_valid": true}"#));
        assert_eq!(response["error"]["code"], "REQUEST_PARSE_ERROR");
    }

    #[test]
    fn test_execute_command_json_threads_snapshot() {
        let decomposed = parse(&decompose_json(
            r#"{"sql": "WITH a AS (SELECT 1 AS v) SELECT v FROM a"}"#,
        ));
        let snapshot = decomposed["result"].to_string();

        let edited = parse(&execute_command_json(
            &snapshot,
            r#"{"type": "editUnit", "name": "a", "body": "SELECT 2 AS v"}"#,
        ));
        assert_eq!(edited["ok"], true);
        assert_eq!(edited["result"]["output"]["type"], "done");

        let recomposed = parse(&execute_command_json(
            &edited["result"]["snapshot"].to_string(),
            r#"{"type": "recompose"}"#,
        ));
        assert_eq!(
            recomposed["result"]["output"]["sql"],
            "WITH a AS (\nSELECT 2 AS v\n)\nSELECT v FROM a"
        );
    }

    #[test]
    fn test_execute_command_json_errors() {
        let response = parse(&execute_command_json("{}", r#"{"type": "validateAll"}"#));
        assert_eq!(response["error"]["code"], "SNAPSHOT_ERROR");

        let snapshot = parse(&decompose_json(r#"{"sql": "SELECT 1"}"#))["result"].to_string();
        let response = parse(&execute_command_json(
            &snapshot,
            r#"{"type": "removeUnit", "name": "main"}"#,
        ));
        assert_eq!(response["error"]["code"], "COMMAND_ERROR");
        assert_eq!(response["error"]["message"], "the main unit cannot be removed");
    }

    #[test]
    fn test_recompose_json() {
        let request = serde_json::json!({
            "units": [
                SqlUnit::cte("a", "SELECT 1 AS v"),
                SqlUnit::main("SELECT v FROM a").with_dependencies(["a"]),
            ],
        });
        let response = parse(&recompose_json(&request.to_string()));
        assert_eq!(response["result"], "WITH a AS (\nSELECT 1 AS v\n)\nSELECT v FROM a");
    }

    #[test]
    fn test_version() {
        assert_eq!(get_version(), env!("CARGO_PKG_VERSION"));
    }
}
