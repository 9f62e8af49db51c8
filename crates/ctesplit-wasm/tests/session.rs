use ctesplit_wasm::{decompose_json, execute_command_json};
use serde_json::Value;

fn run(snapshot: &Value, command: Value) -> Value {
    let response: Value =
        serde_json::from_str(&execute_command_json(&snapshot.to_string(), &command.to_string()))
            .unwrap();
    assert_eq!(response["ok"], true, "command failed: {response}");
    response["result"].clone()
}

#[test]
fn editor_session_hoists_validates_and_recomposes() {
    let decomposed: Value = serde_json::from_str(&decompose_json(
        &serde_json::json!({
            "sql": "WITH orders_2024 AS (SELECT id, amount FROM orders) SELECT SUM(amount) AS total FROM orders_2024",
            "options": { "dialect": "postgres" }
        })
        .to_string(),
    ))
    .unwrap();
    let mut snapshot = decomposed["result"].clone();

    snapshot = run(
        &snapshot,
        serde_json::json!({
            "type": "editUnit",
            "name": "orders_2024",
            "body": "WITH big AS (SELECT id, amount FROM orders WHERE amount > 100) SELECT id, amount FROM big"
        }),
    )["snapshot"]
        .clone();

    let hoisted = run(
        &snapshot,
        serde_json::json!({ "type": "reanalyzeUnit", "name": "orders_2024" }),
    );
    assert_eq!(hoisted["output"]["type"], "units");
    assert_eq!(hoisted["output"]["names"][0], "big");
    snapshot = hoisted["snapshot"].clone();

    let validated = run(&snapshot, serde_json::json!({ "type": "validateAll" }));
    let results = &validated["output"]["results"];
    assert_eq!(results["big"]["status"], "valid");
    assert_eq!(results["orders_2024"]["status"], "valid");
    assert_eq!(results["main"]["status"], "valid");

    let recomposed = run(
        &validated["snapshot"],
        serde_json::json!({ "type": "recompose" }),
    );
    assert_eq!(
        recomposed["output"]["sql"],
        "WITH big AS (\nSELECT id, amount FROM orders WHERE amount > 100\n),\n\
         orders_2024 AS (\nSELECT id, amount FROM big\n)\n\
         SELECT SUM(amount) AS total FROM orders_2024"
    );
}
