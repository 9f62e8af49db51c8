use chrono::{TimeZone, Utc};
use ctesplit_core::{decompose, DecomposeOptions};
use insta::assert_json_snapshot;

const ORDERS: &str = "WITH base AS (SELECT id, amount FROM orders), \
    totals AS (SELECT id, SUM(amount) AS total FROM base GROUP BY id) \
    SELECT * FROM totals";

#[test]
fn test_workspace_snapshot_format() {
    let ws = decompose(ORDERS, &DecomposeOptions::default()).unwrap();
    let mut snapshot = ws.to_snapshot();
    snapshot.saved_at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
    assert_json_snapshot!("workspace_snapshot", snapshot);
}
