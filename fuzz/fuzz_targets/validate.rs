#![no_main]

use ctesplit_core::{validate_unit, Dialect, SqlUnit, TestValueSet};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(body) = std::str::from_utf8(data) {
        let units = vec![
            SqlUnit::cte("base", "SELECT 1 AS id").with_columns(["id"]),
            SqlUnit::main(body).with_dependencies(["base"]),
        ];
        let _ = validate_unit(&units[1], &units, &TestValueSet::default(), Dialect::Generic);
    }
});
