#![no_main]

use ctesplit_core::{decompose, recompose, DecomposeOptions, RecomposeOptions};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(sql) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(workspace) = decompose(sql, &DecomposeOptions::default()) else {
        return;
    };

    // Whatever decomposes must recompose into something that decomposes to
    // the same bodies.
    if let Ok(recomposed) = recompose(workspace.units(), &RecomposeOptions::default()) {
        let again = decompose(&recomposed, &DecomposeOptions::default())
            .expect("recomposed SQL must decompose");
        for unit in workspace.units() {
            let twin = again.unit(&unit.name).expect("unit survives recomposition");
            assert_eq!(twin.body.trim(), unit.body.trim());
        }
    }
});
