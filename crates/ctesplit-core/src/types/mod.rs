//! Data types shared by the engine and its callers.
//!
//! Everything here is serde-serializable with camelCase field names so the same
//! shapes travel through the CLI's JSON output, the workspace snapshot and the
//! WASM boundary.

pub(crate) mod common;
mod options;
mod test_values;
mod unit;
mod validation;

pub use common::{normalize_name, Dialect};
pub use options::{DecomposeOptions, RecomposeOptions};
pub use test_values::{MockTable, TestValueSet};
pub use unit::{SqlUnit, UnitKind, MAIN_UNIT_NAME};
pub use validation::{ValidationError, ValidationOutcome, ValidationState};
