//! ctesplit CLI library.
//!
//! This module exposes internal types for testing purposes.
//! The main entry point is the `ctesplit` binary.

pub mod cli;
pub mod input;
pub mod layout;
pub mod output;
#[cfg(feature = "sandbox")]
pub mod sandbox;

// Re-export commonly used types
pub use cli::Args;
