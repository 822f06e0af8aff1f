//! Shared fixtures for unit tests.
//!
//! Flattened functions are tedious to write by hand; the factories here build the ones used
//! across several modules.

pub mod factories;

pub use factories::*;

/// Error for a fixture expectation that did not hold, such as a missing block or edge.
pub fn missing(what: &str) -> crate::Error {
    graph_error!("fixture expectation failed: {}", what)
}
