//! Program analyses over the micro-code graph.
//!
//! - [`tracker`] - backward, path-sensitive tracking of operand values

pub mod tracker;

pub use tracker::{get_all_possible_values, HistoryStatus, MopHistory, MopTracker, StopReason};
