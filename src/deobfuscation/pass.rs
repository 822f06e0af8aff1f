//! Pass traits for the host-facing optimizer interface.
//!
//! The host decompiler calls block optimizers once per block at each maturity level. A
//! [`BlockOptimizer`] decides whether it wants to run at the current level, processes the block
//! and reports how many changes it made. [`BlockOptimizer::optimize_function`] drives the same
//! per-block entry point over a whole function until nothing changes anymore.

use crate::{
    deobfuscation::events::{EventKind, EventLog},
    ir::{BlockId, Function},
    Result,
};

/// A per-block optimizer invoked by the host.
///
/// Implementations must leave the function in a verified state whenever they return `Ok`.
/// Changes should be recorded to the provided [`EventLog`].
pub trait BlockOptimizer {
    /// Unique name for logging and debugging.
    fn name(&self) -> &'static str;

    /// Should this optimizer run on `func` right now?
    ///
    /// Called before every block. The default runs unconditionally.
    fn should_run(&self, _func: &Function) -> bool {
        true
    }

    /// Process one block.
    ///
    /// Returns the number of changes made to the function.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph became inconsistent. Per-block conditions the optimizer
    /// can recover from are recorded as events instead.
    fn optimize_block(&self, func: &mut Function, blk: BlockId, events: &EventLog)
        -> Result<usize>;

    /// Maximum number of rounds [`BlockOptimizer::optimize_function`] performs.
    fn max_rounds(&self) -> usize {
        1
    }

    /// Runs [`BlockOptimizer::optimize_block`] on every block until a round changes nothing or
    /// [`BlockOptimizer::max_rounds`] is reached.
    ///
    /// Blocks removed by an earlier block of the same round are skipped.
    ///
    /// # Errors
    ///
    /// Propagates the first error of [`BlockOptimizer::optimize_block`].
    fn optimize_function(&self, func: &mut Function, events: &EventLog) -> Result<usize> {
        if !self.should_run(func) {
            return Ok(0);
        }

        events
            .record(EventKind::PassStarted)
            .function(func.name())
            .pass(self.name());

        let mut total = 0;
        for _ in 0..self.max_rounds() {
            let mut changes = 0;
            for blk in func.layout().to_vec() {
                if !func.contains(blk) || !self.should_run(func) {
                    continue;
                }
                changes += self.optimize_block(func, blk, events)?;
            }
            total += changes;
            if changes == 0 {
                break;
            }
        }

        events
            .record(EventKind::PassCompleted)
            .function(func.name())
            .pass(self.name())
            .message(format!("{total} changes"));
        Ok(total)
    }

    /// Get a description of what this optimizer does.
    fn description(&self) -> &'static str {
        "No description available"
    }
}
