//! Configuration for the unflattening passes.
//!
//! This module provides [`UnflattenConfig`], which bundles the maturity gate, the iteration
//! limits, the tracking bounds and the dispatcher detection thresholds.

use crate::ir::Maturity;

/// Configuration for dispatcher removal and fake-jump simplification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnflattenConfig {
    /// Maturity the pass fires at (default: `Glbopt2`).
    pub maturity: Maturity,

    /// Maximum optimization rounds per function (default: 5).
    ///
    /// A round visits every block once; rounds repeat while something changes.
    pub max_passes: usize,

    /// Maximum duplication passes per dispatcher father (default: 20).
    pub max_duplication_passes: usize,

    /// Block budget of a father history (default: 100).
    pub tracker_max_blocks: usize,

    /// Path budget of a father search (default: 100).
    pub tracker_max_paths: usize,

    /// Block budget of the fake-jump search (default: 100).
    pub fake_jump_max_blocks: usize,

    /// Path budget of the fake-jump search (default: 1000).
    pub fake_jump_max_paths: usize,

    /// Minimum number of internal blocks, entry included, for a dispatcher (default: 2).
    pub min_internal_blocks: usize,

    /// Minimum number of exit blocks for a dispatcher (default: 3).
    pub min_exit_blocks: usize,

    /// Minimum number of distinct compared values for a dispatcher (default: 2).
    pub min_comparison_values: usize,

    /// Fold `jz`/`jnz` blocks whose outcome is the same along every path (default: true).
    pub enable_fake_jump_fix: bool,

    /// Remove unreachable blocks and `nop`s after a change (default: true).
    pub run_cleanup: bool,
}

impl Default for UnflattenConfig {
    fn default() -> Self {
        Self {
            maturity: Maturity::Glbopt2,
            max_passes: 5,
            max_duplication_passes: 20,
            tracker_max_blocks: 100,
            tracker_max_paths: 100,
            fake_jump_max_blocks: 100,
            fake_jump_max_paths: 1000,
            min_internal_blocks: 2,
            min_exit_blocks: 3,
            min_comparison_values: 2,
            enable_fake_jump_fix: true,
            run_cleanup: true,
        }
    }
}

impl UnflattenConfig {
    /// Creates a configuration that only touches textbook dispatchers.
    ///
    /// Larger dispatchers are required, fewer duplications are allowed and the fake-jump
    /// simplifier is off.
    #[must_use]
    pub fn conservative() -> Self {
        Self {
            max_passes: 3,
            max_duplication_passes: 5,
            tracker_max_blocks: 50,
            tracker_max_paths: 50,
            min_internal_blocks: 3,
            min_exit_blocks: 4,
            min_comparison_values: 3,
            enable_fake_jump_fix: false,
            ..Self::default()
        }
    }

    /// Creates a configuration for heavily flattened code.
    ///
    /// Accepts small dispatchers and allows deeper searches and more duplication.
    #[must_use]
    pub fn aggressive() -> Self {
        Self {
            max_passes: 10,
            max_duplication_passes: 50,
            tracker_max_blocks: 200,
            tracker_max_paths: 500,
            fake_jump_max_blocks: 200,
            fake_jump_max_paths: 2000,
            min_internal_blocks: 1,
            min_exit_blocks: 2,
            min_comparison_values: 1,
            ..Self::default()
        }
    }

    /// Sets the maturity the pass fires at.
    #[must_use]
    pub fn with_maturity(mut self, maturity: Maturity) -> Self {
        self.maturity = maturity;
        self
    }
}
