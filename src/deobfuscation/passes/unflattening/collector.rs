//! Dispatcher collection over a whole function.

use crate::{
    deobfuscation::{config::UnflattenConfig, passes::unflattening::dispatcher::DispatcherInfo},
    ir::{BlockId, Function},
    Result,
};

/// Finds every dispatcher of a function that is large enough to be worth removing.
///
/// Detection is structural; no block serial is hard-coded. Small comparison trees are common
/// in regular code, so a candidate is only kept when it has at least `min_internal_blocks`
/// internal blocks, `min_exit_blocks` exits and `min_comparison_values` distinct values.
#[derive(Debug, Clone)]
pub struct DispatcherCollector {
    min_internal_blocks: usize,
    min_exit_blocks: usize,
    min_comparison_values: usize,
    dispatchers: Vec<DispatcherInfo>,
}

impl Default for DispatcherCollector {
    fn default() -> Self {
        Self::new(&UnflattenConfig::default())
    }
}

impl DispatcherCollector {
    /// Creates a collector with the thresholds of `config`.
    #[must_use]
    pub fn new(config: &UnflattenConfig) -> Self {
        Self {
            min_internal_blocks: config.min_internal_blocks,
            min_exit_blocks: config.min_exit_blocks,
            min_comparison_values: config.min_comparison_values,
            dispatchers: Vec::new(),
        }
    }

    /// Forgets previously collected dispatchers.
    pub fn reset(&mut self) {
        self.dispatchers.clear();
    }

    /// Dispatchers found so far.
    #[must_use]
    pub fn dispatchers(&self) -> &[DispatcherInfo] {
        &self.dispatchers
    }

    /// Returns `true` if `blk` is internal to a collected dispatcher.
    #[must_use]
    pub fn is_dispatcher_block(&self, blk: BlockId) -> bool {
        self.dispatchers.iter().any(|d| d.is_internal(blk))
    }

    /// Explores `blk` as a dispatcher entry and applies the size thresholds.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidBlock`] if `blk` does not exist.
    pub fn explore_block(&self, func: &Function, blk: BlockId) -> Result<Option<DispatcherInfo>> {
        Ok(DispatcherInfo::explore(func, blk)?.filter(|d| self.is_large_enough(d)))
    }

    /// Explores every block of `func` in layout order.
    ///
    /// Blocks already inside a collected dispatcher are not explored again.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph references a missing block.
    pub fn collect(&mut self, func: &Function) -> Result<&[DispatcherInfo]> {
        self.reset();
        for blk in func.layout() {
            if self.is_dispatcher_block(*blk) {
                continue;
            }
            if let Some(dispatcher) = self.explore_block(func, *blk)? {
                log::debug!("{}: found {}", func.name(), dispatcher);
                self.dispatchers.push(dispatcher);
            }
        }
        Ok(&self.dispatchers)
    }

    fn is_large_enough(&self, dispatcher: &DispatcherInfo) -> bool {
        dispatcher.internal_blocks().len() >= self.min_internal_blocks
            && dispatcher.exit_blocks().len() >= self.min_exit_blocks
            && dispatcher.comparison_values().len() >= self.min_comparison_values
    }
}
