//! Local cleanup after rewrites.
//!
//! Redirecting edges away from a dispatcher leaves its blocks unreachable, and replayed or
//! folded instructions can leave `nop`s behind. Cleanup removes both.

use std::collections::HashSet;

use crate::{
    ir::{BlockId, Function, Opcode},
    Result,
};

/// What a cleanup run removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Blocks that could not be reached from the entry, in former layout order
    pub removed_blocks: Vec<BlockId>,
    /// Number of `nop` instructions stripped
    pub removed_nops: usize,
}

impl CleanupReport {
    /// Total number of changes.
    #[must_use]
    pub fn changes(&self) -> usize {
        self.removed_blocks.len() + self.removed_nops
    }
}

impl Function {
    /// Blocks reachable from the entry.
    #[must_use]
    pub fn reachable_blocks(&self) -> HashSet<BlockId> {
        let mut seen = HashSet::new();
        let mut stack = vec![self.entry()];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            stack.extend(self.successors(id).iter().copied());
        }
        seen
    }

    /// Removes unreachable blocks and `nop` instructions.
    ///
    /// The stop block is always kept. The fall-through successor of a reachable block is
    /// reachable too, so dropping unreachable blocks never changes a surviving fall-through.
    ///
    /// # Errors
    ///
    /// Returns an error only if the graph was already inconsistent.
    pub fn cleanup(&mut self) -> Result<CleanupReport> {
        let mut report = CleanupReport::default();

        let reachable = self.reachable_blocks();
        let exit = self.exit();
        let dead: Vec<BlockId> = self
            .layout
            .iter()
            .copied()
            .filter(|id| *id != exit && !reachable.contains(id))
            .collect();

        if !dead.is_empty() {
            let dead_set: HashSet<BlockId> = dead.iter().copied().collect();
            for id in &dead {
                for succ in self.successors(*id).to_vec() {
                    if dead_set.contains(&succ) {
                        continue;
                    }
                    let block = self.get_mut(succ)?;
                    if let Some(pos) = block.preds.iter().position(|p| p == id) {
                        block.preds.remove(pos);
                    }
                }
            }
            for id in &dead {
                self.blocks[id.index()] = None;
            }
            self.layout.retain(|id| !dead_set.contains(id));
            self.renumber();
            self.mark_chains_dirty();
            report.removed_blocks = dead;
        }

        for id in self.layout.clone() {
            let block = self.get_mut(id)?;
            let before = block.insns.len();
            block.insns.retain(|insn| insn.opcode != Opcode::Nop);
            report.removed_nops += before - block.insns.len();
        }
        if report.removed_nops > 0 {
            self.mark_chains_dirty();
        }

        Ok(report)
    }
}
