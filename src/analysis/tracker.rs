//! Backward tracking of operand values along every path.
//!
//! [`MopTracker`] starts at an instruction and walks the control-flow graph backwards, looking
//! for the instructions that define a set of tracked operands. Every distinct predecessor path
//! produces one [`MopHistory`]: the blocks it went through and the chain of defining
//! instructions in forward order. Replaying that chain concretely yields the operand values the
//! path produces, provided every tracked operand was traced back to immediates.
//!
//! # Termination
//!
//! A path stops when all operands are resolved, or when it
//!
//! - reaches a block without predecessors ([`StopReason::FunctionEntry`])
//! - would re-enter a block already on the path ([`StopReason::Loop`])
//! - would enter a block of the avoid set ([`StopReason::Avoided`])
//! - meets a definition that cannot be evaluated statically ([`StopReason::Unsupported`])
//! - would grow beyond `max_blocks` blocks ([`StopReason::MaxBlocks`])
//! - would push the number of paths beyond `max_paths` ([`StopReason::MaxPaths`])
//!
//! Stopped paths are still returned as unresolved histories.
//!
//! # Example
//!
//! ```rust
//! use cffscope::analysis::MopTracker;
//! use cffscope::ir::{FunctionBuilder, Instruction, Mop};
//!
//! let state = Mop::reg(0, 4);
//! let mut b = FunctionBuilder::new("f");
//! let b0 = b.block();
//! let b1 = b.block();
//! let _stop = b.block();
//! b.push(b0, Instruction::mov(Mop::num(5, 4), state));
//! b.push(b1, Instruction::nop());
//! let func = b.build()?;
//!
//! let histories = MopTracker::new(&func, vec![state], 100, 100).search_backward(b1, None)?;
//! assert_eq!(histories.len(), 1);
//! assert_eq!(histories[0].value_of(&state), Some(5));
//! # Ok::<(), cffscope::Error>(())
//! ```

use std::collections::HashSet;

use strum::Display;

use crate::{
    ir::{
        contains_mop, push_unique, remove_mop, BlockId, Environment, Function, Instruction, Mop,
        Opcode,
    },
    Result,
};

/// Why a path stopped before all operands were resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum StopReason {
    /// Reached a block without predecessors
    FunctionEntry,
    /// Would re-enter a block already on the path
    Loop,
    /// Would enter a block the caller asked to avoid
    Avoided,
    /// A tracked operand is defined by an instruction that cannot be evaluated
    Unsupported,
    /// Block budget of the path exhausted
    MaxBlocks,
    /// Path budget of the search exhausted
    MaxPaths,
}

/// Outcome of one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HistoryStatus {
    /// Every tracked operand was traced back to immediates
    Resolved,
    /// The path stopped early
    Unresolved(StopReason),
}

/// One backward path and the definitions found along it.
#[derive(Debug, Clone)]
pub struct MopHistory {
    block_path: Vec<BlockId>,
    instructions: Vec<Instruction>,
    unresolved: Vec<Mop>,
    status: HistoryStatus,
}

impl MopHistory {
    /// Blocks of the path, earliest first; the start block is last.
    #[must_use]
    pub fn block_path(&self) -> &[BlockId] {
        &self.block_path
    }

    /// Defining instructions in execution order.
    #[must_use]
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Operands still unresolved when the path stopped.
    #[must_use]
    pub fn unresolved(&self) -> &[Mop] {
        &self.unresolved
    }

    /// Path status.
    #[must_use]
    pub fn status(&self) -> HistoryStatus {
        self.status
    }

    /// Returns `true` if every tracked operand was resolved.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.status == HistoryStatus::Resolved
    }

    /// Block the search started from.
    #[must_use]
    pub fn start_block(&self) -> Option<BlockId> {
        self.block_path.last().copied()
    }

    /// Position of `blk` in the path.
    #[must_use]
    pub fn position_of(&self, blk: BlockId) -> Option<usize> {
        self.block_path.iter().position(|b| *b == blk)
    }

    /// Returns `true` if the path goes through `blk`.
    #[must_use]
    pub fn contains_block(&self, blk: BlockId) -> bool {
        self.block_path.contains(&blk)
    }

    /// Replaces `old` by `new` in the path. Returns `false` if `old` is not on it.
    pub fn replace_block_in_path(&mut self, old: BlockId, new: BlockId) -> bool {
        let mut replaced = false;
        for blk in &mut self.block_path {
            if *blk == old {
                *blk = new;
                replaced = true;
            }
        }
        replaced
    }

    /// Inserts `blk` right after `after`. Returns `false` if `after` is not on the path.
    pub fn insert_block_in_path(&mut self, blk: BlockId, after: BlockId) -> bool {
        match self.position_of(after) {
            Some(pos) => {
                self.block_path.insert(pos + 1, blk);
                true
            }
            None => false,
        }
    }

    /// Value `mop` holds at the end of the path.
    ///
    /// `None` for unresolved histories and for chains that cannot be evaluated (division by
    /// zero, operands never defined).
    #[must_use]
    pub fn value_of(&self, mop: &Mop) -> Option<u64> {
        self.evaluate().and_then(|env| env.get(mop))
    }

    /// Values of several operands, `None` if any of them is unknown.
    #[must_use]
    pub fn values(&self, mops: &[Mop]) -> Option<Vec<u64>> {
        let env = self.evaluate()?;
        mops.iter().map(|m| env.get(m)).collect()
    }

    fn evaluate(&self) -> Option<Environment> {
        if !self.is_resolved() {
            return None;
        }
        let mut env = Environment::new();
        for insn in &self.instructions {
            env.execute(insn)?;
        }
        Some(env)
    }
}

/// Per-history values of `mops`, in history order.
#[must_use]
pub fn get_all_possible_values(histories: &[MopHistory], mops: &[Mop]) -> Vec<Option<Vec<u64>>> {
    histories.iter().map(|h| h.values(mops)).collect()
}

#[derive(Debug, Clone)]
struct PathState {
    /// Start block first, current block last
    path: Vec<BlockId>,
    /// Latest definition first
    chain: Vec<Instruction>,
    unresolved: Vec<Mop>,
    limit: Option<usize>,
}

impl PathState {
    fn finish(&self, status: HistoryStatus) -> MopHistory {
        MopHistory {
            block_path: self.path.iter().rev().copied().collect(),
            instructions: self.chain.iter().rev().cloned().collect(),
            unresolved: self.unresolved.clone(),
            status,
        }
    }
}

enum Walk {
    Resolved,
    Unsupported,
    Pending,
}

/// Backward search for the definitions of a set of operands.
#[derive(Debug, Clone)]
pub struct MopTracker<'a> {
    func: &'a Function,
    mops: Vec<Mop>,
    max_blocks: usize,
    max_paths: usize,
    avoid: HashSet<BlockId>,
}

impl<'a> MopTracker<'a> {
    /// Creates a tracker for `mops` with the given path bounds.
    #[must_use]
    pub fn new(func: &'a Function, mops: Vec<Mop>, max_blocks: usize, max_paths: usize) -> Self {
        Self {
            func,
            mops,
            max_blocks: max_blocks.max(1),
            max_paths: max_paths.max(1),
            avoid: HashSet::new(),
        }
    }

    /// Blocks the search must not enter.
    #[must_use]
    pub fn with_avoid(mut self, avoid: impl IntoIterator<Item = BlockId>) -> Self {
        self.avoid.extend(avoid);
        self
    }

    /// Tracked operands.
    #[must_use]
    pub fn mops(&self) -> &[Mop] {
        &self.mops
    }

    /// Walks backwards from instruction `start_insn` (inclusive) of `start`, or from its tail.
    ///
    /// Predecessors are explored depth-first in list order with an explicit work stack.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidBlock`] if `start` is not a live block.
    pub fn search_backward(
        &self,
        start: BlockId,
        start_insn: Option<usize>,
    ) -> Result<Vec<MopHistory>> {
        self.func.get(start)?;

        let mut histories = Vec::new();
        let mut paths = 1usize;
        let mut stack = vec![PathState {
            path: vec![start],
            chain: Vec::new(),
            unresolved: self.mops.clone(),
            limit: start_insn,
        }];

        while let Some(mut state) = stack.pop() {
            let current = state.path[state.path.len() - 1];

            if state.unresolved.is_empty() {
                histories.push(state.finish(HistoryStatus::Resolved));
                continue;
            }
            match self.walk_block(current, &mut state)? {
                Walk::Resolved => {
                    histories.push(state.finish(HistoryStatus::Resolved));
                    continue;
                }
                Walk::Unsupported => {
                    histories.push(state.finish(HistoryStatus::Unresolved(StopReason::Unsupported)));
                    continue;
                }
                Walk::Pending => {}
            }

            let preds = self.func.predecessors(current);
            if preds.is_empty() {
                histories.push(state.finish(HistoryStatus::Unresolved(StopReason::FunctionEntry)));
                continue;
            }

            let mut children = Vec::with_capacity(preds.len());
            for (index, pred) in preds.iter().enumerate() {
                if index > 0 {
                    if paths >= self.max_paths {
                        histories.push(state.finish(HistoryStatus::Unresolved(StopReason::MaxPaths)));
                        break;
                    }
                    paths += 1;
                }

                let stop = if state.path.contains(pred) {
                    Some(StopReason::Loop)
                } else if self.avoid.contains(pred) {
                    Some(StopReason::Avoided)
                } else if state.path.len() >= self.max_blocks {
                    Some(StopReason::MaxBlocks)
                } else {
                    None
                };

                match stop {
                    Some(reason) => histories.push(state.finish(HistoryStatus::Unresolved(reason))),
                    None => {
                        let mut child = state.clone();
                        child.path.push(*pred);
                        children.push(child);
                    }
                }
            }
            stack.extend(children.into_iter().rev());
        }

        log::debug!(
            "tracked {} from block {}: {} histories, {} resolved",
            self.mops
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", "),
            start,
            histories.len(),
            histories.iter().filter(|h| h.is_resolved()).count()
        );
        Ok(histories)
    }

    fn walk_block(&self, blk: BlockId, state: &mut PathState) -> Result<Walk> {
        let insns = self.func.get(blk)?.instructions();
        let end = match state.limit.take() {
            Some(limit) => (limit + 1).min(insns.len()),
            None => insns.len(),
        };

        for insn in insns[..end].iter().rev() {
            let Some(def) = insn.defined_mop() else {
                continue;
            };
            if !contains_mop(&state.unresolved, def) {
                continue;
            }
            if insn.opcode == Opcode::Ldx {
                return Ok(Walk::Unsupported);
            }

            remove_mop(&mut state.unresolved, def);
            state.chain.push(insn.clone());
            for used in insn.used_mops() {
                push_unique(&mut state.unresolved, used);
            }
            if state.unresolved.is_empty() {
                return Ok(Walk::Resolved);
            }
        }
        Ok(Walk::Pending)
    }
}
