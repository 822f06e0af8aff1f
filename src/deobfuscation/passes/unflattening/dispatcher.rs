//! Dispatcher recognition.
//!
//! A flattening dispatcher is a tree of comparison blocks that reads a state variable and jumps
//! to one of the original blocks. Starting from a candidate entry block, [`DispatcherInfo`]
//! walks the successors depth-first. A successor belongs to the dispatcher (is *internal*) when
//! it only reads variables the dispatcher already had available when reaching it, has
//! successors, and ends in a comparison jump or nothing at all. Every other successor is an
//! *exit*: one of the blocks the dispatcher selects.
//!
//! ```text
//!        father ──┐   father ──┐
//!                 ▼            ▼
//!              [entry] jz state, 5 ─────────────► exit A
//!                 │
//!              [internal] jz state, 7 ──────────► exit B
//!                 │
//!              [internal] jz state, 9 ──────────► exit C
//!                 │
//!                 └─────────────────────────────► exit D
//! ```

use std::fmt;

use crate::{
    analysis::MopHistory,
    ir::{contains_mop, push_unique, BlockId, Environment, Flow, Function, Instruction, Mop},
    Result,
};

/// Use/def summary of one dispatcher block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherBlockInfo {
    /// The block
    pub block: BlockId,
    /// Internal block it was reached from, `None` for the entry
    pub father: Option<BlockId>,
    /// Every variable read
    pub use_list: Vec<Mop>,
    /// Every variable written
    pub def_list: Vec<Mop>,
    /// Variables read before the block writes them
    pub use_before_def_list: Vec<Mop>,
    /// Variables considered defined once this block ran: the father's plus own definitions
    pub assume_def_list: Vec<Mop>,
    /// Immediate of the tail comparison
    pub comparison_value: Option<u64>,
    /// Variable of the tail comparison
    pub compared_mop: Option<Mop>,
}

impl DispatcherBlockInfo {
    /// Summarizes `blk`, inheriting assumed definitions from `father`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidBlock`] if `blk` does not exist.
    pub fn parse(
        func: &Function,
        blk: BlockId,
        father: Option<&DispatcherBlockInfo>,
    ) -> Result<Self> {
        let block = func.get(blk)?;

        let mut info = Self {
            block: blk,
            father: father.map(|f| f.block),
            use_list: Vec::new(),
            def_list: Vec::new(),
            use_before_def_list: Vec::new(),
            assume_def_list: father.map(|f| f.assume_def_list.clone()).unwrap_or_default(),
            comparison_value: None,
            compared_mop: None,
        };

        for insn in block.instructions() {
            for used in insn.used_mops() {
                if !contains_mop(&info.def_list, &used) {
                    push_unique(&mut info.use_before_def_list, used);
                }
                push_unique(&mut info.use_list, used);
            }
            if let Some(def) = insn.defined_mop() {
                push_unique(&mut info.def_list, *def);
            }
        }
        for def in &info.def_list {
            push_unique(&mut info.assume_def_list, *def);
        }

        if let Some((num, compared)) = block.tail().and_then(Instruction::comparison_info) {
            info.comparison_value = num.value();
            info.compared_mop = Some(compared);
        }
        Ok(info)
    }

    /// Returns `true` if every variable read before being written is in `prereqs`.
    #[must_use]
    pub fn does_only_need(&self, prereqs: &[Mop]) -> bool {
        self.use_before_def_list
            .iter()
            .all(|m| contains_mop(prereqs, m))
    }
}

/// A recognized dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherInfo {
    entry: DispatcherBlockInfo,
    internal: Vec<DispatcherBlockInfo>,
    exits: Vec<DispatcherBlockInfo>,
    compared_mop: Mop,
    comparison_values: Vec<u64>,
}

impl DispatcherInfo {
    /// Tries to recognize a dispatcher whose entry is `blk`.
    ///
    /// Returns `None` when `blk` is not a candidate entry (its tail is not a comparison against
    /// an immediate, or a predecessor compares the same variable) or when an internal block
    /// other than the entry can be reached from outside the dispatcher.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidBlock`] if `blk` does not exist.
    pub fn explore(func: &Function, blk: BlockId) -> Result<Option<Self>> {
        let Some((num, compared)) = Self::candidate_comparison(func, blk)? else {
            return Ok(None);
        };

        let mut entry = DispatcherBlockInfo::parse(func, blk, None)?;
        for used in entry.use_list.clone() {
            push_unique(&mut entry.assume_def_list, used);
        }

        let mut comparison_values = Vec::new();
        if let Some(value) = num.value() {
            comparison_values.push(value);
        }
        let mut internal = vec![entry.clone()];
        let mut exits: Vec<DispatcherBlockInfo> = Vec::new();

        // (internal index, next successor index)
        let mut stack: Vec<(usize, usize)> = vec![(0, 0)];
        while let Some(&(father_index, next)) = stack.last() {
            let succs = func.successors(internal[father_index].block);
            let Some(&child) = succs.get(next) else {
                stack.pop();
                continue;
            };
            if let Some(top) = stack.last_mut() {
                top.1 += 1;
            }

            let known = internal.iter().chain(exits.iter()).any(|i| i.block == child);
            if known {
                continue;
            }

            let info = DispatcherBlockInfo::parse(func, child, Some(&internal[father_index]))?;
            if Self::is_part_of_dispatcher(func, &info, &internal[father_index])? {
                if let Some(value) = info.comparison_value {
                    if !comparison_values.contains(&value) {
                        comparison_values.push(value);
                    }
                }
                internal.push(info);
                stack.push((internal.len() - 1, 0));
            } else {
                exits.push(info);
            }
        }

        let dispatcher = Self {
            entry,
            internal,
            exits,
            compared_mop: compared,
            comparison_values,
        };

        if let Some(block) = dispatcher.first_block_with_external_father(func) {
            log::debug!(
                "rejecting dispatcher at {}: internal block {} has an external predecessor",
                blk,
                block
            );
            return Ok(None);
        }
        Ok(Some(dispatcher))
    }

    fn candidate_comparison(func: &Function, blk: BlockId) -> Result<Option<(Mop, Mop)>> {
        let block = func.get(blk)?;
        let Some((num, compared)) = block.tail().and_then(Instruction::comparison_info) else {
            return Ok(None);
        };

        for pred in block.preds() {
            let father = func.get(*pred)?;
            let same_variable = father
                .tail()
                .and_then(Instruction::comparison_info)
                .is_some_and(|(_, father_compared)| father_compared.equal_ignore_size(&compared));
            if same_variable {
                return Ok(None);
            }
        }
        Ok(Some((num, compared)))
    }

    fn is_part_of_dispatcher(
        func: &Function,
        info: &DispatcherBlockInfo,
        father: &DispatcherBlockInfo,
    ) -> Result<bool> {
        if !info.does_only_need(&father.assume_def_list) {
            return Ok(false);
        }
        let block = func.get(info.block)?;
        if block.succs().is_empty() {
            return Ok(false);
        }
        Ok(block
            .tail()
            .map_or(true, |t| t.opcode.is_flattening_jump()))
    }

    fn first_block_with_external_father(&self, func: &Function) -> Option<BlockId> {
        self.internal
            .iter()
            .filter(|info| info.block != self.entry.block)
            .find(|info| {
                func.predecessors(info.block)
                    .iter()
                    .any(|pred| !self.is_internal(*pred))
            })
            .map(|info| info.block)
    }

    /// Entry block summary.
    #[must_use]
    pub fn entry(&self) -> &DispatcherBlockInfo {
        &self.entry
    }

    /// Entry block.
    #[must_use]
    pub fn entry_block(&self) -> BlockId {
        self.entry.block
    }

    /// Internal blocks in discovery order, entry first.
    #[must_use]
    pub fn internal_blocks(&self) -> &[DispatcherBlockInfo] {
        &self.internal
    }

    /// Exit blocks in discovery order.
    #[must_use]
    pub fn exit_blocks(&self) -> &[DispatcherBlockInfo] {
        &self.exits
    }

    /// Ids of the internal blocks.
    #[must_use]
    pub fn internal_ids(&self) -> Vec<BlockId> {
        self.internal.iter().map(|i| i.block).collect()
    }

    /// The state variable compared by the entry.
    #[must_use]
    pub fn compared_mop(&self) -> Mop {
        self.compared_mop
    }

    /// Distinct immediates the dispatcher compares against.
    #[must_use]
    pub fn comparison_values(&self) -> &[u64] {
        &self.comparison_values
    }

    /// Returns `true` if `blk` is an internal block.
    #[must_use]
    pub fn is_internal(&self, blk: BlockId) -> bool {
        self.internal.iter().any(|i| i.block == blk)
    }

    /// Returns `true` if `blk` is an exit block.
    #[must_use]
    pub fn is_exit(&self, blk: BlockId) -> bool {
        self.exits.iter().any(|i| i.block == blk)
    }

    /// Predecessors of the entry that are not part of the dispatcher.
    #[must_use]
    pub fn fathers(&self, func: &Function) -> Vec<BlockId> {
        func.predecessors(self.entry.block)
            .iter()
            .copied()
            .filter(|p| !self.is_internal(*p))
            .collect()
    }

    /// Runs the dispatcher with the state a father history produces.
    ///
    /// The entry's read-before-write variables are seeded from `history`, then internal blocks
    /// execute until control leaves the dispatcher. Returns the exit reached and the executed
    /// instructions, or `None` if a value is unknown or the walk does not leave the dispatcher
    /// within one step per internal block.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidBlock`] if an internal block vanished from the graph.
    pub fn emulate_with_history(
        &self,
        func: &Function,
        history: &MopHistory,
    ) -> Result<Option<(BlockId, Vec<Instruction>)>> {
        let Some(values) = history.values(&self.entry.use_before_def_list) else {
            return Ok(None);
        };
        let mut env = Environment::new();
        for (mop, value) in self.entry.use_before_def_list.iter().zip(values) {
            env.set(mop, value);
        }

        let mut executed = Vec::new();
        let mut current = self.entry.block;
        let mut steps = 0;
        while self.is_internal(current) {
            steps += 1;
            if steps > self.internal.len() + 1 {
                return Ok(None);
            }

            let block = func.get(current)?;
            let mut flow = Flow::Continue;
            for insn in block.instructions() {
                match env.execute(insn) {
                    Some(f) => flow = f,
                    None => return Ok(None),
                }
                executed.push(insn.clone());
            }

            current = match flow {
                Flow::Goto(target) | Flow::Taken(target) => target,
                Flow::Continue | Flow::NotTaken => match block.succs().first() {
                    Some(next) => *next,
                    None => return Ok(None),
                },
            };
        }
        Ok(Some((current, executed)))
    }
}

impl fmt::Display for DispatcherInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values: Vec<String> = self
            .comparison_values
            .iter()
            .map(|v| format!("{v:#x}"))
            .collect();
        write!(
            f,
            "dispatcher @{} on {}: {} internal, {} exits, values [{}]",
            self.entry.block,
            self.compared_mop,
            self.internal.len(),
            self.exits.len(),
            values.join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::MopTracker,
        ir::{FunctionBuilder, Opcode},
        test::{state, three_case},
    };

    #[test]
    fn test_parse_use_before_def() -> crate::Result<()> {
        let mut b = FunctionBuilder::new("f");
        let b0 = b.block();
        let b1 = b.block();
        let stop = b.block();
        let (x, y) = (Mop::reg(1, 4), Mop::reg(2, 4));
        b.push(b0, Instruction::nop());
        b.push(b1, Instruction::binary(Opcode::Add, x, Mop::num(1, 4), y));
        b.push(b1, Instruction::jcc(Opcode::Jnz, y, Mop::num(3, 4), stop));
        let func = b.build()?;

        let info = DispatcherBlockInfo::parse(&func, b1, None)?;
        assert_eq!(info.use_list, vec![x, y]);
        assert_eq!(info.def_list, vec![y]);
        assert_eq!(info.use_before_def_list, vec![x]);
        assert_eq!(info.assume_def_list, vec![y]);
        assert_eq!(info.comparison_value, Some(3));
        assert_eq!(info.compared_mop, Some(y));
        assert!(info.does_only_need(&[Mop::reg(1, 8)]));
        assert!(!info.does_only_need(&[y]));
        Ok(())
    }

    #[test]
    fn test_explore_three_case_dispatcher() -> crate::Result<()> {
        let func = three_case()?;
        let dispatcher = DispatcherInfo::explore(&func, BlockId(1))?
            .ok_or_else(|| crate::test::missing("no dispatcher"))?;

        assert_eq!(dispatcher.entry_block(), BlockId(1));
        assert_eq!(dispatcher.internal_ids(), vec![BlockId(1), BlockId(2), BlockId(3)]);
        let exits: Vec<BlockId> = dispatcher.exit_blocks().iter().map(|e| e.block).collect();
        assert_eq!(exits, vec![BlockId(4), BlockId(7), BlockId(6), BlockId(5)]);
        assert_eq!(dispatcher.comparison_values(), &[5, 7, 9]);
        assert!(dispatcher.compared_mop().equal_ignore_size(&state()));
        assert_eq!(dispatcher.fathers(&func), vec![BlockId(0), BlockId(5), BlockId(6)]);
        Ok(())
    }

    #[test]
    fn test_non_candidates() -> crate::Result<()> {
        let func = three_case()?;
        // tail is a goto
        assert!(DispatcherInfo::explore(&func, BlockId(5))?.is_none());
        // b2's predecessor b1 compares the same variable
        assert!(DispatcherInfo::explore(&func, BlockId(2))?.is_none());
        Ok(())
    }

    #[test]
    fn test_external_father_rejects() -> crate::Result<()> {
        // b0 jumps straight into the second comparison block
        let mut b = FunctionBuilder::new("f");
        let ids: Vec<BlockId> = (0..7).map(|_| b.block()).collect();
        let s = state();
        b.push(ids[0], Instruction::mov(Mop::num(5, 4), s));
        b.push(ids[0], Instruction::goto(ids[3]));
        b.push(ids[1], Instruction::nop());
        b.push(ids[2], Instruction::jcc(Opcode::Jz, s, Mop::num(5, 4), ids[5]));
        b.push(ids[3], Instruction::jcc(Opcode::Jz, s, Mop::num(7, 4), ids[6]));
        b.push(ids[4], Instruction::goto(ids[6]));
        b.push(ids[5], Instruction::goto(ids[2]));
        let func = b.build()?;

        assert!(DispatcherInfo::explore(&func, ids[2])?.is_none());
        Ok(())
    }

    #[test]
    fn test_emulate_with_history() -> crate::Result<()> {
        let func = three_case()?;
        let dispatcher = DispatcherInfo::explore(&func, BlockId(1))?
            .ok_or_else(|| crate::test::missing("no dispatcher"))?;

        let tracker = MopTracker::new(
            &func,
            dispatcher.entry().use_before_def_list.clone(),
            100,
            100,
        )
        .with_avoid(dispatcher.internal_ids());

        let cases = [(BlockId(0), BlockId(5)), (BlockId(5), BlockId(6)), (BlockId(6), BlockId(7))];
        for (father, expected) in cases {
            let histories = tracker.search_backward(father, None)?;
            assert_eq!(histories.len(), 1);
            let (target, executed) = dispatcher
                .emulate_with_history(&func, &histories[0])?
                .ok_or_else(|| crate::test::missing("emulation failed"))?;
            assert_eq!(target, expected);
            assert!(executed.iter().all(Instruction::is_conditional_jump));
        }
        Ok(())
    }
}
