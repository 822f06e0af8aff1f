//! Structural verification of a [`Function`].

use std::collections::HashMap;

use crate::{
    ir::{BlockId, BlockType, Function},
    Result,
};

impl Function {
    /// Checks every structural invariant of the graph.
    ///
    /// - the layout names each live block exactly once and serials match positions
    /// - the last block is the only zero-way block and holds no control flow
    /// - the entry has no predecessors
    /// - control-flow instructions only appear as tails and jump to live blocks
    /// - stored type and successors match what tail and layout imply
    /// - two-way successors are distinct
    /// - predecessor lists are the exact inverse of successor lists
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::GraphInconsistency`] describing the first violation found.
    pub fn verify(&self) -> Result<()> {
        if self.layout.is_empty() {
            return Err(graph_error!("function {} has no blocks", self.name()));
        }

        let live = self.blocks.iter().filter(|b| b.is_some()).count();
        if live != self.layout.len() {
            return Err(graph_error!(
                "{} live blocks but {} blocks in layout",
                live,
                self.layout.len()
            ));
        }

        for (serial, id) in self.layout.iter().enumerate() {
            let block = self
                .block(*id)
                .ok_or_else(|| graph_error!("layout position {} names dead block {}", serial, id))?;
            if block.serial() != serial {
                return Err(graph_error!(
                    "block {} has serial {} but sits at {}",
                    id,
                    block.serial(),
                    serial
                ));
            }
        }

        let entry = self.entry();
        if !self.predecessors(entry).is_empty() {
            return Err(graph_error!(
                "entry block {} has predecessors {:?}",
                entry,
                self.predecessors(entry)
            ));
        }

        let exit = self.exit();
        let mut expected_preds: HashMap<BlockId, Vec<BlockId>> = HashMap::new();
        for block in self.blocks() {
            let id = block.id();
            let insns = block.instructions();
            for (index, insn) in insns.iter().enumerate() {
                if insn.is_control_flow() && index + 1 != insns.len() {
                    return Err(graph_error!(
                        "block {} has control flow before its tail: {}",
                        id,
                        insn
                    ));
                }
                if let Some(target) = insn.target() {
                    if !self.contains(target) {
                        return Err(graph_error!("block {} jumps to missing block {}", id, target));
                    }
                }
            }

            if id == exit {
                if block.block_type() != BlockType::ZeroWay || !block.succs().is_empty() {
                    return Err(graph_error!("stop block {} has successors", id));
                }
                if let Some(tail) = block.tail().filter(|t| t.is_control_flow()) {
                    return Err(graph_error!("stop block {} ends with {}", id, tail));
                }
            } else if block.block_type() == BlockType::ZeroWay {
                return Err(graph_error!("block {} is zero-way but not the stop block", id));
            }

            let (block_type, succs) = self.natural_successors(id)?;
            if block_type != block.block_type() {
                return Err(graph_error!(
                    "block {} is {} but its tail makes it {}",
                    id,
                    block.block_type(),
                    block_type
                ));
            }
            if succs != block.succs() {
                return Err(graph_error!(
                    "block {} stores successors {:?}, expected {:?}",
                    id,
                    block.succs(),
                    succs
                ));
            }
            if block_type == BlockType::TwoWay && succs[0] == succs[1] {
                return Err(graph_error!(
                    "two-way block {} has identical successors {}",
                    id,
                    succs[0]
                ));
            }

            for succ in succs {
                expected_preds.entry(succ).or_default().push(id);
            }
        }

        for block in self.blocks() {
            let mut expected = expected_preds.remove(&block.id()).unwrap_or_default();
            let mut stored = block.preds().to_vec();
            expected.sort_unstable();
            stored.sort_unstable();
            if expected != stored {
                return Err(graph_error!(
                    "block {} stores predecessors {:?}, expected {:?}",
                    block.id(),
                    stored,
                    expected
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        ir::{BlockId, FunctionBuilder, Instruction, Mop, Opcode},
        Error,
    };

    #[test]
    fn test_jump_into_entry_is_rejected() {
        let mut b = FunctionBuilder::new("f");
        let b0 = b.block();
        let b1 = b.block();
        let _stop = b.block();
        b.push(b1, Instruction::goto(b0));
        assert!(matches!(b.build(), Err(Error::GraphInconsistency { .. })));
    }

    #[test]
    fn test_jcc_to_fallthrough_is_rejected() {
        let mut b = FunctionBuilder::new("f");
        let b0 = b.block();
        let b1 = b.block();
        let _stop = b.block();
        b.push(b0, Instruction::jcc(Opcode::Jz, Mop::reg(0, 4), Mop::num(0, 4), b1));
        assert!(matches!(b.build(), Err(Error::GraphInconsistency { .. })));
    }

    #[test]
    fn test_control_flow_in_the_middle_is_rejected() {
        let mut b = FunctionBuilder::new("f");
        let b0 = b.block();
        let stop = b.block();
        b.push(b0, Instruction::goto(stop));
        b.push(b0, Instruction::nop());
        assert!(matches!(b.build(), Err(Error::GraphInconsistency { .. })));
    }

    #[test]
    fn test_missing_target_is_rejected() {
        let mut b = FunctionBuilder::new("f");
        let b0 = b.block();
        let _stop = b.block();
        b.push(b0, Instruction::goto(BlockId(42)));
        assert!(b.build().is_err());
    }

    #[test]
    fn test_stop_block_with_jump_is_rejected() {
        let mut b = FunctionBuilder::new("f");
        let _b0 = b.block();
        let b1 = b.block();
        let stop = b.block();
        b.push(stop, Instruction::goto(b1));
        assert!(matches!(b.build(), Err(Error::GraphInconsistency { .. })));
    }

    #[test]
    fn test_corrupted_preds_are_detected() -> crate::Result<()> {
        let mut b = FunctionBuilder::new("f");
        let b0 = b.block();
        let stop = b.block();
        b.push(b0, Instruction::goto(stop));
        let mut func = b.build()?;
        func.get_mut(stop)?.preds.clear();
        assert!(matches!(func.verify(), Err(Error::GraphInconsistency { .. })));
        Ok(())
    }
}
