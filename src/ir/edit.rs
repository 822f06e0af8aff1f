//! Graph mutation primitives.
//!
//! Every primitive keeps successor and predecessor lists consistent for the blocks it touches;
//! none of them re-verifies the whole graph. Callers run [`Function::verify`] once a rewrite is
//! complete.
//!
//! # Layout and fall-through
//!
//! A block that does not end in `goto` continues with its layout successor. Placing a block with
//! content into the layout would therefore silently capture the fall-through of its new layout
//! predecessor. Before content is inserted at a position the previous block is detached:
//!
//! - a one-way block that falls through receives an explicit `goto` to its old successor
//! - a two-way block receives an empty trampoline that jumps to its old fall-through
//!
//! An *empty* block inserted with [`Function::insert_block`] just continues to the next block,
//! so inserting it never changes behavior.

use crate::{
    ir::{BlockFlags, BlockId, BlockType, Function, Instruction, Opcode},
    Error, Result,
};

impl Function {
    /// Inserts an empty one-way block at layout position `pos`.
    ///
    /// The new block falls through to the block previously at `pos`. Valid positions are
    /// `1..=serial(exit)`: nothing goes before the entry or after the stop block.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEdit`] for positions outside that range.
    pub fn insert_block(&mut self, pos: usize) -> Result<BlockId> {
        let exit_pos = self.layout.len() - 1;
        if pos == 0 || pos > exit_pos {
            return Err(Error::InvalidEdit {
                block: self.entry(),
                message: format!("cannot insert a block at serial {pos} (stop block at {exit_pos})"),
            });
        }

        let prev = self.layout[pos - 1];
        let id = self.alloc_block(Vec::new());
        self.layout.insert(pos, id);
        self.renumber();
        self.refresh_edges(prev)?;
        self.refresh_edges(id)?;
        self.mark_chains_dirty();
        Ok(id)
    }

    /// Makes sure the block before layout position `pos` no longer falls into `pos`.
    ///
    /// Returns the position new content can be inserted at, which moves by one when a
    /// trampoline had to be inserted.
    pub(crate) fn detach_fallthrough_into(&mut self, pos: usize) -> Result<usize> {
        let exit_pos = self.layout.len() - 1;
        if pos == 0 || pos > exit_pos {
            return Err(Error::InvalidEdit {
                block: self.entry(),
                message: format!("no layout predecessor to detach at serial {pos}"),
            });
        }

        let prev = self.layout[pos - 1];
        let next = self.layout[pos];
        let block = self.get(prev)?;
        match block.block_type() {
            BlockType::OneWay if block.falls_through() => {
                self.get_mut(prev)?.insns.push(Instruction::goto(next));
                self.refresh_edges(prev)?;
                Ok(pos)
            }
            BlockType::TwoWay => {
                let trampoline = self.insert_block(pos)?;
                let block = self.get_mut(trampoline)?;
                block.insns.push(Instruction::goto(next));
                block.flags |= BlockFlags::TRAMPOLINE;
                self.refresh_edges(trampoline)?;
                Ok(pos + 1)
            }
            _ => Ok(pos),
        }
    }

    /// Places a copy of `src` at layout position `pos`.
    ///
    /// The copy has no predecessors. Its tail is copied verbatim, so a copy of a block that
    /// falls through continues with whatever now follows it in layout; callers fix its
    /// successors with [`Function::change_1way_successor`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEdit`] when copying the stop block or for invalid positions.
    pub fn copy_block(&mut self, src: BlockId, pos: usize) -> Result<BlockId> {
        if src == self.exit() {
            return Err(Error::InvalidEdit {
                block: src,
                message: "the stop block cannot be copied".to_string(),
            });
        }
        let insns = self.get(src)?.insns.clone();

        let pos = self.detach_fallthrough_into(pos)?;
        let id = self.insert_block(pos)?;
        self.get_mut(id)?.insns = insns;
        self.refresh_edges(id)?;
        Ok(id)
    }

    /// Creates a block holding `insns` right before the stop block.
    ///
    /// Without a `goto` tail the block falls through to the stop block.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEdit`] if `insns` contains a conditional jump.
    pub fn create_block(&mut self, insns: Vec<Instruction>) -> Result<BlockId> {
        if let Some(insn) = insns.iter().find(|i| i.is_conditional_jump()) {
            return Err(Error::InvalidEdit {
                block: self.exit(),
                message: format!("created block would contain a conditional jump: {insn}"),
            });
        }

        let exit_pos = self.layout.len() - 1;
        let pos = self.detach_fallthrough_into(exit_pos)?;
        let id = self.insert_block(pos)?;
        self.get_mut(id)?.insns = insns;
        self.refresh_edges(id)?;
        Ok(id)
    }

    /// Adds creation flags to a block.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBlock`] for unknown ids.
    pub fn add_flags(&mut self, id: BlockId, flags: BlockFlags) -> Result<()> {
        self.get_mut(id)?.flags |= flags;
        Ok(())
    }

    /// Points a one-way block at `target`, replacing its `goto` or appending one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEdit`] unless `blk` is a one-way block.
    pub fn change_1way_successor(&mut self, blk: BlockId, target: BlockId) -> Result<()> {
        self.get(target)?;
        let block = self.get_mut(blk)?;
        if block.block_type != BlockType::OneWay {
            return Err(Error::InvalidEdit {
                block: blk,
                message: format!("expected a one-way block, found {}", block.block_type),
            });
        }

        match block.insns.last_mut() {
            Some(tail) if tail.opcode == Opcode::Goto => tail.set_target(target),
            _ => block.insns.push(Instruction::goto(target)),
        }
        self.refresh_edges(blk)?;
        self.mark_chains_dirty();
        Ok(())
    }

    /// Changes the taken target of a two-way block.
    ///
    /// If `target` is the fall-through block, both edges would coincide and the conditional
    /// jump is replaced by a `goto`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEdit`] unless `blk` is a two-way block.
    pub fn change_2way_taken_successor(&mut self, blk: BlockId, target: BlockId) -> Result<()> {
        self.get(target)?;
        let block = self.get(blk)?;
        if block.block_type != BlockType::TwoWay {
            return Err(Error::InvalidEdit {
                block: blk,
                message: format!("expected a two-way block, found {}", block.block_type),
            });
        }
        if block.succs.first() == Some(&target) {
            return self.make_goto(blk, target);
        }

        if let Some(tail) = self.get_mut(blk)?.insns.last_mut() {
            tail.set_target(target);
        }
        self.refresh_edges(blk)?;
        self.mark_chains_dirty();
        Ok(())
    }

    /// Replaces the control-flow tail of `blk` by `goto target`, turning it into a one-way block.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEdit`] for the stop block.
    pub fn make_goto(&mut self, blk: BlockId, target: BlockId) -> Result<()> {
        self.get(target)?;
        if blk == self.exit() {
            return Err(Error::InvalidEdit {
                block: blk,
                message: "the stop block has no successors".to_string(),
            });
        }

        let block = self.get_mut(blk)?;
        match block.insns.last_mut() {
            Some(tail) if tail.is_control_flow() => {
                *tail = Instruction::goto(target).with_ea(tail.ea);
            }
            _ => block.insns.push(Instruction::goto(target)),
        }
        self.refresh_edges(blk)?;
        self.mark_chains_dirty();
        Ok(())
    }

    /// Redirects the edge `from -> old` to `new`.
    ///
    /// The edge is found by identity, never by layout adjacency:
    ///
    /// - one-way `from`: its `goto` is retargeted (or added)
    /// - two-way `from` whose taken target is `old`: the taken target changes
    /// - two-way `from` whose fall-through is `old`: an empty trampoline is placed right after
    ///   `from` and jumps to `new`
    ///
    /// Returns the trampoline, if one was created.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEdit`] if there is no edge `from -> old`.
    pub fn redirect_edge(
        &mut self,
        from: BlockId,
        old: BlockId,
        new: BlockId,
    ) -> Result<Option<BlockId>> {
        let block = self.get(from)?;
        let succs = block.succs.clone();
        let block_type = block.block_type;

        match block_type {
            BlockType::OneWay if succs.first() == Some(&old) => {
                self.change_1way_successor(from, new)?;
                Ok(None)
            }
            BlockType::TwoWay if succs.get(1) == Some(&old) => {
                self.change_2way_taken_successor(from, new)?;
                Ok(None)
            }
            BlockType::TwoWay if succs.first() == Some(&old) => {
                let pos = self.get(from)?.serial + 1;
                let trampoline = self.insert_block(pos)?;
                self.add_flags(trampoline, BlockFlags::TRAMPOLINE)?;
                self.change_1way_successor(trampoline, new)?;
                Ok(Some(trampoline))
            }
            _ => Err(Error::InvalidEdit {
                block: from,
                message: format!("no edge {from} -> {old}"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::ir::{BlockType, FunctionBuilder, Instruction, Mop, Opcode};

    #[test]
    fn test_insert_block_keeps_fallthrough() -> crate::Result<()> {
        let mut b = FunctionBuilder::new("f");
        let b0 = b.block();
        let b1 = b.block();
        let _stop = b.block();
        b.push(b0, Instruction::mov(Mop::num(1, 4), Mop::reg(0, 4)));
        b.push(b1, Instruction::mov(Mop::num(2, 4), Mop::reg(1, 4)));
        let mut func = b.build()?;

        let new = func.insert_block(1)?;
        func.verify()?;
        assert_eq!(func.successors(b0), &[new]);
        assert_eq!(func.successors(new), &[b1]);
        assert_eq!(func.predecessors(b1), &[new]);
        Ok(())
    }

    #[test]
    fn test_insert_block_rejects_entry_and_after_stop() -> crate::Result<()> {
        let mut b = FunctionBuilder::new("f");
        b.block();
        b.block();
        let mut func = b.build()?;
        assert!(func.insert_block(0).is_err());
        assert!(func.insert_block(2).is_err());
        assert!(func.insert_block(1).is_ok());
        func.verify()
    }

    #[test]
    fn test_copy_block_before_stop_detaches_fallthrough() -> crate::Result<()> {
        let mut b = FunctionBuilder::new("f");
        let b0 = b.block();
        let b1 = b.block();
        let stop = b.block();
        b.push(b0, Instruction::mov(Mop::num(1, 4), Mop::reg(0, 4)));
        b.push(b1, Instruction::mov(Mop::num(2, 4), Mop::reg(0, 4)));
        let mut func = b.build()?;

        let pos = func.serial(stop).unwrap_or_default();
        let copy = func.copy_block(b0, pos)?;
        func.change_1way_successor(copy, b1)?;
        func.verify()?;

        // b1 used to fall into the stop block and now jumps there explicitly
        assert_eq!(func.get(b1)?.goto_target(), Some(stop));
        assert_eq!(func.successors(copy), &[b1]);
        assert!(func.predecessors(copy).is_empty());
        Ok(())
    }

    #[test]
    fn test_copy_block_after_two_way_inserts_trampoline() -> crate::Result<()> {
        // b0: mov ; b1: nop ; b2: jz r0, 1 -> b1, falls into the stop block
        let mut b = FunctionBuilder::new("f");
        let b0 = b.block();
        let b1 = b.block();
        let b2 = b.block();
        let _stop = b.block();
        b.push(b0, Instruction::mov(Mop::num(1, 4), Mop::reg(0, 4)));
        b.push(b1, Instruction::nop());
        b.push(
            b2,
            Instruction::jcc(Opcode::Jz, Mop::reg(0, 4), Mop::num(1, 4), b1),
        );
        let mut func = b.build()?;

        let pos = func.qty() - 1;
        let copy = func.copy_block(b0, pos)?;
        func.change_1way_successor(copy, b1)?;
        func.verify()?;

        let fallthrough = func.successors(b2)[0];
        assert_ne!(fallthrough, copy);
        assert!(func
            .get(fallthrough)?
            .flags()
            .contains(crate::ir::BlockFlags::TRAMPOLINE));
        assert_eq!(func.get(fallthrough)?.goto_target(), Some(func.exit()));
        Ok(())
    }

    #[test]
    fn test_copy_stop_block_is_rejected() -> crate::Result<()> {
        let mut b = FunctionBuilder::new("f");
        b.block();
        let stop = b.block();
        let mut func = b.build()?;
        assert!(matches!(
            func.copy_block(stop, 1),
            Err(crate::Error::InvalidEdit { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_redirect_edge_by_identity() -> crate::Result<()> {
        // b0: jz r0, 0 -> b2 ; falls into b1
        // b1: goto b3
        // b2: goto b3
        // b3: stop
        let mut b = FunctionBuilder::new("f");
        let b0 = b.block();
        let b1 = b.block();
        let b2 = b.block();
        let stop = b.block();
        b.push(b0, Instruction::jcc(Opcode::Jz, Mop::reg(0, 4), Mop::num(0, 4), b2));
        b.push(b1, Instruction::goto(stop));
        b.push(b2, Instruction::goto(stop));
        let mut func = b.build()?;

        // taken edge
        assert_eq!(func.redirect_edge(b0, b2, stop)?, None);
        assert_eq!(func.successors(b0), &[b1, stop]);

        // fall-through edge gets a trampoline
        let trampoline = func.redirect_edge(b0, b1, b2)?;
        let trampoline = trampoline.ok_or_else(|| crate::test::missing("no trampoline"))?;
        assert_eq!(func.successors(b0), &[trampoline, stop]);
        assert_eq!(func.successors(trampoline), &[b2]);
        assert!(func.predecessors(b1).is_empty());

        // one-way edge
        assert_eq!(func.redirect_edge(b2, stop, b1)?, None);
        assert_eq!(func.successors(b2), &[b1]);

        assert!(func.redirect_edge(b2, stop, b1).is_err());
        func.verify()
    }

    #[test]
    fn test_change_taken_to_fallthrough_becomes_goto() -> crate::Result<()> {
        let mut b = FunctionBuilder::new("f");
        let b0 = b.block();
        let b1 = b.block();
        let b2 = b.block();
        let _stop = b.block();
        b.push(b0, Instruction::jcc(Opcode::Jnz, Mop::reg(0, 4), Mop::num(0, 4), b2));
        b.push(b1, Instruction::nop());
        let mut func = b.build()?;

        func.change_2way_taken_successor(b0, b1)?;
        func.verify()?;
        assert_eq!(func.get(b0)?.block_type(), BlockType::OneWay);
        assert_eq!(func.successors(b0), &[b1]);
        Ok(())
    }

    #[test]
    fn test_create_block_before_stop() -> crate::Result<()> {
        let mut b = FunctionBuilder::new("f");
        let b0 = b.block();
        let stop = b.block();
        b.push(b0, Instruction::mov(Mop::num(1, 4), Mop::reg(0, 4)));
        let mut func = b.build()?;

        let created = func.create_block(vec![Instruction::stx(Mop::reg(0, 4), Mop::reg(1, 8))])?;
        func.verify()?;
        assert_eq!(func.serial(created), Some(1));
        assert_eq!(func.successors(created), &[stop]);
        assert!(func.predecessors(created).is_empty());
        assert_eq!(func.get(b0)?.goto_target(), Some(stop));

        assert!(func
            .create_block(vec![Instruction::jcc(Opcode::Jz, Mop::reg(0, 4), Mop::num(0, 4), b0)])
            .is_err());
        Ok(())
    }
}
