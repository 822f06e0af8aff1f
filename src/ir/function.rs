//! The function container: block arena, layout and edge bookkeeping.

use std::fmt;

use strum::{Display, EnumIter};

use crate::{
    ir::{Block, BlockId, BlockType, Instruction, Opcode},
    Error, Result,
};

/// Optimization stage of the host decompiler.
///
/// Levels are ordered; a pass registered for one level only fires when the function is exactly
/// at that level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumIter)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Maturity {
    /// Freshly lifted
    Generated,
    /// Pre-optimized
    Preoptimized,
    /// Local optimizations done
    Locopt,
    /// Call arguments detected
    Calls,
    /// First global optimization round
    Glbopt1,
    /// Second global optimization round
    Glbopt2,
    /// Third global optimization round
    Glbopt3,
    /// Local variables allocated
    Lvars,
}

/// A function in micro-code form.
///
/// Blocks live in an arena indexed by [`BlockId`]; `layout` orders them. The first block in
/// layout is the entry, the last one is the single stop block. A block whose tail is not a
/// `goto` continues with the block following it in layout, so changing the layout can change
/// control flow; the primitives in [`crate::ir::edit`] take care of that.
#[derive(Debug, Clone)]
pub struct Function {
    name: String,
    pub(crate) blocks: Vec<Option<Block>>,
    pub(crate) layout: Vec<BlockId>,
    maturity: Maturity,
    dirty: bool,
}

impl Function {
    /// Creates a function from per-block instruction lists in layout order and derives every
    /// edge from the tails.
    ///
    /// # Errors
    ///
    /// Returns [`Error::GraphInconsistency`] if the blocks do not form a valid graph.
    pub(crate) fn from_blocks(
        name: impl Into<String>,
        maturity: Maturity,
        blocks: Vec<Vec<Instruction>>,
    ) -> Result<Self> {
        if blocks.is_empty() {
            return Err(graph_error!("function has no blocks"));
        }

        let mut func = Function {
            name: name.into(),
            blocks: Vec::with_capacity(blocks.len()),
            layout: Vec::with_capacity(blocks.len()),
            maturity,
            dirty: false,
        };
        for insns in blocks {
            let id = func.alloc_block(insns);
            func.layout.push(id);
        }
        func.renumber();
        func.rebuild_edges()?;
        func.verify()?;
        Ok(func)
    }

    /// Function name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current maturity level.
    #[must_use]
    pub fn maturity(&self) -> Maturity {
        self.maturity
    }

    /// Moves the function to another maturity level.
    pub fn set_maturity(&mut self, maturity: Maturity) {
        self.maturity = maturity;
    }

    /// Returns `true` once the graph changed since the last [`Function::clear_dirty`].
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Marks use/def chains as stale after a rewrite.
    pub fn mark_chains_dirty(&mut self) {
        self.dirty = true;
    }

    /// Acknowledges the pending rewrites.
    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// Number of blocks in layout.
    #[must_use]
    pub fn qty(&self) -> usize {
        self.layout.len()
    }

    /// Entry block, first in layout.
    #[must_use]
    pub fn entry(&self) -> BlockId {
        self.layout[0]
    }

    /// Stop block, last in layout.
    #[must_use]
    pub fn exit(&self) -> BlockId {
        self.layout[self.layout.len() - 1]
    }

    /// Blocks in layout order.
    #[must_use]
    pub fn layout(&self) -> &[BlockId] {
        &self.layout
    }

    /// Iterates the blocks in layout order.
    pub fn blocks(&self) -> impl Iterator<Item = &Block> + '_ {
        self.layout.iter().filter_map(|id| self.block(*id))
    }

    /// Looks up a live block.
    #[must_use]
    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(id.index()).and_then(Option::as_ref)
    }

    /// Looks up a live block.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBlock`] if `id` does not name a live block.
    pub fn get(&self, id: BlockId) -> Result<&Block> {
        self.block(id).ok_or(Error::InvalidBlock(id))
    }

    pub(crate) fn get_mut(&mut self, id: BlockId) -> Result<&mut Block> {
        self.blocks
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or(Error::InvalidBlock(id))
    }

    /// Returns `true` if `id` names a live block.
    #[must_use]
    pub fn contains(&self, id: BlockId) -> bool {
        self.block(id).is_some()
    }

    /// Layout position of a block.
    #[must_use]
    pub fn serial(&self, id: BlockId) -> Option<usize> {
        self.block(id).map(Block::serial)
    }

    /// Block at a layout position.
    #[must_use]
    pub fn block_at(&self, serial: usize) -> Option<BlockId> {
        self.layout.get(serial).copied()
    }

    /// Predecessors of a block, empty for unknown ids.
    #[must_use]
    pub fn predecessors(&self, id: BlockId) -> &[BlockId] {
        self.block(id).map_or(&[][..], Block::preds)
    }

    /// Successors of a block, empty for unknown ids.
    #[must_use]
    pub fn successors(&self, id: BlockId) -> &[BlockId] {
        self.block(id).map_or(&[][..], Block::succs)
    }

    /// The block following `id` in layout.
    #[must_use]
    pub fn next_in_layout(&self, id: BlockId) -> Option<BlockId> {
        self.serial(id).and_then(|s| self.block_at(s + 1))
    }

    pub(crate) fn alloc_block(&mut self, insns: Vec<Instruction>) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Some(Block::new(id, insns)));
        id
    }

    pub(crate) fn renumber(&mut self) {
        for (serial, id) in self.layout.clone().into_iter().enumerate() {
            if let Some(Some(block)) = self.blocks.get_mut(id.index()) {
                block.serial = serial;
            }
        }
    }

    /// Type and successors a block must have given its tail and its layout position.
    ///
    /// # Errors
    ///
    /// Returns an error if the block is unknown or its tail jumps nowhere.
    pub fn natural_successors(&self, id: BlockId) -> Result<(BlockType, Vec<BlockId>)> {
        let block = self.get(id)?;
        let serial = block.serial;
        if serial + 1 == self.layout.len() {
            return Ok((BlockType::ZeroWay, Vec::new()));
        }
        let next = self.layout[serial + 1];

        match block.tail() {
            Some(tail) if tail.opcode == Opcode::Goto => {
                let target = tail
                    .target()
                    .ok_or_else(|| graph_error!("goto in block {} has no target", id))?;
                Ok((BlockType::OneWay, vec![target]))
            }
            Some(tail) if tail.is_conditional_jump() => {
                let target = tail
                    .target()
                    .ok_or_else(|| graph_error!("jump in block {} has no target", id))?;
                Ok((BlockType::TwoWay, vec![next, target]))
            }
            _ => Ok((BlockType::OneWay, vec![next])),
        }
    }

    /// Recomputes the outgoing edges of one block and patches the predecessor lists of the
    /// blocks it used to reach and now reaches.
    pub(crate) fn refresh_edges(&mut self, id: BlockId) -> Result<()> {
        let (block_type, succs) = self.natural_successors(id)?;
        for succ in &succs {
            if !self.contains(*succ) {
                return Err(graph_error!("block {} jumps to missing block {}", id, succ));
            }
        }

        let old = std::mem::take(&mut self.get_mut(id)?.succs);
        for succ in &old {
            if let Ok(block) = self.get_mut(*succ) {
                if let Some(pos) = block.preds.iter().position(|p| *p == id) {
                    block.preds.remove(pos);
                }
            }
        }
        for succ in &succs {
            self.get_mut(*succ)?.preds.push(id);
        }

        let block = self.get_mut(id)?;
        block.block_type = block_type;
        block.succs = succs;
        Ok(())
    }

    /// Recomputes every edge from scratch.
    pub(crate) fn rebuild_edges(&mut self) -> Result<()> {
        for id in self.layout.clone() {
            self.get_mut(id)?.preds.clear();
        }
        for id in self.layout.clone() {
            let (block_type, succs) = self.natural_successors(id)?;
            for succ in &succs {
                self.blocks
                    .get_mut(succ.index())
                    .and_then(Option::as_mut)
                    .ok_or_else(|| graph_error!("block {} jumps to missing block {}", id, succ))?
                    .preds
                    .push(id);
            }
            let block = self.get_mut(id)?;
            block.block_type = block_type;
            block.succs = succs;
        }
        Ok(())
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "function {} ({})", self.name, self.maturity)?;
        for block in self.blocks() {
            write!(f, "  {block}")?;
            let succs: Vec<String> = block.succs.iter().map(ToString::to_string).collect();
            let preds: Vec<String> = block.preds.iter().map(ToString::to_string).collect();
            writeln!(f, "    preds [{}] succs [{}]", preds.join(", "), succs.join(", "))?;
        }
        Ok(())
    }
}
