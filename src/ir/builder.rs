//! Incremental construction of [`Function`]s.

use crate::{
    ir::{BlockId, Function, Instruction, Maturity},
    Result,
};

/// Builds a [`Function`] block by block.
///
/// Blocks are laid out in allocation order: the first allocated block is the entry and the
/// last one becomes the stop block. Edges are derived from the block tails on [`build`], and
/// the result is verified.
///
/// # Example
///
/// ```rust
/// use cffscope::ir::{FunctionBuilder, Instruction, Mop};
///
/// let mut b = FunctionBuilder::new("sample");
/// let entry = b.block();
/// let stop = b.block();
/// b.push(entry, Instruction::mov(Mop::num(1, 4), Mop::reg(0, 4)));
/// b.push(entry, Instruction::goto(stop));
/// let func = b.build()?;
/// assert_eq!(func.successors(entry), &[stop]);
/// # Ok::<(), cffscope::Error>(())
/// ```
///
/// [`build`]: FunctionBuilder::build
#[derive(Debug, Clone)]
pub struct FunctionBuilder {
    name: String,
    maturity: Maturity,
    blocks: Vec<Vec<Instruction>>,
    next_ea: u64,
}

impl FunctionBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            maturity: Maturity::Generated,
            blocks: Vec::new(),
            next_ea: 0x1000,
        }
    }

    /// Sets the maturity the built function starts at.
    #[must_use]
    pub fn with_maturity(mut self, maturity: Maturity) -> Self {
        self.maturity = maturity;
        self
    }

    /// Allocates the next block in layout.
    pub fn block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Vec::new());
        id
    }

    /// Appends an instruction to `blk`.
    ///
    /// Instructions without an address get consecutive addresses. Pushing to a block that was
    /// not allocated by this builder allocates the missing blocks.
    pub fn push(&mut self, blk: BlockId, insn: Instruction) -> &mut Self {
        while self.blocks.len() <= blk.index() {
            self.block();
        }
        let insn = if insn.ea == 0 {
            let ea = self.next_ea;
            self.next_ea += 4;
            insn.with_ea(ea)
        } else {
            insn
        };
        self.blocks[blk.index()].push(insn);
        self
    }

    /// Appends several instructions to `blk`.
    pub fn push_all(
        &mut self,
        blk: BlockId,
        insns: impl IntoIterator<Item = Instruction>,
    ) -> &mut Self {
        for insn in insns {
            self.push(blk, insn);
        }
        self
    }

    /// Number of allocated blocks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Returns `true` if no block was allocated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Derives the edges and verifies the graph.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::GraphInconsistency`] if the blocks violate a structural rule, for
    /// example a jump into the entry block or a control-flow instruction in the stop block.
    pub fn build(self) -> Result<Function> {
        let mut func = Function::from_blocks(self.name, self.maturity, self.blocks)?;
        func.clear_dirty();
        Ok(func)
    }
}
