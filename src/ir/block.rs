//! Basic blocks.

use std::fmt;

use bitflags::bitflags;
use strum::{Display, EnumIter};

use crate::ir::{Instruction, Opcode};

/// Stable identity of a block.
///
/// Ids are never reused inside one [`crate::ir::Function`], so they stay valid across layout
/// changes. The position of a block in the layout is its *serial* and does change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl BlockId {
    /// Index into the block arena.
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Number of outgoing edges a block has, derived from its tail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum BlockType {
    /// The stop block
    ZeroWay,
    /// `goto` or fall-through
    OneWay,
    /// Conditional jump: fall-through and taken target
    TwoWay,
}

bitflags! {
    /// How a block came into existence.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BlockFlags: u8 {
        /// Clone produced by path duplication
        const DUPLICATED = 0b0000_0001;
        /// Empty block carrying the fall-through of a duplicated two-way block
        const AUX_DEFAULT = 0b0000_0010;
        /// Replayed dispatcher side effects
        const SIDE_EFFECTS = 0b0000_0100;
        /// Empty block inserted to make an edge redirectable
        const TRAMPOLINE = 0b0000_1000;
    }
}

/// A basic block.
///
/// Edges are owned by the [`crate::ir::Function`]; the lists stored here are kept in sync by
/// its mutation primitives and checked by [`crate::ir::Function::verify`].
#[derive(Debug, Clone)]
pub struct Block {
    pub(crate) id: BlockId,
    pub(crate) serial: usize,
    pub(crate) block_type: BlockType,
    pub(crate) insns: Vec<Instruction>,
    pub(crate) preds: Vec<BlockId>,
    pub(crate) succs: Vec<BlockId>,
    pub(crate) flags: BlockFlags,
}

impl Block {
    pub(crate) fn new(id: BlockId, insns: Vec<Instruction>) -> Self {
        Self {
            id,
            serial: 0,
            block_type: BlockType::OneWay,
            insns,
            preds: Vec::new(),
            succs: Vec::new(),
            flags: BlockFlags::empty(),
        }
    }

    /// Stable identity.
    #[must_use]
    pub fn id(&self) -> BlockId {
        self.id
    }

    /// Current position in layout.
    #[must_use]
    pub fn serial(&self) -> usize {
        self.serial
    }

    /// Block type.
    #[must_use]
    pub fn block_type(&self) -> BlockType {
        self.block_type
    }

    /// Instructions from head to tail.
    #[must_use]
    pub fn instructions(&self) -> &[Instruction] {
        &self.insns
    }

    /// First instruction.
    #[must_use]
    pub fn head(&self) -> Option<&Instruction> {
        self.insns.first()
    }

    /// Last instruction.
    #[must_use]
    pub fn tail(&self) -> Option<&Instruction> {
        self.insns.last()
    }

    /// Predecessor blocks.
    #[must_use]
    pub fn preds(&self) -> &[BlockId] {
        &self.preds
    }

    /// Successor blocks. For two-way blocks this is `[fall-through, taken]`.
    #[must_use]
    pub fn succs(&self) -> &[BlockId] {
        &self.succs
    }

    /// Number of predecessors.
    #[must_use]
    pub fn npred(&self) -> usize {
        self.preds.len()
    }

    /// Number of successors.
    #[must_use]
    pub fn nsucc(&self) -> usize {
        self.succs.len()
    }

    /// Creation flags.
    #[must_use]
    pub fn flags(&self) -> BlockFlags {
        self.flags
    }

    /// Returns `true` if the block holds no instructions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.insns.is_empty()
    }

    /// Number of instructions that are not `nop`.
    #[must_use]
    pub fn real_instruction_count(&self) -> usize {
        self.insns.iter().filter(|i| i.opcode != Opcode::Nop).count()
    }

    /// Target of the tail `goto`.
    #[must_use]
    pub fn goto_target(&self) -> Option<BlockId> {
        self.tail()
            .filter(|t| t.opcode == Opcode::Goto)
            .and_then(Instruction::target)
    }

    /// Returns `true` if the tail is a conditional jump.
    #[must_use]
    pub fn ends_with_jcc(&self) -> bool {
        self.tail().is_some_and(Instruction::is_conditional_jump)
    }

    /// A one-way block without `goto`, continuing to the next block in layout.
    #[must_use]
    pub fn falls_through(&self) -> bool {
        self.block_type == BlockType::OneWay && self.goto_target().is_none()
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block {} (serial {}, {}", self.id, self.serial, self.block_type)?;
        if !self.flags.is_empty() {
            write!(f, ", {:?}", self.flags)?;
        }
        writeln!(f, ")")?;
        for insn in &self.insns {
            writeln!(f, "    {insn}")?;
        }
        Ok(())
    }
}
