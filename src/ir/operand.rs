//! Micro-operands.
//!
//! A [`Mop`] is one operand slot of an [`crate::ir::Instruction`]: nothing, a register, a stack
//! slot, an immediate number or a block reference. Register and stack operands are *variables*:
//! they name a [`Location`] that can be defined and read. Every operand except the empty one and
//! block references carries a byte size (1, 2, 4 or 8).
//!
//! Two operands that name the same register or stack offset are the same variable regardless of
//! the access width; [`Mop::equal_ignore_size`] is the comparison the whole crate uses when it
//! asks "is this the operand we are tracking".

use std::fmt;

use crate::ir::BlockId;

/// Storage location of a variable operand, independent of the access size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Location {
    /// A register number.
    Reg(u16),
    /// A stack offset.
    Stack(i64),
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Reg(reg) => write!(f, "r{reg}"),
            Location::Stack(off) => write!(f, "%var_{off:X}"),
        }
    }
}

/// A micro-operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Mop {
    /// Unused operand slot.
    #[default]
    Empty,
    /// Register operand.
    Reg {
        /// Register number
        reg: u16,
        /// Access size in bytes
        size: u8,
    },
    /// Stack variable operand.
    Stack {
        /// Offset into the stack frame
        off: i64,
        /// Access size in bytes
        size: u8,
    },
    /// Immediate number.
    Num {
        /// The raw value, already truncated to `size`
        value: u64,
        /// Size in bytes
        size: u8,
    },
    /// Reference to a block, the target of `goto` and conditional jumps.
    Block(BlockId),
}

/// Returns the value mask for an operand of `size` bytes.
///
/// Sizes of 0 or 8 and above select the full 64-bit mask.
#[must_use]
pub fn size_mask(size: u8) -> u64 {
    if size == 0 || size >= 8 {
        u64::MAX
    } else {
        (1u64 << (u32::from(size) * 8)) - 1
    }
}

impl Mop {
    /// Creates a register operand.
    #[must_use]
    pub fn reg(reg: u16, size: u8) -> Self {
        Mop::Reg { reg, size }
    }

    /// Creates a stack variable operand.
    #[must_use]
    pub fn stack(off: i64, size: u8) -> Self {
        Mop::Stack { off, size }
    }

    /// Creates an immediate number, truncated to `size` bytes.
    #[must_use]
    pub fn num(value: u64, size: u8) -> Self {
        Mop::Num {
            value: value & size_mask(size),
            size,
        }
    }

    /// Creates a block reference.
    #[must_use]
    pub fn block(id: BlockId) -> Self {
        Mop::Block(id)
    }

    /// Access size in bytes, 0 for empty operands and block references.
    #[must_use]
    pub fn size(&self) -> u8 {
        match self {
            Mop::Reg { size, .. } | Mop::Stack { size, .. } | Mop::Num { size, .. } => *size,
            Mop::Empty | Mop::Block(_) => 0,
        }
    }

    /// Returns `true` for the empty operand.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Mop::Empty)
    }

    /// Returns `true` for immediate numbers.
    #[must_use]
    pub fn is_num(&self) -> bool {
        matches!(self, Mop::Num { .. })
    }

    /// Returns `true` for registers and stack variables.
    #[must_use]
    pub fn is_variable(&self) -> bool {
        matches!(self, Mop::Reg { .. } | Mop::Stack { .. })
    }

    /// The immediate value, if this is a number.
    #[must_use]
    pub fn value(&self) -> Option<u64> {
        match self {
            Mop::Num { value, .. } => Some(*value),
            _ => None,
        }
    }

    /// The referenced block, if this is a block reference.
    #[must_use]
    pub fn block_ref(&self) -> Option<BlockId> {
        match self {
            Mop::Block(id) => Some(*id),
            _ => None,
        }
    }

    /// The storage location of a variable operand.
    #[must_use]
    pub fn location(&self) -> Option<Location> {
        match self {
            Mop::Reg { reg, .. } => Some(Location::Reg(*reg)),
            Mop::Stack { off, .. } => Some(Location::Stack(*off)),
            _ => None,
        }
    }

    /// Semantic equality: same location or same immediate value, access size ignored.
    #[must_use]
    pub fn equal_ignore_size(&self, other: &Mop) -> bool {
        match (self, other) {
            (Mop::Reg { reg: a, .. }, Mop::Reg { reg: b, .. }) => a == b,
            (Mop::Stack { off: a, .. }, Mop::Stack { off: b, .. }) => a == b,
            (Mop::Num { value: a, .. }, Mop::Num { value: b, .. }) => a == b,
            (Mop::Block(a), Mop::Block(b)) => a == b,
            (Mop::Empty, Mop::Empty) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Mop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mop::Empty => Ok(()),
            Mop::Reg { reg, size } => write!(f, "r{reg}.{size}"),
            Mop::Stack { off, size } => write!(f, "%var_{off:X}.{size}"),
            Mop::Num { value, size } => write!(f, "#0x{value:X}.{size}"),
            Mop::Block(id) => write!(f, "@{id}"),
        }
    }
}

/// Returns `true` if `list` holds an operand semantically equal to `mop`.
#[must_use]
pub fn contains_mop(list: &[Mop], mop: &Mop) -> bool {
    list.iter().any(|m| m.equal_ignore_size(mop))
}

/// Appends `mop` unless an equal operand is already present. Returns `true` if it was added.
pub fn push_unique(list: &mut Vec<Mop>, mop: Mop) -> bool {
    if contains_mop(list, &mop) {
        return false;
    }
    list.push(mop);
    true
}

/// Removes every operand semantically equal to `mop`. Returns `true` if one was removed.
pub fn remove_mop(list: &mut Vec<Mop>, mop: &Mop) -> bool {
    let before = list.len();
    list.retain(|m| !m.equal_ignore_size(mop));
    list.len() != before
}
