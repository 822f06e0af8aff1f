//! Micro-instructions.

use std::fmt;

use crate::ir::{BlockId, Mop, Opcode};

/// A single micro-instruction: an opcode, three operand slots and the address it was lifted from.
///
/// See [`Opcode`] for which slot carries what.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// Address of the originating machine instruction
    pub ea: u64,
    /// Operation
    pub opcode: Opcode,
    /// Left operand
    pub l: Mop,
    /// Right operand
    pub r: Mop,
    /// Destination operand
    pub d: Mop,
}

impl Instruction {
    /// Creates an instruction with address 0.
    #[must_use]
    pub fn new(opcode: Opcode, l: Mop, r: Mop, d: Mop) -> Self {
        Self {
            ea: 0,
            opcode,
            l,
            r,
            d,
        }
    }

    /// Sets the address.
    #[must_use]
    pub fn with_ea(mut self, ea: u64) -> Self {
        self.ea = ea;
        self
    }

    /// `nop`
    #[must_use]
    pub fn nop() -> Self {
        Self::new(Opcode::Nop, Mop::Empty, Mop::Empty, Mop::Empty)
    }

    /// `mov src, dst`
    #[must_use]
    pub fn mov(src: Mop, dst: Mop) -> Self {
        Self::new(Opcode::Mov, src, Mop::Empty, dst)
    }

    /// Unary or binary arithmetic, `dst = l op r`.
    #[must_use]
    pub fn binary(opcode: Opcode, l: Mop, r: Mop, dst: Mop) -> Self {
        Self::new(opcode, l, r, dst)
    }

    /// `ldx addr, dst`
    #[must_use]
    pub fn ldx(addr: Mop, dst: Mop) -> Self {
        Self::new(Opcode::Ldx, addr, Mop::Empty, dst)
    }

    /// `stx value, addr`
    #[must_use]
    pub fn stx(value: Mop, addr: Mop) -> Self {
        Self::new(Opcode::Stx, value, Mop::Empty, addr)
    }

    /// `goto target`
    #[must_use]
    pub fn goto(target: BlockId) -> Self {
        Self::new(Opcode::Goto, Mop::Block(target), Mop::Empty, Mop::Empty)
    }

    /// Conditional jump `jcc l, r, target`.
    #[must_use]
    pub fn jcc(opcode: Opcode, l: Mop, r: Mop, target: BlockId) -> Self {
        Self::new(opcode, l, r, Mop::Block(target))
    }

    /// Returns `true` for `goto` and conditional jumps.
    #[must_use]
    pub fn is_control_flow(&self) -> bool {
        self.opcode.is_control_flow()
    }

    /// Returns `true` for conditional jumps.
    #[must_use]
    pub fn is_conditional_jump(&self) -> bool {
        self.opcode.is_conditional_jump()
    }

    /// A conditional jump of a variable against an immediate number.
    #[must_use]
    pub fn is_numeric_comparison(&self) -> bool {
        self.comparison_info().is_some()
    }

    /// For a flattening jump with one immediate operand, returns `(immediate, compared)`.
    #[must_use]
    pub fn comparison_info(&self) -> Option<(Mop, Mop)> {
        if !self.opcode.is_flattening_jump() {
            return None;
        }
        match (self.l.is_num(), self.r.is_num()) {
            (false, true) if self.l.is_variable() => Some((self.r, self.l)),
            (true, false) if self.r.is_variable() => Some((self.l, self.r)),
            _ => None,
        }
    }

    /// The block this instruction jumps to, if any.
    #[must_use]
    pub fn target(&self) -> Option<BlockId> {
        match self.opcode {
            Opcode::Goto => self.l.block_ref(),
            op if op.is_conditional_jump() => self.d.block_ref(),
            _ => None,
        }
    }

    /// Replaces the jump target. Does nothing for non control-flow instructions.
    pub fn set_target(&mut self, target: BlockId) {
        match self.opcode {
            Opcode::Goto => self.l = Mop::Block(target),
            op if op.is_conditional_jump() => self.d = Mop::Block(target),
            _ => {}
        }
    }

    /// The variable written by this instruction.
    #[must_use]
    pub fn defined_mop(&self) -> Option<&Mop> {
        if self.opcode.writes_destination() && self.d.is_variable() {
            Some(&self.d)
        } else {
            None
        }
    }

    /// The variables read by this instruction, in `l`, `r`, `d` order.
    ///
    /// The destination of `stx` is an address and therefore read.
    #[must_use]
    pub fn used_mops(&self) -> Vec<Mop> {
        let mut used = Vec::with_capacity(3);
        match self.opcode {
            Opcode::Nop | Opcode::Goto => {}
            Opcode::Stx => {
                used.extend([self.l, self.d].into_iter().filter(Mop::is_variable));
            }
            _ => {
                used.extend([self.l, self.r].into_iter().filter(Mop::is_variable));
            }
        }
        used
    }

    /// Returns `true` if this instruction compares `mop` (ignoring size) in a conditional jump.
    #[must_use]
    pub fn compares(&self, mop: &Mop) -> bool {
        self.is_conditional_jump() && (self.l.equal_ignore_size(mop) || self.r.equal_ignore_size(mop))
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}: {}", self.ea, self.opcode)?;
        let operands: Vec<String> = [self.l, self.r, self.d]
            .iter()
            .filter(|m| !m.is_empty())
            .map(ToString::to_string)
            .collect();
        if !operands.is_empty() {
            write!(f, " {}", operands.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_def_use() {
        let add = Instruction::binary(Opcode::Add, Mop::reg(1, 4), Mop::num(3, 4), Mop::reg(2, 4));
        assert_eq!(add.defined_mop(), Some(&Mop::reg(2, 4)));
        assert_eq!(add.used_mops(), vec![Mop::reg(1, 4)]);

        let stx = Instruction::stx(Mop::reg(1, 4), Mop::reg(5, 8));
        assert_eq!(stx.defined_mop(), None);
        assert_eq!(stx.used_mops(), vec![Mop::reg(1, 4), Mop::reg(5, 8)]);

        let jz = Instruction::jcc(Opcode::Jz, Mop::reg(0, 4), Mop::num(5, 4), BlockId(3));
        assert_eq!(jz.defined_mop(), None);
        assert_eq!(jz.target(), Some(BlockId(3)));
        assert!(jz.is_numeric_comparison());
        assert!(jz.compares(&Mop::reg(0, 8)));
    }

    #[test]
    fn test_set_target() {
        let mut goto = Instruction::goto(BlockId(1));
        goto.set_target(BlockId(7));
        assert_eq!(goto.target(), Some(BlockId(7)));

        let mut mov = Instruction::mov(Mop::num(1, 4), Mop::reg(0, 4));
        mov.set_target(BlockId(7));
        assert_eq!(mov.target(), None);
    }

    #[test]
    fn test_display() {
        let insn = Instruction::mov(Mop::num(5, 4), Mop::reg(0, 4)).with_ea(0x401000);
        assert_eq!(insn.to_string(), "401000: mov #0x5.4, r0.4");
    }
}
