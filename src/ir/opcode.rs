//! Micro-instruction opcodes.

use strum::{Display, EnumCount, EnumIter};

/// Opcode of a micro-instruction.
///
/// Operand conventions:
///
/// | Opcode                 | `l`        | `r`     | `d`         |
/// |------------------------|------------|---------|-------------|
/// | `mov`, `neg`, `bnot`   | source     | -       | destination |
/// | binary arithmetic      | left       | right   | destination |
/// | `ldx`                  | address    | -       | destination |
/// | `stx`                  | value      | -       | address     |
/// | `goto`                 | target     | -       | -           |
/// | conditional jumps      | compared   | against | target      |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumCount)]
#[strum(serialize_all = "lowercase")]
pub enum Opcode {
    /// No operation
    Nop,
    /// `d = l`
    Mov,
    /// `d = -l`
    Neg,
    /// `d = !l`
    Bnot,
    /// `d = l + r`
    Add,
    /// `d = l - r`
    Sub,
    /// `d = l * r`
    Mul,
    /// Unsigned division
    Udiv,
    /// Signed division
    Sdiv,
    /// Unsigned remainder
    Umod,
    /// Signed remainder
    Smod,
    /// Bitwise and
    And,
    /// Bitwise or
    Or,
    /// Bitwise xor
    Xor,
    /// Shift left
    Shl,
    /// Logical shift right
    Shr,
    /// Arithmetic shift right
    Sar,
    /// Load from memory, `d = [l]`
    Ldx,
    /// Store to memory, `[d] = l`
    Stx,
    /// Unconditional jump
    Goto,
    /// Jump if `l == r`
    Jz,
    /// Jump if `l != r`
    Jnz,
    /// Jump if `l >= r` (unsigned)
    Jae,
    /// Jump if `l < r` (unsigned)
    Jb,
    /// Jump if `l > r` (unsigned)
    Ja,
    /// Jump if `l <= r` (unsigned)
    Jbe,
    /// Jump if `l > r` (signed)
    Jg,
    /// Jump if `l >= r` (signed)
    Jge,
    /// Jump if `l < r` (signed)
    Jl,
    /// Jump if `l <= r` (signed)
    Jle,
}

impl Opcode {
    /// Returns `true` for `goto` and every conditional jump.
    #[must_use]
    pub fn is_control_flow(self) -> bool {
        self == Opcode::Goto || self.is_conditional_jump()
    }

    /// Returns `true` for the conditional jumps.
    #[must_use]
    pub fn is_conditional_jump(self) -> bool {
        matches!(
            self,
            Opcode::Jz
                | Opcode::Jnz
                | Opcode::Jae
                | Opcode::Jb
                | Opcode::Ja
                | Opcode::Jbe
                | Opcode::Jg
                | Opcode::Jge
                | Opcode::Jl
                | Opcode::Jle
        )
    }

    /// Opcodes a flattening dispatcher uses to compare the state variable.
    #[must_use]
    pub fn is_flattening_jump(self) -> bool {
        self.is_conditional_jump()
    }

    /// Opcodes the fake-loop simplifier knows how to fold.
    #[must_use]
    pub fn is_fake_loop_jump(self) -> bool {
        matches!(self, Opcode::Jz | Opcode::Jnz)
    }

    /// Returns `true` for `l op r -> d` instructions.
    #[must_use]
    pub fn is_binary(self) -> bool {
        matches!(
            self,
            Opcode::Add
                | Opcode::Sub
                | Opcode::Mul
                | Opcode::Udiv
                | Opcode::Sdiv
                | Opcode::Umod
                | Opcode::Smod
                | Opcode::And
                | Opcode::Or
                | Opcode::Xor
                | Opcode::Shl
                | Opcode::Shr
                | Opcode::Sar
        )
    }

    /// Returns `true` if the instruction writes its `d` operand.
    #[must_use]
    pub fn writes_destination(self) -> bool {
        matches!(
            self,
            Opcode::Mov | Opcode::Neg | Opcode::Bnot | Opcode::Ldx
        ) || self.is_binary()
    }

    /// Returns `true` if the conditional jump compares signed values.
    #[must_use]
    pub fn is_signed_comparison(self) -> bool {
        matches!(self, Opcode::Jg | Opcode::Jge | Opcode::Jl | Opcode::Jle)
    }
}
