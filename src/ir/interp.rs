//! Concrete evaluation of micro-instructions.
//!
//! The [`Environment`] holds values for registers and stack slots plus a sparse memory. It is
//! used to compute what a tracked instruction chain produces, to emulate dispatchers, and by the
//! [`Interpreter`] to run whole functions when comparing a graph before and after a rewrite.

use std::collections::HashMap;

use crate::{
    ir::{operand::size_mask, BlockId, Function, Instruction, Location, Mop, Opcode},
    Result,
};

/// Where control goes after an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Next instruction
    Continue,
    /// Unconditional jump
    Goto(BlockId),
    /// Conditional jump, condition held
    Taken(BlockId),
    /// Conditional jump, condition failed
    NotTaken,
}

/// Variable values, memory and the stores performed so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    values: HashMap<Location, u64>,
    memory: HashMap<u64, u64>,
    stores: Vec<(u64, u64)>,
}

fn sign_extend(value: u64, size: u8) -> i64 {
    if size == 0 || size >= 8 {
        return value as i64;
    }
    let shift = 64 - u32::from(size) * 8;
    ((value << shift) as i64) >> shift
}

impl Environment {
    /// Creates an empty environment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns a variable, truncated to its size. Non-variables are ignored.
    pub fn set(&mut self, mop: &Mop, value: u64) {
        if let Some(location) = mop.location() {
            self.values.insert(location, value & size_mask(mop.size()));
        }
    }

    /// Current value of an operand, `None` for unassigned variables.
    #[must_use]
    pub fn get(&self, mop: &Mop) -> Option<u64> {
        match mop {
            Mop::Num { value, size } => Some(value & size_mask(*size)),
            Mop::Reg { size, .. } | Mop::Stack { size, .. } => mop
                .location()
                .and_then(|loc| self.values.get(&loc))
                .map(|v| v & size_mask(*size)),
            Mop::Empty | Mop::Block(_) => None,
        }
    }

    /// Seeds a memory cell read by `ldx`.
    pub fn set_memory(&mut self, address: u64, value: u64) {
        self.memory.insert(address, value);
    }

    /// `(address, value)` pairs written by `stx`, in execution order.
    #[must_use]
    pub fn stores(&self) -> &[(u64, u64)] {
        &self.stores
    }

    /// All variable values.
    #[must_use]
    pub fn values(&self) -> &HashMap<Location, u64> {
        &self.values
    }

    /// Executes one instruction.
    ///
    /// Returns `None` if an operand is undefined, a division by zero happens or memory is read
    /// that was never seeded.
    pub fn execute(&mut self, insn: &Instruction) -> Option<Flow> {
        let op = insn.opcode;
        match op {
            Opcode::Nop => Some(Flow::Continue),
            Opcode::Mov | Opcode::Neg | Opcode::Bnot => {
                let src = self.get(&insn.l)?;
                let value = match op {
                    Opcode::Neg => src.wrapping_neg(),
                    Opcode::Bnot => !src,
                    _ => src,
                };
                self.set(&insn.d, value);
                Some(Flow::Continue)
            }
            Opcode::Ldx => {
                let address = self.get(&insn.l)?;
                let value = *self.memory.get(&address)?;
                self.set(&insn.d, value);
                Some(Flow::Continue)
            }
            Opcode::Stx => {
                let value = self.get(&insn.l)?;
                let address = self.get(&insn.d)?;
                self.memory.insert(address, value);
                self.stores.push((address, value));
                Some(Flow::Continue)
            }
            Opcode::Goto => insn.target().map(Flow::Goto),
            _ if op.is_binary() => {
                let size = insn.d.size().max(insn.l.size());
                let l = self.get(&insn.l)?;
                let r = self.get(&insn.r)?;
                let value = Self::binary(op, l, r, size)?;
                self.set(&insn.d, value);
                Some(Flow::Continue)
            }
            _ => {
                let target = insn.target()?;
                let size = insn.l.size().max(insn.r.size());
                let l = self.get(&insn.l)?;
                let r = self.get(&insn.r)?;
                if Self::condition(op, l, r, size) {
                    Some(Flow::Taken(target))
                } else {
                    Some(Flow::NotTaken)
                }
            }
        }
    }

    fn binary(op: Opcode, l: u64, r: u64, size: u8) -> Option<u64> {
        let bits = if size == 0 || size >= 8 { 64 } else { u32::from(size) * 8 };
        let shift = (r % u64::from(bits)) as u32;
        let value = match op {
            Opcode::Add => l.wrapping_add(r),
            Opcode::Sub => l.wrapping_sub(r),
            Opcode::Mul => l.wrapping_mul(r),
            Opcode::Udiv => l.checked_div(r)?,
            Opcode::Umod => l.checked_rem(r)?,
            Opcode::Sdiv => sign_extend(l, size).checked_div(sign_extend(r, size))? as u64,
            Opcode::Smod => sign_extend(l, size).checked_rem(sign_extend(r, size))? as u64,
            Opcode::And => l & r,
            Opcode::Or => l | r,
            Opcode::Xor => l ^ r,
            Opcode::Shl => l << shift,
            Opcode::Shr => (l & size_mask(size)) >> shift,
            Opcode::Sar => (sign_extend(l, size) >> shift) as u64,
            _ => return None,
        };
        Some(value & size_mask(size))
    }

    fn condition(op: Opcode, l: u64, r: u64, size: u8) -> bool {
        let (l, r) = (l & size_mask(size), r & size_mask(size));
        let (sl, sr) = (sign_extend(l, size), sign_extend(r, size));
        match op {
            Opcode::Jz => l == r,
            Opcode::Jnz => l != r,
            Opcode::Jae => l >= r,
            Opcode::Jb => l < r,
            Opcode::Ja => l > r,
            Opcode::Jbe => l <= r,
            Opcode::Jg => sl > sr,
            Opcode::Jge => sl >= sr,
            Opcode::Jl => sl < sr,
            Opcode::Jle => sl <= sr,
            _ => false,
        }
    }
}

/// How a run of the [`Interpreter`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The stop block was reached
    Exited,
    /// The step limit was hit
    StepLimit,
    /// An instruction could not be evaluated
    Stuck(BlockId),
}

/// Result of running a function.
#[derive(Debug, Clone)]
pub struct Execution {
    /// Blocks in execution order
    pub path: Vec<BlockId>,
    /// How the run ended
    pub outcome: Outcome,
    /// Final state
    pub env: Environment,
}

/// Runs whole functions block by block.
#[derive(Debug, Clone, Copy)]
pub struct Interpreter {
    max_steps: usize,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self { max_steps: 10_000 }
    }
}

impl Interpreter {
    /// Creates an interpreter executing at most `max_steps` blocks.
    #[must_use]
    pub fn new(max_steps: usize) -> Self {
        Self { max_steps }
    }

    /// Runs `func` from its entry with the initial state `env`.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph references a missing block.
    pub fn run(&self, func: &Function, mut env: Environment) -> Result<Execution> {
        let exit = func.exit();
        let mut path = Vec::new();
        let mut current = func.entry();

        loop {
            if path.len() >= self.max_steps {
                return Ok(Execution {
                    path,
                    outcome: Outcome::StepLimit,
                    env,
                });
            }
            path.push(current);
            let block = func.get(current)?;

            let mut flow = Flow::Continue;
            for insn in block.instructions() {
                match env.execute(insn) {
                    Some(f) => flow = f,
                    None => {
                        return Ok(Execution {
                            path,
                            outcome: Outcome::Stuck(current),
                            env,
                        })
                    }
                }
            }

            if current == exit {
                return Ok(Execution {
                    path,
                    outcome: Outcome::Exited,
                    env,
                });
            }

            current = match flow {
                Flow::Goto(target) | Flow::Taken(target) => target,
                Flow::Continue | Flow::NotTaken => match block.succs().first() {
                    Some(next) => *next,
                    None => {
                        return Ok(Execution {
                            path,
                            outcome: Outcome::Stuck(current),
                            env,
                        })
                    }
                },
            };
        }
    }
}
