//! In-memory model of the host decompiler's micro-code.
//!
//! The unflattening passes only need a small surface of the host IR: blocks with ordered
//! instructions, typed operands, successor and predecessor lists, and a handful of mutation
//! primitives. This module provides exactly that surface.
//!
//! # Structural rules
//!
//! - The first block in layout is the entry and has no predecessors.
//! - The last block in layout is the unique zero-way stop block.
//! - A two-way block ends with a conditional jump; its successors are `[fall-through, taken]`,
//!   the fall-through is its layout successor, and the two differ.
//! - A one-way block either ends with `goto` or falls through to its layout successor.
//! - Control-flow instructions only appear as block tails.
//! - Predecessor lists are the exact inverse of successor lists.
//!
//! [`Function::verify`] checks all of them.
//!
//! # Modules
//!
//! - [`operand`] - [`Mop`] operands and [`Location`]s
//! - [`opcode`] - [`Opcode`] and its classes
//! - [`instruction`] - [`Instruction`] with def/use queries
//! - [`block`] - [`Block`], [`BlockId`], [`BlockType`], [`BlockFlags`]
//! - [`function`] - the [`Function`] container and [`Maturity`] levels
//! - [`builder`] - [`FunctionBuilder`]
//! - [`edit`] - mutation primitives
//! - [`verify`] - invariant checking
//! - [`cleanup`] - unreachable block and `nop` removal
//! - [`interp`] - concrete evaluation

pub mod block;
pub mod builder;
pub mod cleanup;
pub mod edit;
pub mod function;
pub mod instruction;
pub mod interp;
pub mod opcode;
pub mod operand;
pub mod verify;

pub use block::{Block, BlockFlags, BlockId, BlockType};
pub use builder::FunctionBuilder;
pub use cleanup::CleanupReport;
pub use function::{Function, Maturity};
pub use instruction::Instruction;
pub use interp::{Environment, Execution, Flow, Interpreter, Outcome};
pub use opcode::Opcode;
pub use operand::{contains_mop, push_unique, remove_mop, Location, Mop};
