// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

//! # cffscope
//!
//! Control-flow flattening removal for decompiler micro-code.
//!
//! Flattening rewrites a function into a loop around a *dispatcher*: every original block stores
//! the identifier of its successor in a state variable and jumps back to a comparison tree that
//! selects the next block. `cffscope` recognizes such dispatchers, tracks which state value
//! reaches each dispatcher predecessor, and rewrites those predecessors to jump straight to the
//! block the dispatcher would have selected.
//!
//! ## Features
//!
//! - **Generic dispatcher detection** - comparison trees on a single state variable, no
//!   hard-coded block numbers
//! - **Path-sensitive value tracking** - backward search over every predecessor path, bounded
//!   in depth and breadth
//! - **Path splitting** - blocks shared by paths carrying different states are duplicated
//! - **Side-effect preservation** - instructions executed inside the dispatcher are replayed
//! - **Fake jump folding** - `jz`/`jnz` blocks decided on every path become `goto`s
//! - **Self-checking** - the graph is verified after every rewrite
//!
//! ## Quick Start
//!
//! ```rust
//! use cffscope::prelude::*;
//!
//! let state = Mop::reg(0, 4);
//! let mut b = FunctionBuilder::new("sample").with_maturity(Maturity::Glbopt2);
//! let ids: Vec<BlockId> = (0..9).map(|_| b.block()).collect();
//! b.push(ids[0], Instruction::mov(Mop::num(5, 4), state));
//! b.push(ids[1], Instruction::jcc(Opcode::Jz, state, Mop::num(5, 4), ids[5]));
//! b.push(ids[2], Instruction::jcc(Opcode::Jz, state, Mop::num(7, 4), ids[6]));
//! b.push(ids[3], Instruction::jcc(Opcode::Jz, state, Mop::num(9, 4), ids[7]));
//! b.push(ids[4], Instruction::goto(ids[8]));
//! b.push(ids[5], Instruction::mov(Mop::num(7, 4), state));
//! b.push(ids[5], Instruction::goto(ids[1]));
//! b.push(ids[6], Instruction::mov(Mop::num(9, 4), state));
//! b.push(ids[6], Instruction::goto(ids[1]));
//! b.push(ids[7], Instruction::goto(ids[8]));
//! let mut func = b.build()?;
//!
//! let events = EventLog::new();
//! Unflattener::default().optimize_function(&mut func, &events)?;
//!
//! println!("{}", DerivedStats::from_log(&events));
//! assert!(!func.contains(ids[1]));
//! # Ok::<(), cffscope::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`ir`] - the micro-code model: operands, instructions, blocks, functions, graph edits,
//!   verification and a concrete interpreter
//! - [`analysis`] - backward operand tracking
//! - [`deobfuscation`] - dispatcher detection, duplication, rewriting and the pass interface
//!
//! ## Logging
//!
//! Decisions are reported through the [`log`](https://docs.rs/log) facade at `debug` level and
//! skipped dispatcher predecessors at `warn` level. No logger is installed by the library.
//!
//! ## Testing
//!
//! ```bash
//! cargo test
//! cargo bench
//! ```

#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit-tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust
/// use cffscope::prelude::*;
///
/// let mut b = FunctionBuilder::new("empty");
/// b.block();
/// let func = b.build()?;
/// assert_eq!(func.qty(), 1);
/// # Ok::<(), cffscope::Error>(())
/// ```
pub mod prelude;

/// In-memory micro-code model.
///
/// # Key Types
///
/// - [`ir::Function`] - block arena, layout and edges
/// - [`ir::Block`] / [`ir::BlockId`] - basic blocks and their stable identity
/// - [`ir::Instruction`] / [`ir::Opcode`] / [`ir::Mop`] - instructions and operands
/// - [`ir::FunctionBuilder`] - construction from per-block instruction lists
/// - [`ir::Interpreter`] - concrete execution
pub mod ir;

/// Data-flow analyses over [`ir::Function`].
pub mod analysis;

/// Dispatcher removal and the host-facing pass interface.
pub mod deobfuscation;

/// `cffscope` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `cffscope` Error type
///
/// Distinguishes recoverable per-predecessor conditions, which the passes log and skip, from
/// graph inconsistencies, which abort the pass.
///
/// # Examples
///
/// ```rust
/// use cffscope::{ir::BlockId, Error};
///
/// let err = Error::NotResolvableFather {
///     dispatcher: BlockId(1),
///     father: BlockId(4),
///     reason: "paths disagree".to_string(),
/// };
/// assert!(err.is_recoverable());
/// ```
pub use error::Error;
