//! Built-in unflattening passes.
//!
//! Each pass implements [`BlockOptimizer`](crate::deobfuscation::BlockOptimizer) and records
//! its modifications in an [`EventLog`](crate::deobfuscation::EventLog).
//!
//! | Pass | Description |
//! |------|-------------|
//! | [`Unflattener`] | Dispatcher removal, falling back to fake jump removal per block |
//! | [`FakeJumpFixer`] | Replaces `jz`/`jnz` blocks decided on every path by a `goto` |
//!
//! [`Unflattener`] already runs the [`FakeJumpFixer`] logic on blocks that are not dispatcher
//! entries; the fixer is exposed separately for hosts that schedule it on its own.

pub mod fakejump;
pub mod unflattening;

pub use fakejump::FakeJumpFixer;
pub use unflattening::{DispatcherBlockInfo, DispatcherCollector, DispatcherInfo, Unflattener};
