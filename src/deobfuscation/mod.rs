//! Unflattening framework for micro-code functions.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │  Host decompiler: one call per block and maturity level           │
//! │           │                                                       │
//! │           ▼                                                       │
//! │  ┌────────────────────────────────────────────────────────────┐  │
//! │  │  BlockOptimizer::optimize_block (maturity gate)             │  │
//! │  │    1. dispatcher detection        (DispatcherInfo)          │  │
//! │  │    2. father histories            (MopTracker)              │  │
//! │  │    3. duplication of shared paths (duplication)             │  │
//! │  │    4. emulation + edge rewrite    (Unflattener)             │  │
//! │  │    otherwise: fake jump folding   (FakeJumpFixer)           │  │
//! │  └──────────────────────────┬─────────────────────────────────┘  │
//! │                             ▼                                     │
//! │  cleanup (unreachable blocks, nops) → verify → mark dirty         │
//! │                             │                                     │
//! │                             ▼                                     │
//! │  EventLog (changes + skipped fathers)                             │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Components
//!
//! - [`BlockOptimizer`] - host-facing pass interface
//! - [`Unflattener`] / [`FakeJumpFixer`] - the passes, see [`passes`]
//! - [`UnflattenConfig`] - limits and thresholds
//! - [`EventLog`] / [`DerivedStats`] - what happened during a run
//!
//! # Usage
//!
//! ```rust
//! use cffscope::deobfuscation::{BlockOptimizer, DerivedStats, EventLog, Unflattener, UnflattenConfig};
//! use cffscope::ir::{FunctionBuilder, Instruction, Maturity, Mop};
//!
//! let mut b = FunctionBuilder::new("plain").with_maturity(Maturity::Glbopt2);
//! let b0 = b.block();
//! let _stop = b.block();
//! b.push(b0, Instruction::mov(Mop::num(1, 4), Mop::reg(0, 4)));
//! let mut func = b.build()?;
//!
//! let events = EventLog::new();
//! let pass = Unflattener::new(UnflattenConfig::conservative());
//! assert_eq!(pass.optimize_function(&mut func, &events)?, 0);
//! assert_eq!(DerivedStats::from_log(&events).dispatchers, 0);
//! # Ok::<(), cffscope::Error>(())
//! ```

mod config;
mod events;
mod pass;
pub mod passes;

pub use config::UnflattenConfig;
pub use events::{DerivedStats, Event, EventBuilder, EventKind, EventLog};
pub use pass::BlockOptimizer;
pub use passes::{
    DispatcherBlockInfo, DispatcherCollector, DispatcherInfo, FakeJumpFixer, Unflattener,
};
