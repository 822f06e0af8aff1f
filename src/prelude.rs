//! # cffscope Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the cffscope library.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all cffscope operations
pub use crate::Error;

/// The result type used throughout cffscope
pub use crate::Result;

// ================================================================================================
// Micro-code Model
// ================================================================================================

/// Blocks and their identity
pub use crate::ir::{Block, BlockFlags, BlockId, BlockType};

/// Functions and their construction
pub use crate::ir::{Function, FunctionBuilder, Maturity};

/// Instructions and operands
pub use crate::ir::{Instruction, Mop, Opcode};

/// Concrete execution
pub use crate::ir::{Environment, Interpreter, Outcome};

// ================================================================================================
// Analysis
// ================================================================================================

/// Backward operand tracking
pub use crate::analysis::{MopHistory, MopTracker};

// ================================================================================================
// Unflattening
// ================================================================================================

/// Pass interface
pub use crate::deobfuscation::BlockOptimizer;

/// Passes
pub use crate::deobfuscation::{FakeJumpFixer, Unflattener};

/// Dispatcher recognition
pub use crate::deobfuscation::{DispatcherCollector, DispatcherInfo};

/// Configuration and reporting
pub use crate::deobfuscation::{DerivedStats, EventKind, EventLog, UnflattenConfig};
