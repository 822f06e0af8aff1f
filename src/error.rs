use thiserror::Error;

use crate::ir::BlockId;

macro_rules! graph_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::GraphInconsistency {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::GraphInconsistency {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Errors fall into two groups. Recoverable errors describe a single dispatcher predecessor
/// ("father") that could not be handled; the unflattening engine logs them, records them in the
/// [`crate::deobfuscation::EventLog`] and moves on to the next father. Everything else means the
/// control-flow graph is (or would become) inconsistent and aborts the current pass.
///
/// # Error Categories
///
/// ## Recoverable
/// - [`Error::NotDuplicableFather`] - A father history could not be resolved, so duplication
///   cannot make the dispatcher state concrete
/// - [`Error::NotResolvableFather`] - Father histories disagree on the state value
///
/// ## Fatal
/// - [`Error::GraphInconsistency`] - The graph failed verification
/// - [`Error::InvalidBlock`] - A block id does not name a live block
/// - [`Error::InvalidEdit`] - A mutation primitive was called with unsupported arguments
///
/// # Examples
///
/// ```rust
/// use cffscope::{Error, ir::BlockId};
///
/// let err = Error::NotResolvableFather {
///     dispatcher: BlockId(2),
///     father: BlockId(7),
///     reason: "histories disagree".to_string(),
/// };
/// assert!(err.is_recoverable());
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The control-flow graph violates one of its structural invariants.
    ///
    /// Raised by [`crate::ir::Function::verify`] after any rewrite. The error includes the
    /// source location where the inconsistency was detected for debugging purposes. Once this
    /// is returned the graph must not be handed back to the host.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of the broken invariant
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Graph inconsistency - {file}:{line}: {message}")]
    GraphInconsistency {
        /// The message to be printed for the GraphInconsistency error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// The referenced block does not exist.
    ///
    /// Either the id was never allocated by the function or the block has since been removed
    /// by cleanup.
    #[error("Block {0} does not exist")]
    InvalidBlock(BlockId),

    /// A mutation primitive was applied to a block it cannot handle.
    ///
    /// Examples are copying the stop block, redirecting an edge that does not exist or
    /// changing the taken target of a one-way block.
    #[error("Invalid edit of block {block}: {message}")]
    InvalidEdit {
        /// The block the edit was applied to
        block: BlockId,
        /// What was wrong with the edit
        message: String,
    },

    /// A dispatcher predecessor cannot be duplicated.
    ///
    /// At least one backward history of the state variable ended unresolved (function entry,
    /// loop, bound exceeded, unsupported instruction) so no amount of block duplication will
    /// produce a concrete value along every path.
    #[error("Father {father} of dispatcher {dispatcher} is not duplicable: {reason}")]
    NotDuplicableFather {
        /// Entry block of the dispatcher
        dispatcher: BlockId,
        /// The predecessor that was being processed
        father: BlockId,
        /// Why the father was rejected
        reason: String,
    },

    /// A dispatcher predecessor cannot be resolved to a single exit.
    ///
    /// The histories of the father still carry different state values, or emulating the
    /// dispatcher with them did not reach an exit block.
    #[error("Father {father} of dispatcher {dispatcher} is not resolvable: {reason}")]
    NotResolvableFather {
        /// Entry block of the dispatcher
        dispatcher: BlockId,
        /// The predecessor that was being processed
        father: BlockId,
        /// Why the father was rejected
        reason: String,
    },
}

impl Error {
    /// Returns `true` if the orchestration may skip the failing father and continue.
    ///
    /// Only the per-father conditions are recoverable; graph and edit errors indicate that
    /// the function is in a state the host must not see.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::NotDuplicableFather { .. } | Error::NotResolvableFather { .. }
        )
    }
}
