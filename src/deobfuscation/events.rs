//! Event logging for the unflattening passes.
//!
//! Every rewrite the passes perform and every father they have to give up on is recorded as an
//! [`Event`]. The log can be inspected after a run to see what happened, or ignored.
//!
//! # Architecture
//!
//! - [`Event`] - A single recorded event (rewrite, skipped father, warning)
//! - [`EventLog`] - Append-only collection with query and summary capabilities
//! - [`EventBuilder`] - Fluent API for creating events
//! - [`DerivedStats`] - Counters computed from a log
//!
//! # Example
//!
//! ```rust
//! use cffscope::deobfuscation::{EventKind, EventLog};
//! use cffscope::ir::BlockId;
//!
//! let log = EventLog::new();
//! log.record(EventKind::EdgeRedirected)
//!     .block(BlockId(4))
//!     .message("4 -> 9");
//! log.warn("dispatcher at 1 no longer recognized");
//!
//! assert_eq!(log.len(), 2);
//! assert_eq!(log.summary(), "1 edge redirected");
//! ```

use std::{collections::HashMap, fmt};

use crate::ir::BlockId;

/// Categories of events that can be logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A flattening dispatcher was recognized.
    DispatcherIdentified,
    /// A block was cloned to split an ambiguous path.
    BlockDuplicated,
    /// A dispatcher predecessor now jumps to its real target.
    EdgeRedirected,
    /// Dispatcher side effects were replayed into a new block.
    SideEffectsReplayed,
    /// A conditional branch was simplified to unconditional.
    BranchSimplified,
    /// An unreachable block was removed.
    BlockRemoved,
    /// A `nop` was removed.
    InstructionRemoved,

    /// A father was skipped because its histories do not resolve.
    FatherNotDuplicable,
    /// A father was skipped because its state value is ambiguous.
    FatherNotResolvable,

    /// A pass started on a function.
    PassStarted,
    /// A pass completed on a function.
    PassCompleted,

    /// Something unexpected but recoverable.
    Warning,
}

impl EventKind {
    /// Returns a human-readable description of this event kind.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            // Transformations
            Self::BlockDuplicated => "block duplicated",
            Self::EdgeRedirected => "edge redirected",
            Self::SideEffectsReplayed => "side effects replayed",
            Self::BranchSimplified => "branch simplified",
            Self::BlockRemoved => "block removed",
            Self::InstructionRemoved => "instruction removed",
            // Analysis
            Self::DispatcherIdentified => "dispatcher identified",
            Self::FatherNotDuplicable => "father not duplicable",
            Self::FatherNotResolvable => "father not resolvable",
            // Engine
            Self::PassStarted => "pass started",
            Self::PassCompleted => "pass completed",
            // Diagnostic
            Self::Warning => "warning",
        }
    }

    /// Returns true if this event represents a graph transformation.
    #[must_use]
    pub fn is_transformation(&self) -> bool {
        matches!(
            self,
            Self::BlockDuplicated
                | Self::EdgeRedirected
                | Self::SideEffectsReplayed
                | Self::BranchSimplified
                | Self::BlockRemoved
                | Self::InstructionRemoved
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// A single logged event.
#[derive(Debug, Clone)]
pub struct Event {
    /// The type of event.
    pub kind: EventKind,
    /// The function the event happened in (if applicable).
    pub function: Option<String>,
    /// The block the event is about (if applicable).
    pub block: Option<BlockId>,
    /// Human-readable description.
    pub message: String,
    /// Associated pass name (if from a pass).
    pub pass: Option<String>,
}

impl Event {
    fn new(kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            function: None,
            block: None,
            message: message.into(),
            pass: None,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.kind)?;
        if let Some(block) = self.block {
            write!(f, " @{block}")?;
        }
        write!(f, " {}", self.message)
    }
}

/// Builder for creating events with a fluent API.
///
/// Created by [`EventLog::record`]. The event is automatically added
/// to the log when the builder is dropped.
pub struct EventBuilder<'a> {
    log: &'a EventLog,
    kind: EventKind,
    function: Option<String>,
    block: Option<BlockId>,
    message: Option<String>,
    pass: Option<String>,
}

impl<'a> EventBuilder<'a> {
    fn new(log: &'a EventLog, kind: EventKind) -> Self {
        Self {
            log,
            kind,
            function: None,
            block: None,
            message: None,
            pass: None,
        }
    }

    /// Sets the function and block where the event occurred.
    pub fn at(mut self, function: impl Into<String>, block: BlockId) -> Self {
        self.function = Some(function.into());
        self.block = Some(block);
        self
    }

    /// Sets only the function.
    pub fn function(mut self, function: impl Into<String>) -> Self {
        self.function = Some(function.into());
        self
    }

    /// Sets only the block.
    pub fn block(mut self, block: BlockId) -> Self {
        self.block = Some(block);
        self
    }

    /// Sets a custom message describing the event.
    pub fn message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Associates this event with a specific pass.
    pub fn pass(mut self, pass_name: impl Into<String>) -> Self {
        self.pass = Some(pass_name.into());
        self
    }
}

impl Drop for EventBuilder<'_> {
    fn drop(&mut self) {
        let message = self
            .message
            .take()
            .unwrap_or_else(|| self.kind.description().to_string());

        let event = Event {
            kind: self.kind,
            function: self.function.take(),
            block: self.block.take(),
            message,
            pass: self.pass.take(),
        };

        self.log.events.push(event);
    }
}

/// Collection of events from the unflattening passes.
///
/// Statistics are derived from the events rather than tracked separately. Events can be
/// appended through shared references (`&self`).
#[derive(Debug)]
pub struct EventLog {
    events: boxcar::Vec<Event>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for EventLog {
    fn clone(&self) -> Self {
        let new_log = Self::new();
        new_log.merge(self);
        new_log
    }
}

impl EventLog {
    /// Creates an empty event log.
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: boxcar::Vec::new(),
        }
    }

    /// Returns true if no events have been logged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.count() == 0
    }

    /// Returns the total number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.count()
    }

    /// Starts building a new event of the given kind.
    ///
    /// The event is automatically added when the builder is dropped.
    pub fn record(&self, kind: EventKind) -> EventBuilder<'_> {
        EventBuilder::new(self, kind)
    }

    /// Records a warning message.
    pub fn warn(&self, message: impl Into<String>) {
        self.events.push(Event::new(EventKind::Warning, message));
    }

    /// Appends copies of all events of `other`.
    pub fn merge(&self, other: &EventLog) {
        for (_, event) in &other.events {
            self.events.push(event.clone());
        }
    }

    /// Returns true if any event of the given kind exists.
    #[must_use]
    pub fn has(&self, kind: EventKind) -> bool {
        self.events.iter().any(|(_, e)| e.kind == kind)
    }

    /// Counts events of the given kind.
    #[must_use]
    pub fn count_kind(&self, kind: EventKind) -> usize {
        self.events.iter().filter(|(_, e)| e.kind == kind).count()
    }

    /// Returns an iterator over all events.
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter().map(|(_, e)| e)
    }

    /// Returns an iterator over events of a specific kind.
    pub fn filter_kind(&self, kind: EventKind) -> impl Iterator<Item = &Event> + '_ {
        self.events
            .iter()
            .filter_map(move |(_, e)| if e.kind == kind { Some(e) } else { None })
    }

    /// Counts events grouped by kind.
    #[must_use]
    pub fn count_by_kind(&self) -> HashMap<EventKind, usize> {
        let mut counts = HashMap::new();
        for (_, event) in &self.events {
            *counts.entry(event.kind).or_insert(0) += 1;
        }
        counts
    }

    /// Generates a human-readable summary of all events.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.is_empty() {
            return "no events".to_string();
        }

        let counts = self.count_by_kind();

        // Only show transformation counts in summary
        let mut parts: Vec<String> = counts
            .iter()
            .filter(|(k, _)| k.is_transformation())
            .map(|(kind, count)| format!("{} {}", count, kind.description()))
            .collect();

        if parts.is_empty() {
            return format!("{} events", self.len());
        }

        parts.sort();
        parts.join(", ")
    }
}

/// Statistics derived from an [`EventLog`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DerivedStats {
    /// Number of dispatchers recognized.
    pub dispatchers: usize,
    /// Number of blocks cloned.
    pub blocks_duplicated: usize,
    /// Number of father edges redirected.
    pub edges_redirected: usize,
    /// Number of side-effect blocks created.
    pub side_effect_blocks: usize,
    /// Number of conditional branches folded.
    pub branches_simplified: usize,
    /// Number of blocks removed.
    pub blocks_removed: usize,
    /// Number of instructions removed.
    pub instructions_removed: usize,
    /// Number of fathers skipped.
    pub fathers_skipped: usize,
    /// Number of warnings.
    pub warnings: usize,
}

impl DerivedStats {
    /// Computes statistics from an event log.
    #[must_use]
    pub fn from_log(log: &EventLog) -> Self {
        let counts = log.count_by_kind();
        let get = |kind: EventKind| counts.get(&kind).copied().unwrap_or(0);

        Self {
            dispatchers: get(EventKind::DispatcherIdentified),
            blocks_duplicated: get(EventKind::BlockDuplicated),
            edges_redirected: get(EventKind::EdgeRedirected),
            side_effect_blocks: get(EventKind::SideEffectsReplayed),
            branches_simplified: get(EventKind::BranchSimplified),
            blocks_removed: get(EventKind::BlockRemoved),
            instructions_removed: get(EventKind::InstructionRemoved),
            fathers_skipped: get(EventKind::FatherNotDuplicable)
                + get(EventKind::FatherNotResolvable),
            warnings: get(EventKind::Warning),
        }
    }

    /// Generates a human-readable summary.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if self.dispatchers > 0 {
            parts.push(format!("{} dispatchers", self.dispatchers));
        }
        if self.edges_redirected > 0 {
            parts.push(format!("{} edges redirected", self.edges_redirected));
        }
        if self.blocks_duplicated > 0 {
            parts.push(format!("{} blocks duplicated", self.blocks_duplicated));
        }
        if self.side_effect_blocks > 0 {
            parts.push(format!("{} side-effect blocks", self.side_effect_blocks));
        }
        if self.branches_simplified > 0 {
            parts.push(format!("{} branches simplified", self.branches_simplified));
        }
        if self.blocks_removed > 0 {
            parts.push(format!("{} blocks removed", self.blocks_removed));
        }
        if self.fathers_skipped > 0 {
            parts.push(format!("{} fathers skipped", self.fathers_skipped));
        }
        if self.warnings > 0 {
            parts.push(format!("{} warnings", self.warnings));
        }
        if parts.is_empty() {
            return "no changes".to_string();
        }
        parts.join(", ")
    }
}

impl fmt::Display for DerivedStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}
