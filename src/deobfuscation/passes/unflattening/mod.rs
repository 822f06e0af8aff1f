//! Control flow unflattening pass.
//!
//! This module recovers original control flow from flattened code, where structured control
//! flow has been turned into a state machine: every original block stores the number of its
//! successor in a state variable and jumps back to a central dispatcher, which compares the
//! variable against constants to pick the next block.
//!
//! # Algorithm Overview
//!
//! 1. **Detection**: [`DispatcherInfo::explore`] recognizes a comparison tree on one state
//!    variable whose internal blocks are only reachable through its entry
//!    ([`DispatcherCollector`] applies size thresholds)
//! 2. **Father histories**: for every predecessor of the entry (a *father*), the state
//!    variable is tracked backwards with [`crate::analysis::MopTracker`]
//! 3. **Duplication**: if the father's paths set different values, shared blocks are cloned
//!    until each value has its own path ([`duplication`])
//! 4. **Resolution**: once every path into a father agrees on the state, the dispatcher is
//!    emulated with that state and the father's edge is redirected to the exit the dispatcher
//!    would select. Instructions the dispatcher executes besides its jumps are replayed in a
//!    new block on the way.
//!
//! # Failure policy
//!
//! Fathers that cannot be duplicated or resolved are skipped; the condition is logged and
//! recorded as an event, the rest of the dispatcher is still processed. Graph inconsistencies
//! are never recovered from.
//!
//! # Example
//!
//! ```rust
//! use cffscope::deobfuscation::{BlockOptimizer, EventLog, Unflattener, UnflattenConfig};
//! use cffscope::ir::{FunctionBuilder, Instruction, Maturity, Mop, Opcode};
//!
//! let state = Mop::reg(0, 4);
//! let mut b = FunctionBuilder::new("flattened").with_maturity(Maturity::Glbopt2);
//! let ids: Vec<_> = (0..9).map(|_| b.block()).collect();
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
//! let unflattener = Unflattener::new(UnflattenConfig::default());
//! assert!(unflattener.optimize_function(&mut func, &events)? > 0);
//! assert_eq!(func.get(ids[0])?.goto_target(), Some(ids[5]));
//! # Ok::<(), cffscope::Error>(())
//! ```

mod collector;
mod dispatcher;
pub mod duplication;

pub use collector::DispatcherCollector;
pub use dispatcher::{DispatcherBlockInfo, DispatcherInfo};

use crate::{
    analysis::{get_all_possible_values, HistoryStatus, MopHistory, MopTracker},
    deobfuscation::{
        config::UnflattenConfig,
        events::{EventKind, EventLog},
        pass::BlockOptimizer,
        passes::fakejump::FakeJumpFixer,
    },
    ir::{BlockFlags, BlockId, Function, Instruction, Opcode},
    Error, Result,
};

/// Removes flattening dispatchers and folds fake conditional jumps.
///
/// Each block handed to [`BlockOptimizer::optimize_block`] is tried as a dispatcher entry
/// first; if it is none, the [`FakeJumpFixer`] gets a chance. After any change the function
/// is cleaned up and verified.
#[derive(Debug, Clone, Default)]
pub struct Unflattener {
    config: UnflattenConfig,
    fake_jumps: FakeJumpFixer,
}

impl Unflattener {
    /// Creates an unflattener with the given configuration.
    #[must_use]
    pub fn new(config: UnflattenConfig) -> Self {
        let fake_jumps = FakeJumpFixer::new(&config);
        Self { config, fake_jumps }
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &UnflattenConfig {
        &self.config
    }

    /// Removes the dispatcher whose entry is `entry`, if there is one.
    ///
    /// Every father is first made resolvable by duplication. The dispatcher is then explored
    /// again on the modified graph and each father that was not given up on is redirected to
    /// its real target. Returns the number of changes.
    ///
    /// # Errors
    ///
    /// Returns an error if a graph edit fails or the graph does not verify afterwards.
    /// Problems with single fathers are recorded in `events` instead.
    pub fn remove_flattening(
        &self,
        func: &mut Function,
        entry: BlockId,
        events: &EventLog,
    ) -> Result<usize> {
        let collector = DispatcherCollector::new(&self.config);
        let Some(mut dispatcher) = collector.explore_block(func, entry)? else {
            return Ok(0);
        };
        log::debug!("{}: {}", func.name(), dispatcher);
        events
            .record(EventKind::DispatcherIdentified)
            .at(func.name(), entry)
            .message(dispatcher.to_string());

        let mut changes = 0;
        let mut failed = Vec::new();
        for father in dispatcher.fathers(func) {
            match self.ensure_father_is_resolvable(func, &dispatcher, father, events) {
                Ok(n) => changes += n,
                Err(e) if e.is_recoverable() => {
                    skip_father(func, father, &e, events);
                    failed.push(father);
                }
                Err(e) => return Err(e),
            }
        }

        if changes > 0 {
            func.verify()?;
            func.mark_chains_dirty();
            dispatcher = match collector.explore_block(func, entry)? {
                Some(dispatcher) => dispatcher,
                None => {
                    let message = format!(
                        "{}: dispatcher at {} no longer recognized after duplication",
                        func.name(),
                        entry
                    );
                    log::warn!("{message}");
                    events.warn(message);
                    return Ok(changes);
                }
            };
        }

        for father in dispatcher.fathers(func) {
            if failed.contains(&father) {
                continue;
            }
            match self.resolve_father(func, &dispatcher, father, events) {
                Ok(n) => changes += n,
                Err(e) if e.is_recoverable() => skip_father(func, father, &e, events),
                Err(e) => return Err(e),
            }
        }

        if changes > 0 {
            func.verify()?;
            func.mark_chains_dirty();
        }
        Ok(changes)
    }

    /// Makes every path into `father` carry a single state value, duplicating shared blocks
    /// where paths disagree. Returns the number of duplication rounds performed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotDuplicableFather`] if a path into `father` does not resolve the
    /// state, and propagates graph edit failures.
    pub fn ensure_father_is_resolvable(
        &self,
        func: &mut Function,
        dispatcher: &DispatcherInfo,
        father: BlockId,
        events: &EventLog,
    ) -> Result<usize> {
        let mut histories = self.father_histories(func, dispatcher, father)?;
        let not_duplicable = |reason: String| Error::NotDuplicableFather {
            dispatcher: dispatcher.entry_block(),
            father,
            reason,
        };

        if let Some(history) = histories.iter().find(|h| !h.is_resolved()) {
            return Err(not_duplicable(describe_unresolved(history)));
        }
        let values = get_all_possible_values(&histories, &dispatcher.entry().use_before_def_list);
        let mut known = Vec::with_capacity(values.len());
        for (history, value) in histories.iter().zip(values) {
            match value {
                Some(value) => known.push(value),
                None => {
                    return Err(not_duplicable(format!(
                        "path {} does not evaluate",
                        format_path(history)
                    )))
                }
            }
        }
        if known.windows(2).all(|w| w[0] == w[1]) {
            return Ok(0);
        }

        log::debug!(
            "{}: father {} is reached with {} different states",
            func.name(),
            father,
            known.len()
        );
        duplication::duplicate_histories(
            func,
            &mut histories,
            self.config.max_duplication_passes,
            events,
        )
    }

    /// Redirects `father` to the exit the dispatcher selects for it.
    ///
    /// Returns 1 for the redirection plus 1 if side effects had to be replayed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotResolvableFather`] if the paths into `father` disagree or the
    /// dispatcher cannot be emulated, and propagates graph edit failures.
    pub fn resolve_father(
        &self,
        func: &mut Function,
        dispatcher: &DispatcherInfo,
        father: BlockId,
        events: &EventLog,
    ) -> Result<usize> {
        let entry = dispatcher.entry_block();
        let not_resolvable = |reason: String| Error::NotResolvableFather {
            dispatcher: entry,
            father,
            reason,
        };

        let histories = self.father_histories(func, dispatcher, father)?;
        let mops = &dispatcher.entry().use_before_def_list;
        let mut reference: Option<Vec<u64>> = None;
        for history in &histories {
            let Some(values) = history.values(mops) else {
                return Err(not_resolvable(describe_unresolved(history)));
            };
            if let Some(expected) = &reference {
                if *expected != values {
                    return Err(not_resolvable(format!(
                        "paths disagree: {expected:x?} vs {values:x?} through {}",
                        format_path(history)
                    )));
                }
            } else {
                reference = Some(values);
            }
        }

        let Some(history) = histories.first() else {
            return Err(not_resolvable("no path reaches the father".to_string()));
        };
        let Some((target, executed)) = dispatcher.emulate_with_history(func, history)? else {
            return Err(not_resolvable("dispatcher emulation did not reach an exit".to_string()));
        };

        let side_effects: Vec<Instruction> = executed
            .into_iter()
            .filter(|i| !i.is_control_flow() && i.opcode != Opcode::Nop)
            .collect();

        let mut changes = 1;
        let destination = if side_effects.is_empty() {
            target
        } else {
            let count = side_effects.len();
            let replay = func.create_block(side_effects)?;
            func.add_flags(replay, BlockFlags::SIDE_EFFECTS)?;
            func.change_1way_successor(replay, target)?;
            events
                .record(EventKind::SideEffectsReplayed)
                .at(func.name(), replay)
                .message(format!("{count} instructions for father {father} before {target}"));
            changes += 1;
            replay
        };

        func.redirect_edge(father, entry, destination)?;
        log::debug!("{}: father {} now jumps to {}", func.name(), father, destination);
        events
            .record(EventKind::EdgeRedirected)
            .at(func.name(), father)
            .message(format!("{father} -> {destination} (was {entry})"));
        Ok(changes)
    }

    fn father_histories(
        &self,
        func: &Function,
        dispatcher: &DispatcherInfo,
        father: BlockId,
    ) -> Result<Vec<MopHistory>> {
        MopTracker::new(
            func,
            dispatcher.entry().use_before_def_list.clone(),
            self.config.tracker_max_blocks,
            self.config.tracker_max_paths,
        )
        .with_avoid(dispatcher.internal_ids())
        .search_backward(father, None)
    }
}

fn skip_father(func: &Function, father: BlockId, error: &Error, events: &EventLog) {
    log::warn!("{}: skipping father {}: {}", func.name(), father, error);
    let kind = match error {
        Error::NotDuplicableFather { .. } => EventKind::FatherNotDuplicable,
        _ => EventKind::FatherNotResolvable,
    };
    events
        .record(kind)
        .at(func.name(), father)
        .message(error.to_string());
}

fn format_path(history: &MopHistory) -> String {
    history
        .block_path()
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn describe_unresolved(history: &MopHistory) -> String {
    match history.status() {
        HistoryStatus::Unresolved(reason) => {
            format!("path {} stopped: {}", format_path(history), reason)
        }
        HistoryStatus::Resolved => format!("path {} does not evaluate", format_path(history)),
    }
}

impl BlockOptimizer for Unflattener {
    fn name(&self) -> &'static str {
        "unflattener"
    }

    fn should_run(&self, func: &Function) -> bool {
        func.maturity() == self.config.maturity
    }

    fn optimize_block(&self, func: &mut Function, blk: BlockId, events: &EventLog) -> Result<usize> {
        let mut changes = self.remove_flattening(func, blk, events)?;
        if changes == 0 && self.config.enable_fake_jump_fix {
            changes = self.fake_jumps.fix_block(func, blk, events)?;
        }
        if changes == 0 {
            return Ok(0);
        }

        if self.config.run_cleanup {
            let report = func.cleanup()?;
            for removed in &report.removed_blocks {
                events.record(EventKind::BlockRemoved).at(func.name(), *removed);
            }
            for _ in 0..report.removed_nops {
                events.record(EventKind::InstructionRemoved).function(func.name());
            }
            changes += report.changes();
        }
        func.verify()?;
        func.mark_chains_dirty();
        Ok(changes)
    }

    fn max_rounds(&self) -> usize {
        self.config.max_passes
    }

    fn description(&self) -> &'static str {
        "Removes control-flow flattening dispatchers and fake conditional jumps"
    }
}
