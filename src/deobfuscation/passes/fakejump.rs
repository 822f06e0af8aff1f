//! Fake conditional jump removal.
//!
//! Flattening often leaves blocks that do nothing but test the state variable with `jz` or
//! `jnz` outside of the dispatcher. When every path into such a block sets the variable to
//! values that make the test go the same way, the jump is decided statically and the block
//! becomes a `goto`.
//!
//! Only blocks whose single real instruction is the jump are considered, and blocks belonging
//! to a recognized dispatcher are left to the unflattener.

use crate::{
    analysis::MopTracker,
    deobfuscation::{
        config::UnflattenConfig,
        events::{EventKind, EventLog},
        pass::BlockOptimizer,
        passes::unflattening::DispatcherCollector,
    },
    ir::{operand::size_mask, BlockId, Function, Opcode},
    Result,
};

/// Folds `jz`/`jnz` blocks whose outcome is the same along every incoming path.
#[derive(Debug, Clone, Default)]
pub struct FakeJumpFixer {
    config: UnflattenConfig,
}

impl FakeJumpFixer {
    /// Creates a fixer using the fake-jump bounds and the dispatcher thresholds of `config`.
    #[must_use]
    pub fn new(config: &UnflattenConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Rewrites `blk` into a `goto` if its conditional jump is decided on every path.
    ///
    /// Returns 1 if the block changed, 0 otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if `blk` does not exist or a graph edit fails.
    pub fn fix_block(&self, func: &mut Function, blk: BlockId, events: &EventLog) -> Result<usize> {
        let block = func.get(blk)?;
        if block.real_instruction_count() != 1 {
            return Ok(0);
        }
        let Some(tail) = block.tail() else {
            return Ok(0);
        };
        if !tail.opcode.is_fake_loop_jump() {
            return Ok(0);
        }
        let Some((num, compared)) = tail.comparison_info() else {
            return Ok(0);
        };
        let Some(constant) = num.value() else {
            return Ok(0);
        };

        let opcode = tail.opcode;
        let succs = block.succs().to_vec();
        let preds = block.preds().to_vec();
        if preds.is_empty() || succs.len() != 2 {
            return Ok(0);
        }

        let mut collector = DispatcherCollector::new(&self.config);
        collector.collect(func)?;
        if collector.is_dispatcher_block(blk) {
            return Ok(0);
        }

        let mask = size_mask(num.size().max(compared.size()));
        let tracker = MopTracker::new(
            func,
            vec![compared],
            self.config.fake_jump_max_blocks,
            self.config.fake_jump_max_paths,
        );

        let mut taken_count = 0usize;
        let mut total = 0usize;
        for pred in preds {
            for history in tracker.search_backward(pred, None)? {
                let Some(value) = history.value_of(&compared) else {
                    log::debug!(
                        "{}: jump in block {} depends on an unresolved path through {}",
                        func.name(),
                        blk,
                        pred
                    );
                    return Ok(0);
                };
                let equal = value & mask == constant & mask;
                let taken = match opcode {
                    Opcode::Jz => equal,
                    _ => !equal,
                };
                total += 1;
                taken_count += usize::from(taken);
            }
        }

        let (target, outcome) = if taken_count == total {
            (succs[1], "always taken")
        } else if taken_count == 0 {
            (succs[0], "never taken")
        } else {
            return Ok(0);
        };

        func.make_goto(blk, target)?;
        log::debug!("{}: jump in block {} is {}, now goto {}", func.name(), blk, outcome, target);
        events
            .record(EventKind::BranchSimplified)
            .at(func.name(), blk)
            .message(format!("{opcode} {outcome} over {total} paths, goto {target}"));
        Ok(1)
    }
}

impl BlockOptimizer for FakeJumpFixer {
    fn name(&self) -> &'static str {
        "fake_jump_fixer"
    }

    fn should_run(&self, func: &Function) -> bool {
        func.maturity() == self.config.maturity
    }

    fn optimize_block(&self, func: &mut Function, blk: BlockId, events: &EventLog) -> Result<usize> {
        let changes = self.fix_block(func, blk, events)?;
        if changes > 0 {
            func.verify()?;
        }
        Ok(changes)
    }

    fn max_rounds(&self) -> usize {
        self.config.max_passes
    }

    fn description(&self) -> &'static str {
        "Replaces jz/jnz blocks decided on every incoming path by a goto"
    }
}
