//! Path splitting by block duplication.
//!
//! A father of the dispatcher can be reached through several paths that set the state
//! variable to different values. As long as those paths share a block, a single edge cannot be
//! rewritten for all of them. Duplication finds the first shared block whose histories arrive
//! from different predecessors, clones it once per additional predecessor and points each
//! predecessor at its own clone. Repeating this eventually gives every path its own blocks.
//!
//! ```text
//!   b1 (state = 5) ──┐                b1 (state = 5) ──► b3 ──► entry
//!                    ├─► b3 ─► entry
//!   b2 (state = 7) ──┘                b2 (state = 7) ──► b3' ─► entry
//! ```

use std::collections::HashMap;

use crate::{
    analysis::MopHistory,
    deobfuscation::events::{EventKind, EventLog},
    ir::{BlockFlags, BlockId, BlockType, Function},
    Error, Result,
};

/// Predecessor of a shared block and the histories arriving through it.
pub type PredecessorGroup = (BlockId, Vec<usize>);

/// Finds the first block reached from two or more different predecessors across `histories`.
///
/// Blocks are considered in the order histories visit them, earliest history first. Returns
/// the block and its histories grouped by predecessor, groups in order of first appearance.
#[must_use]
pub fn get_block_with_multiple_predecessors(
    histories: &[MopHistory],
) -> Option<(BlockId, Vec<PredecessorGroup>)> {
    let mut order: Vec<BlockId> = Vec::new();
    let mut groups: HashMap<BlockId, Vec<PredecessorGroup>> = HashMap::new();

    for (index, history) in histories.iter().enumerate() {
        for pair in history.block_path().windows(2) {
            let (pred, blk) = (pair[0], pair[1]);
            let entry = groups.entry(blk).or_insert_with(|| {
                order.push(blk);
                Vec::new()
            });
            match entry.iter_mut().find(|(p, _)| *p == pred) {
                Some((_, indices)) => indices.push(index),
                None => entry.push((pred, vec![index])),
            }
        }
    }

    order
        .into_iter()
        .find(|blk| groups.get(blk).is_some_and(|g| g.len() > 1))
        .and_then(|blk| groups.remove(&blk).map(|g| (blk, g)))
}

/// Clones `blk` right before the stop block.
///
/// A one-way clone jumps explicitly to the original successor. A two-way clone keeps the
/// taken target and falls into a new auxiliary block that jumps to the original fall-through.
/// Returns the clone and the auxiliary block.
///
/// # Errors
///
/// Returns [`Error::InvalidEdit`] for zero-way blocks.
pub fn duplicate_block(func: &mut Function, blk: BlockId) -> Result<(BlockId, Option<BlockId>)> {
    let block = func.get(blk)?;
    let block_type = block.block_type();
    let succs = block.succs().to_vec();
    if block_type == BlockType::ZeroWay {
        return Err(Error::InvalidEdit {
            block: blk,
            message: "zero-way blocks cannot be duplicated".to_string(),
        });
    }

    let exit_pos = func.qty() - 1;
    let dup = func.copy_block(blk, exit_pos)?;
    func.add_flags(dup, BlockFlags::DUPLICATED)?;

    match block_type {
        BlockType::TwoWay => {
            let aux_pos = func
                .serial(dup)
                .map(|s| s + 1)
                .ok_or(Error::InvalidBlock(dup))?;
            let aux = func.insert_block(aux_pos)?;
            func.add_flags(aux, BlockFlags::AUX_DEFAULT)?;
            func.change_1way_successor(aux, succs[0])?;
            log::debug!("duplicated two-way block {} as {} with default {}", blk, dup, aux);
            Ok((dup, Some(aux)))
        }
        _ => {
            func.change_1way_successor(dup, succs[0])?;
            log::debug!("duplicated one-way block {} as {}", blk, dup);
            Ok((dup, None))
        }
    }
}

/// Performs one duplication round on the first ambiguous block of `histories`.
///
/// The first predecessor group keeps the original block; every other group gets a clone.
/// Histories are patched to follow the new blocks. Returns `false` if nothing is ambiguous.
///
/// # Errors
///
/// Propagates errors of the mutation primitives.
pub fn try_to_duplicate_one_block(
    func: &mut Function,
    histories: &mut [MopHistory],
    events: &EventLog,
) -> Result<bool> {
    let Some((blk, groups)) = get_block_with_multiple_predecessors(histories) else {
        return Ok(false);
    };
    let fallthrough = func.successors(blk).first().copied();

    for (pred, indices) in groups.into_iter().skip(1) {
        let (dup, aux) = duplicate_block(func, blk)?;
        let trampoline = func.redirect_edge(pred, blk, dup)?;

        for index in indices {
            let history = &mut histories[index];
            let next = history
                .position_of(blk)
                .and_then(|pos| history.block_path().get(pos + 1).copied());
            history.replace_block_in_path(blk, dup);
            if let Some(aux) = aux {
                if next.is_some() && next == fallthrough {
                    history.insert_block_in_path(aux, dup);
                }
            }
            if let Some(trampoline) = trampoline {
                history.insert_block_in_path(trampoline, pred);
            }
        }

        events
            .record(EventKind::BlockDuplicated)
            .at(func.name(), blk)
            .message(format!("{blk} -> {dup} for predecessor {pred}"));
    }
    Ok(true)
}

/// Duplicates blocks until no history shares a block through different predecessors.
///
/// Stops after `max_passes` rounds. Returns the number of rounds that changed the graph.
///
/// # Errors
///
/// Propagates errors of the mutation primitives.
pub fn duplicate_histories(
    func: &mut Function,
    histories: &mut [MopHistory],
    max_passes: usize,
    events: &EventLog,
) -> Result<usize> {
    let mut rounds = 0;
    while rounds < max_passes {
        if !try_to_duplicate_one_block(func, histories, events)? {
            break;
        }
        rounds += 1;
    }
    if rounds == max_passes {
        if let Some((blk, groups)) = get_block_with_multiple_predecessors(histories) {
            let message = format!(
                "{}: block {} still reached from {} predecessors after {} duplication passes",
                func.name(),
                blk,
                groups.len(),
                max_passes
            );
            log::warn!("{message}");
            events.warn(message);
        }
    }
    Ok(rounds)
}
