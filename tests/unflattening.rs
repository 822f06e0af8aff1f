//! End-to-end unflattening tests.
//!
//! Every test builds a flattened function, runs the pass through the host-facing
//! [`BlockOptimizer`] interface and checks three things:
//! 1. the graph still verifies
//! 2. the expected edges were rewritten (or left alone)
//! 3. concrete execution before and after ends in the same state

use cffscope::{
    deobfuscation::{
        BlockOptimizer, DerivedStats, DispatcherCollector, EventKind, EventLog, UnflattenConfig,
        Unflattener,
    },
    ir::{
        BlockFlags, BlockId, Environment, Function, FunctionBuilder, Instruction, Interpreter, Maturity, Mop,
        Opcode, Outcome,
    },
    Result,
};

fn state() -> Mop {
    Mop::reg(0, 4)
}

fn builder(name: &str, blocks: usize) -> (FunctionBuilder, Vec<BlockId>) {
    let mut b = FunctionBuilder::new(name).with_maturity(Maturity::Glbopt2);
    let ids = (0..blocks).map(|_| b.block()).collect();
    (b, ids)
}

/// Runs both functions from the same initial state and compares how they end.
fn assert_same_behavior(before: &Function, after: &Function, env: Environment) -> Result<()> {
    let interp = Interpreter::default();
    let expected = interp.run(before, env.clone())?;
    let actual = interp.run(after, env)?;

    assert_eq!(expected.outcome, Outcome::Exited, "original did not exit");
    assert_eq!(actual.outcome, Outcome::Exited, "rewritten function did not exit");
    assert_eq!(expected.env.values(), actual.env.values());
    assert_eq!(expected.env.stores(), actual.env.stores());
    assert!(actual.path.len() <= expected.path.len());
    Ok(())
}

/// b0: mov 5, state
/// b1: jz state, 5 -> b5        (entry)
/// b2: jz state, 7 -> b6
/// b3: jz state, 9 -> b7
/// b4: goto b8
/// b5: mov 7, state ; goto b1
/// b6: mov 9, state ; goto b1
/// b7: goto b8
/// b8: stop
fn three_case() -> Result<Function> {
    let (mut b, ids) = builder("three_case", 9);
    let s = state();
    b.push(ids[0], Instruction::mov(Mop::num(5, 4), s));
    b.push(ids[1], Instruction::jcc(Opcode::Jz, s, Mop::num(5, 4), ids[5]));
    b.push(ids[2], Instruction::jcc(Opcode::Jz, s, Mop::num(7, 4), ids[6]));
    b.push(ids[3], Instruction::jcc(Opcode::Jz, s, Mop::num(9, 4), ids[7]));
    b.push(ids[4], Instruction::goto(ids[8]));
    b.push(ids[5], Instruction::mov(Mop::num(7, 4), s));
    b.push(ids[5], Instruction::goto(ids[1]));
    b.push(ids[6], Instruction::mov(Mop::num(9, 4), s));
    b.push(ids[6], Instruction::goto(ids[1]));
    b.push(ids[7], Instruction::goto(ids[8]));
    b.build()
}

#[test]
fn test_three_case_dispatcher_is_removed() -> Result<()> {
    let original = three_case()?;
    let mut func = original.clone();
    let events = EventLog::new();

    let changes = Unflattener::default().optimize_function(&mut func, &events)?;
    func.verify()?;

    assert!(changes > 0);
    assert_eq!(func.get(BlockId(0))?.goto_target(), Some(BlockId(5)));
    assert_eq!(func.get(BlockId(5))?.goto_target(), Some(BlockId(6)));
    assert_eq!(func.get(BlockId(6))?.goto_target(), Some(BlockId(7)));
    for dispatcher_block in 1..=4 {
        assert!(!func.contains(BlockId(dispatcher_block)));
    }

    let stats = DerivedStats::from_log(&events);
    assert_eq!(stats.dispatchers, 1);
    assert_eq!(stats.edges_redirected, 3);
    assert_eq!(stats.blocks_removed, 4);
    assert_eq!(stats.fathers_skipped, 0);

    assert_same_behavior(&original, &func, Environment::new())
}

#[test]
fn test_pass_is_idempotent() -> Result<()> {
    let mut func = three_case()?;
    let pass = Unflattener::default();
    pass.optimize_function(&mut func, &EventLog::new())?;
    let first = func.to_string();

    let events = EventLog::new();
    assert_eq!(pass.optimize_function(&mut func, &events)?, 0);
    assert_eq!(func.to_string(), first);
    assert!(!events.has(EventKind::DispatcherIdentified));
    Ok(())
}

#[test]
fn test_maturity_gate() -> Result<()> {
    let mut func = three_case()?;
    func.set_maturity(Maturity::Glbopt1);
    let events = EventLog::new();
    assert_eq!(Unflattener::default().optimize_function(&mut func, &events)?, 0);
    assert!(events.is_empty());

    let pass = Unflattener::new(UnflattenConfig::default().with_maturity(Maturity::Glbopt1));
    assert!(pass.optimize_function(&mut func, &events)? > 0);
    Ok(())
}

#[test]
fn test_collector_finds_the_dispatcher() -> Result<()> {
    let func = three_case()?;
    let mut collector = DispatcherCollector::new(&UnflattenConfig::conservative());
    let found = collector.collect(&func)?;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].entry_block(), BlockId(1));
    assert_eq!(found[0].comparison_values(), &[5, 7, 9]);
    Ok(())
}

/// b0: mov 5, state
/// b1: jz state, 5 -> b5        (entry)
/// b2: jz state, 7 -> b6
/// b3: jz state, 9 -> b7
/// b4: goto b8
/// b5: mov 7, state ; goto b1
/// b6: ldx [r8], state ; goto b1
/// b7: goto b8
/// b8: stop
#[test]
fn test_unresolved_father_is_skipped() -> Result<()> {
    let (mut b, ids) = builder("unresolved", 9);
    let s = state();
    let addr = Mop::reg(8, 8);
    b.push(ids[0], Instruction::mov(Mop::num(5, 4), s));
    b.push(ids[1], Instruction::jcc(Opcode::Jz, s, Mop::num(5, 4), ids[5]));
    b.push(ids[2], Instruction::jcc(Opcode::Jz, s, Mop::num(7, 4), ids[6]));
    b.push(ids[3], Instruction::jcc(Opcode::Jz, s, Mop::num(9, 4), ids[7]));
    b.push(ids[4], Instruction::goto(ids[8]));
    b.push(ids[5], Instruction::mov(Mop::num(7, 4), s));
    b.push(ids[5], Instruction::goto(ids[1]));
    b.push(ids[6], Instruction::ldx(addr, s));
    b.push(ids[6], Instruction::goto(ids[1]));
    b.push(ids[7], Instruction::goto(ids[8]));
    let original = b.build()?;

    let mut func = original.clone();
    let events = EventLog::new();
    Unflattener::default().optimize_function(&mut func, &events)?;
    func.verify()?;

    assert_eq!(func.get(ids[0])?.goto_target(), Some(ids[5]));
    assert_eq!(func.get(ids[5])?.goto_target(), Some(ids[6]));
    assert_eq!(func.get(ids[6])?.goto_target(), Some(ids[1]));
    assert!(func.contains(ids[1]));
    assert!(events.has(EventKind::FatherNotDuplicable));
    assert!(events
        .filter_kind(EventKind::FatherNotDuplicable)
        .all(|e| e.block == Some(ids[6])));

    for loaded in [9, 0x42] {
        let mut env = Environment::new();
        env.set(&addr, 0x2000);
        env.set_memory(0x2000, loaded);
        assert_same_behavior(&original, &func, env)?;
    }
    Ok(())
}

/// The first father is two-way and falls into the entry.
///
/// b0: mov 5, state ; jz r1, 0 -> b8
/// b1: jz state, 5 -> b5        (entry)
/// b2: jz state, 7 -> b6
/// b3: jz state, 9 -> b7
/// b4: goto b9
/// b5: mov 7, state ; goto b1
/// b6: mov 9, state ; goto b1
/// b7: goto b9
/// b8: mov 9, state ; goto b1
/// b9: stop
#[test]
fn test_fallthrough_father_gets_trampoline() -> Result<()> {
    let (mut b, ids) = builder("fallthrough", 10);
    let s = state();
    b.push(ids[0], Instruction::mov(Mop::num(5, 4), s));
    b.push(ids[0], Instruction::jcc(Opcode::Jz, Mop::reg(1, 4), Mop::num(0, 4), ids[8]));
    b.push(ids[1], Instruction::jcc(Opcode::Jz, s, Mop::num(5, 4), ids[5]));
    b.push(ids[2], Instruction::jcc(Opcode::Jz, s, Mop::num(7, 4), ids[6]));
    b.push(ids[3], Instruction::jcc(Opcode::Jz, s, Mop::num(9, 4), ids[7]));
    b.push(ids[4], Instruction::goto(ids[9]));
    b.push(ids[5], Instruction::mov(Mop::num(7, 4), s));
    b.push(ids[5], Instruction::goto(ids[1]));
    b.push(ids[6], Instruction::mov(Mop::num(9, 4), s));
    b.push(ids[6], Instruction::goto(ids[1]));
    b.push(ids[7], Instruction::goto(ids[9]));
    b.push(ids[8], Instruction::mov(Mop::num(9, 4), s));
    b.push(ids[8], Instruction::goto(ids[1]));
    let original = b.build()?;

    let mut func = original.clone();
    Unflattener::default().optimize_function(&mut func, &EventLog::new())?;
    func.verify()?;

    let succs = func.successors(ids[0]).to_vec();
    assert_eq!(succs.len(), 2);
    assert_eq!(succs[1], ids[8]);
    assert_eq!(func.get(succs[0])?.goto_target(), Some(ids[5]));
    assert_eq!(func.get(ids[8])?.goto_target(), Some(ids[7]));
    assert!(!func.contains(ids[1]));

    for selector in [0, 1] {
        let mut env = Environment::new();
        env.set(&Mop::reg(1, 4), selector);
        assert_same_behavior(&original, &func, env)?;
    }
    Ok(())
}

/// Case blocks compute the next state instead of loading an immediate.
///
/// b0: mov 0x10, r4 ; xor r4, 0x15, state        (state = 5)
/// b1: jz state, 5 -> b5        (entry)
/// b2: jz state, 7 -> b6
/// b3: jz state, 9 -> b7
/// b4: goto b8
/// b5: mov 3, r4 ; xor r4, 4, state ; goto b1   (state = 7)
/// b6: stx 1, r9 ; mov 0x10, state ; sub state, 7, state ; goto b1   (state = 9)
/// b7: goto b8
/// b8: stop
#[test]
fn test_encoded_states() -> Result<()> {
    let (mut b, ids) = builder("encoded", 9);
    let s = state();
    let tmp = Mop::reg(4, 4);
    b.push(ids[0], Instruction::mov(Mop::num(0x10, 4), tmp));
    b.push(ids[0], Instruction::binary(Opcode::Xor, tmp, Mop::num(0x15, 4), s));
    b.push(ids[1], Instruction::jcc(Opcode::Jz, s, Mop::num(5, 4), ids[5]));
    b.push(ids[2], Instruction::jcc(Opcode::Jz, s, Mop::num(7, 4), ids[6]));
    b.push(ids[3], Instruction::jcc(Opcode::Jz, s, Mop::num(9, 4), ids[7]));
    b.push(ids[4], Instruction::goto(ids[8]));
    b.push(ids[5], Instruction::mov(Mop::num(3, 4), tmp));
    b.push(ids[5], Instruction::binary(Opcode::Xor, tmp, Mop::num(4, 4), s));
    b.push(ids[5], Instruction::goto(ids[1]));
    b.push(ids[6], Instruction::stx(Mop::num(1, 4), Mop::reg(9, 8)));
    b.push(ids[6], Instruction::mov(Mop::num(0x10, 4), s));
    b.push(ids[6], Instruction::binary(Opcode::Sub, s, Mop::num(7, 4), s));
    b.push(ids[6], Instruction::goto(ids[1]));
    b.push(ids[7], Instruction::goto(ids[8]));
    let original = b.build()?;

    let mut func = original.clone();
    let events = EventLog::new();
    Unflattener::default().optimize_function(&mut func, &events)?;
    func.verify()?;

    assert_eq!(func.get(ids[0])?.goto_target(), Some(ids[5]));
    assert_eq!(func.get(ids[5])?.goto_target(), Some(ids[6]));
    assert_eq!(func.get(ids[6])?.goto_target(), Some(ids[7]));
    assert_eq!(DerivedStats::from_log(&events).edges_redirected, 3);

    let mut env = Environment::new();
    env.set(&Mop::reg(9, 8), 0x3000);
    assert_same_behavior(&original, &func, env)
}

/// The state is defined three blocks above the first father.
///
/// b0: mov 5, state
/// b1: mov 1, r5
/// b2: mov 2, r5
/// b3: mov 3, r5
/// b4: jz state, 5 -> b8        (entry)
/// b5: jz state, 7 -> b9
/// b6: jz state, 9 -> b10
/// b7: goto b11
/// b8: mov 7, state ; goto b4
/// b9: mov 9, state ; goto b4
/// b10: goto b11
/// b11: stop
#[test]
fn test_tracking_bounds_terminate() -> Result<()> {
    let (mut b, ids) = builder("bounded", 12);
    let s = state();
    b.push(ids[0], Instruction::mov(Mop::num(5, 4), s));
    for (i, blk) in ids[1..4].iter().enumerate() {
        b.push(*blk, Instruction::mov(Mop::num(i as u64 + 1, 4), Mop::reg(5, 4)));
    }
    b.push(ids[4], Instruction::jcc(Opcode::Jz, s, Mop::num(5, 4), ids[8]));
    b.push(ids[5], Instruction::jcc(Opcode::Jz, s, Mop::num(7, 4), ids[9]));
    b.push(ids[6], Instruction::jcc(Opcode::Jz, s, Mop::num(9, 4), ids[10]));
    b.push(ids[7], Instruction::goto(ids[11]));
    b.push(ids[8], Instruction::mov(Mop::num(7, 4), s));
    b.push(ids[8], Instruction::goto(ids[4]));
    b.push(ids[9], Instruction::mov(Mop::num(9, 4), s));
    b.push(ids[9], Instruction::goto(ids[4]));
    b.push(ids[10], Instruction::goto(ids[11]));
    let original = b.build()?;

    let config = UnflattenConfig {
        tracker_max_blocks: 2,
        ..UnflattenConfig::default()
    };
    let mut func = original.clone();
    let events = EventLog::new();
    Unflattener::new(config).optimize_function(&mut func, &events)?;
    func.verify()?;

    // b3 still falls into the dispatcher, the case blocks bypass it
    assert_eq!(func.successors(ids[3]), &[ids[4]]);
    assert_eq!(func.get(ids[8])?.goto_target(), Some(ids[9]));
    assert_eq!(func.get(ids[9])?.goto_target(), Some(ids[10]));
    assert!(events
        .filter_kind(EventKind::FatherNotDuplicable)
        .any(|e| e.message.contains("MaxBlocks")));
    assert!(events.has(EventKind::PassCompleted));

    // with the default bounds everything resolves
    let mut func = original.clone();
    Unflattener::default().optimize_function(&mut func, &EventLog::new())?;
    func.verify()?;
    assert_eq!(func.get(ids[3])?.goto_target(), Some(ids[8]));
    assert_same_behavior(&original, &func, Environment::new())
}

/// Three states reach the dispatcher through the shared chain b5 -> b6.
///
/// ```text
/// b0: jz r1, 0 -> b3
/// b1: jz r2, 0 -> b4
/// b2: mov 5, state ; goto b5
/// b3: mov 7, state ; goto b5
/// b4: mov 9, state ; goto b5
/// b5: mov 1, r5
/// b6: mov 2, r6                 (father)
/// b7: jz state, 5 -> b11        (entry)
/// b8: jz state, 7 -> b12
/// b9: jz state, 9 -> b13
/// b10: goto b14
/// b11: stx 0x50, r9 ; goto b14
/// b12: stx 0x70, r9 ; goto b14
/// b13: stx 0x90, r9 ; goto b14
/// b14: stop
/// ```
fn shared_chain() -> Result<Function> {
    let (mut b, ids) = builder("shared_chain", 15);
    let s = state();
    let addr = Mop::reg(9, 8);
    b.push(ids[0], Instruction::jcc(Opcode::Jz, Mop::reg(1, 4), Mop::num(0, 4), ids[3]));
    b.push(ids[1], Instruction::jcc(Opcode::Jz, Mop::reg(2, 4), Mop::num(0, 4), ids[4]));
    for (blk, value) in [(ids[2], 5), (ids[3], 7), (ids[4], 9)] {
        b.push(blk, Instruction::mov(Mop::num(value, 4), s));
        b.push(blk, Instruction::goto(ids[5]));
    }
    b.push(ids[5], Instruction::mov(Mop::num(1, 4), Mop::reg(5, 4)));
    b.push(ids[6], Instruction::mov(Mop::num(2, 4), Mop::reg(6, 4)));
    b.push(ids[7], Instruction::jcc(Opcode::Jz, s, Mop::num(5, 4), ids[11]));
    b.push(ids[8], Instruction::jcc(Opcode::Jz, s, Mop::num(7, 4), ids[12]));
    b.push(ids[9], Instruction::jcc(Opcode::Jz, s, Mop::num(9, 4), ids[13]));
    b.push(ids[10], Instruction::goto(ids[14]));
    for (blk, stored) in [(ids[11], 0x50), (ids[12], 0x70), (ids[13], 0x90)] {
        b.push(blk, Instruction::stx(Mop::num(stored, 4), addr));
        b.push(blk, Instruction::goto(ids[14]));
    }
    b.build()
}

/// Every selector combination of [`shared_chain`], one per state.
fn shared_chain_inputs() -> Vec<Environment> {
    [(0, 0), (1, 0), (1, 1)]
        .into_iter()
        .map(|(r1, r2)| {
            let mut env = Environment::new();
            env.set(&Mop::reg(1, 4), r1);
            env.set(&Mop::reg(2, 4), r2);
            env.set(&Mop::reg(9, 8), 0x4000);
            env
        })
        .collect()
}

#[test]
fn test_three_states_through_shared_chain() -> Result<()> {
    let original = shared_chain()?;
    let (m, n) = (BlockId(5), BlockId(6));
    let mut func = original.clone();
    let events = EventLog::new();
    Unflattener::default().optimize_function(&mut func, &events)?;
    func.verify()?;

    for shared in [m, n] {
        let copies = events
            .filter_kind(EventKind::BlockDuplicated)
            .filter(|e| e.block == Some(shared))
            .count();
        assert_eq!(copies, 2, "block {shared} should be copied once per extra state");
    }

    let duplicated: Vec<BlockId> = func
        .blocks()
        .filter(|blk| blk.flags().contains(BlockFlags::DUPLICATED))
        .map(|blk| blk.id())
        .collect();
    assert_eq!(duplicated.len(), 4);
    for blk in duplicated.iter().chain([m, n].iter()) {
        assert_eq!(func.predecessors(*blk).len(), 1, "block {blk} is still shared");
    }

    let stats = DerivedStats::from_log(&events);
    assert_eq!(stats.blocks_duplicated, 4);
    assert_eq!(stats.edges_redirected, 3);
    assert_eq!(stats.fathers_skipped, 0);
    assert_eq!(stats.warnings, 0);
    assert!(!func.contains(BlockId(7)));

    for env in shared_chain_inputs() {
        assert_same_behavior(&original, &func, env)?;
    }
    Ok(())
}

#[test]
fn test_duplication_limit_leaves_father_unresolved() -> Result<()> {
    let original = shared_chain()?;
    let config = UnflattenConfig {
        max_duplication_passes: 1,
        max_passes: 1,
        ..UnflattenConfig::default()
    };
    let mut func = original.clone();
    let events = EventLog::new();
    Unflattener::new(config).optimize_function(&mut func, &events)?;
    func.verify()?;

    // one round splits b5, b6 is still reached with three states
    assert!(events
        .filter_kind(EventKind::BlockDuplicated)
        .all(|e| e.block == Some(BlockId(5))));
    assert!(events
        .filter_kind(EventKind::FatherNotResolvable)
        .any(|e| e.block == Some(BlockId(6))));
    assert_eq!(func.predecessors(BlockId(6)).len(), 3);
    assert!(func.contains(BlockId(7)));

    let stats = DerivedStats::from_log(&events);
    assert_eq!(stats.blocks_duplicated, 2);
    assert_eq!(stats.edges_redirected, 0);
    assert_eq!(stats.warnings, 1);
    assert!(events
        .filter_kind(EventKind::Warning)
        .any(|e| e.message.contains("duplication passes")));

    for env in shared_chain_inputs() {
        let interp = Interpreter::default();
        let expected = interp.run(&original, env.clone())?;
        let actual = interp.run(&func, env)?;
        assert_eq!(actual.outcome, Outcome::Exited);
        assert_eq!(expected.env.stores(), actual.env.stores());
    }
    Ok(())
}
