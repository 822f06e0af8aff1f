use crate::{
    ir::{BlockId, Function, FunctionBuilder, Instruction, Maturity, Mop, Opcode},
    Result,
};

/// State variable of every factory
pub fn state() -> Mop {
    Mop::reg(0, 4)
}

/// A dispatcher on three values, each case setting the next state.
///
/// ```text
/// b0: mov 5, state
/// b1: jz state, 5 -> b5        (entry)
/// b2: jz state, 7 -> b6
/// b3: jz state, 9 -> b7
/// b4: goto b8                  (default)
/// b5: mov 7, state ; goto b1
/// b6: mov 9, state ; goto b1
/// b7: goto b8
/// b8: stop
/// ```
pub fn three_case() -> Result<Function> {
    let mut b = FunctionBuilder::new("three_case").with_maturity(Maturity::Glbopt2);
    let ids: Vec<BlockId> = (0..9).map(|_| b.block()).collect();
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

/// Two cases reaching the dispatcher through one shared block.
///
/// ```text
/// b0: jz r1, 0 -> b2
/// b1: mov 5, state ; goto b3
/// b2: mov 7, state
/// b3: mov 1, r2                (shared father)
/// b4: jz state, 5 -> b8        (entry)
/// b5: jz state, 7 -> b9
/// b6: jz state, 9 -> b10
/// b7: goto b11
/// b8: stx 0x50, r9 ; goto b11
/// b9: stx 0x70, r9 ; goto b11
/// b10: goto b11
/// b11: stop
/// ```
pub fn shared_father() -> Result<Function> {
    let mut b = FunctionBuilder::new("shared_father").with_maturity(Maturity::Glbopt2);
    let ids: Vec<BlockId> = (0..12).map(|_| b.block()).collect();
    let s = state();
    let addr = Mop::reg(9, 8);
    b.push(ids[0], Instruction::jcc(Opcode::Jz, Mop::reg(1, 4), Mop::num(0, 4), ids[2]));
    b.push(ids[1], Instruction::mov(Mop::num(5, 4), s));
    b.push(ids[1], Instruction::goto(ids[3]));
    b.push(ids[2], Instruction::mov(Mop::num(7, 4), s));
    b.push(ids[3], Instruction::mov(Mop::num(1, 4), Mop::reg(2, 4)));
    b.push(ids[4], Instruction::jcc(Opcode::Jz, s, Mop::num(5, 4), ids[8]));
    b.push(ids[5], Instruction::jcc(Opcode::Jz, s, Mop::num(7, 4), ids[9]));
    b.push(ids[6], Instruction::jcc(Opcode::Jz, s, Mop::num(9, 4), ids[10]));
    b.push(ids[7], Instruction::goto(ids[11]));
    b.push(ids[8], Instruction::stx(Mop::num(0x50, 4), addr));
    b.push(ids[8], Instruction::goto(ids[11]));
    b.push(ids[9], Instruction::stx(Mop::num(0x70, 4), addr));
    b.push(ids[9], Instruction::goto(ids[11]));
    b.push(ids[10], Instruction::goto(ids[11]));
    b.build()
}
