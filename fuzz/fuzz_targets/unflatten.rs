#![no_main]

use cffscope::{
    deobfuscation::{BlockOptimizer, EventLog, Unflattener},
    ir::{BlockId, Environment, FunctionBuilder, Instruction, Interpreter, Maturity, Mop, Opcode, Outcome},
};
use libfuzzer_sys::fuzz_target;

const JUMPS: [Opcode; 4] = [Opcode::Jz, Opcode::Jnz, Opcode::Jb, Opcode::Jae];
const ARITH: [Opcode; 4] = [Opcode::Add, Opcode::Sub, Opcode::Xor, Opcode::And];

fuzz_target!(|data: &[u8]| {
    if data.len() < 4 {
        return;
    }
    let count = 3 + usize::from(data[0] % 13);
    let mut b = FunctionBuilder::new("fuzz").with_maturity(Maturity::Glbopt2);
    let ids: Vec<BlockId> = (0..count).map(|_| b.block()).collect();

    // Four bytes per block: kind, register, constant, jump target. The stop block stays empty.
    for (i, chunk) in data[1..].chunks(4).take(count - 1).enumerate() {
        let [kind, reg, value, target] = match *chunk {
            [a, b, c, d] => [a, b, c, d],
            _ => break,
        };
        let var = Mop::reg(u16::from(reg % 4), 4);
        let num = Mop::num(u64::from(value % 8), 4);
        // never the entry, never the fall-through
        let target = 1 + usize::from(target) % (count - 1);
        let jump_target = if target == i + 1 { None } else { Some(ids[target]) };

        match kind % 5 {
            0 => {
                b.push(ids[i], Instruction::mov(num, var));
            }
            1 => {
                let op = ARITH[usize::from(kind / 5) % ARITH.len()];
                b.push(ids[i], Instruction::binary(op, var, num, Mop::reg(0, 4)));
            }
            2 => {
                b.push(ids[i], Instruction::stx(var, Mop::reg(9, 8)));
            }
            3 => {
                if let Some(t) = jump_target {
                    let op = JUMPS[usize::from(kind / 5) % JUMPS.len()];
                    b.push(ids[i], Instruction::jcc(op, var, num, t));
                }
            }
            _ => {
                b.push(ids[i], Instruction::mov(num, Mop::reg(0, 4)));
                b.push(ids[i], Instruction::goto(ids[target]));
            }
        }
    }

    let Ok(mut func) = b.build() else {
        return;
    };
    let original = func.clone();

    let events = EventLog::new();
    Unflattener::default()
        .optimize_function(&mut func, &events)
        .expect("the pass must not fail on a well-formed graph");
    func.verify().expect("the pass must leave a consistent graph");

    let mut env = Environment::new();
    env.set(&Mop::reg(9, 8), 0x1000);
    let interp = Interpreter::new(256);
    let before = interp.run(&original, env.clone()).expect("run before");
    let after = interp.run(&func, env).expect("run after");
    if before.outcome == Outcome::Exited && after.outcome == Outcome::Exited {
        assert_eq!(before.env.stores(), after.env.stores());
    }
});
