// SPDX-License-Identifier: AGPL-3.0

//! Stack and memory shuffling primitives the replacement generators are built from.
//!
//! Stack layouts in the docs below are written top first: `[a, b, rest]`
//! means `a` is on top.

use alloy_primitives::U256;
use ovmt_constants::{MAX_STACK_REACH, WORD_SIZE};
use ovmt_opcodes::{Bytecode, Instruction, Opcode};

/// PUSH of `value` using the narrowest PUSH that holds it. Zero is `PUSH1 0x00`.
pub fn push_integer_op(value: U256) -> Instruction {
    let bytes = value.to_be_bytes::<32>();
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(WORD_SIZE - 1);
    Instruction::push_bytes(&bytes[first..])
}

pub fn push_usize(value: usize) -> Instruction {
    push_integer_op(U256::from(value))
}

/// PUSH of `buffer` verbatim, leading zeros included
pub fn push_buffer(buffer: &[u8]) -> Instruction {
    Instruction::push_bytes(buffer)
}

/// DUPn for n in 1..=16
pub fn dup_op(n: usize) -> Instruction {
    match Opcode::dup(n) {
        Some(opcode) => Instruction::op(opcode),
        None => panic!("DUP{} is out of reach (max {})", n, MAX_STACK_REACH),
    }
}

/// SWAPn for n in 1..=16
pub fn swap_op(n: usize) -> Instruction {
    match Opcode::swap(n) {
        Some(opcode) => Instruction::op(opcode),
        None => panic!("SWAP{} is out of reach (max {})", n, MAX_STACK_REACH),
    }
}

pub fn op(opcode: Opcode) -> Instruction {
    Instruction::op(opcode)
}

/// `count` POPs
pub fn pop_n(count: usize) -> Bytecode {
    vec![op(Opcode::POP); count]
}

/// `[idx, rest]` -> `[idx, mem[idx], mem[idx+32], .., mem[idx+32*(words-1)], rest]`
pub fn push_memory_onto_stack(words: usize) -> Bytecode {
    let mut code = Bytecode::new();
    for i in (0..words).rev() {
        code.push(dup_op(1));
        if i > 0 {
            code.push(push_usize(i * WORD_SIZE));
            code.push(op(Opcode::ADD));
        }
        code.push(op(Opcode::MLOAD));
        code.push(swap_op(1));
    }
    code
}

/// `[rest]` -> `[mem[index], .., mem[index+32*(words-1)], rest]`
pub fn push_memory_at_index_onto_stack(index: usize, words: usize) -> Bytecode {
    let mut code = vec![push_usize(index)];
    code.extend(push_memory_onto_stack(words));
    code.push(op(Opcode::POP));
    code
}

/// `[idx, w0, .., w(words-1), rest]` -> `[idx, rest]`, with `wi` written to `idx+32*i`
pub fn store_stack_in_memory(words: usize) -> Bytecode {
    let mut code = Bytecode::new();
    for i in 0..words {
        code.push(swap_op(1));
        code.push(dup_op(2));
        if i > 0 {
            code.push(push_usize(i * WORD_SIZE));
            code.push(op(Opcode::ADD));
        }
        code.push(op(Opcode::MSTORE));
    }
    code
}

/// `[w0, .., w(words-1), rest]` -> `[rest]`, with `wi` written to `index+32*i`
pub fn store_stack_in_memory_at_index(index: usize, words: usize) -> Bytecode {
    let mut code = vec![push_usize(index)];
    code.extend(store_stack_in_memory(words));
    code.push(op(Opcode::POP));
    code
}

/// Copy the `count` elements found below the top `skip` elements onto the top,
/// keeping their order: `[a.., b0..b(count-1), rest]` -> `[b0..b(count-1), a.., b.., rest]`
pub fn duplicate_stack_at(skip: usize, count: usize) -> Bytecode {
    (0..count).map(|_| dup_op(skip + count)).collect()
}

/// Drop the `count` elements directly below the top one: `[x, d.., rest]` -> `[x, rest]`
pub fn discard_below_top(count: usize) -> Bytecode {
    let mut code = Bytecode::with_capacity(count * 2);
    for _ in 0..count {
        code.push(swap_op(1));
        code.push(op(Opcode::POP));
    }
    code
}
