// SPDX-License-Identifier: AGPL-3.0

//! Code generators that route an intercepted opcode through a CALL to the
//! execution manager.
//!
//! Every execution manager method is addressed by the selector of
//! `ovm<OPCODE>()` and answers with a single 32-byte word, except the call
//! forwarders whose return data is the sandboxed callee's.
//!
//! Two tiers exist:
//! - static: the opcode's operands are plain words, so calldata is built in a
//!   fixed scratch region that is stashed on the stack and restored afterwards;
//! - dynamic: the opcode already points at calldata in memory, so the window is
//!   grown backward in place, and the bytes it grows over are stashed and restored.

use crate::helpers::{
    discard_below_top, dup_op, duplicate_stack_at, op, pop_n, push_buffer, push_integer_op,
    push_memory_at_index_onto_stack, push_memory_onto_stack, push_usize,
    store_stack_in_memory, store_stack_in_memory_at_index, swap_op,
};
use alloy_primitives::{Address, U256};
use ovmt_constants::{
    BIG_ENOUGH_GAS_LIMIT, EXECUTION_MANAGER_METHOD_PREFIX, SELECTOR_SIZE, WORD_SIZE,
};
use ovmt_hashes::method_id;
use ovmt_opcodes::{Bytecode, Instruction, Opcode};

/// Most stack arguments the stack-returning static generator can shuffle
/// within DUP16 reach.
pub const MAX_STATIC_STACK_ARGS: usize = 6;

/// Execution manager method standing in for `opcode`, e.g. `ovmSLOAD`
pub fn method_name(opcode: Opcode) -> String {
    format!("{}{}", EXECUTION_MANAGER_METHOD_PREFIX, opcode)
}

fn push_method_id(method: &str) -> Instruction {
    push_buffer(&method_id(method))
}

/// `[argsOffset, argsLength, retOffset, retLength, rest]` -> `[success, rest]`,
/// calling the execution manager with zero value and the fixed gas sentinel.
fn call_execution_manager(execution_manager: &Address) -> Bytecode {
    vec![
        push_usize(0),
        push_buffer(execution_manager.as_slice()),
        push_integer_op(U256::from(BIG_ENOUGH_GAS_LIMIT)),
        op(Opcode::CALL),
    ]
}

/// Static tier, memory variant.
///
/// `[arg0, .., arg(n-1), rest]` -> `[rest]`. Lays out
/// `selector word | arg words | return word` at `memory_index`, calls
/// `method`, and leaves the return word at `memory_index + 32*(n+1)`.
/// Memory in the region is not restored.
pub fn call_contract_with_stack_elements_and_return_word_to_memory(
    execution_manager: &Address,
    method: &str,
    num_stack_args: usize,
    memory_index: usize,
) -> Bytecode {
    let args_offset = memory_index + WORD_SIZE - SELECTOR_SIZE;
    let args_length = SELECTOR_SIZE + WORD_SIZE * num_stack_args;
    let ret_offset = memory_index + WORD_SIZE * (num_stack_args + 1);

    let mut code = store_stack_in_memory_at_index(memory_index + WORD_SIZE, num_stack_args);
    code.push(push_method_id(method));
    code.push(push_usize(memory_index));
    code.push(op(Opcode::MSTORE));

    code.push(push_usize(WORD_SIZE));
    code.push(push_usize(ret_offset));
    code.push(push_usize(args_length));
    code.push(push_usize(args_offset));
    code.extend(call_execution_manager(execution_manager));
    code.push(op(Opcode::POP));
    code
}

/// Static tier, stack variant.
///
/// `[arg0, .., arg(n-1), rest]` -> `[result, rest]`. The `n + 2` words of the
/// scratch region are stashed on the stack first and written back afterwards,
/// so memory is unchanged.
pub fn call_contract_with_stack_elements_and_return_word_to_stack(
    execution_manager: &Address,
    method: &str,
    num_stack_args: usize,
    memory_index: usize,
) -> Bytecode {
    assert!(
        num_stack_args <= MAX_STATIC_STACK_ARGS,
        "{} takes {} stack arguments, at most {} fit",
        method,
        num_stack_args,
        MAX_STATIC_STACK_ARGS
    );
    let region_words = num_stack_args + 2;
    let ret_offset = memory_index + WORD_SIZE * (num_stack_args + 1);

    // A placeholder slot below the stash receives the result.
    let mut code = vec![push_usize(0)];
    code.extend(push_memory_at_index_onto_stack(memory_index, region_words));
    code.extend(duplicate_stack_at(region_words + 1, num_stack_args));
    code.extend(call_contract_with_stack_elements_and_return_word_to_memory(
        execution_manager,
        method,
        num_stack_args,
        memory_index,
    ));
    code.push(push_usize(ret_offset));
    code.push(op(Opcode::MLOAD));
    code.push(swap_op(region_words + 1));
    code.push(op(Opcode::POP));
    code.extend(store_stack_in_memory_at_index(memory_index, region_words));
    code.extend(discard_below_top(num_stack_args));
    code
}

/// Number of 32-byte words each call-family opcode prepends to its calldata
/// after the selector: the target address.
const CALL_PREPENDED_WORDS: usize = 1;

/// CALL, STATICCALL and DELEGATECALL.
///
/// The original calldata window `[argsOffset, argsOffset+argsLength)` is grown
/// backward by `selector + target word` so the execution manager receives
/// `ovm<OP>() | target | original calldata`. The two words below `argsOffset`
/// are stashed and restored. Value is dropped and gas is replaced by the
/// sentinel; the return window is forwarded untouched.
///
/// Requires `argsOffset >= 64`: below that the window base wraps around and
/// the stash load faults, halting the call exceptionally.
pub fn call_type_replacement(execution_manager: &Address, opcode: Opcode) -> Bytecode {
    let operands = match opcode {
        Opcode::CALL => 7,
        Opcode::STATICCALL | Opcode::DELEGATECALL => 6,
        other => panic!("{} is not a call-type opcode", other),
    };
    let stash_words = 1 + CALL_PREPENDED_WORDS;
    let prepend_bytes = SELECTOR_SIZE + WORD_SIZE * CALL_PREPENDED_WORDS;
    // Depth of the deepest operand once [base, stash..] sit on top, plus one.
    let reach = 1 + stash_words + operands;

    // base = argsOffset - 32 * stash_words; argsOffset is the fourth operand from the bottom
    let mut code = vec![
        push_usize(stash_words * WORD_SIZE),
        dup_op(operands - 2),
        op(Opcode::SUB),
    ];
    code.extend(push_memory_onto_stack(stash_words));

    // selector word at base, target address word at base + 32
    code.push(dup_op(1 + stash_words + 2));
    code.push(push_method_id(&method_name(opcode)));
    code.push(dup_op(3));
    code.extend(store_stack_in_memory(stash_words));
    code.push(op(Opcode::POP));

    // retLength, retOffset, argsLength + prepend, argsOffset - prepend
    code.push(dup_op(reach));
    code.push(dup_op(reach));
    code.push(dup_op(reach));
    code.push(push_usize(prepend_bytes));
    code.push(op(Opcode::ADD));
    code.push(dup_op(reach));
    code.push(push_usize(prepend_bytes));
    code.push(swap_op(1));
    code.push(op(Opcode::SUB));
    code.extend(call_execution_manager(execution_manager));

    // [success, base, m.., operands.., rest] -> [success, rest]
    code.push(swap_op(reach));
    code.push(op(Opcode::POP));
    code.extend(store_stack_in_memory(stash_words));
    code.push(op(Opcode::POP));
    code.extend(pop_n(operands - 1));
    code
}

/// EXTCODECOPY: `[addr, destOffset, offset, size, rest]` -> `[rest]`.
///
/// Calldata `ovmEXTCODECOPY() | addr | offset | size` is built in the four
/// words just past the destination window, which are stashed and restored;
/// the execution manager's return data lands directly in the destination.
pub fn extcodecopy_replacement(execution_manager: &Address) -> Bytecode {
    const STASH_WORDS: usize = 4;
    let args_length = SELECTOR_SIZE + 3 * WORD_SIZE;

    // base = destOffset + size
    let mut code = vec![dup_op(4), dup_op(3), op(Opcode::ADD)];
    code.extend(push_memory_onto_stack(STASH_WORDS));

    // [base, sel, addr, offset, size, base, ..]
    code.push(dup_op(9));
    code.push(dup_op(9));
    code.push(dup_op(8));
    code.push(push_method_id(&method_name(Opcode::EXTCODECOPY)));
    code.push(dup_op(5));
    code.extend(store_stack_in_memory(STASH_WORDS));
    code.push(op(Opcode::POP));

    // retLength = size, retOffset = destOffset, argsLength, argsOffset = base + 28
    code.push(dup_op(9));
    code.push(dup_op(8));
    code.push(push_usize(args_length));
    code.push(dup_op(4));
    code.push(push_usize(WORD_SIZE - SELECTOR_SIZE));
    code.push(op(Opcode::ADD));
    code.extend(call_execution_manager(execution_manager));

    code.push(op(Opcode::POP));
    code.extend(store_stack_in_memory(STASH_WORDS));
    code.push(op(Opcode::POP));
    code.extend(pop_n(4));
    code
}

/// CREATE (`[value, offset, length]`) and CREATE2 (`[value, offset, length, salt]`)
/// -> `[address, rest]`.
///
/// The init code window is grown backward by the selector, and for CREATE2 by
/// the salt word. The execution manager writes the new contract's address
/// into the first stashed word, from where it is read before the stash is
/// restored.
pub fn create_replacement(execution_manager: &Address, opcode: Opcode) -> Bytecode {
    let (operands, prepended_words) = match opcode {
        Opcode::CREATE => (3, 0),
        Opcode::CREATE2 => (4, 1),
        other => panic!("{} is not a create-type opcode", other),
    };
    let stash_words = 1 + prepended_words;
    let prepend_bytes = SELECTOR_SIZE + WORD_SIZE * prepended_words;
    // Depth of the length operand once [base, stash..] sit on top
    let length_depth = 1 + stash_words + 3;

    // base = offset - 32 * stash_words
    let mut code = vec![
        push_usize(stash_words * WORD_SIZE),
        dup_op(3),
        op(Opcode::SUB),
    ];
    code.extend(push_memory_onto_stack(stash_words));

    if prepended_words > 0 {
        // salt, the deepest operand
        code.push(dup_op(1 + stash_words + operands));
    }
    code.push(push_method_id(&method_name(opcode)));
    code.push(dup_op(1 + stash_words));
    code.extend(store_stack_in_memory(stash_words));
    code.push(op(Opcode::POP));

    // retLength = 32, retOffset = base, argsLength + prepend, offset - prepend
    code.push(push_usize(WORD_SIZE));
    code.push(dup_op(2));
    code.push(dup_op(length_depth + 2));
    code.push(push_usize(prepend_bytes));
    code.push(op(Opcode::ADD));
    code.push(dup_op(length_depth + 2));
    code.push(push_usize(prepend_bytes));
    code.push(swap_op(1));
    code.push(op(Opcode::SUB));
    code.extend(call_execution_manager(execution_manager));

    // [success, base, m.., operands.., rest] -> [address, rest]
    code.push(op(Opcode::POP));
    code.push(dup_op(1));
    code.push(op(Opcode::MLOAD));
    code.push(swap_op(1 + stash_words + operands));
    code.push(op(Opcode::POP));
    code.extend(store_stack_in_memory(stash_words));
    code.push(op(Opcode::POP));
    code.extend(pop_n(operands - 1));
    code
}

#[cfg(test)]
mod tests {
    use super::*;

    fn em() -> Address {
        Address::repeat_byte(0xe5)
    }

    fn count(code: &Bytecode, opcode: Opcode) -> usize {
        code.iter().filter(|insn| insn.opcode == opcode).count()
    }

    fn assert_single_call_to(code: &Bytecode, address: &Address) {
        assert_eq!(count(code, Opcode::CALL), 1);
        let pushes: Vec<_> = code
            .iter()
            .filter(|insn| insn.opcode == Opcode::PUSH20)
            .collect();
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].operand(), address.as_slice());
    }

    #[test]
    fn test_method_name() {
        assert_eq!(method_name(Opcode::SLOAD), "ovmSLOAD");
        assert_eq!(method_name(Opcode::CREATE2), "ovmCREATE2");
    }

    #[test]
    fn test_every_generator_makes_one_call() {
        let address = em();
        for n in 0..=2 {
            assert_single_call_to(
                &call_contract_with_stack_elements_and_return_word_to_stack(&address, "ovmX", n, 0),
                &address,
            );
            assert_single_call_to(
                &call_contract_with_stack_elements_and_return_word_to_memory(&address, "ovmX", n, 0),
                &address,
            );
        }
        for opcode in [Opcode::CALL, Opcode::STATICCALL, Opcode::DELEGATECALL] {
            assert_single_call_to(&call_type_replacement(&address, opcode), &address);
        }
        for opcode in [Opcode::CREATE, Opcode::CREATE2] {
            assert_single_call_to(&create_replacement(&address, opcode), &address);
        }
        assert_single_call_to(&extcodecopy_replacement(&address), &address);
    }

    #[test]
    fn test_selector_is_pushed() {
        let code = call_type_replacement(&em(), Opcode::DELEGATECALL);
        let selector = method_id("ovmDELEGATECALL");
        assert!(code
            .iter()
            .any(|insn| insn.opcode == Opcode::PUSH4 && insn.operand() == selector));
    }

    #[test]
    fn test_no_generator_reaches_past_sixteen() {
        let code = call_contract_with_stack_elements_and_return_word_to_stack(
            &em(),
            "ovmX",
            MAX_STATIC_STACK_ARGS,
            0,
        );
        assert!(code.iter().all(|insn| insn.validate().is_ok()));
    }

    #[test]
    #[should_panic]
    fn test_static_arg_limit() {
        call_contract_with_stack_elements_and_return_word_to_stack(&em(), "ovmX", 7, 0);
    }
}
