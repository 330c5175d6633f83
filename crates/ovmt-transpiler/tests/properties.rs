// SPDX-License-Identifier: AGPL-3.0

//! Property tests: the codec round-trips, whitelist lookups agree however an
//! opcode is named, and rewritten code leaves memory, stack and control flow
//! as the original would.

use alloy_primitives::{Address, U256};
use ovmt_constants::DEFAULT_EXECUTION_MANAGER_ADDRESS;
use ovmt_opcodes::{bytecode_len, decode, disassemble, encode, Bytecode, Instruction, Opcode};
use ovmt_transpiler::generators::{
    call_contract_with_stack_elements_and_return_word_to_stack, call_type_replacement,
};
use ovmt_transpiler::helpers::{
    op, push_buffer, push_integer_op, push_memory_onto_stack, push_usize, store_stack_in_memory,
};
use ovmt_transpiler::{OpcodeReplacer, OpcodeWhitelist, ReplacementTable, Transpiler};
use ovmt_vm::Sandbox;
use proptest::prelude::*;

fn word_strategy() -> impl Strategy<Value = U256> {
    prop_oneof![
        Just(U256::ZERO),
        Just(U256::MAX),
        any::<u64>().prop_map(|v| U256::from(v)),
        any::<[u8; 32]>().prop_map(|bytes| U256::from_be_bytes(bytes)),
    ]
}

fn args_offset_strategy() -> impl Strategy<Value = usize> {
    prop_oneof![Just(64usize), Just(96usize), Just(0x80usize), 64usize..0x200]
}

fn store_words(code: &mut Bytecode, base: usize, words: &[U256]) {
    for (i, word) in words.iter().enumerate() {
        code.push(push_integer_op(*word));
        code.push(push_usize(base + 32 * i));
        code.push(op(Opcode::MSTORE));
    }
}

fn memory_word(memory: &[u8], offset: usize) -> U256 {
    U256::from_be_slice(&memory[offset..offset + 32])
}

fn instruction_strategy() -> impl Strategy<Value = Instruction> {
    prop::sample::select(Opcode::ALL).prop_flat_map(|opcode| {
        prop::collection::vec(any::<u8>(), opcode.operand_width()).prop_map(move |operand| {
            Instruction::new(opcode, (!operand.is_empty()).then_some(operand)).unwrap()
        })
    })
}

#[derive(Debug, Clone)]
enum Exit {
    FallThrough,
    Jump(usize),
    JumpIf(usize, bool),
    Stop,
}

/// A JUMPDEST, some straight-line code, and a way out. Jumps only go forward,
/// so every run terminates and visits each block at most once.
#[derive(Debug, Clone)]
struct Block {
    body: Vec<u8>,
    exit: Exit,
}

fn block_strategy(index: usize, count: usize) -> impl Strategy<Value = Block> {
    // PUSH2 0x5b5b, ADDRESS (rewritten into an execution manager call), PUSH1 7
    let body = prop::collection::vec(0usize..3, 0..3).prop_map(|picks| {
        picks
            .into_iter()
            .flat_map(|pick| match pick {
                0 => vec![0x61, 0x5b, 0x5b],
                1 => vec![0x30],
                _ => vec![0x60, 0x07],
            })
            .collect::<Vec<u8>>()
    });
    let exit = if index + 1 == count {
        Just(Exit::Stop).boxed()
    } else {
        let target = index + 1..count;
        prop_oneof![
            Just(Exit::FallThrough),
            Just(Exit::Stop),
            target.clone().prop_map(Exit::Jump),
            (target, any::<bool>()).prop_map(|(t, taken)| Exit::JumpIf(t, taken)),
        ]
        .boxed()
    };
    (body, exit).prop_map(|(body, exit)| Block { body, exit })
}

fn blocks_strategy() -> impl Strategy<Value = Vec<Block>> {
    (2usize..8).prop_flat_map(|count| {
        (0..count)
            .map(|index| block_strategy(index, count))
            .collect::<Vec<_>>()
    })
}

fn block_code(block: &Block, offsets: &[usize]) -> Vec<u8> {
    let target = |t: usize| {
        let [hi, lo] = (offsets[t] as u16).to_be_bytes();
        [0x61, hi, lo]
    };
    let mut code = vec![0x5b];
    code.extend_from_slice(&block.body);
    match block.exit {
        Exit::FallThrough => {}
        Exit::Jump(t) => {
            code.extend(target(t));
            code.push(0x56);
        }
        Exit::JumpIf(t, taken) => {
            code.extend([0x60, taken as u8]);
            code.extend(target(t));
            code.push(0x57);
        }
        Exit::Stop => code.push(0x00),
    }
    code
}

fn program(blocks: &[Block]) -> Vec<u8> {
    let unresolved = vec![0; blocks.len()];
    let mut offsets = Vec::new();
    let mut at = 0;
    for block in blocks {
        offsets.push(at);
        at += block_code(block, &unresolved).len();
    }
    blocks.iter().flat_map(|block| block_code(block, &offsets)).collect()
}

/// Offsets of the first `count` JUMPDEST instructions
fn jumpdest_offsets(code: &[u8], count: usize) -> Vec<usize> {
    disassemble(code)
        .instructions
        .into_iter()
        .filter(|located| located.instruction.opcode == Opcode::JUMPDEST)
        .map(|located| located.index)
        .take(count)
        .collect()
}

proptest! {
    #[test]
    fn prop_encode_then_decode_is_identity(
        instructions in prop::collection::vec(instruction_strategy(), 0..64),
    ) {
        let bytes = encode(&instructions);
        prop_assert_eq!(bytes.len(), bytecode_len(&instructions));
        prop_assert_eq!(decode(&bytes).unwrap(), instructions);
    }

    #[test]
    fn prop_decodable_bytes_encode_back(bytes in prop::collection::vec(any::<u8>(), 0..128)) {
        if let Ok(instructions) = decode(&bytes) {
            prop_assert_eq!(encode(&instructions), bytes);
        }
    }

    #[test]
    fn prop_whitelist_lookups_agree(
        allowed in prop::sample::subsequence(Opcode::ALL.to_vec(), 0..=Opcode::ALL.len()),
    ) {
        let whitelist = OpcodeWhitelist::new(allowed.iter().copied());
        for code in 0..=255u8 {
            let opcode = Opcode::from_u8(code);
            let expected = opcode.is_assigned() && allowed.contains(&opcode);
            prop_assert_eq!(whitelist.is_whitelisted(&opcode), expected);
            prop_assert_eq!(whitelist.is_whitelisted(&code), expected);
            prop_assert_eq!(whitelist.is_whitelisted(&[code][..]), expected);
            prop_assert_eq!(whitelist.is_whitelisted(opcode.name()), expected);
        }
        prop_assert!(!whitelist.is_whitelisted(&[0x01, 0x02][..]));
        prop_assert!(!whitelist.is_whitelisted(&[0u8; 0][..]));
    }

    #[test]
    fn prop_memory_round_trips_through_stack(
        words in prop::collection::vec(word_strategy(), 0..24),
        base in prop_oneof![Just(0usize), 1usize..0x100],
        marker in word_strategy(),
    ) {
        let n = words.len();
        let mut code = Bytecode::new();
        store_words(&mut code, base, &words);
        code.push(push_integer_op(marker));
        code.push(push_usize(base));
        code.extend(push_memory_onto_stack(n));
        // clobber the region while its words sit on the stack
        for i in 0..n {
            code.push(push_usize(0));
            code.push(push_usize(base + 32 * i));
            code.push(op(Opcode::MSTORE));
        }
        code.extend(store_stack_in_memory(n));
        code.push(op(Opcode::POP));
        code.push(op(Opcode::STOP));

        let result = Sandbox::new(&encode(&code)).run(&[]);
        prop_assert!(result.success, "{:?}", result.error);
        prop_assert_eq!(result.stack, vec![marker]);
        for (i, word) in words.iter().enumerate() {
            prop_assert_eq!(memory_word(&result.memory, base + 32 * i), *word);
        }
    }

    #[test]
    fn prop_rewritten_jumps_visit_the_same_blocks(blocks in blocks_strategy()) {
        let original = program(&blocks);
        let replacer =
            OpcodeReplacer::new(DEFAULT_EXECUTION_MANAGER_ADDRESS, ReplacementTable::new()).unwrap();
        let transpiler = Transpiler::new(OpcodeWhitelist::all_assigned(), replacer);
        let result = transpiler.transpile(&original);
        prop_assert!(result.is_success(), "{:?}", result.errors());
        let rewritten = result.bytecode().unwrap().to_vec();

        let before = jumpdest_offsets(&original, blocks.len());
        let after = jumpdest_offsets(&rewritten, blocks.len());
        prop_assert_eq!(before.len(), blocks.len());
        prop_assert_eq!(after.len(), blocks.len());

        let mut native = Sandbox::new(&original);
        let mut sandbox = Sandbox::new(&rewritten);
        let mut visited = Vec::new();
        for (block, (&pc, &rewritten_pc)) in before.iter().zip(&after).enumerate() {
            // JUMPDEST becomes JUMPDEST POP; compare once the POP has run
            let native_step = native.step_context_before_pc(&[], pc + 1, false);
            let sandboxed_step = sandbox.step_context_before_pc(&[], rewritten_pc + 2, true);
            prop_assert_eq!(native_step.is_some(), sandboxed_step.is_some(), "block {}", block);
            if let (Some(native_step), Some(sandboxed_step)) = (native_step, sandboxed_step) {
                prop_assert_eq!(native_step.stack, sandboxed_step.stack, "block {}", block);
                visited.push(block);
            }
        }
        prop_assert_eq!(visited.first(), Some(&0));
    }

    #[test]
    fn prop_push_integer_is_minimal(value in word_strategy()) {
        let insn = push_integer_op(value);
        let significant = value.bit_len().div_ceil(8);
        prop_assert_eq!(insn.opcode.operand_width(), significant.max(1));

        let decoded = decode(&encode(&[insn])).unwrap();
        prop_assert_eq!(U256::from_be_slice(decoded[0].operand()), value);
    }

    #[test]
    fn prop_static_call_restores_scratch_memory(
        scratch in prop::collection::vec(word_strategy(), 3),
        marker in word_strategy(),
        key in word_strategy(),
        stored in word_strategy(),
    ) {
        let sandbox = Sandbox::new(&[]);
        let em = sandbox.execution_manager;

        let mut code = Bytecode::new();
        store_words(&mut code, 0, &scratch);
        code.push(push_integer_op(marker));
        code.push(push_integer_op(key));
        code.extend(call_contract_with_stack_elements_and_return_word_to_stack(
            &em, "ovmSLOAD", 1, 0,
        ));
        code.push(op(Opcode::STOP));

        let mut sandbox = Sandbox::new(&encode(&code));
        sandbox.set_storage(key, stored);
        let (result, calls) = sandbox.run_sandboxed(&[]);

        prop_assert!(result.success);
        prop_assert_eq!(calls, vec!["ovmSLOAD".to_string()]);
        prop_assert_eq!(result.stack, vec![marker, stored]);
        for (i, word) in scratch.iter().enumerate() {
            prop_assert_eq!(memory_word(&result.memory, 32 * i), *word);
        }
    }

    #[test]
    fn prop_call_restores_grown_window(
        below in prop::collection::vec(word_strategy(), 2),
        marker in word_strategy(),
        args_offset in args_offset_strategy(),
        args_length in 0usize..64,
    ) {
        let target = Address::repeat_byte(0x44);
        // CALLDATASIZE, PUSH1 0, MSTORE, PUSH1 32, PUSH1 0, RETURN
        let echo = vec![0x36, 0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xf3];

        let mut prelude = Bytecode::new();
        store_words(&mut prelude, args_offset - 64, &below);
        prelude.push(push_integer_op(marker));
        prelude.push(push_usize(32));
        prelude.push(push_usize(args_offset));
        prelude.push(push_usize(args_length));
        prelude.push(push_usize(args_offset));
        prelude.push(push_usize(0));
        prelude.push(push_buffer(target.as_slice()));
        prelude.push(push_usize(0xffff));

        let epilogue = vec![
            push_usize(args_offset + 64),
            push_usize(0),
            op(Opcode::RETURN),
        ];

        let mut original = prelude.clone();
        original.push(op(Opcode::CALL));
        original.extend(epilogue.clone());

        let mut native = Sandbox::new(&encode(&original));
        native.deploy(target, echo.clone());
        let native = native.run(&[]);

        let em = Sandbox::new(&[]).execution_manager;
        let mut rewritten = prelude;
        rewritten.extend(call_type_replacement(&em, Opcode::CALL));
        rewritten.extend(epilogue);

        let mut sandbox = Sandbox::new(&encode(&rewritten));
        sandbox.deploy(target, echo);
        let (sandboxed, _) = sandbox.run_sandboxed(&[]);

        prop_assert!(native.success);
        prop_assert_eq!(&native.return_data, &sandboxed.return_data);
        prop_assert_eq!(&native.stack, &sandboxed.stack);
        prop_assert_eq!(
            memory_word(&sandboxed.return_data, args_offset),
            U256::from(args_length)
        );
    }
}
