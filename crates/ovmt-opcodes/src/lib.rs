// SPDX-License-Identifier: AGPL-3.0

//! EVM opcode catalog and instruction codec

pub mod asm;
pub mod codec;
pub mod instruction;
pub mod opcode;

pub use asm::{format_bytecode, parse_instruction, parse_program};
pub use codec::{decode, disassemble, encode, jumpdests, Decoder, Disassembly, Located, Undecodable};
pub use instruction::{bytecode_len, Bytecode, Instruction};
pub use opcode::{Opcode, UnassignedByte, HALTING_OPCODES};
