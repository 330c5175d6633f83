// SPDX-License-Identifier: AGPL-3.0

//! Conversion between raw bytes and instruction sequences.

use crate::instruction::{Bytecode, Instruction};
use crate::opcode::Opcode;
use ovmt_exceptions::{DecodeError, DecodeResult};

/// An instruction together with its byte offset in the decoded input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Located {
    pub index: usize,
    pub instruction: Instruction,
}

/// Bytes the decoder could not turn into a well-formed instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Undecodable {
    pub index: usize,
    /// The offending bytes: one unknown byte, or a PUSH and its partial operand
    pub bytes: Vec<u8>,
    pub error: DecodeError,
}

/// Streaming decoder. After an error it resumes at the next byte, so every
/// problem in the input is reported.
pub struct Decoder<'a> {
    bytes: &'a [u8],
    pos: usize,
    last_push: Option<(usize, Opcode)>,
}

impl<'a> Decoder<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            pos: 0,
            last_push: None,
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    fn unknown_byte(&self, index: usize, byte: u8) -> DecodeError {
        let mut message = format!("Cannot find opcode for: 0x{:02x}.", byte);
        if let Some((push_index, push)) = self.last_push {
            message.push_str(&format!(
                " Was {} at index {} provided exactly {} bytes as expected?",
                push,
                push_index,
                push.operand_width()
            ));
        }
        DecodeError::new(index, message)
    }
}

impl Iterator for Decoder<'_> {
    type Item = Result<Located, Undecodable>;

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.pos;
        let byte = *self.bytes.get(index)?;
        let opcode = Opcode::from_u8(byte);

        if !opcode.is_assigned() {
            self.pos += 1;
            let error = self.unknown_byte(index, byte);
            self.last_push = None;
            return Some(Err(Undecodable {
                index,
                bytes: vec![byte],
                error,
            }));
        }

        let width = opcode.operand_width();
        if width == 0 {
            self.pos += 1;
            self.last_push = None;
            return Some(Ok(Located {
                index,
                instruction: Instruction::op(opcode),
            }));
        }

        let end = index + 1 + width;
        if end > self.bytes.len() {
            let last = self.bytes.len() - 1;
            self.pos = self.bytes.len();
            let available = last - index;
            return Some(Err(Undecodable {
                index: last,
                bytes: self.bytes[index..].to_vec(),
                error: DecodeError::new(
                    last,
                    format!(
                        "Cannot find opcode for: {} at index {} expects {} bytes but only {} remain.",
                        opcode, index, width, available
                    ),
                ),
            }));
        }

        self.pos = end;
        self.last_push = Some((index, opcode));
        Some(Ok(Located {
            index,
            instruction: Instruction {
                opcode,
                consumed_bytes: Some(self.bytes[index + 1..end].to_vec()),
            },
        }))
    }
}

/// Every decodable instruction of an input plus every decode error, in byte order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Disassembly {
    pub instructions: Vec<Located>,
    pub errors: Vec<DecodeError>,
}

impl Disassembly {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Decode an input, collecting all errors instead of stopping at the first
pub fn disassemble(bytes: &[u8]) -> Disassembly {
    let mut disassembly = Disassembly::default();
    for step in Decoder::new(bytes) {
        match step {
            Ok(located) => disassembly.instructions.push(located),
            Err(undecodable) => disassembly.errors.push(undecodable.error),
        }
    }
    disassembly
}

/// Decode an input, failing on the first undecodable byte
pub fn decode(bytes: &[u8]) -> DecodeResult<Bytecode> {
    Decoder::new(bytes)
        .map(|step| {
            step.map(|located| located.instruction)
                .map_err(|undecodable| undecodable.error)
        })
        .collect()
}

/// Concatenate the encodings of `instructions`
pub fn encode(instructions: &[Instruction]) -> Vec<u8> {
    let mut out = Vec::with_capacity(crate::instruction::bytecode_len(instructions));
    for instruction in instructions {
        instruction.encode_into(&mut out);
    }
    out
}

/// Byte offsets that are valid jump destinations: JUMPDESTs outside PUSH data
pub fn jumpdests(bytes: &[u8]) -> Vec<usize> {
    let mut result = Vec::new();
    let mut pc = 0;
    while pc < bytes.len() {
        let opcode = Opcode::from_u8(bytes[pc]);
        if opcode == Opcode::JUMPDEST {
            result.push(pc);
        }
        pc += 1 + opcode.operand_width();
    }
    result
}
