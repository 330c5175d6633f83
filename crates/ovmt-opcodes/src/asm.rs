// SPDX-License-Identifier: AGPL-3.0

//! Human-readable assembly: one `MNEMONIC [0xOPERAND]` per instruction.

use crate::instruction::Instruction;
use crate::opcode::Opcode;
use ovmt_exceptions::{ConfigError, ConfigResult};

/// Render a listing with byte offsets, e.g. `0004: PUSH2 0x0102`
pub fn format_bytecode(instructions: &[Instruction]) -> String {
    let mut pc = 0;
    let mut out = String::new();
    for instruction in instructions {
        out.push_str(&format!("{:04x}: {}\n", pc, instruction));
        pc += instruction.len();
    }
    out
}

/// Parse a single instruction, e.g. `ADD` or `PUSH2 0x0102`.
///
/// PUSH operands must be written at their full width; `PUSH2 0x1` is rejected.
pub fn parse_instruction(text: &str) -> ConfigResult<Instruction> {
    let invalid = |reason: &str| ConfigError::InvalidInstruction {
        text: text.to_string(),
        reason: reason.to_string(),
    };

    let mut parts = text.split_whitespace();
    let name = parts.next().ok_or_else(|| invalid("empty instruction"))?;
    let opcode = Opcode::from_name(name).ok_or_else(|| ConfigError::UnknownOpcode(name.to_string()))?;
    let operand = parts.next();
    if parts.next().is_some() {
        return Err(invalid("too many operands"));
    }

    let consumed_bytes = match operand {
        None => None,
        Some(hex_text) => {
            let digits = hex_text
                .strip_prefix("0x")
                .or_else(|| hex_text.strip_prefix("0X"))
                .unwrap_or(hex_text);
            Some(hex::decode(digits).map_err(|e| invalid(&e.to_string()))?)
        }
    };
    Instruction::new(opcode, consumed_bytes)
}

/// Parse a whitespace/newline separated program, one instruction per line
pub fn parse_program(text: &str) -> ConfigResult<Vec<Instruction>> {
    text.lines()
        .map(|line| line.split("//").next().unwrap_or("").trim())
        .filter(|line| !line.is_empty())
        .map(parse_instruction)
        .collect()
}
