// SPDX-License-Identifier: AGPL-3.0

use crate::opcode::Opcode;
use ovmt_exceptions::{ConfigError, ConfigResult};
use std::fmt;

/// A decoded instruction: an opcode plus the operand bytes it consumes.
///
/// `consumed_bytes` is `None` for zero-operand opcodes and otherwise holds
/// exactly `opcode.operand_width()` bytes. The constructors below uphold
/// this; [`Instruction::validate`] checks values built field by field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Instruction {
    pub opcode: Opcode,
    pub consumed_bytes: Option<Vec<u8>>,
}

/// An ordered instruction sequence
pub type Bytecode = Vec<Instruction>;

impl Instruction {
    /// Build an instruction, rejecting operands whose width disagrees with the opcode
    pub fn new(opcode: Opcode, consumed_bytes: Option<Vec<u8>>) -> ConfigResult<Self> {
        let instruction = Self {
            opcode,
            consumed_bytes,
        };
        instruction.validate()?;
        Ok(instruction)
    }

    /// A zero-operand instruction.
    ///
    /// Panics if `opcode` is a PUSH; generated code always goes through
    /// [`Instruction::push_bytes`] for those.
    pub fn op(opcode: Opcode) -> Self {
        assert!(
            opcode.operand_width() == 0,
            "{} needs an operand",
            opcode.name()
        );
        Self {
            opcode,
            consumed_bytes: None,
        }
    }

    /// A PUSH of exactly `bytes.len()` bytes. Panics outside 1..=32 bytes.
    pub fn push_bytes(bytes: &[u8]) -> Self {
        let opcode = match Opcode::push(bytes.len()) {
            Some(opcode) => opcode,
            None => panic!("cannot push {} bytes", bytes.len()),
        };
        Self {
            opcode,
            consumed_bytes: Some(bytes.to_vec()),
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let expected = self.opcode.operand_width();
        let actual = self.consumed_bytes.as_ref().map(Vec::len);
        match (expected, actual) {
            (0, None) => Ok(()),
            (width, Some(len)) if width > 0 && width == len => Ok(()),
            (width, actual) => Err(ConfigError::InvalidBytesConsumed {
                opcode: self.opcode.to_string(),
                expected: width,
                actual: actual.unwrap_or(0),
            }),
        }
    }

    /// Operand bytes, empty for zero-operand opcodes
    pub fn operand(&self) -> &[u8] {
        self.consumed_bytes.as_deref().unwrap_or(&[])
    }

    /// Encoded length in bytes
    pub fn len(&self) -> usize {
        1 + self.operand().len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.push(self.opcode.code());
        out.extend_from_slice(self.operand());
    }
}

impl From<Opcode> for Instruction {
    fn from(opcode: Opcode) -> Self {
        Instruction::op(opcode)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.consumed_bytes {
            Some(bytes) => write!(f, "{} 0x{}", self.opcode, hex::encode(bytes)),
            None => write!(f, "{}", self.opcode),
        }
    }
}

/// Total encoded length of an instruction sequence
pub fn bytecode_len(bytecode: &[Instruction]) -> usize {
    bytecode.iter().map(Instruction::len).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_accepts_matching_width() {
        let insn = Instruction::new(Opcode::PUSH2, Some(vec![0x01, 0x02])).unwrap();
        assert_eq!(insn.len(), 3);
        assert_eq!(insn.to_string(), "PUSH2 0x0102");
    }

    #[test]
    fn test_new_rejects_mismatched_width() {
        let err = Instruction::new(Opcode::PUSH2, Some(vec![0x01])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidBytesConsumed {
                opcode: "PUSH2".to_string(),
                expected: 2,
                actual: 1
            }
        );
        assert!(Instruction::new(Opcode::PUSH1, None).is_err());
        assert!(Instruction::new(Opcode::ADD, Some(vec![0x00])).is_err());
        assert!(Instruction::new(Opcode::ADD, Some(vec![])).is_err());
    }

    #[test]
    fn test_push_bytes_picks_width() {
        let insn = Instruction::push_bytes(&[0xaa; 20]);
        assert_eq!(insn.opcode, Opcode::PUSH20);
        assert!(insn.validate().is_ok());
    }

    #[test]
    #[should_panic]
    fn test_op_rejects_push() {
        Instruction::op(Opcode::PUSH1);
    }

    #[test]
    fn test_bytecode_len() {
        let code = vec![
            Instruction::push_bytes(&[0x01]),
            Instruction::op(Opcode::DUP1),
            Instruction::op(Opcode::ADD),
        ];
        assert_eq!(bytecode_len(&code), 4);
    }
}
