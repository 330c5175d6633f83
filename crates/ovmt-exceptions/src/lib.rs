// SPDX-License-Identifier: AGPL-3.0

//! Error types shared by the transpiler crates.
//!
//! Transpilation errors are data: they are accumulated, sorted by byte index
//! and handed back to the caller. Configuration errors are raised once, when a
//! replacer or whitelist is built, and never during transpilation.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Category of a per-instruction transpilation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TranspilationErrorKind {
    /// The byte does not decode to a catalog entry, or a PUSH ran past the end
    UnsupportedOpcode,
    /// The opcode decoded but is not permitted by the whitelist
    OpcodeNotWhitelisted,
    /// An instruction carries an operand whose width disagrees with its opcode
    InvalidBytesConsumed,
    /// Init code does not contain the deployed bytecode it was given
    MissingDeployedBytecode,
    /// A CODECOPY'd constant cannot be found in the transpiled code
    MissingConstant,
    /// A CODECOPY pattern reads past the end of the code, or a relocated
    /// offset does not fit its PUSH
    DetectedConstantOob,
}

impl TranspilationErrorKind {
    pub fn name(&self) -> &'static str {
        match self {
            TranspilationErrorKind::UnsupportedOpcode => "UNSUPPORTED_OPCODE",
            TranspilationErrorKind::OpcodeNotWhitelisted => "OPCODE_NOT_WHITELISTED",
            TranspilationErrorKind::InvalidBytesConsumed => "INVALID_BYTES_CONSUMED",
            TranspilationErrorKind::MissingDeployedBytecode => "MISSING_DEPLOYED_BYTECODE",
            TranspilationErrorKind::MissingConstant => "MISSING_CONSTANT",
            TranspilationErrorKind::DetectedConstantOob => "DETECTED_CONSTANT_OOB",
        }
    }
}

impl fmt::Display for TranspilationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One failure, located at the byte offset of the offending instruction
/// in the original input.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind} at index {index}: {message}")]
pub struct TranspilationError {
    pub index: usize,
    pub kind: TranspilationErrorKind,
    pub message: String,
}

impl TranspilationError {
    pub fn new(index: usize, kind: TranspilationErrorKind, message: impl Into<String>) -> Self {
        Self {
            index,
            kind,
            message: message.into(),
        }
    }

    pub fn unsupported_opcode(index: usize, message: impl Into<String>) -> Self {
        Self::new(index, TranspilationErrorKind::UnsupportedOpcode, message)
    }

    pub fn not_whitelisted(index: usize, opcode_name: &str) -> Self {
        Self::new(
            index,
            TranspilationErrorKind::OpcodeNotWhitelisted,
            format!("Opcode [{}] is not on the whitelist.", opcode_name),
        )
    }
}

/// Raised by the instruction codec when a byte sequence cannot be decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Cannot decode bytecode at index {index}: {message}")]
pub struct DecodeError {
    pub index: usize,
    pub message: String,
}

impl DecodeError {
    pub fn new(index: usize, message: impl Into<String>) -> Self {
        Self {
            index,
            message: message.into(),
        }
    }
}

impl From<DecodeError> for TranspilationError {
    fn from(err: DecodeError) -> Self {
        TranspilationError::unsupported_opcode(err.index, err.message)
    }
}

/// Raised while building a whitelist or replacer from configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid execution manager address: {0}")]
    InvalidAddress(String),

    #[error("{opcode} expects {expected} operand bytes, got {actual}")]
    InvalidBytesConsumed {
        opcode: String,
        expected: usize,
        actual: usize,
    },

    #[error("Unknown opcode name: {0}")]
    UnknownOpcode(String),

    #[error("Opcode {0} is handled internally and cannot be given a replacement")]
    ReservedOpcode(String),

    #[error("Replacement for {opcode} contains {contains}, which only the jump resolver may emit")]
    JumpInReplacement { opcode: String, contains: String },

    #[error("Invalid instruction '{text}': {reason}")]
    InvalidInstruction { text: String, reason: String },
}

impl ConfigError {
    /// The transpilation error category this configuration error corresponds to, if any.
    pub fn kind(&self) -> Option<TranspilationErrorKind> {
        match self {
            ConfigError::InvalidBytesConsumed { .. } => {
                Some(TranspilationErrorKind::InvalidBytesConsumed)
            }
            ConfigError::UnknownOpcode(_) => Some(TranspilationErrorKind::UnsupportedOpcode),
            _ => None,
        }
    }
}

/// Exceptional halts of the reference interpreter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VmError {
    #[error("Stack underflow at pc {0}")]
    StackUnderflow(usize),

    #[error("Stack overflow at pc {0}")]
    StackOverflow(usize),

    #[error("Invalid jump destination {dest} at pc {pc}")]
    InvalidJump { pc: usize, dest: String },

    #[error("Invalid opcode 0x{opcode:02x} at pc {pc}")]
    InvalidOpcode { pc: usize, opcode: u8 },

    #[error("Memory access out of bounds at pc {0}")]
    MemoryLimit(usize),

    #[error("State modification in static context at pc {0}")]
    StaticViolation(usize),

    #[error("Call depth exceeded")]
    CallDepth,

    #[error("Step limit exceeded")]
    StepLimit,

    #[error("Revert: 0x{0}")]
    Revert(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;
pub type DecodeResult<T> = Result<T, DecodeError>;
pub type VmResult<T> = Result<T, VmError>;
