// SPDX-License-Identifier: AGPL-3.0

//! Bytecode-to-bytecode transpiler that sandboxes EVM programs.
//!
//! Opcodes that observe or change chain state are rewritten into CALLs to an
//! execution manager contract; control flow is re-targeted through a jump
//! dispatch footer so the longer replacement code does not break jumps.

pub mod generators;
pub mod helpers;
pub mod initcode;
pub mod jumps;
pub mod replacer;
pub mod transpiler;
pub mod whitelist;

pub use replacer::{
    parse_address, parse_replacement_table, OpcodeReplacer, ReplacementInstruction,
    ReplacementOperand, ReplacementTable, MANDATORY_INTERCEPTS,
};
pub use transpiler::{TranspilationResult, Transpiler};
pub use whitelist::{OpcodeQuery, OpcodeWhitelist};

pub use ovmt_exceptions::{ConfigError, TranspilationError, TranspilationErrorKind};
