// SPDX-License-Identifier: AGPL-3.0

//! Maps each instruction to the code that stands in for it.

use crate::generators::{
    call_contract_with_stack_elements_and_return_word_to_stack, call_type_replacement,
    create_replacement, extcodecopy_replacement, method_name,
};
use crate::helpers::op;
use alloy_primitives::Address;
use ovmt_constants::{ADDRESS_SIZE, EXECUTION_MANAGER_PLACEHOLDER, SCRATCH_MEMORY_INDEX};
use ovmt_exceptions::{ConfigError, ConfigResult};
use ovmt_opcodes::{parse_instruction, Bytecode, Instruction, Opcode};
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::debug;

/// Opcodes that must always go through the execution manager
pub const MANDATORY_INTERCEPTS: &[Opcode] = &[
    Opcode::ADDRESS,
    Opcode::CALLER,
    Opcode::CALL,
    Opcode::CREATE,
    Opcode::CREATE2,
    Opcode::DELEGATECALL,
    Opcode::EXTCODECOPY,
    Opcode::EXTCODEHASH,
    Opcode::EXTCODESIZE,
    Opcode::ORIGIN,
    Opcode::SLOAD,
    Opcode::SSTORE,
    Opcode::STATICCALL,
    Opcode::TIMESTAMP,
];

/// Opcodes rewritten by the jump resolver
const JUMP_OPCODES: &[Opcode] = &[Opcode::JUMP, Opcode::JUMPI, Opcode::JUMPDEST];

/// Operand of an entry in a replacement table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplacementOperand {
    Bytes(Vec<u8>),
    /// Filled in with the configured execution manager address; only valid on PUSH20
    ExecutionManagerAddress,
}

/// One instruction of a configured replacement sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplacementInstruction {
    pub opcode: Opcode,
    pub operand: Option<ReplacementOperand>,
}

impl ReplacementInstruction {
    fn resolve(&self, execution_manager: &Address) -> ConfigResult<Instruction> {
        let consumed_bytes = match &self.operand {
            None => None,
            Some(ReplacementOperand::Bytes(bytes)) => Some(bytes.clone()),
            Some(ReplacementOperand::ExecutionManagerAddress) => {
                Some(execution_manager.as_slice().to_vec())
            }
        };
        Instruction::new(self.opcode, consumed_bytes)
    }
}

impl From<Instruction> for ReplacementInstruction {
    fn from(instruction: Instruction) -> Self {
        Self {
            opcode: instruction.opcode,
            operand: instruction.consumed_bytes.map(ReplacementOperand::Bytes),
        }
    }
}

impl FromStr for ReplacementInstruction {
    type Err = ConfigError;

    /// `PUSH20 EXECUTION_MANAGER`, or any instruction [`parse_instruction`] accepts
    fn from_str(text: &str) -> ConfigResult<Self> {
        let mut parts = text.split_whitespace();
        if let (Some(name), Some(EXECUTION_MANAGER_PLACEHOLDER), None) =
            (parts.next(), parts.next(), parts.next())
        {
            let opcode =
                Opcode::from_name(name).ok_or_else(|| ConfigError::UnknownOpcode(name.to_string()))?;
            return Ok(Self {
                opcode,
                operand: Some(ReplacementOperand::ExecutionManagerAddress),
            });
        }
        parse_instruction(text).map(Self::from)
    }
}

/// Discretionary replacements, keyed by the opcode they replace
pub type ReplacementTable = BTreeMap<Opcode, Vec<ReplacementInstruction>>;

/// Parse a table of `mnemonic -> [instruction text]` entries
pub fn parse_replacement_table<K, V, S>(entries: impl IntoIterator<Item = (K, V)>) -> ConfigResult<ReplacementTable>
where
    K: AsRef<str>,
    V: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut table = ReplacementTable::new();
    for (name, lines) in entries {
        let name = name.as_ref();
        let opcode =
            Opcode::from_name(name).ok_or_else(|| ConfigError::UnknownOpcode(name.to_string()))?;
        let sequence = lines
            .into_iter()
            .map(|line| line.as_ref().parse())
            .collect::<ConfigResult<Vec<_>>>()?;
        table.insert(opcode, sequence);
    }
    Ok(table)
}

/// Parse a `0x`-prefixed, 20-byte hex address
pub fn parse_address(text: &str) -> ConfigResult<Address> {
    let invalid = || ConfigError::InvalidAddress(text.to_string());
    let digits = text.strip_prefix("0x").ok_or_else(invalid)?;
    let bytes = hex::decode(digits).map_err(|_| invalid())?;
    if bytes.len() != ADDRESS_SIZE {
        return Err(invalid());
    }
    Ok(Address::from_slice(&bytes))
}

#[derive(Debug, Clone)]
pub struct OpcodeReplacer {
    execution_manager: Address,
    replacements: BTreeMap<Opcode, Bytecode>,
}

impl OpcodeReplacer {
    /// Build a replacer from an address string and a discretionary table.
    ///
    /// Fails on a malformed address, on table entries whose operand width does
    /// not match their opcode, and on entries that replace or contain the jump
    /// opcodes owned by the jump resolver. Entries for intercepted opcodes are
    /// ignored: the intercept always wins.
    pub fn new(execution_manager: &str, table: ReplacementTable) -> ConfigResult<Self> {
        Self::with_address(parse_address(execution_manager)?, table)
    }

    pub fn with_address(execution_manager: Address, table: ReplacementTable) -> ConfigResult<Self> {
        let mut replacements = BTreeMap::new();

        for (opcode, sequence) in table {
            if JUMP_OPCODES.contains(&opcode) {
                return Err(ConfigError::ReservedOpcode(opcode.to_string()));
            }
            if let Some(entry) = sequence.iter().find(|entry| JUMP_OPCODES.contains(&entry.opcode)) {
                return Err(ConfigError::JumpInReplacement {
                    opcode: opcode.to_string(),
                    contains: entry.opcode.to_string(),
                });
            }
            if MANDATORY_INTERCEPTS.contains(&opcode) {
                debug!("ignoring configured replacement for intercepted {}", opcode);
                continue;
            }
            let bytecode = sequence
                .iter()
                .map(|entry| entry.resolve(&execution_manager))
                .collect::<ConfigResult<Bytecode>>()?;
            replacements.insert(opcode, bytecode);
        }

        for &opcode in MANDATORY_INTERCEPTS {
            replacements.insert(opcode, mandatory_replacement(&execution_manager, opcode));
        }

        Ok(Self {
            execution_manager,
            replacements,
        })
    }

    pub fn execution_manager_address(&self) -> Address {
        self.execution_manager
    }

    /// Whether `opcode` is always routed through the execution manager
    pub fn should_substitute(&self, opcode: Opcode) -> bool {
        MANDATORY_INTERCEPTS.contains(&opcode)
    }

    /// Whether `opcode` is rewritten, by an intercept or a configured entry
    pub fn has_replacement(&self, opcode: Opcode) -> bool {
        self.replacements.contains_key(&opcode)
    }

    /// The code that stands in for `instruction`; the instruction itself when
    /// its opcode is not substituted.
    pub fn get_replacement(&self, instruction: &Instruction) -> Bytecode {
        match self.replacements.get(&instruction.opcode) {
            Some(replacement) => {
                debug!(
                    "replacing {} with {} instructions",
                    instruction.opcode,
                    replacement.len()
                );
                replacement.clone()
            }
            None => vec![instruction.clone()],
        }
    }
}

fn mandatory_replacement(execution_manager: &Address, opcode: Opcode) -> Bytecode {
    let to_stack = |args| {
        call_contract_with_stack_elements_and_return_word_to_stack(
            execution_manager,
            &method_name(opcode),
            args,
            SCRATCH_MEMORY_INDEX,
        )
    };
    match opcode {
        Opcode::ADDRESS | Opcode::CALLER | Opcode::ORIGIN | Opcode::TIMESTAMP => to_stack(0),
        Opcode::SLOAD | Opcode::EXTCODESIZE | Opcode::EXTCODEHASH => to_stack(1),
        Opcode::SSTORE => {
            let mut code = to_stack(2);
            code.push(op(Opcode::POP));
            code
        }
        Opcode::CALL | Opcode::STATICCALL | Opcode::DELEGATECALL => {
            call_type_replacement(execution_manager, opcode)
        }
        Opcode::EXTCODECOPY => extcodecopy_replacement(execution_manager),
        Opcode::CREATE | Opcode::CREATE2 => create_replacement(execution_manager, opcode),
        other => panic!("{} has no built-in replacement", other),
    }
}
