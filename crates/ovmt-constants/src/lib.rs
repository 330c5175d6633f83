// SPDX-License-Identifier: AGPL-3.0

/// Verbosity levels for the command line
pub const VERBOSITY_DEBUG: u8 = 1;
pub const VERBOSITY_TRACE: u8 = 2;

/// Common EVM constants
pub const WORD_SIZE: usize = 32;
pub const ADDRESS_SIZE: usize = 20;
pub const HASH_SIZE: usize = 32;
pub const SELECTOR_SIZE: usize = 4;

/// Largest operand a PUSH can carry
pub const MAX_PUSH_WIDTH: usize = 32;

/// Deepest stack slot reachable by DUP/SWAP
pub const MAX_STACK_REACH: usize = 16;

/// EVM stack limit
pub const MAX_STACK_SIZE: usize = 1024;

/// Maximum call depth for EVM execution
pub const MAX_CALL_DEPTH: usize = 1024;

/// Maximum memory size (2^20 bytes = 1MB)
pub const MAX_MEMORY_SIZE: usize = 1 << 20;

/// Gas forwarded to the execution manager by every generated CALL.
/// The execution manager meters the sandboxed call itself.
pub const BIG_ENOUGH_GAS_LIMIT: u64 = 100_000_000;

/// Execution manager methods are named after the opcode they stand in for
pub const EXECUTION_MANAGER_METHOD_PREFIX: &str = "ovm";

/// Placeholder accepted in replacement tables in place of the execution manager address
pub const EXECUTION_MANAGER_PLACEHOLDER: &str = "EXECUTION_MANAGER";

/// Address used when no execution manager is configured
pub const DEFAULT_EXECUTION_MANAGER_ADDRESS: &str = "0x00000000000000000000000000000000000000e5";

/// Base memory offset of the fixed scratch region used by the static call generators
pub const SCRATCH_MEMORY_INDEX: usize = 0;

/// Default config file name looked up under the project root
pub const DEFAULT_CONFIG_FILE: &str = "ovmt.toml";
