// SPDX-License-Identifier: AGPL-3.0

//! The closed opcode catalog.
//!
//! Every byte value maps to exactly one [`Opcode`]: either a named catalog
//! entry or [`Opcode::Unassigned`]. Identity is the numeric code, so
//! `Opcode::from_u8(code).code() == code` for every byte.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

macro_rules! define_opcodes {
    ($($name:ident = $code:literal),* $(,)?) => {
        /// An EVM opcode.
        #[allow(non_camel_case_types, clippy::upper_case_acronyms)]
        #[derive(Debug, Clone, Copy)]
        pub enum Opcode {
            $($name,)*
            /// A byte with no catalog entry
            Unassigned(UnassignedByte),
        }

        impl Opcode {
            /// Every named catalog entry, in ascending code order
            pub const ALL: &'static [Opcode] = &[$(Opcode::$name),*];

            pub const fn from_u8(code: u8) -> Opcode {
                match code {
                    $($code => Opcode::$name,)*
                    other => Opcode::Unassigned(UnassignedByte(other)),
                }
            }

            pub const fn code(self) -> u8 {
                match self {
                    $(Opcode::$name => $code,)*
                    Opcode::Unassigned(byte) => byte.0,
                }
            }

            /// Mnemonic of a catalog entry
            pub const fn mnemonic(self) -> Option<&'static str> {
                match self {
                    $(Opcode::$name => Some(stringify!($name)),)*
                    Opcode::Unassigned(_) => None,
                }
            }
        }
    };
}

/// A byte value that has no catalog entry.
///
/// Only [`Opcode::from_u8`] can build one, so an `Opcode::Unassigned` never
/// aliases a named opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnassignedByte(u8);

impl UnassignedByte {
    pub const fn get(self) -> u8 {
        self.0
    }
}

define_opcodes! {
    STOP = 0x00, ADD = 0x01, MUL = 0x02, SUB = 0x03, DIV = 0x04, SDIV = 0x05,
    MOD = 0x06, SMOD = 0x07, ADDMOD = 0x08, MULMOD = 0x09, EXP = 0x0a, SIGNEXTEND = 0x0b,

    LT = 0x10, GT = 0x11, SLT = 0x12, SGT = 0x13, EQ = 0x14, ISZERO = 0x15,
    AND = 0x16, OR = 0x17, XOR = 0x18, NOT = 0x19, BYTE = 0x1a,
    SHL = 0x1b, SHR = 0x1c, SAR = 0x1d,

    SHA3 = 0x20,

    ADDRESS = 0x30, BALANCE = 0x31, ORIGIN = 0x32, CALLER = 0x33, CALLVALUE = 0x34,
    CALLDATALOAD = 0x35, CALLDATASIZE = 0x36, CALLDATACOPY = 0x37, CODESIZE = 0x38,
    CODECOPY = 0x39, GASPRICE = 0x3a, EXTCODESIZE = 0x3b, EXTCODECOPY = 0x3c,
    RETURNDATASIZE = 0x3d, RETURNDATACOPY = 0x3e, EXTCODEHASH = 0x3f,

    BLOCKHASH = 0x40, COINBASE = 0x41, TIMESTAMP = 0x42, NUMBER = 0x43,
    DIFFICULTY = 0x44, GASLIMIT = 0x45,

    POP = 0x50, MLOAD = 0x51, MSTORE = 0x52, MSTORE8 = 0x53, SLOAD = 0x54, SSTORE = 0x55,
    JUMP = 0x56, JUMPI = 0x57, PC = 0x58, MSIZE = 0x59, GAS = 0x5a, JUMPDEST = 0x5b,

    PUSH1 = 0x60, PUSH2 = 0x61, PUSH3 = 0x62, PUSH4 = 0x63, PUSH5 = 0x64, PUSH6 = 0x65,
    PUSH7 = 0x66, PUSH8 = 0x67, PUSH9 = 0x68, PUSH10 = 0x69, PUSH11 = 0x6a, PUSH12 = 0x6b,
    PUSH13 = 0x6c, PUSH14 = 0x6d, PUSH15 = 0x6e, PUSH16 = 0x6f, PUSH17 = 0x70, PUSH18 = 0x71,
    PUSH19 = 0x72, PUSH20 = 0x73, PUSH21 = 0x74, PUSH22 = 0x75, PUSH23 = 0x76, PUSH24 = 0x77,
    PUSH25 = 0x78, PUSH26 = 0x79, PUSH27 = 0x7a, PUSH28 = 0x7b, PUSH29 = 0x7c, PUSH30 = 0x7d,
    PUSH31 = 0x7e, PUSH32 = 0x7f,

    DUP1 = 0x80, DUP2 = 0x81, DUP3 = 0x82, DUP4 = 0x83, DUP5 = 0x84, DUP6 = 0x85,
    DUP7 = 0x86, DUP8 = 0x87, DUP9 = 0x88, DUP10 = 0x89, DUP11 = 0x8a, DUP12 = 0x8b,
    DUP13 = 0x8c, DUP14 = 0x8d, DUP15 = 0x8e, DUP16 = 0x8f,

    SWAP1 = 0x90, SWAP2 = 0x91, SWAP3 = 0x92, SWAP4 = 0x93, SWAP5 = 0x94, SWAP6 = 0x95,
    SWAP7 = 0x96, SWAP8 = 0x97, SWAP9 = 0x98, SWAP10 = 0x99, SWAP11 = 0x9a, SWAP12 = 0x9b,
    SWAP13 = 0x9c, SWAP14 = 0x9d, SWAP15 = 0x9e, SWAP16 = 0x9f,

    LOG0 = 0xa0, LOG1 = 0xa1, LOG2 = 0xa2, LOG3 = 0xa3, LOG4 = 0xa4,

    CREATE = 0xf0, CALL = 0xf1, CALLCODE = 0xf2, RETURN = 0xf3, DELEGATECALL = 0xf4,
    CREATE2 = 0xf5, STATICCALL = 0xfa, REVERT = 0xfd, INVALID = 0xfe, SELFDESTRUCT = 0xff,
}

/// Opcodes after which execution never falls through to the next instruction
pub const HALTING_OPCODES: &[Opcode] = &[
    Opcode::STOP,
    Opcode::JUMP,
    Opcode::RETURN,
    Opcode::REVERT,
    Opcode::INVALID,
    Opcode::SELFDESTRUCT,
];

impl Opcode {
    /// Look an opcode up by mnemonic (case-insensitive). `KECCAK256` is
    /// accepted for `SHA3`.
    pub fn from_name(name: &str) -> Option<Opcode> {
        let upper = name.trim().to_ascii_uppercase();
        match upper.as_str() {
            "KECCAK256" => Some(Opcode::SHA3),
            other => Opcode::ALL
                .iter()
                .copied()
                .find(|opcode| opcode.mnemonic() == Some(other)),
        }
    }

    pub const fn is_assigned(self) -> bool {
        self.mnemonic().is_some()
    }

    /// Number of operand bytes that follow this opcode in a program
    pub const fn operand_width(self) -> usize {
        let code = self.code();
        if code >= 0x60 && code <= 0x7f {
            (code - 0x5f) as usize
        } else {
            0
        }
    }

    pub const fn is_push(self) -> bool {
        self.operand_width() > 0
    }

    /// PUSH opcode carrying exactly `width` operand bytes
    pub const fn push(width: usize) -> Option<Opcode> {
        if width >= 1 && width <= 32 {
            Some(Opcode::from_u8(0x5f + width as u8))
        } else {
            None
        }
    }

    /// DUPn, for n in 1..=16
    pub const fn dup(n: usize) -> Option<Opcode> {
        if n >= 1 && n <= 16 {
            Some(Opcode::from_u8(0x7f + n as u8))
        } else {
            None
        }
    }

    /// SWAPn, for n in 1..=16
    pub const fn swap(n: usize) -> Option<Opcode> {
        if n >= 1 && n <= 16 {
            Some(Opcode::from_u8(0x8f + n as u8))
        } else {
            None
        }
    }

    pub fn is_halting(self) -> bool {
        HALTING_OPCODES.contains(&self)
    }

    pub fn is_jump(self) -> bool {
        matches!(self, Opcode::JUMP | Opcode::JUMPI)
    }

    /// Name used in diagnostics; unassigned bytes render as `UNASSIGNED`
    pub fn name(self) -> &'static str {
        self.mnemonic().unwrap_or("UNASSIGNED")
    }
}

impl PartialEq for Opcode {
    fn eq(&self, other: &Self) -> bool {
        self.code() == other.code()
    }
}

impl Eq for Opcode {}

impl Hash for Opcode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.code().hash(state);
    }
}

impl PartialOrd for Opcode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Opcode {
    fn cmp(&self, other: &Self) -> Ordering {
        self.code().cmp(&other.code())
    }
}

impl From<u8> for Opcode {
    fn from(code: u8) -> Self {
        Opcode::from_u8(code)
    }
}

impl From<Opcode> for u8 {
    fn from(opcode: Opcode) -> Self {
        opcode.code()
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mnemonic() {
            Some(name) => f.write_str(name),
            None => write!(f, "UNASSIGNED(0x{:02x})", self.code()),
        }
    }
}

impl Serialize for Opcode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Opcode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Opcode::from_name(&name)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown opcode {}", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_byte_maps_to_one_entry() {
        for code in 0..=255u8 {
            let opcode = Opcode::from_u8(code);
            assert_eq!(opcode.code(), code);
        }
    }

    #[test]
    fn test_catalog_size() {
        // 12 + 14 + 1 + 16 + 6 + 12 + 32 + 16 + 16 + 5 + 10
        assert_eq!(Opcode::ALL.len(), 140);
        assert!(Opcode::ALL.windows(2).all(|w| w[0].code() < w[1].code()));
    }

    #[test]
    fn test_unassigned_bytes() {
        for code in [0x0c, 0x1e, 0x21, 0x46, 0x5c, 0x5d, 0x5f, 0xa5, 0xef, 0xfb] {
            let opcode = Opcode::from_u8(code);
            assert!(!opcode.is_assigned(), "0x{:02x} should be unassigned", code);
            assert_eq!(opcode.name(), "UNASSIGNED");
        }
        assert_eq!(Opcode::from_u8(0x5d).to_string(), "UNASSIGNED(0x5d)");
    }

    #[test]
    fn test_lookup_by_name() {
        assert_eq!(Opcode::from_name("PUSH20"), Some(Opcode::PUSH20));
        assert_eq!(Opcode::from_name("sload"), Some(Opcode::SLOAD));
        assert_eq!(Opcode::from_name("KECCAK256"), Some(Opcode::SHA3));
        assert_eq!(Opcode::from_name("PUSH0"), None);
        assert_eq!(Opcode::from_name("UNASSIGNED"), None);
    }

    #[test]
    fn test_operand_width() {
        assert_eq!(Opcode::ADD.operand_width(), 0);
        assert_eq!(Opcode::PUSH1.operand_width(), 1);
        assert_eq!(Opcode::PUSH20.operand_width(), 20);
        assert_eq!(Opcode::PUSH32.operand_width(), 32);
        assert_eq!(Opcode::DUP1.operand_width(), 0);
    }

    #[test]
    fn test_family_constructors() {
        assert_eq!(Opcode::push(4), Some(Opcode::PUSH4));
        assert_eq!(Opcode::push(0), None);
        assert_eq!(Opcode::push(33), None);
        assert_eq!(Opcode::dup(16), Some(Opcode::DUP16));
        assert_eq!(Opcode::dup(17), None);
        assert_eq!(Opcode::swap(1), Some(Opcode::SWAP1));
        assert_eq!(Opcode::swap(0), None);
    }

    #[test]
    fn test_unassigned_never_aliases_a_catalog_entry() {
        for code in 0..=255u8 {
            match Opcode::from_u8(code) {
                Opcode::Unassigned(byte) => {
                    assert_eq!(byte.get(), code);
                    assert!(!Opcode::ALL.iter().any(|named| named.code() == code));
                }
                named => assert!(Opcode::ALL.contains(&named)),
            }
        }
    }

    #[test]
    fn test_halting() {
        assert!(Opcode::RETURN.is_halting());
        assert!(Opcode::JUMP.is_halting());
        assert!(!Opcode::JUMPI.is_halting());
        assert!(!Opcode::ADD.is_halting());
    }
}
