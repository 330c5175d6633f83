// SPDX-License-Identifier: AGPL-3.0

//! The set of opcodes a program may use.

use ovmt_exceptions::{ConfigError, ConfigResult};
use ovmt_opcodes::Opcode;
use std::collections::BTreeSet;

/// Anything an opcode can be looked up from. Lookups that do not resolve to a
/// catalog entry (an unknown name, a buffer that is not exactly one byte,
/// `None`) are never whitelisted.
pub trait OpcodeQuery {
    fn to_opcode(&self) -> Option<Opcode>;
}

impl OpcodeQuery for Opcode {
    fn to_opcode(&self) -> Option<Opcode> {
        Some(*self)
    }
}

impl OpcodeQuery for u8 {
    fn to_opcode(&self) -> Option<Opcode> {
        Some(Opcode::from_u8(*self))
    }
}

impl OpcodeQuery for [u8] {
    fn to_opcode(&self) -> Option<Opcode> {
        match self {
            [code] => Some(Opcode::from_u8(*code)),
            _ => None,
        }
    }
}

impl OpcodeQuery for str {
    fn to_opcode(&self) -> Option<Opcode> {
        Opcode::from_name(self)
    }
}

impl<T: OpcodeQuery + ?Sized> OpcodeQuery for &T {
    fn to_opcode(&self) -> Option<Opcode> {
        (**self).to_opcode()
    }
}

impl<T: OpcodeQuery> OpcodeQuery for Option<T> {
    fn to_opcode(&self) -> Option<Opcode> {
        self.as_ref().and_then(OpcodeQuery::to_opcode)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpcodeWhitelist {
    allowed: BTreeSet<Opcode>,
}

impl OpcodeWhitelist {
    /// Unassigned bytes are dropped: they can never be whitelisted.
    pub fn new(opcodes: impl IntoIterator<Item = Opcode>) -> Self {
        Self {
            allowed: opcodes.into_iter().filter(|op| op.is_assigned()).collect(),
        }
    }

    /// Every catalog entry
    pub fn all_assigned() -> Self {
        Self::new(Opcode::ALL.iter().copied())
    }

    pub fn from_names<S: AsRef<str>>(names: impl IntoIterator<Item = S>) -> ConfigResult<Self> {
        let opcodes = names
            .into_iter()
            .map(|name| {
                let name = name.as_ref();
                Opcode::from_name(name).ok_or_else(|| ConfigError::UnknownOpcode(name.to_string()))
            })
            .collect::<ConfigResult<Vec<_>>>()?;
        Ok(Self::new(opcodes))
    }

    pub fn is_whitelisted<Q: OpcodeQuery + ?Sized>(&self, query: &Q) -> bool {
        query
            .to_opcode()
            .map_or(false, |opcode| self.allowed.contains(&opcode))
    }

    pub fn opcodes(&self) -> impl Iterator<Item = Opcode> + '_ {
        self.allowed.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.allowed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }
}

impl Default for OpcodeWhitelist {
    fn default() -> Self {
        Self::all_assigned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn whitelist() -> OpcodeWhitelist {
        OpcodeWhitelist::new([Opcode::PUSH1, Opcode::ADD, Opcode::SLOAD])
    }

    #[test]
    fn test_query_forms() {
        let wl = whitelist();
        assert!(wl.is_whitelisted(&Opcode::ADD));
        assert!(wl.is_whitelisted(&0x54u8));
        assert!(wl.is_whitelisted(&[0x60u8][..]));
        assert!(wl.is_whitelisted("SLOAD"));
        assert!(!wl.is_whitelisted(&Opcode::SSTORE));
        assert!(!wl.is_whitelisted(&0x55u8));
        assert!(!wl.is_whitelisted("MUL"));
    }

    #[test]
    fn test_unresolvable_queries_are_false() {
        let wl = whitelist();
        assert!(!wl.is_whitelisted(&None::<Opcode>));
        let empty: &[u8] = &[];
        assert!(!wl.is_whitelisted(empty));
        assert!(!wl.is_whitelisted(&[0x01u8, 0x01][..]));
        assert!(!wl.is_whitelisted("NOT_AN_OPCODE"));
        assert!(wl.is_whitelisted(&Some(Opcode::ADD)));
    }

    #[test]
    fn test_unassigned_never_whitelisted() {
        let wl = OpcodeWhitelist::new([Opcode::from_u8(0x5d)]);
        assert!(wl.is_empty());
        assert!(!wl.is_whitelisted(&0x5du8));
    }

    #[test]
    fn test_from_names() {
        let wl = OpcodeWhitelist::from_names(["push1", "ADD"]).unwrap();
        assert_eq!(wl.len(), 2);
        assert_eq!(
            OpcodeWhitelist::from_names(["ADD", "PUSH0"]).unwrap_err(),
            ConfigError::UnknownOpcode("PUSH0".to_string())
        );
    }

    #[test]
    fn test_default_is_whole_catalog() {
        assert_eq!(OpcodeWhitelist::default().len(), Opcode::ALL.len());
    }
}
