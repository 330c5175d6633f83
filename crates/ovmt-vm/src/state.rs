// SPDX-License-Identifier: AGPL-3.0

//! Accounts, block environment and address derivation.

use alloy_primitives::{Address, U256};
use ovmt_hashes::keccak256;
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Account {
    pub balance: U256,
    pub nonce: u64,
    pub code: Vec<u8>,
    pub storage: HashMap<U256, U256>,
}

/// All accounts. Cloned wholesale to snapshot a call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorldState {
    accounts: HashMap<Address, Account>,
}

impl WorldState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn account(&self, address: &Address) -> Option<&Account> {
        self.accounts.get(address)
    }

    pub fn account_mut(&mut self, address: Address) -> &mut Account {
        self.accounts.entry(address).or_default()
    }

    pub fn exists(&self, address: &Address) -> bool {
        self.accounts.contains_key(address)
    }

    pub fn deploy(&mut self, address: Address, code: Vec<u8>) {
        self.account_mut(address).code = code;
    }

    pub fn code(&self, address: &Address) -> &[u8] {
        self.accounts
            .get(address)
            .map(|account| account.code.as_slice())
            .unwrap_or(&[])
    }

    pub fn balance(&self, address: &Address) -> U256 {
        self.accounts
            .get(address)
            .map(|account| account.balance)
            .unwrap_or_default()
    }

    pub fn sload(&self, address: &Address, key: U256) -> U256 {
        self.accounts
            .get(address)
            .and_then(|account| account.storage.get(&key).copied())
            .unwrap_or_default()
    }

    pub fn sstore(&mut self, address: Address, key: U256, value: U256) {
        let storage = &mut self.account_mut(address).storage;
        if value.is_zero() {
            storage.remove(&key);
        } else {
            storage.insert(key, value);
        }
    }

    /// keccak256 of the code, or zero for an account that does not exist
    pub fn code_hash(&self, address: &Address) -> U256 {
        match self.accounts.get(address) {
            Some(account) => U256::from_be_bytes(keccak256(&account.code)),
            None => U256::ZERO,
        }
    }

    /// Move `value` between accounts; false if the sender cannot cover it
    pub fn transfer(&mut self, from: Address, to: Address, value: U256) -> bool {
        if value.is_zero() {
            return true;
        }
        let balance = self.balance(&from);
        if balance < value {
            return false;
        }
        self.account_mut(from).balance = balance - value;
        let recipient = self.account_mut(to);
        recipient.balance = recipient.balance.wrapping_add(value);
        true
    }

    /// Current nonce of `address`, incremented afterwards
    pub fn bump_nonce(&mut self, address: Address) -> u64 {
        let account = self.account_mut(address);
        let nonce = account.nonce;
        account.nonce += 1;
        nonce
    }
}

/// Block and transaction context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockEnv {
    pub origin: Address,
    pub coinbase: Address,
    pub timestamp: U256,
    pub number: U256,
    pub difficulty: U256,
    pub gas_limit: U256,
    pub gas_price: U256,
}

impl Default for BlockEnv {
    fn default() -> Self {
        Self {
            origin: Address::repeat_byte(0x0a),
            coinbase: Address::repeat_byte(0xc0),
            timestamp: U256::from(1_600_000_000u64),
            number: U256::from(1_000u64),
            difficulty: U256::from(1u64),
            gas_limit: U256::from(30_000_000u64),
            gas_price: U256::from(1u64),
        }
    }
}

/// Address of a contract created by `sender` at `nonce`.
///
/// `keccak256(sender ++ nonce)[12..]`, a simplification of the RLP rule that
/// keeps the same inputs.
pub fn create_address(sender: &Address, nonce: u64) -> Address {
    let mut preimage = sender.as_slice().to_vec();
    preimage.extend_from_slice(&nonce.to_be_bytes());
    Address::from_slice(&keccak256(&preimage)[12..])
}

/// `keccak256(0xff ++ sender ++ salt ++ keccak256(init_code))[12..]`
pub fn create2_address(sender: &Address, salt: U256, init_code: &[u8]) -> Address {
    let mut preimage = vec![0xff];
    preimage.extend_from_slice(sender.as_slice());
    preimage.extend_from_slice(&salt.to_be_bytes::<32>());
    preimage.extend_from_slice(&keccak256(init_code));
    Address::from_slice(&keccak256(&preimage)[12..])
}

pub fn address_to_word(address: &Address) -> U256 {
    U256::from_be_slice(address.as_slice())
}

pub fn word_to_address(word: U256) -> Address {
    Address::from_slice(&word.to_be_bytes::<32>()[12..])
}
