// SPDX-License-Identifier: AGPL-3.0

//! A native stand-in for the execution manager.
//!
//! Each `ovm<OPCODE>()` method answers with what the native opcode would have
//! produced in the caller's context, so a transpiled contract run against the
//! mock behaves like the original run natively.

use crate::interpreter::{CallHandler, CallKind, CallOutcome, Evm, Message};
use crate::state::{address_to_word, word_to_address};
use alloy_primitives::{Address, U256};
use ovmt_constants::{MAX_MEMORY_SIZE, SELECTOR_SIZE, WORD_SIZE};
use ovmt_hashes::method_id;
use std::collections::HashMap;
use tracing::debug;

/// Methods the mock serves, without the `ovm` prefix
pub const METHODS: &[&str] = &[
    "ADDRESS",
    "CALLER",
    "ORIGIN",
    "TIMESTAMP",
    "SLOAD",
    "SSTORE",
    "EXTCODESIZE",
    "EXTCODEHASH",
    "EXTCODECOPY",
    "CALL",
    "STATICCALL",
    "DELEGATECALL",
    "CREATE",
    "CREATE2",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OvmFrame {
    address: Address,
    caller: Address,
    is_static: bool,
    /// Set when the sandboxed code attempted a state change in a static frame
    faulted: bool,
}

pub struct MockExecutionManager {
    address: Address,
    methods: HashMap<[u8; 4], &'static str>,
    frames: Vec<OvmFrame>,
    /// Names of the methods invoked so far, in order
    pub calls: Vec<String>,
    /// Gas each of those invocations carried
    pub gas: Vec<u64>,
}

fn word(data: &[u8], index: usize) -> U256 {
    let start = SELECTOR_SIZE + WORD_SIZE * index;
    let mut buffer = [0u8; WORD_SIZE];
    if start < data.len() {
        let end = (start + WORD_SIZE).min(data.len());
        buffer[..end - start].copy_from_slice(&data[start..end]);
    }
    U256::from_be_bytes(buffer)
}

fn tail(data: &[u8], words: usize) -> Vec<u8> {
    let start = SELECTOR_SIZE + WORD_SIZE * words;
    data.get(start..).map(<[u8]>::to_vec).unwrap_or_default()
}

fn return_word(value: U256) -> CallOutcome {
    CallOutcome::success(value.to_be_bytes::<32>().to_vec())
}

impl MockExecutionManager {
    /// A mock living at `address`, entered by `caller` calling `entry`
    pub fn new(address: Address, entry: Address, caller: Address) -> Self {
        let methods = METHODS
            .iter()
            .map(|name| (method_id(&format!("ovm{}", name)), *name))
            .collect();
        Self {
            address,
            methods,
            frames: vec![OvmFrame {
                address: entry,
                caller,
                is_static: false,
                faulted: false,
            }],
            calls: Vec::new(),
            gas: Vec::new(),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    fn frame(&self) -> OvmFrame {
        // The entry frame is never popped.
        self.frames[self.frames.len() - 1]
    }

    fn fault(&mut self) -> CallOutcome {
        let last = self.frames.len() - 1;
        self.frames[last].faulted = true;
        CallOutcome::revert(Vec::new())
    }

    fn nested_call(&mut self, evm: &mut Evm, message: Message, frame: OvmFrame) -> CallOutcome {
        let snapshot = evm.state.clone();
        self.frames.push(frame);
        let mut outcome = evm.call(message, self);
        let inner = self.frames.pop().unwrap_or(frame);
        if inner.faulted && outcome.success {
            evm.state = snapshot;
            outcome = CallOutcome::revert(Vec::new());
        }
        outcome
    }

    fn forward_call(&mut self, evm: &mut Evm, message: &Message, kind: CallKind) -> CallOutcome {
        let current = self.frame();
        let target = word_to_address(word(&message.data, 0));
        let data = tail(&message.data, 1);
        let (address, frame) = match kind {
            CallKind::DelegateCall => (message.caller, current),
            _ => (
                target,
                OvmFrame {
                    address: target,
                    caller: message.caller,
                    is_static: current.is_static || kind == CallKind::StaticCall,
                    faulted: false,
                },
            ),
        };
        let inner = Message {
            kind,
            caller: message.caller,
            address,
            code_address: target,
            value: U256::ZERO,
            data,
            gas: message.gas,
            is_static: frame.is_static,
            depth: message.depth + 1,
        };
        let frame = OvmFrame {
            faulted: false,
            ..frame
        };
        self.nested_call(evm, inner, frame)
    }

    fn create(&mut self, evm: &mut Evm, message: &Message, salted: bool) -> CallOutcome {
        if self.frame().is_static {
            return self.fault();
        }
        let (salt, init_code) = if salted {
            (Some(word(&message.data, 0)), tail(&message.data, 1))
        } else {
            (None, tail(&message.data, 0))
        };
        // Init code sees the creator as its caller.
        self.frames.push(OvmFrame {
            address: Address::ZERO,
            caller: message.caller,
            is_static: false,
            faulted: false,
        });
        let (address, _) = evm.create(
            message.caller,
            U256::ZERO,
            init_code,
            salt,
            message.depth + 1,
            self,
        );
        self.frames.pop();
        return_word(address.map_or(U256::ZERO, |a| address_to_word(&a)))
    }
}

impl CallHandler for MockExecutionManager {
    fn handles(&self, address: &Address) -> bool {
        *address == self.address
    }

    fn call(&mut self, evm: &mut Evm, message: &Message) -> CallOutcome {
        let selector: Option<[u8; 4]> = message
            .data
            .get(..SELECTOR_SIZE)
            .and_then(|s| s.try_into().ok());
        let Some(method) = selector.and_then(|s| self.methods.get(&s).copied()) else {
            debug!(data = hex::encode(&message.data), "unknown execution manager method");
            return CallOutcome::revert(Vec::new());
        };
        debug!(method, caller = %message.caller, "execution manager call");
        self.calls.push(format!("ovm{}", method));
        self.gas.push(message.gas);

        let data = &message.data;
        let sandboxed = message.caller;
        match method {
            "ADDRESS" => return_word(address_to_word(&sandboxed)),
            "CALLER" => return_word(address_to_word(&self.frame().caller)),
            "ORIGIN" => return_word(address_to_word(&evm.env.origin)),
            "TIMESTAMP" => return_word(evm.env.timestamp),
            "SLOAD" => return_word(evm.state.sload(&sandboxed, word(data, 0))),
            "SSTORE" => {
                if self.frame().is_static {
                    return self.fault();
                }
                evm.state.sstore(sandboxed, word(data, 0), word(data, 1));
                return_word(U256::ZERO)
            }
            "EXTCODESIZE" => {
                let target = word_to_address(word(data, 0));
                return_word(U256::from(evm.state.code(&target).len()))
            }
            "EXTCODEHASH" => {
                let target = word_to_address(word(data, 0));
                return_word(evm.state.code_hash(&target))
            }
            "EXTCODECOPY" => {
                let target = word_to_address(word(data, 0));
                let code = evm.state.code(&target);
                let size = match usize::try_from(word(data, 2)) {
                    Ok(size) if size <= MAX_MEMORY_SIZE => size,
                    _ => return CallOutcome::revert(Vec::new()),
                };
                let mut out = vec![0u8; size];
                if let Ok(offset) = usize::try_from(word(data, 1)) {
                    if offset < code.len() {
                        let available = (code.len() - offset).min(size);
                        out[..available].copy_from_slice(&code[offset..offset + available]);
                    }
                }
                CallOutcome::success(out)
            }
            "CALL" => self.forward_call(evm, message, CallKind::Call),
            "STATICCALL" => self.forward_call(evm, message, CallKind::StaticCall),
            "DELEGATECALL" => self.forward_call(evm, message, CallKind::DelegateCall),
            "CREATE" => self.create(evm, message, false),
            "CREATE2" => self.create(evm, message, true),
            _ => CallOutcome::revert(Vec::new()),
        }
    }
}
