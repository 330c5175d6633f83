// SPDX-License-Identifier: AGPL-3.0

//! Run buffers, inspect machine state mid-execution, and compare results.

use crate::interpreter::{CallHandler, Evm, Log, Message, NoHandler, StepContext};
use crate::mock::MockExecutionManager;
use crate::state::{BlockEnv, WorldState};
use alloy_primitives::{Address, U256};
use ovmt_exceptions::VmError;
use std::collections::BTreeMap;

/// Final state of a top-level execution
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecutionResult {
    pub success: bool,
    pub return_data: Vec<u8>,
    pub error: Option<VmError>,
    /// Bottom first
    pub stack: Vec<U256>,
    pub memory: Vec<u8>,
    pub logs: Vec<Log>,
    /// Storage of the executed contract after the run
    pub storage: BTreeMap<U256, U256>,
}

impl ExecutionResult {
    /// Observable differences from `other`: success, return data, storage and
    /// logs. Stack and memory are internal to the frame and not compared.
    pub fn differences(&self, other: &ExecutionResult) -> Vec<String> {
        let mut diffs = Vec::new();
        if self.success != other.success {
            diffs.push(format!("success: {} != {}", self.success, other.success));
        }
        if self.return_data != other.return_data {
            diffs.push(format!(
                "return data: 0x{} != 0x{}",
                hex::encode(&self.return_data),
                hex::encode(&other.return_data)
            ));
        }
        if self.storage != other.storage {
            diffs.push(format!("storage: {:?} != {:?}", self.storage, other.storage));
        }
        if self.logs != other.logs {
            diffs.push(format!("logs: {:?} != {:?}", self.logs, other.logs));
        }
        diffs
    }
}

/// Whether two results are observably equal
pub fn compare_execution(a: &ExecutionResult, b: &ExecutionResult) -> bool {
    a.differences(b).is_empty()
}

/// A world with one contract under test and an execution manager address.
pub struct Sandbox {
    pub evm: Evm,
    pub contract: Address,
    pub caller: Address,
    pub execution_manager: Address,
}

fn address_with_last_byte(byte: u8) -> Address {
    let mut bytes = [0u8; 20];
    bytes[19] = byte;
    Address::from(bytes)
}

impl Sandbox {
    pub fn new(code: &[u8]) -> Self {
        let contract = address_with_last_byte(0xc0);
        let mut state = WorldState::new();
        state.deploy(contract, code.to_vec());
        Self {
            evm: Evm::new(state, BlockEnv::default()),
            contract,
            caller: address_with_last_byte(0xca),
            execution_manager: address_with_last_byte(0xe5),
        }
    }

    pub fn with_execution_manager(mut self, address: Address) -> Self {
        self.execution_manager = address;
        self
    }

    pub fn deploy(&mut self, address: Address, code: Vec<u8>) {
        self.evm.state.deploy(address, code);
    }

    pub fn set_storage(&mut self, key: U256, value: U256) {
        self.evm.state.sstore(self.contract, key, value);
    }

    fn execute(&mut self, calldata: &[u8], handler: &mut dyn CallHandler) -> ExecutionResult {
        let message = Message::call(self.caller, self.contract, calldata.to_vec());
        let logs = self.evm.logs.len();
        let frame = self.evm.execute(message, handler);
        let storage = self
            .evm
            .state
            .account(&self.contract)
            .map(|account| account.storage.iter().map(|(k, v)| (*k, *v)).collect())
            .unwrap_or_default();
        ExecutionResult {
            success: frame.outcome.success,
            return_data: frame.outcome.output,
            error: frame.outcome.error,
            stack: frame.stack,
            memory: frame.memory,
            logs: self.evm.logs[logs..].to_vec(),
            storage,
        }
    }

    /// Run the contract natively
    pub fn run(&mut self, calldata: &[u8]) -> ExecutionResult {
        self.execute(calldata, &mut NoHandler)
    }

    /// A fresh mock serving this sandbox's execution manager address
    pub fn mock(&self) -> MockExecutionManager {
        MockExecutionManager::new(self.execution_manager, self.contract, self.caller)
    }

    /// Run the contract with calls to the execution manager served by `mock`
    pub fn run_with_mock(
        &mut self,
        calldata: &[u8],
        mock: &mut MockExecutionManager,
    ) -> ExecutionResult {
        self.execute(calldata, mock)
    }

    /// Run the contract with calls to the execution manager served by a
    /// [`MockExecutionManager`]; also returns the methods it was asked for
    pub fn run_sandboxed(&mut self, calldata: &[u8]) -> (ExecutionResult, Vec<String>) {
        let mut mock = self.mock();
        let result = self.run_with_mock(calldata, &mut mock);
        (result, mock.calls)
    }

    /// Stack and memory right before `pc` first executes in the top-level frame
    pub fn step_context_before_pc(&mut self, calldata: &[u8], pc: usize, sandboxed: bool) -> Option<StepContext> {
        self.evm.set_breakpoint(Some(pc));
        if sandboxed {
            self.run_sandboxed(calldata);
        } else {
            self.run(calldata);
        }
        let context = self.evm.take_captured();
        self.evm.set_breakpoint(None);
        context
    }
}

/// Execute `code` natively with empty calldata
pub fn execute_code(code: &[u8]) -> ExecutionResult {
    Sandbox::new(code).run(&[])
}

/// Stack and memory of `code` right before `pc` executes, or `None` if it never does
pub fn step_context_before_pc(code: &[u8], pc: usize) -> Option<StepContext> {
    Sandbox::new(code).step_context_before_pc(&[], pc, false)
}

/// Whether two programs reach their respective program counters with equal
/// stacks and memories. Memory is compared up to trailing zero bytes, since
/// expansion alone is not observable in the values a program reads.
pub fn compare_before_step(a: &[u8], pc_a: usize, b: &[u8], pc_b: usize) -> bool {
    fn trimmed(memory: &[u8]) -> &[u8] {
        let end = memory.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
        &memory[..end]
    }
    match (step_context_before_pc(a, pc_a), step_context_before_pc(b, pc_b)) {
        (Some(x), Some(y)) => x.stack == y.stack && trimmed(&x.memory) == trimmed(&y.memory),
        _ => false,
    }
}
