// SPDX-License-Identifier: AGPL-3.0

//! Concrete EVM used to check transpiled code against the original.

pub mod interpreter;
pub mod introspection;
pub mod mock;
pub mod state;

pub use interpreter::{
    CallHandler, CallKind, CallOutcome, Evm, FrameResult, Log, Message, NoHandler, StepContext,
};
pub use introspection::{
    compare_before_step, compare_execution, execute_code, step_context_before_pc,
    ExecutionResult, Sandbox,
};
pub use mock::MockExecutionManager;
pub use state::{
    address_to_word, create2_address, create_address, word_to_address, Account, BlockEnv,
    WorldState,
};
