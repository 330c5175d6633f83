// SPDX-License-Identifier: AGPL-3.0

//! A concrete EVM interpreter without gas accounting.
//!
//! Calls to addresses claimed by a [`CallHandler`] are served natively by the
//! handler instead of by account code, which is how the mock execution
//! manager is plugged in.

use crate::state::{
    address_to_word, create2_address, create_address, word_to_address, BlockEnv, WorldState,
};
use alloy_primitives::{Address, U256};
use ovmt_constants::{MAX_CALL_DEPTH, MAX_MEMORY_SIZE, MAX_STACK_SIZE, WORD_SIZE};
use ovmt_exceptions::{VmError, VmResult};
use ovmt_hashes::keccak256;
use ovmt_opcodes::{jumpdests, Opcode};
use std::collections::HashSet;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Call,
    CallCode,
    DelegateCall,
    StaticCall,
    Create,
    Create2,
}

/// A message call (or contract creation) frame request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: CallKind,
    pub caller: Address,
    /// Account whose storage and balance the code acts on
    pub address: Address,
    /// Account whose code runs
    pub code_address: Address,
    pub value: U256,
    pub data: Vec<u8>,
    pub gas: u64,
    pub is_static: bool,
    pub depth: usize,
}

impl Message {
    pub fn call(caller: Address, address: Address, data: Vec<u8>) -> Self {
        Self {
            kind: CallKind::Call,
            caller,
            address,
            code_address: address,
            value: U256::ZERO,
            data,
            gas: 30_000_000,
            is_static: false,
            depth: 0,
        }
    }
}

/// Result of a message call as seen by its caller
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CallOutcome {
    pub success: bool,
    pub output: Vec<u8>,
    pub error: Option<VmError>,
}

impl CallOutcome {
    pub fn success(output: Vec<u8>) -> Self {
        Self {
            success: true,
            output,
            error: None,
        }
    }

    pub fn revert(output: Vec<u8>) -> Self {
        Self {
            success: false,
            error: Some(VmError::Revert(hex::encode(&output))),
            output,
        }
    }

    pub fn halt(error: VmError) -> Self {
        Self {
            success: false,
            output: Vec::new(),
            error: Some(error),
        }
    }
}

/// Serves message calls to the addresses it claims
pub trait CallHandler {
    fn handles(&self, address: &Address) -> bool;

    fn call(&mut self, evm: &mut Evm, message: &Message) -> CallOutcome;
}

/// Claims no address: every call runs account code
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHandler;

impl CallHandler for NoHandler {
    fn handles(&self, _address: &Address) -> bool {
        false
    }

    fn call(&mut self, _evm: &mut Evm, _message: &Message) -> CallOutcome {
        CallOutcome::halt(VmError::CallDepth)
    }
}

/// Stack (bottom first) and memory of a frame at some point of execution
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StepContext {
    pub pc: usize,
    pub stack: Vec<U256>,
    pub memory: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<U256>,
    pub data: Vec<u8>,
}

/// Outcome of a frame, including its final machine state
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FrameResult {
    pub outcome: CallOutcome,
    pub stack: Vec<U256>,
    pub memory: Vec<u8>,
}

pub struct Evm {
    pub state: WorldState,
    pub env: BlockEnv,
    pub logs: Vec<Log>,
    /// Instructions allowed per top-level execution
    pub step_limit: usize,
    steps: usize,
    breakpoint: Option<usize>,
    captured: Option<StepContext>,
}

impl Default for Evm {
    fn default() -> Self {
        Self::new(WorldState::default(), BlockEnv::default())
    }
}

#[derive(Default)]
struct Memory {
    data: Vec<u8>,
}

impl Memory {
    fn expand(&mut self, offset: usize, size: usize, pc: usize) -> VmResult<()> {
        if size == 0 {
            return Ok(());
        }
        let end = offset
            .checked_add(size)
            .filter(|end| *end <= MAX_MEMORY_SIZE)
            .ok_or(VmError::MemoryLimit(pc))?;
        let new_len = end.div_ceil(WORD_SIZE) * WORD_SIZE;
        if new_len > self.data.len() {
            self.data.resize(new_len, 0);
        }
        Ok(())
    }

    /// Resolve a word-sized (offset, size) pair, expanding memory to cover it
    fn region(&mut self, offset: U256, size: U256, pc: usize) -> VmResult<(usize, usize)> {
        if size.is_zero() {
            return Ok((0, 0));
        }
        let offset = to_usize(offset).ok_or(VmError::MemoryLimit(pc))?;
        let size = to_usize(size).ok_or(VmError::MemoryLimit(pc))?;
        self.expand(offset, size, pc)?;
        Ok((offset, size))
    }

    fn read(&mut self, offset: U256, size: U256, pc: usize) -> VmResult<Vec<u8>> {
        let (offset, size) = self.region(offset, size, pc)?;
        Ok(self.data[offset..offset + size].to_vec())
    }

    fn write(&mut self, offset: usize, bytes: &[u8]) {
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }
}

fn to_usize(value: U256) -> Option<usize> {
    if value.bit_len() > 48 {
        None
    } else {
        Some(value.as_limbs()[0] as usize)
    }
}

fn bool_word(value: bool) -> U256 {
    if value {
        U256::from(1u64)
    } else {
        U256::ZERO
    }
}

fn is_negative(value: U256) -> bool {
    value.bit(255)
}

fn abs(value: U256) -> U256 {
    if is_negative(value) {
        value.wrapping_neg()
    } else {
        value
    }
}

fn sdiv(a: U256, b: U256) -> U256 {
    if b.is_zero() {
        return U256::ZERO;
    }
    let quotient = abs(a) / abs(b);
    if is_negative(a) != is_negative(b) {
        quotient.wrapping_neg()
    } else {
        quotient
    }
}

fn smod(a: U256, b: U256) -> U256 {
    if b.is_zero() {
        return U256::ZERO;
    }
    let remainder = abs(a) % abs(b);
    if is_negative(a) {
        remainder.wrapping_neg()
    } else {
        remainder
    }
}

fn slt(a: U256, b: U256) -> bool {
    match (is_negative(a), is_negative(b)) {
        (true, false) => true,
        (false, true) => false,
        _ => a < b,
    }
}

fn signextend(byte: U256, value: U256) -> U256 {
    match to_usize(byte) {
        Some(b) if b < 31 => {
            let bit = 8 * b + 7;
            let mask = (U256::from(1u64) << (bit + 1)) - U256::from(1u64);
            if value.bit(bit) {
                value | !mask
            } else {
                value & mask
            }
        }
        _ => value,
    }
}

fn shift_amount(shift: U256) -> Option<usize> {
    to_usize(shift).filter(|s| *s < 256)
}

fn sar(shift: U256, value: U256) -> U256 {
    let negative = is_negative(value);
    match shift_amount(shift) {
        Some(s) if negative => !((!value) >> s),
        Some(s) => value >> s,
        None if negative => U256::MAX,
        None => U256::ZERO,
    }
}

fn byte_at(index: U256, value: U256) -> U256 {
    match to_usize(index) {
        Some(i) if i < 32 => U256::from(value.to_be_bytes::<32>()[i]),
        _ => U256::ZERO,
    }
}

/// Copy `size` bytes of `source` from `offset`, zero-filling past its end
fn padded_slice(source: &[u8], offset: U256, size: usize) -> Vec<u8> {
    let mut out = vec![0u8; size];
    if let Some(start) = to_usize(offset) {
        if start < source.len() {
            let available = (source.len() - start).min(size);
            out[..available].copy_from_slice(&source[start..start + available]);
        }
    }
    out
}

struct Frame<'a> {
    message: &'a Message,
    code: &'a [u8],
    jumpdests: HashSet<usize>,
    pc: usize,
    stack: Vec<U256>,
    memory: Memory,
    return_data: Vec<u8>,
}

impl<'a> Frame<'a> {
    fn pop(&mut self) -> VmResult<U256> {
        self.stack.pop().ok_or(VmError::StackUnderflow(self.pc))
    }

    fn push(&mut self, value: U256) -> VmResult<()> {
        if self.stack.len() >= MAX_STACK_SIZE {
            return Err(VmError::StackOverflow(self.pc));
        }
        self.stack.push(value);
        Ok(())
    }

    fn jump(&mut self, dest: U256) -> VmResult<()> {
        match to_usize(dest) {
            Some(d) if self.jumpdests.contains(&d) => {
                self.pc = d;
                Ok(())
            }
            _ => Err(VmError::InvalidJump {
                pc: self.pc,
                dest: format!("{:#x}", dest),
            }),
        }
    }

    fn require_non_static(&self) -> VmResult<()> {
        if self.message.is_static {
            Err(VmError::StaticViolation(self.pc))
        } else {
            Ok(())
        }
    }
}

enum Step {
    Continue,
    Stop(CallOutcome),
}

impl Evm {
    pub fn new(state: WorldState, env: BlockEnv) -> Self {
        Self {
            state,
            env,
            logs: Vec::new(),
            step_limit: 1_000_000,
            steps: 0,
            breakpoint: None,
            captured: None,
        }
    }

    /// Capture the top-level frame's stack and memory the first time `pc` is
    /// about to execute
    pub fn set_breakpoint(&mut self, pc: Option<usize>) {
        self.breakpoint = pc;
        self.captured = None;
    }

    pub fn take_captured(&mut self) -> Option<StepContext> {
        self.captured.take()
    }

    /// Run a top-level message call and report the final machine state
    pub fn execute(&mut self, message: Message, handler: &mut dyn CallHandler) -> FrameResult {
        self.steps = 0;
        let code = self.state.code(&message.code_address).to_vec();
        let snapshot = self.state.clone();
        let logs = self.logs.len();
        let result = self.run_frame(&code, &message, handler);
        if !result.outcome.success {
            self.state = snapshot;
            self.logs.truncate(logs);
        }
        result
    }

    /// Execute a nested message call with the usual rollback on failure
    pub fn call(&mut self, message: Message, handler: &mut dyn CallHandler) -> CallOutcome {
        if message.depth > MAX_CALL_DEPTH {
            return CallOutcome::halt(VmError::CallDepth);
        }
        let snapshot = self.state.clone();
        let logs = self.logs.len();

        if message.kind == CallKind::Call
            && !self.state.transfer(message.caller, message.address, message.value)
        {
            return CallOutcome::revert(Vec::new());
        }

        let outcome = if handler.handles(&message.code_address) {
            handler.call(self, &message)
        } else {
            let code = self.state.code(&message.code_address).to_vec();
            self.run_frame(&code, &message, handler).outcome
        };

        if !outcome.success {
            self.state = snapshot;
            self.logs.truncate(logs);
        }
        outcome
    }

    /// Create a contract, returning its address on success
    pub fn create(
        &mut self,
        caller: Address,
        value: U256,
        init_code: Vec<u8>,
        salt: Option<U256>,
        depth: usize,
        handler: &mut dyn CallHandler,
    ) -> (Option<Address>, CallOutcome) {
        if depth > MAX_CALL_DEPTH {
            return (None, CallOutcome::halt(VmError::CallDepth));
        }
        let nonce = self.state.bump_nonce(caller);
        let address = match salt {
            Some(salt) => create2_address(&caller, salt, &init_code),
            None => create_address(&caller, nonce),
        };

        let snapshot = self.state.clone();
        let logs = self.logs.len();
        if !self.state.transfer(caller, address, value) {
            return (None, CallOutcome::revert(Vec::new()));
        }
        self.state.account_mut(address).nonce = 1;

        let message = Message {
            kind: if salt.is_some() {
                CallKind::Create2
            } else {
                CallKind::Create
            },
            caller,
            address,
            code_address: address,
            value,
            data: Vec::new(),
            gas: 30_000_000,
            is_static: false,
            depth,
        };
        let outcome = self.run_frame(&init_code, &message, handler).outcome;
        if outcome.success {
            self.state.deploy(address, outcome.output);
            (Some(address), CallOutcome::success(Vec::new()))
        } else {
            self.state = snapshot;
            self.logs.truncate(logs);
            (None, outcome)
        }
    }

    fn run_frame(&mut self, code: &[u8], message: &Message, handler: &mut dyn CallHandler) -> FrameResult {
        let mut frame = Frame {
            message,
            code,
            jumpdests: jumpdests(code).into_iter().collect(),
            pc: 0,
            stack: Vec::new(),
            memory: Memory::default(),
            return_data: Vec::new(),
        };

        let outcome = loop {
            if message.depth == 0 && self.breakpoint == Some(frame.pc) && self.captured.is_none() {
                self.captured = Some(StepContext {
                    pc: frame.pc,
                    stack: frame.stack.clone(),
                    memory: frame.memory.data.clone(),
                });
            }
            if frame.pc >= code.len() {
                break CallOutcome::success(Vec::new());
            }
            self.steps += 1;
            if self.steps > self.step_limit {
                break CallOutcome::halt(VmError::StepLimit);
            }
            match self.step(&mut frame, handler) {
                Ok(Step::Continue) => {}
                Ok(Step::Stop(outcome)) => break outcome,
                Err(error) => break CallOutcome::halt(error),
            }
        };

        FrameResult {
            outcome,
            stack: frame.stack,
            memory: frame.memory.data,
        }
    }

    fn step(&mut self, frame: &mut Frame<'_>, handler: &mut dyn CallHandler) -> VmResult<Step> {
        let pc = frame.pc;
        let opcode = Opcode::from_u8(frame.code[pc]);
        trace!(pc, %opcode, depth = frame.message.depth, "step");
        frame.pc += 1 + opcode.operand_width();

        macro_rules! binary {
            ($f:expr) => {{
                let a = frame.pop()?;
                let b = frame.pop()?;
                frame.push($f(a, b))?;
            }};
        }

        match opcode {
            Opcode::STOP => return Ok(Step::Stop(CallOutcome::success(Vec::new()))),
            Opcode::ADD => binary!(|a: U256, b| a.wrapping_add(b)),
            Opcode::MUL => binary!(|a: U256, b| a.wrapping_mul(b)),
            Opcode::SUB => binary!(|a: U256, b| a.wrapping_sub(b)),
            Opcode::DIV => binary!(|a: U256, b| a.checked_div(b).unwrap_or_default()),
            Opcode::SDIV => binary!(sdiv),
            Opcode::MOD => binary!(|a: U256, b| a.checked_rem(b).unwrap_or_default()),
            Opcode::SMOD => binary!(smod),
            Opcode::ADDMOD | Opcode::MULMOD => {
                let a = frame.pop()?;
                let b = frame.pop()?;
                let n = frame.pop()?;
                let result = if n.is_zero() {
                    U256::ZERO
                } else if opcode == Opcode::ADDMOD {
                    a.add_mod(b, n)
                } else {
                    a.mul_mod(b, n)
                };
                frame.push(result)?;
            }
            Opcode::EXP => binary!(|a: U256, b| a.wrapping_pow(b)),
            Opcode::SIGNEXTEND => binary!(signextend),
            Opcode::LT => binary!(|a: U256, b| bool_word(a < b)),
            Opcode::GT => binary!(|a: U256, b| bool_word(a > b)),
            Opcode::SLT => binary!(|a, b| bool_word(slt(a, b))),
            Opcode::SGT => binary!(|a, b| bool_word(slt(b, a))),
            Opcode::EQ => binary!(|a: U256, b| bool_word(a == b)),
            Opcode::ISZERO => {
                let a = frame.pop()?;
                frame.push(bool_word(a.is_zero()))?;
            }
            Opcode::AND => binary!(|a: U256, b| a & b),
            Opcode::OR => binary!(|a: U256, b| a | b),
            Opcode::XOR => binary!(|a: U256, b| a ^ b),
            Opcode::NOT => {
                let a = frame.pop()?;
                frame.push(!a)?;
            }
            Opcode::BYTE => binary!(byte_at),
            Opcode::SHL => binary!(|s, v: U256| shift_amount(s).map_or(U256::ZERO, |s| v << s)),
            Opcode::SHR => binary!(|s, v: U256| shift_amount(s).map_or(U256::ZERO, |s| v >> s)),
            Opcode::SAR => binary!(sar),
            Opcode::SHA3 => {
                let offset = frame.pop()?;
                let size = frame.pop()?;
                let data = frame.memory.read(offset, size, pc)?;
                frame.push(U256::from_be_bytes(keccak256(&data)))?;
            }
            Opcode::ADDRESS => frame.push(address_to_word(&frame.message.address))?,
            Opcode::BALANCE => {
                let address = word_to_address(frame.pop()?);
                frame.push(self.state.balance(&address))?;
            }
            Opcode::ORIGIN => frame.push(address_to_word(&self.env.origin))?,
            Opcode::CALLER => frame.push(address_to_word(&frame.message.caller))?,
            Opcode::CALLVALUE => frame.push(frame.message.value)?,
            Opcode::CALLDATALOAD => {
                let offset = frame.pop()?;
                let word = padded_slice(&frame.message.data, offset, WORD_SIZE);
                frame.push(U256::from_be_slice(&word))?;
            }
            Opcode::CALLDATASIZE => frame.push(U256::from(frame.message.data.len()))?,
            Opcode::CALLDATACOPY | Opcode::CODECOPY | Opcode::RETURNDATACOPY => {
                let dest = frame.pop()?;
                let offset = frame.pop()?;
                let size = frame.pop()?;
                let (dest, size) = frame.memory.region(dest, size, pc)?;
                let source: &[u8] = match opcode {
                    Opcode::CALLDATACOPY => &frame.message.data,
                    Opcode::CODECOPY => frame.code,
                    _ => {
                        let end = to_usize(offset).and_then(|o| o.checked_add(size));
                        if end.map_or(true, |end| end > frame.return_data.len()) {
                            return Err(VmError::MemoryLimit(pc));
                        }
                        &frame.return_data
                    }
                };
                let bytes = padded_slice(source, offset, size);
                frame.memory.write(dest, &bytes);
            }
            Opcode::CODESIZE => frame.push(U256::from(frame.code.len()))?,
            Opcode::GASPRICE => frame.push(self.env.gas_price)?,
            Opcode::EXTCODESIZE => {
                let address = word_to_address(frame.pop()?);
                frame.push(U256::from(self.state.code(&address).len()))?;
            }
            Opcode::EXTCODECOPY => {
                let address = word_to_address(frame.pop()?);
                let dest = frame.pop()?;
                let offset = frame.pop()?;
                let size = frame.pop()?;
                let (dest, size) = frame.memory.region(dest, size, pc)?;
                let bytes = padded_slice(self.state.code(&address), offset, size);
                frame.memory.write(dest, &bytes);
            }
            Opcode::RETURNDATASIZE => frame.push(U256::from(frame.return_data.len()))?,
            Opcode::EXTCODEHASH => {
                let address = word_to_address(frame.pop()?);
                frame.push(self.state.code_hash(&address))?;
            }
            Opcode::BLOCKHASH => {
                let number = frame.pop()?;
                frame.push(U256::from_be_bytes(keccak256(&number.to_be_bytes::<32>())))?;
            }
            Opcode::COINBASE => frame.push(address_to_word(&self.env.coinbase))?,
            Opcode::TIMESTAMP => frame.push(self.env.timestamp)?,
            Opcode::NUMBER => frame.push(self.env.number)?,
            Opcode::DIFFICULTY => frame.push(self.env.difficulty)?,
            Opcode::GASLIMIT => frame.push(self.env.gas_limit)?,
            Opcode::POP => {
                frame.pop()?;
            }
            Opcode::MLOAD => {
                let offset = frame.pop()?;
                let word = frame.memory.read(offset, U256::from(WORD_SIZE), pc)?;
                frame.push(U256::from_be_slice(&word))?;
            }
            Opcode::MSTORE => {
                let offset = frame.pop()?;
                let value = frame.pop()?;
                let (offset, _) = frame.memory.region(offset, U256::from(WORD_SIZE), pc)?;
                frame.memory.write(offset, &value.to_be_bytes::<32>());
            }
            Opcode::MSTORE8 => {
                let offset = frame.pop()?;
                let value = frame.pop()?;
                let (offset, _) = frame.memory.region(offset, U256::from(1u64), pc)?;
                frame.memory.write(offset, &[value.to_be_bytes::<32>()[31]]);
            }
            Opcode::SLOAD => {
                let key = frame.pop()?;
                frame.push(self.state.sload(&frame.message.address, key))?;
            }
            Opcode::SSTORE => {
                frame.require_non_static()?;
                let key = frame.pop()?;
                let value = frame.pop()?;
                self.state.sstore(frame.message.address, key, value);
            }
            Opcode::JUMP => {
                let dest = frame.pop()?;
                frame.pc = pc;
                frame.jump(dest)?;
            }
            Opcode::JUMPI => {
                let dest = frame.pop()?;
                let condition = frame.pop()?;
                if !condition.is_zero() {
                    frame.pc = pc;
                    frame.jump(dest)?;
                }
            }
            Opcode::PC => frame.push(U256::from(pc))?,
            Opcode::MSIZE => frame.push(U256::from(frame.memory.data.len()))?,
            Opcode::GAS => frame.push(U256::from(frame.message.gas))?,
            Opcode::JUMPDEST => {}
            op if op.is_push() => {
                let operand = padded_slice(frame.code, U256::from(pc + 1), op.operand_width());
                frame.push(U256::from_be_slice(&operand))?;
            }
            op if (0x80..=0x8f).contains(&op.code()) => {
                let depth = (op.code() - 0x7f) as usize;
                if frame.stack.len() < depth {
                    return Err(VmError::StackUnderflow(pc));
                }
                let value = frame.stack[frame.stack.len() - depth];
                frame.push(value)?;
            }
            op if (0x90..=0x9f).contains(&op.code()) => {
                let depth = (op.code() - 0x8f) as usize;
                let len = frame.stack.len();
                if len <= depth {
                    return Err(VmError::StackUnderflow(pc));
                }
                frame.stack.swap(len - 1, len - 1 - depth);
            }
            op if (0xa0..=0xa4).contains(&op.code()) => {
                frame.require_non_static()?;
                let offset = frame.pop()?;
                let size = frame.pop()?;
                let topics = (0..(op.code() - 0xa0))
                    .map(|_| frame.pop())
                    .collect::<VmResult<Vec<_>>>()?;
                let data = frame.memory.read(offset, size, pc)?;
                self.logs.push(Log {
                    address: frame.message.address,
                    topics,
                    data,
                });
            }
            Opcode::CREATE | Opcode::CREATE2 => {
                frame.require_non_static()?;
                let value = frame.pop()?;
                let offset = frame.pop()?;
                let size = frame.pop()?;
                let salt = if opcode == Opcode::CREATE2 {
                    Some(frame.pop()?)
                } else {
                    None
                };
                let init_code = frame.memory.read(offset, size, pc)?;
                let (address, outcome) = self.create(
                    frame.message.address,
                    value,
                    init_code,
                    salt,
                    frame.message.depth + 1,
                    handler,
                );
                frame.return_data = outcome.output;
                frame.push(address.map_or(U256::ZERO, |a| address_to_word(&a)))?;
            }
            Opcode::CALL | Opcode::CALLCODE | Opcode::DELEGATECALL | Opcode::STATICCALL => {
                let gas = frame.pop()?;
                let to = word_to_address(frame.pop()?);
                let value = if matches!(opcode, Opcode::CALL | Opcode::CALLCODE) {
                    frame.pop()?
                } else {
                    U256::ZERO
                };
                let in_offset = frame.pop()?;
                let in_size = frame.pop()?;
                let out_offset = frame.pop()?;
                let out_size = frame.pop()?;
                if opcode == Opcode::CALL && !value.is_zero() {
                    frame.require_non_static()?;
                }
                let data = frame.memory.read(in_offset, in_size, pc)?;
                let (out_offset, out_size) = frame.memory.region(out_offset, out_size, pc)?;

                let parent = frame.message;
                let gas = to_usize(gas).map_or(u64::MAX, |g| g as u64);
                let message = match opcode {
                    Opcode::CALL => Message {
                        kind: CallKind::Call,
                        caller: parent.address,
                        address: to,
                        code_address: to,
                        value,
                        data,
                        gas,
                        is_static: parent.is_static,
                        depth: parent.depth + 1,
                    },
                    Opcode::CALLCODE => Message {
                        kind: CallKind::CallCode,
                        caller: parent.address,
                        address: parent.address,
                        code_address: to,
                        value,
                        data,
                        gas,
                        is_static: parent.is_static,
                        depth: parent.depth + 1,
                    },
                    Opcode::DELEGATECALL => Message {
                        kind: CallKind::DelegateCall,
                        caller: parent.caller,
                        address: parent.address,
                        code_address: to,
                        value: parent.value,
                        data,
                        gas,
                        is_static: parent.is_static,
                        depth: parent.depth + 1,
                    },
                    _ => Message {
                        kind: CallKind::StaticCall,
                        caller: parent.address,
                        address: to,
                        code_address: to,
                        value: U256::ZERO,
                        data,
                        gas,
                        is_static: true,
                        depth: parent.depth + 1,
                    },
                };

                let outcome = self.call(message, handler);
                let copied = out_size.min(outcome.output.len());
                frame
                    .memory
                    .write(out_offset, &outcome.output[..copied]);
                frame.return_data = outcome.output;
                frame.push(bool_word(outcome.success))?;
            }
            Opcode::RETURN | Opcode::REVERT => {
                let offset = frame.pop()?;
                let size = frame.pop()?;
                let output = frame.memory.read(offset, size, pc)?;
                return Ok(Step::Stop(if opcode == Opcode::RETURN {
                    CallOutcome::success(output)
                } else {
                    CallOutcome::revert(output)
                }));
            }
            Opcode::SELFDESTRUCT => {
                frame.require_non_static()?;
                let beneficiary = word_to_address(frame.pop()?);
                let address = frame.message.address;
                let balance = self.state.balance(&address);
                self.state.transfer(address, beneficiary, balance);
                return Ok(Step::Stop(CallOutcome::success(Vec::new())));
            }
            op => {
                return Err(VmError::InvalidOpcode {
                    pc,
                    opcode: op.code(),
                })
            }
        }
        Ok(Step::Continue)
    }
}
