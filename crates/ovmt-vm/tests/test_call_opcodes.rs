// SPDX-License-Identifier: AGPL-3.0

//! Native call and create semantics of the oracle interpreter:
//! - CALL / STATICCALL / DELEGATECALL context
//! - CREATE / CREATE2 addresses
//! - LOG0-LOG4

#[cfg(test)]
mod call_opcode_tests {
    use alloy_primitives::{Address, U256};
    use ovmt_vm::{address_to_word, create2_address, create_address, execute_code, Sandbox};

    fn push20(address: Address) -> Vec<u8> {
        let mut code = vec![0x73];
        code.extend_from_slice(address.as_slice());
        code
    }

    /// STATICCALL/DELEGATECALL to `target` with no calldata into a 32-byte
    /// return window at 0, leaving the success flag on the stack
    fn call_without_value(opcode: u8, target: Address) -> Vec<u8> {
        let mut code = vec![
            0x60, 0x20, // PUSH1 32 retLength
            0x60, 0x00, // PUSH1 0 retOffset
            0x60, 0x00, // PUSH1 0 argsLength
            0x60, 0x00, // PUSH1 0 argsOffset
        ];
        code.extend(push20(target));
        code.extend([0x61, 0xff, 0xff, opcode]); // PUSH2 gas, op
        code
    }

    /// RETURN the 32 bytes at 0
    const RETURN_WORD: [u8; 5] = [0x60, 0x20, 0x60, 0x00, 0xf3];

    /// CALLER, PUSH1 0, MSTORE, RETURN the word
    fn return_caller() -> Vec<u8> {
        let mut code = vec![0x33, 0x60, 0x00, 0x52];
        code.extend(RETURN_WORD);
        code
    }

    #[test]
    fn test_staticcall_sees_contract_as_caller() {
        let target = Address::repeat_byte(0x44);
        let mut code = call_without_value(0xfa, target);
        code.push(0x50); // POP
        code.extend(RETURN_WORD);
        let mut sandbox = Sandbox::new(&code);
        sandbox.deploy(target, return_caller());
        let result = sandbox.run(&[]);
        assert!(result.success);
        assert_eq!(
            U256::from_be_slice(&result.return_data),
            address_to_word(&sandbox.contract)
        );
    }

    #[test]
    fn test_delegatecall_keeps_caller() {
        let target = Address::repeat_byte(0x44);
        let mut code = call_without_value(0xf4, target);
        code.push(0x50); // POP
        code.extend(RETURN_WORD);
        let mut sandbox = Sandbox::new(&code);
        sandbox.deploy(target, return_caller());
        let result = sandbox.run(&[]);
        assert_eq!(
            U256::from_be_slice(&result.return_data),
            address_to_word(&sandbox.caller)
        );
    }

    #[test]
    fn test_staticcall_rejects_sstore() {
        let target = Address::repeat_byte(0x44);
        let mut code = call_without_value(0xfa, target);
        code.extend([0x60, 0x00, 0x52]); // MSTORE the success flag at 0
        code.extend(RETURN_WORD);
        let mut sandbox = Sandbox::new(&code);
        // PUSH1 1, PUSH1 0, SSTORE
        sandbox.deploy(target, vec![0x60, 0x01, 0x60, 0x00, 0x55]);
        let result = sandbox.run(&[]);
        assert!(result.success);
        assert_eq!(U256::from_be_slice(&result.return_data), U256::ZERO);
        assert!(sandbox.evm.state.account(&target).unwrap().storage.is_empty());
    }

    #[test]
    fn test_create_and_create2_addresses() {
        // Init code PUSH1 1, PUSH1 0, RETURN right-aligned in the word at 0
        let mut code = vec![0x64, 0x60, 0x01, 0x60, 0x00, 0xf3, 0x60, 0x00, 0x52];
        // CREATE(0, 27, 5)
        code.extend([0x60, 0x05, 0x60, 0x1b, 0x60, 0x00, 0xf0]);
        // CREATE2(0, 27, 5, salt 9)
        code.extend([0x60, 0x09, 0x60, 0x05, 0x60, 0x1b, 0x60, 0x00, 0xf5]);

        let sandbox_address = Sandbox::new(&[]).contract;
        let mut sandbox = Sandbox::new(&code);
        let result = sandbox.run(&[]);
        assert!(result.success);

        let init_code = [0x60, 0x01, 0x60, 0x00, 0xf3];
        assert_eq!(
            result.stack,
            vec![
                address_to_word(&create_address(&sandbox_address, 0)),
                address_to_word(&create2_address(&sandbox_address, U256::from(9u64), &init_code)),
            ]
        );
        let created = create_address(&sandbox_address, 0);
        assert_eq!(sandbox.evm.state.code(&created), &[0x00]);
    }

    #[test]
    fn test_log_topics() {
        // PUSH1 0xbb, PUSH1 0xaa, PUSH1 0, PUSH1 0, LOG2
        let result = execute_code(&[0x60, 0xbb, 0x60, 0xaa, 0x60, 0x00, 0x60, 0x00, 0xa2]);
        assert!(result.success);
        assert_eq!(result.logs.len(), 1);
        assert_eq!(
            result.logs[0].topics,
            vec![U256::from(0xaau64), U256::from(0xbbu64)]
        );
    }
}
