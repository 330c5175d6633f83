// SPDX-License-Identifier: AGPL-3.0

//! Hashing utilities

use sha3::{Digest, Keccak256};

/// Compute Keccak256 hash
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

/// Compute function selector (first 4 bytes of keccak256)
pub fn function_selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    let mut selector = [0u8; 4];
    selector.copy_from_slice(&hash[..4]);
    selector
}

/// Selector of a parameterless method, i.e. `keccak256("name()")[..4]`.
///
/// Execution manager methods are addressed this way regardless of the
/// arguments they actually read from calldata.
pub fn method_id(name: &str) -> [u8; 4] {
    function_selector(&format!("{}()", name))
}

/// Hex form of a selector, `0x`-prefixed
pub fn selector_hex(selector: &[u8; 4]) -> String {
    format!("0x{}", hex::encode(selector))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keccak256_empty() {
        assert_eq!(
            hex::encode(keccak256(b"")),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn test_function_selector() {
        assert_eq!(function_selector("transfer(address,uint256)"), [0xa9, 0x05, 0x9c, 0xbb]);
    }

    #[test]
    fn test_method_id_appends_empty_parens() {
        assert_eq!(method_id("totalSupply"), [0x18, 0x16, 0x0d, 0xdd]);
        assert_eq!(method_id("ovmSLOAD"), function_selector("ovmSLOAD()"));
    }

    #[test]
    fn test_selector_hex() {
        assert_eq!(selector_hex(&[0xa9, 0x05, 0x9c, 0xbb]), "0xa9059cbb");
    }
}
