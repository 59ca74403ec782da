//! SHA3-256 helpers shared by the credential and Merkle modules.

use sha3::{Digest, Sha3_256};

/// Compute SHA3-256 over a single byte slice.
pub fn sha3_256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha3_256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Compute SHA3-256 over multiple byte slices in order.
pub fn sha3_256_multi(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha3_256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha3_256_is_32_bytes() {
        assert_eq!(sha3_256(b"hello").len(), 32);
    }

    #[test]
    fn multi_matches_concatenation() {
        assert_eq!(sha3_256_multi(&[b"foo", b"bar"]), sha3_256(b"foobar"));
    }
}
