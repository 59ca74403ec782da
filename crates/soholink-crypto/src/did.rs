//! `did:key` codec for Ed25519 public keys.
//!
//! Format: `did:key:z<base58btc(0xED 0x01 || public_key_bytes)>`, where
//! `0xED 0x01` is the multicodec prefix assigned to Ed25519 public keys.

use ed25519_dalek::VerifyingKey;

use crate::{CryptoError, Result};

/// Multicodec prefix for an Ed25519 public key.
const ED25519_MULTICODEC_PREFIX: [u8; 2] = [0xed, 0x01];

/// The fixed leading text of every encoded identifier, including the
/// base58btc multibase marker `z`.
const DID_KEY_PREFIX: &str = "did:key:z";

/// Length of the multicodec prefix plus a 32-byte public key.
const PREFIXED_KEY_LEN: usize = 34;

/// Encode an Ed25519 public key as a `did:key` string.
pub fn encode_did_key(key: &VerifyingKey) -> String {
    let mut prefixed = Vec::with_capacity(PREFIXED_KEY_LEN);
    prefixed.extend_from_slice(&ED25519_MULTICODEC_PREFIX);
    prefixed.extend_from_slice(key.as_bytes());

    format!("{DID_KEY_PREFIX}{}", bs58::encode(prefixed).into_string())
}

/// Decode a `did:key` string back into an Ed25519 public key.
///
/// Rejects any prefix mismatch, base58 error, or decoded payload whose
/// length is not exactly 34 bytes.
pub fn decode_did_key(did: &str) -> Result<VerifyingKey> {
    let encoded = did.strip_prefix(DID_KEY_PREFIX).ok_or_else(|| {
        CryptoError::InvalidDid(format!("must start with '{DID_KEY_PREFIX}'"))
    })?;

    let decoded = bs58::decode(encoded)
        .into_vec()
        .map_err(|e| CryptoError::InvalidDid(format!("base58 decode failed: {e}")))?;

    if decoded.len() != PREFIXED_KEY_LEN {
        return Err(CryptoError::InvalidDid(format!(
            "decoded length {} (expected {PREFIXED_KEY_LEN})",
            decoded.len()
        )));
    }

    if decoded[..2] != ED25519_MULTICODEC_PREFIX {
        return Err(CryptoError::InvalidDid(
            "multicodec prefix is not Ed25519 (0xed01)".into(),
        ));
    }

    let mut key_bytes = [0u8; 32];
    key_bytes.copy_from_slice(&decoded[2..]);

    VerifyingKey::from_bytes(&key_bytes)
        .map_err(|e| CryptoError::InvalidDid(format!("invalid Ed25519 public key: {e}")))
}
