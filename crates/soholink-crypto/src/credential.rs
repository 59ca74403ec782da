//! The 84-byte signed credential token.
//!
//! Binary layout: 4-byte big-endian Unix timestamp, 8-byte random nonce,
//! 8-byte username digest (first 8 bytes of SHA3-256 over the UTF-8
//! username), 64-byte Ed25519 signature over the first 20 bytes. The wire
//! form is base64url without padding, at most 113 characters, which fits
//! the 128-byte RADIUS PAP password attribute.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::hash::sha3_256;
use crate::{CryptoError, Result};

pub const TIMESTAMP_LEN: usize = 4;
pub const NONCE_LEN: usize = 8;
pub const DIGEST_LEN: usize = 8;
pub const SIGNATURE_LEN: usize = 64;

/// Length of the signed pre-image (timestamp + nonce + username digest).
pub const MESSAGE_LEN: usize = TIMESTAMP_LEN + NONCE_LEN + DIGEST_LEN;

/// Total decoded token length.
pub const CREDENTIAL_LEN: usize = MESSAGE_LEN + SIGNATURE_LEN;

/// A parsed credential token.
#[derive(Debug, Clone)]
pub struct Credential {
    pub timestamp: DateTime<Utc>,
    pub nonce: [u8; NONCE_LEN],
    pub username_digest: [u8; DIGEST_LEN],
    pub signature: Signature,
    /// The signed pre-image, kept verbatim for signature verification.
    pub message: [u8; MESSAGE_LEN],
}

impl Credential {
    /// Lowercase hex of the nonce, as stored in the nonce cache.
    pub fn nonce_hex(&self) -> String {
        hex::encode(self.nonce)
    }
}

/// First 8 bytes of SHA3-256 over the UTF-8 username.
pub fn username_digest(username: &str) -> [u8; DIGEST_LEN] {
    let hash = sha3_256(username.as_bytes());
    let mut digest = [0u8; DIGEST_LEN];
    digest.copy_from_slice(&hash[..DIGEST_LEN]);
    digest
}

/// Create a signed credential token for `username`, stamped with the
/// current time.
pub fn encode(username: &str, key: &SigningKey) -> Result<String> {
    encode_at(username, key, Utc::now())
}

/// Create a signed credential token with a caller-supplied timestamp.
/// Used by tests to inject clock skew.
pub fn encode_at(username: &str, key: &SigningKey, timestamp: DateTime<Utc>) -> Result<String> {
    if username.is_empty() {
        return Err(CryptoError::InvalidCredential(
            "username cannot be empty".into(),
        ));
    }

    let ts = u32::try_from(timestamp.timestamp())
        .map_err(|_| CryptoError::InvalidCredential("timestamp out of range".into()))?;

    let mut raw = [0u8; CREDENTIAL_LEN];
    raw[..TIMESTAMP_LEN].copy_from_slice(&ts.to_be_bytes());
    OsRng.fill_bytes(&mut raw[TIMESTAMP_LEN..TIMESTAMP_LEN + NONCE_LEN]);
    raw[TIMESTAMP_LEN + NONCE_LEN..MESSAGE_LEN].copy_from_slice(&username_digest(username));

    let signature = key.sign(&raw[..MESSAGE_LEN]);
    raw[MESSAGE_LEN..].copy_from_slice(&signature.to_bytes());

    Ok(URL_SAFE_NO_PAD.encode(raw))
}

/// Parse a base64url credential token into its fields.
pub fn decode(token: &str) -> Result<Credential> {
    let raw = URL_SAFE_NO_PAD
        .decode(token)
        .map_err(|e| CryptoError::InvalidCredential(format!("invalid encoding: {e}")))?;

    if raw.len() != CREDENTIAL_LEN {
        return Err(CryptoError::InvalidCredential(format!(
            "expected {CREDENTIAL_LEN} bytes, got {}",
            raw.len()
        )));
    }

    let mut ts_bytes = [0u8; TIMESTAMP_LEN];
    ts_bytes.copy_from_slice(&raw[..TIMESTAMP_LEN]);
    let timestamp = DateTime::from_timestamp(i64::from(u32::from_be_bytes(ts_bytes)), 0)
        .ok_or_else(|| CryptoError::InvalidCredential("timestamp out of range".into()))?;

    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&raw[TIMESTAMP_LEN..TIMESTAMP_LEN + NONCE_LEN]);

    let mut username_digest = [0u8; DIGEST_LEN];
    username_digest.copy_from_slice(&raw[TIMESTAMP_LEN + NONCE_LEN..MESSAGE_LEN]);

    let mut sig_bytes = [0u8; SIGNATURE_LEN];
    sig_bytes.copy_from_slice(&raw[MESSAGE_LEN..]);

    let mut message = [0u8; MESSAGE_LEN];
    message.copy_from_slice(&raw[..MESSAGE_LEN]);

    Ok(Credential {
        timestamp,
        nonce,
        username_digest,
        signature: Signature::from_bytes(&sig_bytes),
        message,
    })
}
