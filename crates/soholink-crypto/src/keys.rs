//! Ed25519 keypair generation and PKCS#8 PEM storage.
//!
//! Private keys live on disk as PKCS#8 PEM files with mode 0600, one per
//! user plus the node's own key.

use std::fs;
use std::path::Path;

use ed25519_dalek::pkcs8::spki::der::pem::LineEnding;
use ed25519_dalek::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use zeroize::Zeroize;

use crate::{CryptoError, Result};

/// Generate a fresh Ed25519 keypair from the OS random source.
pub fn generate_keypair() -> SigningKey {
    SigningKey::generate(&mut OsRng)
}

/// Write a private key to a PKCS#8 PEM file with restrictive permissions.
pub fn save_signing_key(path: &Path, key: &SigningKey) -> Result<()> {
    let pem = key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| CryptoError::KeyFile(format!("PKCS#8 encoding failed: {e}")))?;

    fs::write(path, pem.as_bytes())?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }

    Ok(())
}

/// Read a private key from a PKCS#8 PEM file.
pub fn load_signing_key(path: &Path) -> Result<SigningKey> {
    let mut pem = fs::read_to_string(path)?;
    let key = SigningKey::from_pkcs8_pem(&pem)
        .map_err(|e| CryptoError::KeyFile(format!("not an Ed25519 PKCS#8 key: {e}")));
    pem.zeroize();
    key
}

/// Read a private key file and return only the public half.
pub fn load_verifying_key(path: &Path) -> Result<VerifyingKey> {
    Ok(load_signing_key(path)?.verifying_key())
}
