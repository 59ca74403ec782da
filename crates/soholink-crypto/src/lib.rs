//! SoHoLINK Crypto
//!
//! Cryptographic primitives for the SoHoLINK AAA node: Ed25519 identity
//! keys with PKCS#8 storage, the `did:key` codec, the 84-byte credential
//! token, and the SHA3-256 Merkle tree used for accounting commitments.

pub mod credential;
pub mod did;
pub mod hash;
pub mod keys;
pub mod merkle;

pub use credential::{Credential, CREDENTIAL_LEN};
pub use did::{decode_did_key, encode_did_key};
pub use hash::sha3_256;
pub use merkle::{verify_proof, MerkleTree, ProofStep};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("invalid DID: {0}")]
    InvalidDid(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid credential: {0}")]
    InvalidCredential(String),

    #[error("key file error: {0}")]
    KeyFile(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot build Merkle tree with zero leaves")]
    EmptyTree,

    #[error("leaf index {index} out of range [0, {count})")]
    LeafIndexOutOfRange { index: usize, count: usize },
}

pub type Result<T> = std::result::Result<T, CryptoError>;
