//! Row types for the identity store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A registered user.
///
/// The `(username, identifier)` pair is immutable after creation and the
/// public key bytes match the key embedded in the identifier.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    /// Self-certifying `did:key` identifier carrying the Ed25519 public key.
    pub identifier: String,
    pub public_key: Vec<u8>,
    pub role: String,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }
}

/// One revocation entry. Repeat entries per identifier are permitted and
/// kept as audit history.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Revocation {
    pub id: i64,
    pub identifier: String,
    pub reason: Option<String>,
    pub revoked_at: DateTime<Utc>,
}
