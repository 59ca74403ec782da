//! Offline credential verification.
//!
//! The full check pipeline for a submitted `(username, token)` pair. Every
//! operation is local: parse, user lookup, username binding, signature,
//! temporal window, replay, revocation. No network calls.

use std::time::Duration;

use ed25519_dalek::{Verifier as _, VerifyingKey};
use subtle::ConstantTimeEq;
use tracing::warn;

use soholink_crypto::credential::{self, username_digest};
use soholink_crypto::decode_did_key;
use soholink_store::{Store, StoreError, User};

/// Machine-readable deny reasons, stable across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    InvalidCredential,
    UserNotFound,
    UsernameMismatch,
    InvalidSignature,
    CredentialFuture,
    CredentialExpired,
    NonceReplay,
    UserRevoked,
    InternalError,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidCredential => "invalid_credential",
            Self::UserNotFound => "user_not_found",
            Self::UsernameMismatch => "username_mismatch",
            Self::InvalidSignature => "invalid_signature",
            Self::CredentialFuture => "credential_future",
            Self::CredentialExpired => "credential_expired",
            Self::NonceReplay => "nonce_replay",
            Self::UserRevoked => "user_revoked",
            Self::InternalError => "internal_error",
        }
    }
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a verification run.
#[derive(Debug, Clone)]
pub enum VerifyOutcome {
    Allowed {
        username: String,
        identifier: String,
        role: String,
    },
    Denied {
        reason: DenyReason,
        /// Human-readable detail for structured logs; never sent to the NAS.
        detail: String,
    },
}

impl VerifyOutcome {
    fn denied(reason: DenyReason, detail: impl Into<String>) -> Self {
        Self::Denied {
            reason,
            detail: detail.into(),
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

/// Offline verifier over the identity store.
#[derive(Clone)]
pub struct Verifier {
    store: Store,
    credential_ttl: Duration,
    clock_skew_tolerance: Duration,
}

impl Verifier {
    pub fn new(store: Store, credential_ttl: Duration, clock_skew_tolerance: Duration) -> Self {
        Self {
            store,
            credential_ttl,
            clock_skew_tolerance,
        }
    }

    /// Run the complete offline verification pipeline.
    ///
    /// Check order is fixed; a failed step short-circuits the rest. The
    /// username binding check runs before signature verification so a
    /// token minted for one existing user is rejected for another without
    /// consulting either key.
    ///
    /// A store failure returns `Err`; the caller must treat that as a deny
    /// (`internal_error`) and log the underlying error — never as success.
    pub async fn verify(
        &self,
        username: &str,
        token: &str,
    ) -> Result<VerifyOutcome, StoreError> {
        // Step 1: parse the token.
        let cred = match credential::decode(token) {
            Ok(cred) => cred,
            Err(e) => {
                return Ok(VerifyOutcome::denied(
                    DenyReason::InvalidCredential,
                    e.to_string(),
                ))
            }
        };

        // Step 2: look up the user.
        let Some(user) = self.store.get_user_by_username(username).await? else {
            return Ok(VerifyOutcome::denied(
                DenyReason::UserNotFound,
                format!("user '{username}' not found"),
            ));
        };

        // Step 3: username binding, in constant time.
        let expected = username_digest(username);
        if !bool::from(expected.as_slice().ct_eq(cred.username_digest.as_slice())) {
            return Ok(VerifyOutcome::denied(
                DenyReason::UsernameMismatch,
                "credential was not issued for this username",
            ));
        }

        // Step 4: resolve the public key, preferring the identifier and
        // falling back to the stored key bytes.
        let public_key = match decode_did_key(&user.identifier) {
            Ok(key) => key,
            Err(_) => match stored_public_key(&user) {
                Some(key) => key,
                None => {
                    return Ok(VerifyOutcome::denied(
                        DenyReason::InvalidSignature,
                        "stored public key is not a valid Ed25519 key",
                    ))
                }
            },
        };

        // Step 5: verify the signature over the 20-byte pre-image.
        if public_key.verify(&cred.message, &cred.signature).is_err() {
            return Ok(VerifyOutcome::denied(
                DenyReason::InvalidSignature,
                "Ed25519 signature verification failed",
            ));
        }

        // Step 6: temporal window with clock-skew tolerance.
        let age_secs = (chrono::Utc::now() - cred.timestamp).num_seconds();
        let skew_secs = duration_secs(self.clock_skew_tolerance);
        let ttl_secs = duration_secs(self.credential_ttl);

        if age_secs < -skew_secs {
            return Ok(VerifyOutcome::denied(
                DenyReason::CredentialFuture,
                format!(
                    "credential timestamp is {}s in the future (max allowed: {skew_secs}s)",
                    -age_secs
                ),
            ));
        }
        if age_secs > ttl_secs.saturating_add(skew_secs) {
            return Ok(VerifyOutcome::denied(
                DenyReason::CredentialExpired,
                format!(
                    "credential expired {}s ago (ttl: {ttl_secs}s, skew tolerance: {skew_secs}s)",
                    age_secs - ttl_secs
                ),
            ));
        }

        // Step 7: replay check.
        let nonce_hex = cred.nonce_hex();
        if self.store.check_nonce(&nonce_hex).await? {
            return Ok(VerifyOutcome::denied(
                DenyReason::NonceReplay,
                "credential token has already been used",
            ));
        }

        // Step 8: revocation check.
        if self.store.is_revoked(&user.identifier).await? {
            return Ok(VerifyOutcome::denied(
                DenyReason::UserRevoked,
                format!("user '{username}' has been revoked"),
            ));
        }

        // Step 9: record the nonce. A failed write is logged, not fatal;
        // losing the insert race to a concurrent request is a replay.
        match self.store.record_nonce(&nonce_hex).await {
            Ok(true) => {}
            Ok(false) => {
                return Ok(VerifyOutcome::denied(
                    DenyReason::NonceReplay,
                    "credential token has already been used",
                ))
            }
            Err(e) => warn!(error = %e, "failed to record nonce"),
        }

        Ok(VerifyOutcome::Allowed {
            username: user.username,
            identifier: user.identifier,
            role: user.role,
        })
    }
}

fn stored_public_key(user: &User) -> Option<VerifyingKey> {
    let bytes: [u8; 32] = user.public_key.as_slice().try_into().ok()?;
    VerifyingKey::from_bytes(&bytes).ok()
}

fn duration_secs(d: Duration) -> i64 {
    i64::try_from(d.as_secs()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ed25519_dalek::SigningKey;
    use soholink_crypto::credential::{encode, encode_at};
    use soholink_crypto::encode_did_key;
    use soholink_crypto::keys::generate_keypair;

    const HOUR: Duration = Duration::from_secs(3600);
    const FIVE_MIN: Duration = Duration::from_secs(300);

    async fn add_user(store: &Store, username: &str, key: &SigningKey, role: &str) {
        let public = key.verifying_key();
        store
            .add_user(username, &encode_did_key(&public), public.as_bytes(), role)
            .await
            .unwrap();
    }

    async fn setup() -> (Verifier, Store, SigningKey) {
        let store = Store::open_in_memory().await.unwrap();
        let key = generate_keypair();
        add_user(&store, "alice", &key, "basic").await;

        let verifier = Verifier::new(store.clone(), HOUR, FIVE_MIN);
        (verifier, store, key)
    }

    fn deny_reason(outcome: &VerifyOutcome) -> DenyReason {
        match outcome {
            VerifyOutcome::Denied { reason, .. } => *reason,
            VerifyOutcome::Allowed { .. } => panic!("expected a deny"),
        }
    }

    #[tokio::test]
    async fn valid_credential_is_allowed() {
        let (verifier, _, key) = setup().await;
        let token = encode("alice", &key).unwrap();

        match verifier.verify("alice", &token).await.unwrap() {
            VerifyOutcome::Allowed {
                username,
                identifier,
                role,
            } => {
                assert_eq!(username, "alice");
                assert!(identifier.starts_with("did:key:z"));
                assert_eq!(role, "basic");
            }
            VerifyOutcome::Denied { reason, detail } => {
                panic!("expected allow, got {reason}: {detail}")
            }
        }
    }

    #[tokio::test]
    async fn unknown_user_is_denied() {
        let (verifier, _, _) = setup().await;
        let ghost_key = generate_keypair();
        let token = encode("ghost", &ghost_key).unwrap();

        let outcome = verifier.verify("ghost", &token).await.unwrap();
        assert_eq!(deny_reason(&outcome), DenyReason::UserNotFound);
    }

    #[tokio::test]
    async fn malformed_tokens_are_invalid_credential() {
        let (verifier, _, _) = setup().await;

        for token in ["", "!!!invalid!!!", "c2hvcnQ"] {
            let outcome = verifier.verify("alice", token).await.unwrap();
            assert_eq!(
                deny_reason(&outcome),
                DenyReason::InvalidCredential,
                "token {token:?}"
            );
        }
    }

    #[tokio::test]
    async fn wrong_key_is_invalid_signature() {
        let (verifier, _, _) = setup().await;
        let other = generate_keypair();
        let token = encode("alice", &other).unwrap();

        let outcome = verifier.verify("alice", &token).await.unwrap();
        assert_eq!(deny_reason(&outcome), DenyReason::InvalidSignature);
    }

    #[tokio::test]
    async fn cross_user_token_is_username_mismatch() {
        let (verifier, store, _) = setup().await;
        let bob_key = generate_keypair();
        add_user(&store, "bob", &bob_key, "basic").await;

        // Bob's token presented as alice: rejected before any key is consulted.
        let bob_token = encode("bob", &bob_key).unwrap();
        let outcome = verifier.verify("alice", &bob_token).await.unwrap();
        assert_eq!(deny_reason(&outcome), DenyReason::UsernameMismatch);

        // The same token still works for bob.
        let outcome = verifier.verify("bob", &bob_token).await.unwrap();
        assert!(outcome.is_allowed());
    }

    #[tokio::test]
    async fn cross_user_token_rejected_in_both_directions() {
        let (verifier, store, alice_key) = setup().await;
        add_user(&store, "bob", &generate_keypair(), "basic").await;

        let alice_token = encode("alice", &alice_key).unwrap();
        let outcome = verifier.verify("bob", &alice_token).await.unwrap();
        assert_eq!(deny_reason(&outcome), DenyReason::UsernameMismatch);
    }

    #[tokio::test]
    async fn replayed_token_is_denied() {
        let (verifier, _, key) = setup().await;
        let token = encode("alice", &key).unwrap();

        assert!(verifier.verify("alice", &token).await.unwrap().is_allowed());

        let outcome = verifier.verify("alice", &token).await.unwrap();
        assert_eq!(deny_reason(&outcome), DenyReason::NonceReplay);
    }

    #[tokio::test]
    async fn revoked_user_is_denied() {
        let (verifier, store, key) = setup().await;
        store.revoke_user("alice", "test").await.unwrap();

        // The token itself is perfectly valid; revocation still wins.
        let token = encode("alice", &key).unwrap();
        let outcome = verifier.verify("alice", &token).await.unwrap();
        assert_eq!(deny_reason(&outcome), DenyReason::UserRevoked);
    }

    #[tokio::test]
    async fn expired_credential_is_denied() {
        let (_, store, key) = setup().await;
        let verifier = Verifier::new(store, Duration::ZERO, Duration::ZERO);

        let old = Utc::now() - chrono::Duration::seconds(10);
        let token = encode_at("alice", &key, old).unwrap();

        let outcome = verifier.verify("alice", &token).await.unwrap();
        assert_eq!(deny_reason(&outcome), DenyReason::CredentialExpired);
    }

    #[tokio::test]
    async fn far_future_credential_is_denied() {
        let (verifier, _, key) = setup().await;

        let future = Utc::now() + chrono::Duration::minutes(10);
        let token = encode_at("alice", &key, future).unwrap();

        let outcome = verifier.verify("alice", &token).await.unwrap();
        assert_eq!(deny_reason(&outcome), DenyReason::CredentialFuture);
    }

    #[tokio::test]
    async fn slight_clock_skew_is_tolerated() {
        let (verifier, _, key) = setup().await;

        let ahead = Utc::now() + chrono::Duration::minutes(2);
        let token = encode_at("alice", &key, ahead).unwrap();

        assert!(verifier.verify("alice", &token).await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn clock_skew_boundaries() {
        let (_, store, key) = setup().await;
        let verifier = Verifier::new(
            store,
            Duration::from_secs(600),  // L = 10 min
            Duration::from_secs(300),  // tau = 5 min
        );

        let cases: &[(i64, Option<DenyReason>)] = &[
            (-2, None),
            (-10, None),
            (-14, None),
            (-16, Some(DenyReason::CredentialExpired)),
            (4, None),
            (5, None),
            (6, Some(DenyReason::CredentialFuture)),
        ];

        for &(offset_min, expected) in cases {
            let at = Utc::now() + chrono::Duration::minutes(offset_min);
            let token = encode_at("alice", &key, at).unwrap();
            let outcome = verifier.verify("alice", &token).await.unwrap();

            match expected {
                None => assert!(
                    outcome.is_allowed(),
                    "offset {offset_min}min should be allowed: {outcome:?}"
                ),
                Some(reason) => assert_eq!(
                    deny_reason(&outcome),
                    reason,
                    "offset {offset_min}min"
                ),
            }
        }
    }

    #[tokio::test]
    async fn undecodable_identifier_falls_back_to_stored_key() {
        let store = Store::open_in_memory().await.unwrap();
        let key = generate_keypair();
        store
            .add_user(
                "legacy",
                "opaque-identifier",
                key.verifying_key().as_bytes(),
                "basic",
            )
            .await
            .unwrap();

        let verifier = Verifier::new(store, HOUR, FIVE_MIN);
        let token = encode("legacy", &key).unwrap();
        assert!(verifier.verify("legacy", &token).await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn identifier_key_takes_precedence_over_stored_bytes() {
        let store = Store::open_in_memory().await.unwrap();
        let key = generate_keypair();
        let stale = generate_keypair();
        store
            .add_user(
                "alice",
                &encode_did_key(&key.verifying_key()),
                stale.verifying_key().as_bytes(),
                "basic",
            )
            .await
            .unwrap();

        let verifier = Verifier::new(store, HOUR, FIVE_MIN);
        let token = encode("alice", &key).unwrap();
        assert!(verifier.verify("alice", &token).await.unwrap().is_allowed());
    }

    #[test]
    fn deny_reasons_are_stable_tokens() {
        assert_eq!(DenyReason::InvalidCredential.as_str(), "invalid_credential");
        assert_eq!(DenyReason::UserNotFound.as_str(), "user_not_found");
        assert_eq!(DenyReason::UsernameMismatch.as_str(), "username_mismatch");
        assert_eq!(DenyReason::InvalidSignature.as_str(), "invalid_signature");
        assert_eq!(DenyReason::CredentialFuture.as_str(), "credential_future");
        assert_eq!(DenyReason::CredentialExpired.as_str(), "credential_expired");
        assert_eq!(DenyReason::NonceReplay.as_str(), "nonce_replay");
        assert_eq!(DenyReason::UserRevoked.as_str(), "user_revoked");
        assert_eq!(DenyReason::InternalError.as_str(), "internal_error");
    }
}
