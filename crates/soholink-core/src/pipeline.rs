//! Request pipeline orchestrator.
//!
//! Combines the verifier, the policy boundary, and the accounting
//! collector into the single `authenticate` answer consumed by the RADIUS
//! adapter. Every request appends exactly one accounting event, with
//! latency measured from pipeline entry.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{error, info, warn};

use soholink_accounting::{AccountingEvent, Collector, Decision as EventDecision, EventType};

use crate::policy::{AuthzInput, PolicyEngine};
use crate::verifier::{DenyReason, Verifier, VerifyOutcome};

/// The resource name used for network authentication decisions.
const NETWORK_ACCESS: &str = "network_access";

/// Details about the calling network-access server, passed through to the
/// policy evaluator and the audit trail.
#[derive(Debug, Clone, Default)]
pub struct NasContext {
    pub nas_address: String,
    pub nas_identifier: String,
    pub client_ip: String,
}

/// Accounting report kinds accepted from the NAS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcctKind {
    Start,
    Stop,
    Interim,
    Unknown,
}

impl AcctKind {
    fn event_type(self) -> EventType {
        match self {
            Self::Start => EventType::AcctStart,
            Self::Stop => EventType::AcctStop,
            Self::Interim => EventType::AcctInterim,
            Self::Unknown => EventType::AcctUnknown,
        }
    }
}

/// Terminal answer of one authentication request.
#[derive(Debug, Clone)]
pub enum Decision {
    Allow {
        /// Welcome text for the Reply-Message attribute.
        reply_message: String,
        identifier: String,
        role: String,
    },
    Deny {
        /// The machine reason token; internal detail never leaves the node.
        reply_message: String,
    },
}

impl Decision {
    pub fn is_allow(&self) -> bool {
        matches!(self, Self::Allow { .. })
    }

    pub fn reply_message(&self) -> &str {
        match self {
            Self::Allow { reply_message, .. } | Self::Deny { reply_message } => reply_message,
        }
    }

    fn deny(reason: &str) -> Self {
        Self::Deny {
            reply_message: reason.to_string(),
        }
    }
}

/// The deterministic verifier → policy → accounting sequence.
pub struct Pipeline {
    verifier: Verifier,
    policy: Arc<PolicyEngine>,
    accounting: Arc<Collector>,
}

impl Pipeline {
    pub fn new(verifier: Verifier, policy: Arc<PolicyEngine>, accounting: Arc<Collector>) -> Self {
        Self {
            verifier,
            policy,
            accounting,
        }
    }

    /// Answer one authentication request. Always terminal; every path
    /// appends one accounting event.
    pub async fn authenticate(
        &self,
        nas: &NasContext,
        username: &str,
        token: &str,
    ) -> Decision {
        let start = Instant::now();

        if username.is_empty() {
            self.emit(Emit {
                event_type: EventType::AuthFailure,
                identifier: "",
                username,
                nas,
                decision: EventDecision::Deny,
                reason: "missing_username",
                policy_hash: None,
                start,
            });
            return Decision::deny("missing_username");
        }

        if token.is_empty() {
            self.emit(Emit {
                event_type: EventType::AuthFailure,
                identifier: "",
                username,
                nas,
                decision: EventDecision::Deny,
                reason: "missing_credential",
                policy_hash: None,
                start,
            });
            return Decision::deny("missing_credential");
        }

        let verified = match self.verifier.verify(username, token).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(username, error = %e, "verifier internal error");
                self.emit(Emit {
                    event_type: EventType::AuthError,
                    identifier: "",
                    username,
                    nas,
                    decision: EventDecision::Deny,
                    reason: DenyReason::InternalError.as_str(),
                    policy_hash: None,
                    start,
                });
                return Decision::deny(DenyReason::InternalError.as_str());
            }
        };

        let (verified_username, identifier, role) = match verified {
            VerifyOutcome::Denied { reason, detail } => {
                info!(username, reason = reason.as_str(), detail, "authentication denied");
                self.emit(Emit {
                    event_type: EventType::AuthFailure,
                    identifier: "",
                    username,
                    nas,
                    decision: EventDecision::Deny,
                    reason: reason.as_str(),
                    policy_hash: None,
                    start,
                });
                return Decision::deny(reason.as_str());
            }
            VerifyOutcome::Allowed {
                username,
                identifier,
                role,
            } => (username, identifier, role),
        };

        let input = AuthzInput {
            user: verified_username.clone(),
            identifier: identifier.clone(),
            role: role.clone(),
            authenticated: true,
            nas_address: nas.nas_address.clone(),
            resource: NETWORK_ACCESS.to_string(),
            timestamp: Utc::now(),
            attributes: Default::default(),
        };

        let policy_hash = self.policy.policy_hash();

        let authz = match self.policy.evaluate(&input) {
            Ok(result) => result,
            Err(e) => {
                error!(username, error = %e, "policy evaluation error");
                self.emit(Emit {
                    event_type: EventType::AuthError,
                    identifier: &identifier,
                    username,
                    nas,
                    decision: EventDecision::Deny,
                    reason: "policy_error",
                    policy_hash: Some(&policy_hash),
                    start,
                });
                return Decision::deny("policy_error");
            }
        };

        if !authz.allow {
            let reason = authz
                .deny_reasons
                .first()
                .map(String::as_str)
                .unwrap_or("policy_denied")
                .to_string();
            info!(username, reason, "policy denied");
            self.emit(Emit {
                event_type: EventType::AuthFailure,
                identifier: &identifier,
                username,
                nas,
                decision: EventDecision::Deny,
                reason: &reason,
                policy_hash: Some(&policy_hash),
                start,
            });
            return Decision::deny(&reason);
        }

        info!(
            username,
            identifier,
            role,
            latency_us = start.elapsed().as_micros() as u64,
            "authentication accepted"
        );
        self.emit(Emit {
            event_type: EventType::AuthSuccess,
            identifier: &identifier,
            username,
            nas,
            decision: EventDecision::Allow,
            reason: "authenticated",
            policy_hash: Some(&policy_hash),
            start,
        });

        Decision::Allow {
            reply_message: format!("Welcome, {verified_username}"),
            identifier,
            role,
        }
    }

    /// Record one accounting report from the NAS. Always acknowledged; the
    /// append is best-effort.
    pub fn report(&self, nas: &NasContext, kind: AcctKind, session_id: &str, username: &str) {
        let mut event = AccountingEvent::new(kind.event_type());
        event.username = username.to_string();
        event.session_id = session_id.to_string();
        event.nas_address = nas.nas_address.clone();
        event.nas_identifier = nas.nas_identifier.clone();
        event.client_ip = nas.client_ip.clone();

        if let Err(e) = self.accounting.record(&event) {
            warn!(error = %e, "failed to record accounting report");
        }
    }

    fn emit(&self, emit: Emit<'_>) {
        let mut event = AccountingEvent::new(emit.event_type);
        event.user_id = emit.identifier.to_string();
        event.username = emit.username.to_string();
        event.nas_address = emit.nas.nas_address.clone();
        event.nas_identifier = emit.nas.nas_identifier.clone();
        event.client_ip = emit.nas.client_ip.clone();
        event.decision = Some(emit.decision);
        event.reason = emit.reason.to_string();
        event.latency_us = emit.start.elapsed().as_micros() as u64;
        if let Some(hash) = emit.policy_hash {
            event.policy_hash = hash.to_string();
        }

        // An accounting failure never changes the response.
        if let Err(e) = self.accounting.record(&event) {
            warn!(error = %e, "failed to record accounting event");
        }
    }
}

struct Emit<'a> {
    event_type: EventType,
    identifier: &'a str,
    username: &'a str,
    nas: &'a NasContext,
    decision: EventDecision,
    reason: &'a str,
    policy_hash: Option<&'a str>,
    start: Instant,
}

#[cfg(test)]
mod tests {
    use super::*;
    use soholink_crypto::credential::encode;
    use soholink_crypto::encode_did_key;
    use soholink_crypto::keys::generate_keypair;
    use soholink_store::Store;
    use std::time::Duration;

    const ALLOW_AUTHENTICATED: &str = r#"{
        "name": "default",
        "rules": [
            {"id": "allow-authenticated", "effect": "allow", "when": {"authenticated": true}}
        ]
    }"#;

    struct Fixture {
        pipeline: Pipeline,
        store: Store,
        accounting: Arc<Collector>,
        _policy_dir: tempfile::TempDir,
        _acct_dir: tempfile::TempDir,
    }

    async fn fixture(policy_document: &str) -> Fixture {
        let store = Store::open_in_memory().await.unwrap();

        let policy_dir = tempfile::tempdir().unwrap();
        std::fs::write(policy_dir.path().join("main.policy.json"), policy_document).unwrap();
        let policy = Arc::new(PolicyEngine::load(policy_dir.path()).unwrap());

        let acct_dir = tempfile::tempdir().unwrap();
        let accounting = Arc::new(Collector::new(acct_dir.path()).unwrap());

        let verifier = Verifier::new(
            store.clone(),
            Duration::from_secs(3600),
            Duration::from_secs(300),
        );

        Fixture {
            pipeline: Pipeline::new(verifier, policy, Arc::clone(&accounting)),
            store,
            accounting,
            _policy_dir: policy_dir,
            _acct_dir: acct_dir,
        }
    }

    fn nas() -> NasContext {
        NasContext {
            nas_address: "192.0.2.1".to_string(),
            nas_identifier: "ap-garage".to_string(),
            client_ip: "192.0.2.1:50000".to_string(),
        }
    }

    fn last_event(accounting: &Collector) -> AccountingEvent {
        let content = std::fs::read_to_string(accounting.current_file()).unwrap();
        let line = content.lines().last().expect("no events recorded");
        serde_json::from_str(line).unwrap()
    }

    #[tokio::test]
    async fn happy_path_allows_and_records_success() {
        let fx = fixture(ALLOW_AUTHENTICATED).await;
        let key = generate_keypair();
        fx.store
            .add_user(
                "alice",
                &encode_did_key(&key.verifying_key()),
                key.verifying_key().as_bytes(),
                "basic",
            )
            .await
            .unwrap();

        let token = encode("alice", &key).unwrap();
        let decision = fx.pipeline.authenticate(&nas(), "alice", &token).await;

        match decision {
            Decision::Allow {
                reply_message,
                identifier,
                role,
            } => {
                assert_eq!(reply_message, "Welcome, alice");
                assert!(identifier.starts_with("did:key:z"));
                assert_eq!(role, "basic");
            }
            Decision::Deny { reply_message } => panic!("denied: {reply_message}"),
        }

        assert_eq!(fx.accounting.event_count(), 1);
        let event = last_event(&fx.accounting);
        assert_eq!(event.event_type, EventType::AuthSuccess);
        assert_eq!(event.decision, Some(EventDecision::Allow));
        assert_eq!(event.reason, "authenticated");
        assert_eq!(event.nas_identifier, "ap-garage");
        assert!(!event.policy_hash.is_empty());
    }

    #[tokio::test]
    async fn missing_username_and_credential() {
        let fx = fixture(ALLOW_AUTHENTICATED).await;

        let decision = fx.pipeline.authenticate(&nas(), "", "sometoken").await;
        assert_eq!(decision.reply_message(), "missing_username");

        let decision = fx.pipeline.authenticate(&nas(), "alice", "").await;
        assert_eq!(decision.reply_message(), "missing_credential");

        assert_eq!(fx.accounting.event_count(), 2);
        let event = last_event(&fx.accounting);
        assert_eq!(event.event_type, EventType::AuthFailure);
        assert_eq!(event.reason, "missing_credential");
    }

    #[tokio::test]
    async fn verifier_deny_reason_reaches_the_reply() {
        let fx = fixture(ALLOW_AUTHENTICATED).await;
        let key = generate_keypair();
        let token = encode("ghost", &key).unwrap();

        let decision = fx.pipeline.authenticate(&nas(), "ghost", &token).await;
        assert!(!decision.is_allow());
        assert_eq!(decision.reply_message(), "user_not_found");

        let event = last_event(&fx.accounting);
        assert_eq!(event.reason, "user_not_found");
        assert_eq!(event.decision, Some(EventDecision::Deny));
    }

    #[tokio::test]
    async fn policy_deny_uses_first_reason() {
        let deny_all = r#"{
            "rules": [
                {"id": "deny-all", "effect": "deny", "reason": "maintenance_window", "when": {}}
            ]
        }"#;
        let fx = fixture(deny_all).await;
        let key = generate_keypair();
        fx.store
            .add_user(
                "alice",
                &encode_did_key(&key.verifying_key()),
                key.verifying_key().as_bytes(),
                "basic",
            )
            .await
            .unwrap();

        let token = encode("alice", &key).unwrap();
        let decision = fx.pipeline.authenticate(&nas(), "alice", &token).await;
        assert_eq!(decision.reply_message(), "maintenance_window");

        let event = last_event(&fx.accounting);
        assert_eq!(event.event_type, EventType::AuthFailure);
        assert_eq!(event.reason, "maintenance_window");
        assert!(!event.policy_hash.is_empty());
    }

    #[tokio::test]
    async fn report_appends_accounting_event() {
        let fx = fixture(ALLOW_AUTHENTICATED).await;

        fx.pipeline
            .report(&nas(), AcctKind::Start, "session-42", "alice");

        let event = last_event(&fx.accounting);
        assert_eq!(event.event_type, EventType::AcctStart);
        assert_eq!(event.session_id, "session-42");
        assert_eq!(event.username, "alice");
    }
}
