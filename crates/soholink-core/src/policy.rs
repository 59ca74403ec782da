//! Authorization policy boundary.
//!
//! Holds a compiled rule set loaded from `*.policy.json` documents in the
//! policy directory and evaluates structured inputs against it. The
//! compiled set is swapped atomically under a writer lock on reload;
//! evaluations hold the read side for their duration, so in-flight
//! evaluations are never interrupted.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use thiserror::Error;
use tracing::info;

/// File suffix of policy rule documents.
pub const POLICY_EXTENSION: &str = ".policy.json";

#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse policy file {file}: {source}")]
    Parse {
        file: String,
        source: serde_json::Error,
    },

    #[error("no policy files found in {}", .0.display())]
    NoPolicies(PathBuf),
}

/// Input handed to the rule set for one authorization decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthzInput {
    pub user: String,
    pub identifier: String,
    pub role: String,
    pub authenticated: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub nas_address: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, String>,
}

/// Outcome of one evaluation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthzResult {
    pub allow: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deny_reasons: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    Allow,
    Deny,
}

/// Conditions a rule matches against. Absent fields are wildcards; a rule
/// with an empty `when` matches every input.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Match {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nas_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authenticated: Option<bool>,
}

impl Match {
    fn matches(&self, input: &AuthzInput) -> bool {
        fn field(want: &Option<String>, have: &str) -> bool {
            want.as_deref().is_none_or(|w| w == have)
        }

        field(&self.user, &input.user)
            && field(&self.identifier, &input.identifier)
            && field(&self.role, &input.role)
            && field(&self.resource, &input.resource)
            && field(&self.nas_address, &input.nas_address)
            && self.authenticated.is_none_or(|a| a == input.authenticated)
    }
}

/// One rule of a policy document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub effect: Effect,
    /// Deny reason reported when this rule fires; defaults to the rule id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub when: Match,
}

/// On-disk shape of one `*.policy.json` file.
#[derive(Debug, Deserialize)]
struct PolicyDocument {
    #[allow(dead_code)]
    #[serde(default)]
    name: String,
    #[serde(default)]
    rules: Vec<Rule>,
}

#[derive(Debug)]
struct CompiledPolicy {
    rules: Vec<Rule>,
    files: Vec<String>,
    /// Hex SHA3-256 over the sorted file names and contents.
    hash: String,
}

/// The policy evaluation boundary.
#[derive(Debug)]
pub struct PolicyEngine {
    dir: PathBuf,
    compiled: RwLock<Arc<CompiledPolicy>>,
}

impl PolicyEngine {
    /// Compile every policy document in `dir`. Fails when the directory
    /// holds no policy files.
    pub fn load(dir: &Path) -> Result<Self, PolicyError> {
        let compiled = compile(dir)?;
        info!(
            dir = %dir.display(),
            files = compiled.files.len(),
            rules = compiled.rules.len(),
            hash = %compiled.hash,
            "policy set compiled"
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            compiled: RwLock::new(Arc::new(compiled)),
        })
    }

    /// Recompile from disk and swap the compiled set. In-flight
    /// evaluations finish against the set they started with.
    pub fn reload(&self) -> Result<(), PolicyError> {
        let fresh = Arc::new(compile(&self.dir)?);
        let mut slot = self.compiled.write().unwrap_or_else(|e| e.into_inner());
        *slot = fresh;
        Ok(())
    }

    /// Evaluate one input against the compiled rules.
    ///
    /// No matching rule means no result: `allow = false` with the single
    /// reason `no_policy_result`. Otherwise the input is allowed iff at
    /// least one allow rule matches and no deny rule does; reasons of
    /// matching deny rules are collected in document order.
    pub fn evaluate(&self, input: &AuthzInput) -> Result<AuthzResult, PolicyError> {
        let compiled = self.compiled.read().unwrap_or_else(|e| e.into_inner());

        let mut any_match = false;
        let mut any_allow = false;
        let mut deny_reasons = Vec::new();

        for rule in &compiled.rules {
            if !rule.when.matches(input) {
                continue;
            }
            any_match = true;
            match rule.effect {
                Effect::Allow => any_allow = true,
                Effect::Deny => {
                    deny_reasons.push(rule.reason.clone().unwrap_or_else(|| rule.id.clone()))
                }
            }
        }

        if !any_match {
            return Ok(AuthzResult {
                allow: false,
                deny_reasons: vec!["no_policy_result".to_string()],
            });
        }

        Ok(AuthzResult {
            allow: any_allow && deny_reasons.is_empty(),
            deny_reasons,
        })
    }

    /// Hex digest of the compiled rule files, recorded in accounting events.
    pub fn policy_hash(&self) -> String {
        self.compiled
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .hash
            .clone()
    }

    /// Names of the files in the compiled set.
    pub fn policy_files(&self) -> Vec<String> {
        self.compiled
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .files
            .clone()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn compile(dir: &Path) -> Result<CompiledPolicy, PolicyError> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(POLICY_EXTENSION))
        })
        .collect();
    paths.sort();

    if paths.is_empty() {
        return Err(PolicyError::NoPolicies(dir.to_path_buf()));
    }

    let mut rules = Vec::new();
    let mut files = Vec::new();
    let mut hasher = Sha3_256::new();

    for path in &paths {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let data = std::fs::read(path)?;

        let document: PolicyDocument =
            serde_json::from_slice(&data).map_err(|source| PolicyError::Parse {
                file: name.clone(),
                source,
            })?;

        hasher.update(name.as_bytes());
        hasher.update(&data);
        rules.extend(document.rules);
        files.push(name);
    }

    Ok(CompiledPolicy {
        rules,
        files,
        hash: hex::encode(hasher.finalize()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(user: &str, role: &str, resource: &str, authenticated: bool) -> AuthzInput {
        AuthzInput {
            user: user.to_string(),
            identifier: format!("did:key:z{user}"),
            role: role.to_string(),
            authenticated,
            nas_address: String::new(),
            resource: resource.to_string(),
            timestamp: Utc::now(),
            attributes: HashMap::new(),
        }
    }

    fn engine_with(document: &str) -> (tempfile::TempDir, PolicyEngine) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("test.policy.json"), document).unwrap();
        let engine = PolicyEngine::load(dir.path()).unwrap();
        (dir, engine)
    }

    const DEFAULT_POLICY: &str = r#"{
        "name": "default",
        "rules": [
            {
                "id": "allow-authenticated",
                "effect": "allow",
                "when": {"authenticated": true}
            }
        ]
    }"#;

    #[test]
    fn allows_authenticated_user() {
        let (_dir, engine) = engine_with(DEFAULT_POLICY);
        let result = engine
            .evaluate(&input("alice", "basic", "network_access", true))
            .unwrap();
        assert!(result.allow);
        assert!(result.deny_reasons.is_empty());
    }

    #[test]
    fn no_matching_rule_means_no_policy_result() {
        let (_dir, engine) = engine_with(DEFAULT_POLICY);
        let result = engine
            .evaluate(&input("alice", "basic", "network_access", false))
            .unwrap();
        assert!(!result.allow);
        assert_eq!(result.deny_reasons, vec!["no_policy_result"]);
    }

    #[test]
    fn role_scoped_resources() {
        let document = r#"{
            "name": "roles",
            "rules": [
                {
                    "id": "network-for-everyone",
                    "effect": "allow",
                    "when": {"authenticated": true, "resource": "network_access"}
                },
                {
                    "id": "gpu-for-premium",
                    "effect": "allow",
                    "when": {"authenticated": true, "resource": "gpu_compute", "role": "premium"}
                },
                {
                    "id": "no-guests",
                    "effect": "deny",
                    "reason": "guests_not_allowed",
                    "when": {"role": "guest"}
                }
            ]
        }"#;
        let (_dir, engine) = engine_with(document);

        // Premium user on GPU.
        let result = engine
            .evaluate(&input("alice", "premium", "gpu_compute", true))
            .unwrap();
        assert!(result.allow);

        // Basic user on GPU: nothing matches.
        let result = engine
            .evaluate(&input("bob", "basic", "gpu_compute", true))
            .unwrap();
        assert!(!result.allow);
        assert_eq!(result.deny_reasons, vec!["no_policy_result"]);

        // Basic user on network access.
        let result = engine
            .evaluate(&input("bob", "basic", "network_access", true))
            .unwrap();
        assert!(result.allow);

        // A matching deny rule vetoes a matching allow rule.
        let result = engine
            .evaluate(&input("eve", "guest", "network_access", true))
            .unwrap();
        assert!(!result.allow);
        assert_eq!(result.deny_reasons, vec!["guests_not_allowed"]);
    }

    #[test]
    fn deny_reason_defaults_to_rule_id() {
        let document = r#"{
            "rules": [
                {"id": "deny-all", "effect": "deny", "when": {}}
            ]
        }"#;
        let (_dir, engine) = engine_with(document);

        let result = engine
            .evaluate(&input("alice", "basic", "network_access", true))
            .unwrap();
        assert_eq!(result.deny_reasons, vec!["deny-all"]);
    }

    #[test]
    fn empty_directory_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            PolicyEngine::load(dir.path()),
            Err(PolicyError::NoPolicies(_))
        ));
    }

    #[test]
    fn non_policy_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("readme.txt"), "hello").unwrap();
        assert!(matches!(
            PolicyEngine::load(dir.path()),
            Err(PolicyError::NoPolicies(_))
        ));
    }

    #[test]
    fn malformed_document_reports_the_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.policy.json"), "{not json").unwrap();
        match PolicyEngine::load(dir.path()) {
            Err(PolicyError::Parse { file, .. }) => assert_eq!(file, "bad.policy.json"),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn reload_swaps_the_compiled_set() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.policy.json");

        std::fs::write(&path, r#"{"rules": []}"#).unwrap();
        let engine = PolicyEngine::load(dir.path()).unwrap();
        let first_hash = engine.policy_hash();

        let result = engine
            .evaluate(&input("alice", "basic", "network_access", true))
            .unwrap();
        assert!(!result.allow);

        std::fs::write(
            &path,
            r#"{"rules": [{"id": "allow-auth", "effect": "allow", "when": {"authenticated": true}}]}"#,
        )
        .unwrap();
        engine.reload().unwrap();

        let result = engine
            .evaluate(&input("alice", "basic", "network_access", true))
            .unwrap();
        assert!(result.allow);
        assert_ne!(engine.policy_hash(), first_hash);
    }

    #[test]
    fn policy_files_lists_compiled_documents() {
        let (_dir, engine) = engine_with(DEFAULT_POLICY);
        assert_eq!(engine.policy_files(), vec!["test.policy.json"]);
    }
}
