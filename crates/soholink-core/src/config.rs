//! Node configuration.
//!
//! Resolution order, lowest to highest priority: built-in defaults, an
//! optional JSON config file, and `SOHOLINK_`-prefixed environment
//! variables (key uppercased, `.` replaced with `_`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Complete node configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub radius: RadiusConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub accounting: AccountingConfig,
    #[serde(default)]
    pub merkle: MerkleConfig,
}

/// The node's own identity, surfaced in status output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub identifier: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadiusConfig {
    pub auth_address: String,
    pub acct_address: String,
    /// Required for production; empty means unauthenticated test mode.
    #[serde(default)]
    pub shared_secret: String,
}

impl Default for RadiusConfig {
    fn default() -> Self {
        Self {
            auth_address: "0.0.0.0:1812".to_string(),
            acct_address: "0.0.0.0:1813".to_string(),
            shared_secret: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Maximum credential age in seconds, skew excluded.
    pub credential_ttl: u64,
    /// Nonce retention and pruner cadence, in seconds.
    pub max_nonce_age: u64,
    /// Bidirectional clock-skew tolerance in seconds.
    pub clock_skew_tolerance: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            credential_ttl: 3600,
            max_nonce_age: 300,
            clock_skew_tolerance: 300,
        }
    }
}

impl AuthConfig {
    pub fn credential_ttl(&self) -> Duration {
        Duration::from_secs(self.credential_ttl)
    }

    /// Nonce retention: never shorter than the window in which a credential
    /// is still acceptable.
    pub fn max_nonce_age(&self) -> Duration {
        let floor = self.credential_ttl + self.clock_skew_tolerance;
        Duration::from_secs(self.max_nonce_age.max(floor))
    }

    pub fn clock_skew_tolerance(&self) -> Duration {
        Duration::from_secs(self.clock_skew_tolerance)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub base_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_path: default_data_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub directory: PathBuf,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            directory: default_config_dir().join("policies"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountingConfig {
    pub compress_after_days: u64,
}

impl Default for AccountingConfig {
    fn default() -> Self {
        Self {
            compress_after_days: 7,
        }
    }
}

impl AccountingConfig {
    pub fn compress_after(&self) -> Duration {
        Duration::from_secs(self.compress_after_days * 24 * 3600)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerkleConfig {
    /// Batcher cadence in seconds.
    pub batch_interval: u64,
}

impl Default for MerkleConfig {
    fn default() -> Self {
        Self {
            batch_interval: 3600,
        }
    }
}

impl MerkleConfig {
    pub fn batch_interval(&self) -> Duration {
        Duration::from_secs(self.batch_interval)
    }
}

impl Config {
    /// Load configuration. With an explicit path the file must exist and
    /// parse; otherwise the default location is merged when present.
    /// Environment overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = default_config_dir().join("config.json");
                if default_path.exists() {
                    Self::from_file(&default_path)?
                } else {
                    Self::default()
                }
            }
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read(path)?;
        serde_json::from_slice(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn apply_env_overrides(&mut self) {
        override_string("SOHOLINK_NODE_IDENTIFIER", &mut self.node.identifier);
        override_string("SOHOLINK_NODE_NAME", &mut self.node.name);
        override_string("SOHOLINK_RADIUS_AUTH_ADDRESS", &mut self.radius.auth_address);
        override_string("SOHOLINK_RADIUS_ACCT_ADDRESS", &mut self.radius.acct_address);
        override_string("SOHOLINK_RADIUS_SHARED_SECRET", &mut self.radius.shared_secret);
        override_u64("SOHOLINK_AUTH_CREDENTIAL_TTL", &mut self.auth.credential_ttl);
        override_u64("SOHOLINK_AUTH_MAX_NONCE_AGE", &mut self.auth.max_nonce_age);
        override_u64(
            "SOHOLINK_AUTH_CLOCK_SKEW_TOLERANCE",
            &mut self.auth.clock_skew_tolerance,
        );
        override_path("SOHOLINK_STORAGE_BASE_PATH", &mut self.storage.base_path);
        override_path("SOHOLINK_POLICY_DIRECTORY", &mut self.policy.directory);
        override_u64(
            "SOHOLINK_ACCOUNTING_COMPRESS_AFTER_DAYS",
            &mut self.accounting.compress_after_days,
        );
        override_u64("SOHOLINK_MERKLE_BATCH_INTERVAL", &mut self.merkle.batch_interval);
    }

    pub fn database_path(&self) -> PathBuf {
        self.storage.base_path.join("soholink.db")
    }

    pub fn node_key_path(&self) -> PathBuf {
        self.storage.base_path.join("node_key.pem")
    }

    pub fn keys_dir(&self) -> PathBuf {
        self.storage.base_path.join("keys")
    }

    pub fn accounting_dir(&self) -> PathBuf {
        self.storage.base_path.join("accounting")
    }

    pub fn merkle_dir(&self) -> PathBuf {
        self.storage.base_path.join("merkle")
    }

    /// Create every directory the node writes into.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        for dir in [
            self.storage.base_path.clone(),
            self.keys_dir(),
            self.accounting_dir(),
            self.merkle_dir(),
            self.policy.directory.clone(),
        ] {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(())
    }
}

/// Platform default for mutable node state.
pub fn default_data_dir() -> PathBuf {
    if cfg!(windows) {
        let app_data = std::env::var("LOCALAPPDATA").unwrap_or_else(|_| {
            format!(
                "{}\\AppData\\Local",
                std::env::var("USERPROFILE").unwrap_or_default()
            )
        });
        PathBuf::from(app_data).join("SoHoLINK").join("data")
    } else {
        PathBuf::from("/var/lib/soholink")
    }
}

/// Platform default for configuration and policies.
pub fn default_config_dir() -> PathBuf {
    if cfg!(windows) {
        let app_data = std::env::var("APPDATA").unwrap_or_else(|_| {
            format!(
                "{}\\AppData\\Roaming",
                std::env::var("USERPROFILE").unwrap_or_default()
            )
        });
        PathBuf::from(app_data).join("SoHoLINK")
    } else {
        PathBuf::from("/etc/soholink")
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn override_string(key: &str, slot: &mut String) {
    if let Some(value) = env_value(key) {
        *slot = value;
    }
}

fn override_path(key: &str, slot: &mut PathBuf) {
    if let Some(value) = env_value(key) {
        *slot = PathBuf::from(value);
    }
}

fn override_u64(key: &str, slot: &mut u64) {
    if let Some(parsed) = env_value(key).and_then(|v| v.parse().ok()) {
        *slot = parsed;
    }
}
