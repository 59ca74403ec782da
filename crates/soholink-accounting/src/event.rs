//! Accounting event model, one JSON object per log line.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of auditable event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    AuthSuccess,
    AuthFailure,
    AuthError,
    AcctStart,
    AcctStop,
    AcctInterim,
    AcctUnknown,
}

/// The final answer of an authentication attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    #[serde(rename = "ALLOW")]
    Allow,
    #[serde(rename = "DENY")]
    Deny,
}

/// A single auditable event. Optional fields are omitted from the wire
/// form when empty; consumers treat absent fields as empty and ignore
/// fields they do not know.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountingEvent {
    #[serde(with = "rfc3339_millis")]
    pub timestamp: DateTime<Utc>,

    pub event_type: EventType,

    /// The user's identifier (DID), when known.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_id: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub nas_address: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub nas_identifier: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub session_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub latency_us: u64,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_ip: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub policy_hash: String,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, String>,
}

impl AccountingEvent {
    /// A new event stamped with the current time and all optional fields
    /// empty.
    pub fn new(event_type: EventType) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            user_id: String::new(),
            username: String::new(),
            nas_address: String::new(),
            nas_identifier: String::new(),
            session_id: String::new(),
            decision: None,
            reason: String::new(),
            latency_us: 0,
            client_ip: String::new(),
            policy_hash: String::new(),
            attributes: HashMap::new(),
        }
    }
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

/// RFC 3339 with millisecond precision, UTC designator `Z`.
pub(crate) mod rfc3339_millis {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        timestamp: &DateTime<Utc>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&timestamp.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let s = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
