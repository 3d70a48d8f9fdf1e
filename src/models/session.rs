// Session records and anomaly reporting

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Stored session state, bound to a device and peer address at creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub user_id: String,
    pub device_id: String,
    pub ip_address: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub activity_count: u64,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

/// Session anomalies in detection order. `SessionNotFound` and
/// `SessionExpired` are terminal; the others leave the record available so
/// the caller can force a step-up instead of dropping the session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionAnomaly {
    SessionNotFound,
    DeviceMismatch,
    IpAddressChange,
    SessionExpired,
}

impl SessionAnomaly {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionAnomaly::SessionNotFound => "session_not_found",
            SessionAnomaly::DeviceMismatch => "device_mismatch",
            SessionAnomaly::IpAddressChange => "ip_address_change",
            SessionAnomaly::SessionExpired => "session_expired",
        }
    }
}

/// Result of verifying a presented session against its stored binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionVerification {
    pub valid: bool,
    pub anomalies: Vec<SessionAnomaly>,
    pub session: Option<SessionRecord>,
}
