// Device trust records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Stored per-(user, device) trust record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub device_id: String,
    pub user_id: String,
    pub device_info: BTreeMap<String, Value>,
    pub fingerprint: String,
    pub trust_score: u8,
    pub trusted: bool,
    pub registered_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub access_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trusted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
}

/// Result of a device verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceVerification {
    pub known: bool,
    pub trusted: bool,
    pub trust_score: u8,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    pub access_count: u64,
}

impl DeviceVerification {
    /// Verification outcome for a device with no record.
    pub fn unknown() -> Self {
        Self {
            known: false,
            trusted: false,
            trust_score: 0,
            first_seen: None,
            last_seen: None,
            access_count: 0,
        }
    }
}
