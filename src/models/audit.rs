// Audit event envelope

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Audit event categories.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Authentication,
    Authorization,
    DataAccess,
    DataModification,
    ConfigurationChange,
    SecurityEvent,
    Transaction,
    AdminAction,
}

/// Severity levels, ordered so `>= Warning` selects security-relevant events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum EventSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl EventSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSeverity::Info => "info",
            EventSeverity::Warning => "warning",
            EventSeverity::Error => "error",
            EventSeverity::Critical => "critical",
        }
    }
}

/// One append-only audit record. `details` and `ip_address` may be replaced
/// by their encrypted base64 form before storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub severity: EventSeverity,
    pub user_id: Option<String>,
    pub action: String,
    pub resource: Option<String>,
    pub details: Option<Value>,
    pub ip_address: Option<String>,
    pub device_id: Option<String>,
    pub session_id: Option<String>,
    pub success: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(EventSeverity::Warning >= EventSeverity::Warning);
        assert!(EventSeverity::Critical > EventSeverity::Error);
        assert!(EventSeverity::Info < EventSeverity::Warning);
    }

    #[test]
    fn test_event_type_serialization() {
        assert_eq!(
            serde_json::to_value(EventType::SecurityEvent).unwrap(),
            serde_json::json!("security_event")
        );
    }
}
