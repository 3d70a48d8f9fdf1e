// Append-only audit logging
// Events land in a day-keyed list with the retention TTL, and in a per-user
// list capped at the 1000 most recent. With field encryption enabled, the
// details and peer address are replaced by their encrypted base64 form
// before anything is stored or emitted.

use chrono::NaiveDate;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::app_config::AppConfig;
use crate::db::{KvError, KvStore};
use crate::models::audit::{AuditEvent, EventSeverity, EventType};
use crate::services::encryption::{CryptoError, DataEncryptor};
use crate::utils::clock::Clock;

const USER_EVENTS_LIMIT: isize = 1000;

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("failed to serialize audit event: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("audit configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Kv(#[from] KvError),
}

/// Parameters of one event, before the envelope is stamped.
#[derive(Debug, Clone, Default)]
pub struct NewAuditEvent {
    pub event_type: Option<EventType>,
    pub severity: Option<EventSeverity>,
    pub user_id: Option<String>,
    pub action: String,
    pub resource: Option<String>,
    pub details: Option<Value>,
    pub ip_address: Option<String>,
    pub device_id: Option<String>,
    pub session_id: Option<String>,
    pub success: bool,
}

pub struct AuditService {
    kv: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    encryptor: Option<DataEncryptor>,
    retention: Duration,
}

impl AuditService {
    pub fn new(kv: Arc<dyn KvStore>, clock: Arc<dyn Clock>, config: &AppConfig) -> Result<Self, AuditError> {
        let encryptor = if config.audit_log_encryption {
            let key = config
                .encryption_key_bytes()
                .map_err(|e| AuditError::Config(e.to_string()))?;
            Some(DataEncryptor::new(&key))
        } else {
            None
        };

        Ok(Self {
            kv,
            clock,
            encryptor,
            retention: config.audit_log_retention(),
        })
    }

    fn day_key(date: NaiveDate) -> String {
        format!("audit/{}", date.format("%Y%m%d"))
    }

    fn user_key(user_id: &str) -> String {
        format!("user_events/{}", user_id)
    }

    /// Append one event. The event is stored (and emitted) before this
    /// returns, so callers can rely on rejections being audited first.
    pub async fn log_event(&self, input: NewAuditEvent) -> Result<AuditEvent, AuditError> {
        let mut event = AuditEvent {
            event_id: Uuid::new_v4().to_string(),
            timestamp: self.clock.now(),
            event_type: input.event_type.unwrap_or(EventType::SecurityEvent),
            severity: input.severity.unwrap_or(EventSeverity::Info),
            user_id: input.user_id,
            action: input.action,
            resource: input.resource,
            details: input.details,
            ip_address: input.ip_address,
            device_id: input.device_id,
            session_id: input.session_id,
            success: input.success,
        };

        if let Some(encryptor) = &self.encryptor {
            event = Self::encrypt_sensitive_fields(encryptor, event)?;
        }

        self.emit(&event);
        self.store(&event).await?;

        Ok(event)
    }

    fn encrypt_sensitive_fields(
        encryptor: &DataEncryptor,
        mut event: AuditEvent,
    ) -> Result<AuditEvent, AuditError> {
        if let Some(details) = event.details.take() {
            let canonical = crate::utils::canonical::to_canonical_json(&details)?;
            event.details = Some(Value::String(encryptor.encrypt(&canonical)?));
        }
        if let Some(ip) = event.ip_address.take() {
            event.ip_address = Some(encryptor.encrypt(&ip)?);
        }
        Ok(event)
    }

    /// Restore the plaintext fields of a stored event. Only meaningful when
    /// field encryption is enabled.
    pub fn decrypt_event(&self, mut event: AuditEvent) -> Result<AuditEvent, AuditError> {
        let encryptor = match &self.encryptor {
            Some(encryptor) => encryptor,
            None => return Ok(event),
        };

        match event.details.take() {
            Some(Value::String(encrypted)) => {
                let plaintext = encryptor.decrypt(&encrypted)?;
                event.details = Some(serde_json::from_str(&plaintext)?);
            },
            other => event.details = other,
        }
        if let Some(encrypted_ip) = event.ip_address.take() {
            event.ip_address = Some(encryptor.decrypt(&encrypted_ip)?);
        }
        Ok(event)
    }

    fn emit(&self, event: &AuditEvent) {
        let summary = format!(
            "{} - User: {}, Resource: {}, Success: {}",
            event.action,
            event.user_id.as_deref().unwrap_or("anonymous"),
            event.resource.as_deref().unwrap_or("N/A"),
            event.success
        );

        match event.severity {
            EventSeverity::Info => info!(target: "audit", "{}", summary),
            EventSeverity::Warning => warn!(target: "audit", "{}", summary),
            EventSeverity::Error | EventSeverity::Critical => {
                error!(target: "audit", "{}", summary)
            },
        }

        if event.event_type == EventType::SecurityEvent
            || event.severity >= EventSeverity::Error
        {
            warn!(target: "security", "Security event: {}", event.action);
        }
    }

    async fn store(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let serialized = serde_json::to_string(event)?;

        let day_key = Self::day_key(self.clock.now().date_naive());
        self.kv.lpush(&day_key, &serialized).await?;
        self.kv.expire(&day_key, self.retention).await?;

        if let Some(user_id) = &event.user_id {
            let user_key = Self::user_key(user_id);
            self.kv.lpush(&user_key, &serialized).await?;
            self.kv.ltrim(&user_key, 0, USER_EVENTS_LIMIT - 1).await?;
            self.kv.expire(&user_key, self.retention).await?;
        }

        Ok(())
    }

    // --- Specialized helpers ---

    pub async fn log_authentication(
        &self,
        user_id: &str,
        success: bool,
        method: &str,
        ip_address: Option<String>,
        device_id: Option<String>,
        failure_reason: Option<String>,
    ) -> Result<AuditEvent, AuditError> {
        let failure_reason = if success { None } else { failure_reason };
        let details = serde_json::json!({
            "method": method,
            "failure_reason": failure_reason,
        });

        self.log_event(NewAuditEvent {
            event_type: Some(EventType::Authentication),
            severity: Some(if success {
                EventSeverity::Info
            } else {
                EventSeverity::Warning
            }),
            user_id: Some(user_id.to_string()),
            action: format!(
                "authentication_{}_{}",
                method,
                if success { "success" } else { "failure" }
            ),
            details: Some(details),
            ip_address,
            device_id,
            success,
            ..Default::default()
        })
        .await
    }

    pub async fn log_authorization(
        &self,
        user_id: &str,
        resource: &str,
        action: &str,
        allowed: bool,
        reason: Option<String>,
        risk_score: Option<u8>,
    ) -> Result<AuditEvent, AuditError> {
        let details = serde_json::json!({
            "requested_action": action,
            "reason": reason,
            "risk_score": risk_score,
        });

        self.log_event(NewAuditEvent {
            event_type: Some(EventType::Authorization),
            severity: Some(if allowed {
                EventSeverity::Info
            } else {
                EventSeverity::Warning
            }),
            user_id: Some(user_id.to_string()),
            action: format!(
                "authorization_{}",
                if allowed { "granted" } else { "denied" }
            ),
            resource: Some(resource.to_string()),
            details: Some(details),
            success: allowed,
            ..Default::default()
        })
        .await
    }

    pub async fn log_transaction(
        &self,
        user_id: &str,
        transaction_type: &str,
        amount: f64,
        account_id: &str,
        success: bool,
        transaction_id: Option<String>,
    ) -> Result<AuditEvent, AuditError> {
        let details = serde_json::json!({
            "transaction_type": transaction_type,
            "amount": amount,
            "account_id": account_id,
            "transaction_id": transaction_id,
        });

        self.log_event(NewAuditEvent {
            event_type: Some(EventType::Transaction),
            severity: Some(if success {
                EventSeverity::Info
            } else {
                EventSeverity::Error
            }),
            user_id: Some(user_id.to_string()),
            action: format!("transaction_{}", transaction_type),
            resource: Some("transaction".to_string()),
            details: Some(details),
            success,
            ..Default::default()
        })
        .await
    }

    pub async fn log_data_access(
        &self,
        user_id: &str,
        resource: &str,
        action: &str,
        record_count: u64,
    ) -> Result<AuditEvent, AuditError> {
        self.log_event(NewAuditEvent {
            event_type: Some(EventType::DataAccess),
            severity: Some(EventSeverity::Info),
            user_id: Some(user_id.to_string()),
            action: action.to_string(),
            resource: Some(resource.to_string()),
            details: Some(serde_json::json!({ "record_count": record_count })),
            success: true,
            ..Default::default()
        })
        .await
    }

    pub async fn log_security_event(
        &self,
        event_name: &str,
        severity: EventSeverity,
        user_id: Option<String>,
        details: Option<Value>,
        ip_address: Option<String>,
    ) -> Result<AuditEvent, AuditError> {
        self.log_event(NewAuditEvent {
            event_type: Some(EventType::SecurityEvent),
            severity: Some(severity),
            user_id,
            action: event_name.to_string(),
            details,
            ip_address,
            success: false,
            ..Default::default()
        })
        .await
    }

    // --- Retrieval ---

    /// Recent events for a day, newest first. Defaults to today.
    pub async fn recent_events(
        &self,
        date: Option<NaiveDate>,
        limit: usize,
    ) -> Result<Vec<AuditEvent>, AuditError> {
        let date = date.unwrap_or_else(|| self.clock.now().date_naive());
        let raw = self
            .kv
            .lrange(&Self::day_key(date), 0, limit as isize - 1)
            .await?;

        Ok(raw
            .iter()
            .filter_map(|entry| serde_json::from_str(entry).ok())
            .collect())
    }

    /// Most recent events for a user, newest first.
    pub async fn user_events(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<AuditEvent>, AuditError> {
        let raw = self
            .kv
            .lrange(&Self::user_key(user_id), 0, limit as isize - 1)
            .await?;

        Ok(raw
            .iter()
            .filter_map(|entry| serde_json::from_str(entry).ok())
            .collect())
    }
}
