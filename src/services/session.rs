// Continuous session management
// A session is bound to the device and peer address it was created with.
// Activity re-arms the sliding TTL; verification reports binding anomalies
// and invalidates expired sessions. Membership in the per-user session set
// makes "log out everywhere" possible.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::{rngs::OsRng, RngCore};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::app_config::AppConfig;
use crate::db::{KvError, KvStore};
use crate::models::session::{SessionAnomaly, SessionRecord, SessionVerification};
use crate::utils::clock::Clock;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("stored session record is malformed: {0}")]
    Malformed(String),

    #[error(transparent)]
    Kv(#[from] KvError),
}

pub struct SessionService {
    kv: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    session_timeout: Duration,
}

impl SessionService {
    pub fn new(kv: Arc<dyn KvStore>, clock: Arc<dyn Clock>, config: &AppConfig) -> Self {
        Self {
            kv,
            clock,
            session_timeout: config.session_timeout(),
        }
    }

    fn session_key(session_id: &str) -> String {
        format!("session/{}", session_id)
    }

    fn user_sessions_key(user_id: &str) -> String {
        format!("user_sessions/{}", user_id)
    }

    async fn store_record(&self, record: &SessionRecord) -> Result<(), SessionError> {
        let serialized =
            serde_json::to_string(record).map_err(|e| SessionError::Malformed(e.to_string()))?;
        self.kv
            .set(
                &Self::session_key(&record.session_id),
                &serialized,
                Some(self.session_timeout),
            )
            .await?;
        Ok(())
    }

    /// Create a session bound to (user, device, peer address).
    pub async fn create_session(
        &self,
        user_id: &str,
        device_id: &str,
        ip_address: &str,
        metadata: HashMap<String, Value>,
    ) -> Result<String, SessionError> {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        let session_id = URL_SAFE_NO_PAD.encode(bytes);

        let now = self.clock.now();
        let record = SessionRecord {
            session_id: session_id.clone(),
            user_id: user_id.to_string(),
            device_id: device_id.to_string(),
            ip_address: ip_address.to_string(),
            created_at: now,
            last_activity: now,
            activity_count: 0,
            metadata,
        };

        self.store_record(&record).await?;

        let set_key = Self::user_sessions_key(user_id);
        self.kv.sadd(&set_key, &session_id).await?;
        self.kv.expire(&set_key, self.session_timeout).await?;

        info!("Session created - User: {}, Session: {}", user_id, session_id);
        Ok(session_id)
    }

    pub async fn get_session(
        &self,
        session_id: &str,
    ) -> Result<Option<SessionRecord>, SessionError> {
        match self.kv.get(&Self::session_key(session_id)).await? {
            Some(raw) => {
                let record = serde_json::from_str(&raw)
                    .map_err(|e| SessionError::Malformed(e.to_string()))?;
                Ok(Some(record))
            },
            None => Ok(None),
        }
    }

    /// Refresh last-activity, bump the counter, and re-arm the TTL.
    pub async fn update_activity(&self, session_id: &str) -> Result<bool, SessionError> {
        let mut record = match self.get_session(session_id).await? {
            Some(record) => record,
            None => return Ok(false),
        };

        record.last_activity = self.clock.now();
        record.activity_count += 1;
        self.store_record(&record).await?;
        Ok(true)
    }

    /// Verify a presented session against its stored binding.
    ///
    /// Anomalies are reported in detection order. A missing or expired
    /// session is terminal; binding mismatches leave the record available so
    /// the caller can decide to force a step-up instead.
    pub async fn verify_session(
        &self,
        session_id: &str,
        device_id: &str,
        ip_address: &str,
    ) -> Result<SessionVerification, SessionError> {
        let record = match self.get_session(session_id).await? {
            Some(record) => record,
            None => {
                return Ok(SessionVerification {
                    valid: false,
                    anomalies: vec![SessionAnomaly::SessionNotFound],
                    session: None,
                })
            },
        };

        let mut anomalies = Vec::new();

        if record.device_id != device_id {
            warn!("Device mismatch for session: {}", session_id);
            anomalies.push(SessionAnomaly::DeviceMismatch);
        }

        if record.ip_address != ip_address {
            warn!("IP address changed for session: {}", session_id);
            anomalies.push(SessionAnomaly::IpAddressChange);
        }

        let idle = self.clock.now() - record.last_activity;
        if idle.num_seconds() > self.session_timeout.as_secs() as i64 {
            anomalies.push(SessionAnomaly::SessionExpired);
            self.invalidate_session(session_id).await?;
            return Ok(SessionVerification {
                valid: false,
                anomalies,
                session: None,
            });
        }

        self.update_activity(session_id).await?;

        Ok(SessionVerification {
            valid: anomalies.is_empty(),
            anomalies,
            session: Some(record),
        })
    }

    /// Terminate a session. Idempotent.
    pub async fn invalidate_session(&self, session_id: &str) -> Result<bool, SessionError> {
        let record = match self.get_session(session_id).await? {
            Some(record) => record,
            None => return Ok(false),
        };

        self.kv.del(&Self::session_key(session_id)).await?;
        self.kv
            .srem(&Self::user_sessions_key(&record.user_id), session_id)
            .await?;

        info!(
            "Session invalidated - Session: {}, User: {}",
            session_id, record.user_id
        );
        Ok(true)
    }

    /// Terminate every session of a user. Returns how many were live.
    pub async fn invalidate_all_user_sessions(&self, user_id: &str) -> Result<usize, SessionError> {
        let set_key = Self::user_sessions_key(user_id);
        let session_ids = self.kv.smembers(&set_key).await?;

        let mut count = 0;
        for session_id in session_ids {
            if self.invalidate_session(&session_id).await? {
                count += 1;
            }
        }

        self.kv.del(&set_key).await?;
        info!(
            "All sessions invalidated for user: {}, count: {}",
            user_id, count
        );
        Ok(count)
    }

    /// Live sessions for a user.
    pub async fn get_user_sessions(
        &self,
        user_id: &str,
    ) -> Result<Vec<SessionRecord>, SessionError> {
        let session_ids = self
            .kv
            .smembers(&Self::user_sessions_key(user_id))
            .await?;

        let mut sessions = Vec::new();
        for session_id in session_ids {
            if let Some(record) = self.get_session(&session_id).await? {
                sessions.push(record);
            }
        }
        Ok(sessions)
    }

    /// Whether the session saw activity within `max_age`. Used to gate
    /// high-security operations on recent presence.
    pub async fn is_session_fresh(
        &self,
        session_id: &str,
        max_age: Duration,
    ) -> Result<bool, SessionError> {
        let record = match self.get_session(session_id).await? {
            Some(record) => record,
            None => return Ok(false),
        };

        let age = self.clock.now() - record.last_activity;
        Ok(age.num_seconds() <= max_age.as_secs() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryKv;
    use crate::utils::clock::ManualClock;
    use chrono::{TimeZone, Utc};

    fn service() -> (SessionService, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
        ));
        let kv = Arc::new(MemoryKv::with_clock(clock.clone()));
        let config = AppConfig::for_test();
        (SessionService::new(kv, clock.clone(), &config), clock)
    }

    #[tokio::test]
    async fn test_clean_verification() {
        let (service, _) = service();

        let sid = service
            .create_session("u1", "d1", "203.0.113.9", HashMap::new())
            .await
            .unwrap();

        let result = service.verify_session(&sid, "d1", "203.0.113.9").await.unwrap();
        assert!(result.valid);
        assert!(result.anomalies.is_empty());
        assert_eq!(result.session.unwrap().user_id, "u1");
    }

    #[tokio::test]
    async fn test_ip_change_keeps_record() {
        let (service, _) = service();
        let sid = service
            .create_session("u1", "d1", "203.0.113.9", HashMap::new())
            .await
            .unwrap();

        let result = service.verify_session(&sid, "d1", "198.51.100.1").await.unwrap();
        assert!(!result.valid);
        assert_eq!(result.anomalies, vec![SessionAnomaly::IpAddressChange]);
        // The record comes back so the caller can force a step-up
        assert!(result.session.is_some());
    }

    #[tokio::test]
    async fn test_device_and_ip_mismatch_order() {
        let (service, _) = service();
        let sid = service
            .create_session("u1", "d1", "203.0.113.9", HashMap::new())
            .await
            .unwrap();

        let result = service
            .verify_session(&sid, "d-other", "198.51.100.1")
            .await
            .unwrap();
        assert_eq!(
            result.anomalies,
            vec![
                SessionAnomaly::DeviceMismatch,
                SessionAnomaly::IpAddressChange
            ]
        );
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let (service, _) = service();

        let result = service
            .verify_session("missing", "d1", "203.0.113.9")
            .await
            .unwrap();
        assert!(!result.valid);
        assert_eq!(result.anomalies, vec![SessionAnomaly::SessionNotFound]);
        assert!(result.session.is_none());
    }

    #[tokio::test]
    async fn test_expiry_invalidates() {
        let (service, clock) = service();
        let sid = service
            .create_session("u1", "d1", "203.0.113.9", HashMap::new())
            .await
            .unwrap();

        // Past the 30-minute timeout the KV entry is gone entirely
        clock.advance(chrono::Duration::minutes(31));

        let result = service.verify_session(&sid, "d1", "203.0.113.9").await.unwrap();
        assert!(!result.valid);
        assert_eq!(result.anomalies, vec![SessionAnomaly::SessionNotFound]);
    }

    #[tokio::test]
    async fn test_activity_rearms_ttl() {
        let (service, clock) = service();
        let sid = service
            .create_session("u1", "d1", "203.0.113.9", HashMap::new())
            .await
            .unwrap();

        for _ in 0..3 {
            clock.advance(chrono::Duration::minutes(20));
            let result = service.verify_session(&sid, "d1", "203.0.113.9").await.unwrap();
            assert!(result.valid, "activity inside the window keeps the session alive");
        }

        let record = service.get_session(&sid).await.unwrap().unwrap();
        assert_eq!(record.activity_count, 3);
    }

    #[tokio::test]
    async fn test_invalidate_all_user_sessions() {
        let (service, _) = service();

        let a = service
            .create_session("u1", "d1", "203.0.113.9", HashMap::new())
            .await
            .unwrap();
        let b = service
            .create_session("u1", "d2", "203.0.113.9", HashMap::new())
            .await
            .unwrap();

        assert_eq!(service.get_user_sessions("u1").await.unwrap().len(), 2);
        assert_eq!(service.invalidate_all_user_sessions("u1").await.unwrap(), 2);

        assert!(service.get_session(&a).await.unwrap().is_none());
        assert!(service.get_session(&b).await.unwrap().is_none());
        // Idempotent on retry
        assert_eq!(service.invalidate_all_user_sessions("u1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_session_freshness() {
        let (service, clock) = service();
        let sid = service
            .create_session("u1", "d1", "203.0.113.9", HashMap::new())
            .await
            .unwrap();

        assert!(service
            .is_session_fresh(&sid, Duration::from_secs(300))
            .await
            .unwrap());

        clock.advance(chrono::Duration::minutes(10));
        assert!(!service
            .is_session_fresh(&sid, Duration::from_secs(300))
            .await
            .unwrap());
    }
}
