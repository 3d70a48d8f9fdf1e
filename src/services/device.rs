// Device trust verification
// Each (user, device) pair has one record with a sliding 30-day TTL. Trust
// accrues with record age and usage; crossing the threshold flips the
// trusted flag permanently until an explicit revocation drops it to zero.

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::app_config::AppConfig;
use crate::db::{KvError, KvStore};
use crate::models::device::{DeviceRecord, DeviceVerification};
use crate::utils::clock::Clock;
use crate::utils::fingerprint::device_fingerprint;

const INITIAL_TRUST_SCORE: u8 = 50;
const TRUST_THRESHOLD: u8 = 70;

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("stored device record is malformed: {0}")]
    Malformed(String),

    #[error(transparent)]
    Kv(#[from] KvError),
}

pub struct DeviceService {
    kv: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    record_ttl: Duration,
}

impl DeviceService {
    pub fn new(kv: Arc<dyn KvStore>, clock: Arc<dyn Clock>, config: &AppConfig) -> Self {
        Self {
            kv,
            clock,
            record_ttl: config.trusted_device_duration(),
        }
    }

    fn record_key(user_id: &str, device_id: &str) -> String {
        format!("device/{}/{}", user_id, device_id)
    }

    /// Canonical fingerprint of a device attribute map.
    pub fn fingerprint(&self, device_info: &BTreeMap<String, Value>) -> String {
        device_fingerprint(device_info)
    }

    async fn store_record(&self, record: &DeviceRecord) -> Result<(), DeviceError> {
        let serialized =
            serde_json::to_string(record).map_err(|e| DeviceError::Malformed(e.to_string()))?;
        self.kv
            .set(
                &Self::record_key(&record.user_id, &record.device_id),
                &serialized,
                Some(self.record_ttl),
            )
            .await?;
        Ok(())
    }

    async fn load_record(
        &self,
        user_id: &str,
        device_id: &str,
    ) -> Result<Option<DeviceRecord>, DeviceError> {
        match self.kv.get(&Self::record_key(user_id, device_id)).await? {
            Some(raw) => {
                let record = serde_json::from_str(&raw)
                    .map_err(|e| DeviceError::Malformed(e.to_string()))?;
                Ok(Some(record))
            },
            None => Ok(None),
        }
    }

    /// Register a first-seen device with the initial trust score.
    /// Idempotent: re-registering overwrites the record.
    pub async fn register_device(
        &self,
        user_id: &str,
        device_id: &str,
        device_info: BTreeMap<String, Value>,
    ) -> Result<DeviceRecord, DeviceError> {
        let now = self.clock.now();
        let fingerprint = device_fingerprint(&device_info);

        let record = DeviceRecord {
            device_id: device_id.to_string(),
            user_id: user_id.to_string(),
            device_info,
            fingerprint,
            trust_score: INITIAL_TRUST_SCORE,
            trusted: false,
            registered_at: now,
            last_seen: now,
            access_count: 0,
            trusted_at: None,
            revoked_at: None,
        };

        self.store_record(&record).await?;
        info!("Device registered - User: {}, Device: {}", user_id, device_id);
        Ok(record)
    }

    /// Verify a device: bump usage counters, recompute the trust score, and
    /// flip the trusted flag once the score reaches the threshold.
    pub async fn verify_device(
        &self,
        user_id: &str,
        device_id: &str,
    ) -> Result<DeviceVerification, DeviceError> {
        let mut record = match self.load_record(user_id, device_id).await? {
            Some(record) => record,
            None => return Ok(DeviceVerification::unknown()),
        };

        let now = self.clock.now();
        record.last_seen = now;
        record.access_count += 1;
        record.trust_score = self.calculate_trust_score(&record);

        if record.trust_score >= TRUST_THRESHOLD && !record.trusted {
            record.trusted = true;
            record.trusted_at = Some(now);
            info!(
                "Device marked as trusted - User: {}, Device: {}",
                user_id, device_id
            );
        }

        self.store_record(&record).await?;

        Ok(DeviceVerification {
            known: true,
            trusted: record.trusted,
            trust_score: record.trust_score,
            first_seen: Some(record.registered_at),
            last_seen: Some(record.last_seen),
            access_count: record.access_count,
        })
    }

    /// Trust score: base 50, plus age, usage, and standing-trust bonuses,
    /// clamped to 100.
    fn calculate_trust_score(&self, record: &DeviceRecord) -> u8 {
        let mut score: u32 = INITIAL_TRUST_SCORE as u32;

        let age_days = (self.clock.now() - record.registered_at).num_days();
        if age_days >= 30 {
            score += 20;
        } else if age_days >= 7 {
            score += 10;
        }

        if record.access_count > 100 {
            score += 15;
        } else if record.access_count > 50 {
            score += 10;
        } else if record.access_count > 10 {
            score += 5;
        }

        if record.trusted {
            score += 15;
        }

        score.min(100) as u8
    }

    /// Drop a device's trust to zero. The record is retained so that later
    /// sightings of the device are still recognized.
    pub async fn revoke_device_trust(
        &self,
        user_id: &str,
        device_id: &str,
    ) -> Result<bool, DeviceError> {
        let mut record = match self.load_record(user_id, device_id).await? {
            Some(record) => record,
            None => return Ok(false),
        };

        record.trusted = false;
        record.trust_score = 0;
        record.revoked_at = Some(self.clock.now());

        self.store_record(&record).await?;
        warn!(
            "Device trust revoked - User: {}, Device: {}",
            user_id, device_id
        );
        Ok(true)
    }

    pub async fn list_user_devices(&self, user_id: &str) -> Result<Vec<DeviceRecord>, DeviceError> {
        let keys = self.kv.scan_prefix(&format!("device/{}/", user_id)).await?;

        let mut devices = Vec::new();
        for key in keys {
            if let Some(raw) = self.kv.get(&key).await? {
                let record = serde_json::from_str(&raw)
                    .map_err(|e| DeviceError::Malformed(e.to_string()))?;
                devices.push(record);
            }
        }
        Ok(devices)
    }

    pub async fn remove_device(&self, user_id: &str, device_id: &str) -> Result<bool, DeviceError> {
        let removed = self.kv.del(&Self::record_key(user_id, device_id)).await?;
        if removed {
            info!("Device removed - User: {}, Device: {}", user_id, device_id);
        }
        Ok(removed)
    }
}
