// Encryption key lifecycle
// Exactly one key is active at a time; rotation retires the previous key to
// `rotated`, which keeps it readable for decrypting old data. Revoked keys
// are never returned.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::db::{KvError, KvStore};
use crate::services::encryption::DataEncryptor;
use crate::utils::clock::Clock;

const KEY_PREFIX: &str = "encryption_key";

#[derive(Error, Debug)]
pub enum KeyError {
    #[error("encryption key not found: {0}")]
    NotFound(String),

    #[error("no active encryption key")]
    NoActiveKey,

    #[error("stored key record is malformed: {0}")]
    Malformed(String),

    #[error(transparent)]
    Kv(#[from] KvError),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    Active,
    Rotated,
    Revoked,
}

/// Stored key record, including material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyRecord {
    pub key_id: String,
    pub key: String,
    pub status: KeyStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

/// Key metadata without the material, for listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyInfo {
    pub key_id: String,
    pub status: KeyStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

/// Outcome of a key rotation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationOutcome {
    pub old_key_id: Option<String>,
    pub new_key_id: String,
    pub rotated_at: DateTime<Utc>,
}

pub struct KeyManager {
    kv: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
}

impl KeyManager {
    pub fn new(kv: Arc<dyn KvStore>, clock: Arc<dyn Clock>) -> Self {
        Self { kv, clock }
    }

    fn record_key(key_id: &str) -> String {
        format!("{}/{}", KEY_PREFIX, key_id)
    }

    fn active_pointer_key() -> String {
        format!("{}/active", KEY_PREFIX)
    }

    /// Generate fresh AES-256 key material.
    pub fn generate_key(&self) -> String {
        DataEncryptor::generate_key()
    }

    /// Store a key record. Idempotent: storing the same id overwrites.
    pub async fn store_key(
        &self,
        key_id: &str,
        key: &str,
        metadata: BTreeMap<String, Value>,
    ) -> Result<(), KeyError> {
        let record = KeyRecord {
            key_id: key_id.to_string(),
            key: key.to_string(),
            status: KeyStatus::Active,
            created_at: self.clock.now(),
            updated_at: None,
            metadata,
        };

        let serialized =
            serde_json::to_string(&record).map_err(|e| KeyError::Malformed(e.to_string()))?;
        self.kv
            .set(&Self::record_key(key_id), &serialized, None)
            .await?;

        info!("Encryption key stored: {}", key_id);
        Ok(())
    }

    async fn load_record(&self, key_id: &str) -> Result<Option<KeyRecord>, KeyError> {
        match self.kv.get(&Self::record_key(key_id)).await? {
            Some(raw) => {
                let record =
                    serde_json::from_str(&raw).map_err(|e| KeyError::Malformed(e.to_string()))?;
                Ok(Some(record))
            },
            None => Ok(None),
        }
    }

    /// Key material for decryption. Active and rotated keys are readable;
    /// revoked keys are not.
    pub async fn get_key(&self, key_id: &str) -> Result<Option<String>, KeyError> {
        match self.load_record(key_id).await? {
            Some(record) if record.status != KeyStatus::Revoked => Ok(Some(record.key)),
            Some(_) => {
                warn!("Encryption key is revoked: {}", key_id);
                Ok(None)
            },
            None => {
                warn!("Encryption key not found: {}", key_id);
                Ok(None)
            },
        }
    }

    /// The currently active key, used for all new encryption.
    pub async fn active_key(&self) -> Result<Option<(String, String)>, KeyError> {
        let key_id = match self.kv.get(&Self::active_pointer_key()).await? {
            Some(id) => id,
            None => return Ok(None),
        };

        match self.load_record(&key_id).await? {
            Some(record) if record.status == KeyStatus::Active => Ok(Some((key_id, record.key))),
            _ => Ok(None),
        }
    }

    /// Point encryption at an existing active key.
    pub async fn set_active_key(&self, key_id: &str) -> Result<(), KeyError> {
        match self.load_record(key_id).await? {
            Some(record) if record.status == KeyStatus::Active => {
                self.kv
                    .set(&Self::active_pointer_key(), key_id, None)
                    .await?;
                info!("Active encryption key set to: {}", key_id);
                Ok(())
            },
            Some(_) => Err(KeyError::NotFound(key_id.to_string())),
            None => Err(KeyError::NotFound(key_id.to_string())),
        }
    }

    /// Rotate: mint a new active key, retire the previous one to `rotated`.
    pub async fn rotate_key(&self) -> Result<RotationOutcome, KeyError> {
        let now = self.clock.now();
        let new_key = self.generate_key();
        let new_key_id = format!("key_{}", now.timestamp());

        let mut metadata = BTreeMap::new();
        metadata.insert(
            "rotation_date".to_string(),
            Value::String(now.to_rfc3339()),
        );
        self.store_key(&new_key_id, &new_key, metadata).await?;

        let old_key_id = self.active_key().await?.map(|(id, _)| id);

        self.set_active_key(&new_key_id).await?;

        if let Some(old_id) = &old_key_id {
            self.update_status(old_id, KeyStatus::Rotated).await?;
        }

        info!("Key rotation completed, new key: {}", new_key_id);

        Ok(RotationOutcome {
            old_key_id,
            new_key_id,
            rotated_at: now,
        })
    }

    async fn update_status(&self, key_id: &str, status: KeyStatus) -> Result<(), KeyError> {
        let mut record = self
            .load_record(key_id)
            .await?
            .ok_or_else(|| KeyError::NotFound(key_id.to_string()))?;

        record.status = status;
        record.updated_at = Some(self.clock.now());

        let serialized =
            serde_json::to_string(&record).map_err(|e| KeyError::Malformed(e.to_string()))?;
        self.kv
            .set(&Self::record_key(key_id), &serialized, None)
            .await?;
        Ok(())
    }

    /// Revoke a key. Revoked material is unreadable even for decryption.
    pub async fn revoke_key(&self, key_id: &str) -> Result<(), KeyError> {
        self.update_status(key_id, KeyStatus::Revoked).await?;
        warn!("Encryption key revoked: {}", key_id);
        Ok(())
    }

    /// List metadata for all stored keys.
    pub async fn list_keys(&self) -> Result<Vec<KeyInfo>, KeyError> {
        let keys = self.kv.scan_prefix(&format!("{}/", KEY_PREFIX)).await?;

        let mut infos = Vec::new();
        for key_name in keys {
            if key_name == Self::active_pointer_key() {
                continue;
            }
            if let Some(raw) = self.kv.get(&key_name).await? {
                let record: KeyRecord =
                    serde_json::from_str(&raw).map_err(|e| KeyError::Malformed(e.to_string()))?;
                infos.push(KeyInfo {
                    key_id: record.key_id,
                    status: record.status,
                    created_at: record.created_at,
                    metadata: record.metadata,
                });
            }
        }
        Ok(infos)
    }

    /// Metadata for one key, without material.
    pub async fn key_info(&self, key_id: &str) -> Result<Option<KeyInfo>, KeyError> {
        Ok(self.load_record(key_id).await?.map(|record| KeyInfo {
            key_id: record.key_id,
            status: record.status,
            created_at: record.created_at,
            metadata: record.metadata,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryKv;
    use crate::utils::clock::ManualClock;
    use chrono::TimeZone;

    fn manager() -> (KeyManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
        ));
        let kv = Arc::new(MemoryKv::with_clock(clock.clone()));
        (KeyManager::new(kv, clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_store_and_activate() {
        let (manager, _) = manager();
        let key = manager.generate_key();

        manager
            .store_key("key_1", &key, BTreeMap::new())
            .await
            .unwrap();
        manager.set_active_key("key_1").await.unwrap();

        let (active_id, active_key) = manager.active_key().await.unwrap().unwrap();
        assert_eq!(active_id, "key_1");
        assert_eq!(active_key, key);
    }

    #[tokio::test]
    async fn test_rotation_keeps_old_key_readable() {
        let (manager, clock) = manager();
        let first = manager.generate_key();
        manager
            .store_key("key_1", &first, BTreeMap::new())
            .await
            .unwrap();
        manager.set_active_key("key_1").await.unwrap();

        clock.advance(chrono::Duration::seconds(10));
        let outcome = manager.rotate_key().await.unwrap();

        assert_eq!(outcome.old_key_id.as_deref(), Some("key_1"));
        assert_ne!(outcome.new_key_id, "key_1");

        // The rotated key stays readable for decryption
        assert_eq!(manager.get_key("key_1").await.unwrap(), Some(first));

        // But it is no longer the active key
        let (active_id, _) = manager.active_key().await.unwrap().unwrap();
        assert_eq!(active_id, outcome.new_key_id);
    }

    #[tokio::test]
    async fn test_revoked_key_unreadable() {
        let (manager, _) = manager();
        manager
            .store_key("key_1", "material", BTreeMap::new())
            .await
            .unwrap();

        manager.revoke_key("key_1").await.unwrap();

        assert_eq!(manager.get_key("key_1").await.unwrap(), None);
        let info = manager.key_info("key_1").await.unwrap().unwrap();
        assert_eq!(info.status, KeyStatus::Revoked);
    }

    #[tokio::test]
    async fn test_list_skips_active_pointer() {
        let (manager, _) = manager();
        manager
            .store_key("key_1", "m1", BTreeMap::new())
            .await
            .unwrap();
        manager
            .store_key("key_2", "m2", BTreeMap::new())
            .await
            .unwrap();
        manager.set_active_key("key_2").await.unwrap();

        let mut ids: Vec<String> = manager
            .list_keys()
            .await
            .unwrap()
            .into_iter()
            .map(|k| k.key_id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["key_1", "key_2"]);
    }
}
