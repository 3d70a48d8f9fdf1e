// Field-level data encryption using AES-256-GCM
// Wire form is base64(nonce || ciphertext || tag) with a fresh 96-bit nonce
// per message. Any decryption failure, including tampering, surfaces as the
// same error.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::Value;
use thiserror::Error;

const NONCE_LEN: usize = 12;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("invalid encryption key: {0}")]
    InvalidKey(String),

    #[error("failed to encrypt data")]
    EncryptionFailed,

    #[error("failed to decrypt data")]
    DecryptionFailed,

    #[error("field serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// AEAD encryptor for sensitive record fields.
pub struct DataEncryptor {
    cipher: Aes256Gcm,
}

impl DataEncryptor {
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }

    pub fn from_base64(key_b64: &str) -> Result<Self, CryptoError> {
        let decoded = STANDARD
            .decode(key_b64)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let key: [u8; 32] = decoded
            .try_into()
            .map_err(|_| CryptoError::InvalidKey("key must be 32 bytes".to_string()))?;
        Ok(Self::new(&key))
    }

    /// Encrypt a plaintext string. Empty input stays empty.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }

        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(nonce.as_slice());
        combined.extend_from_slice(&ciphertext);

        Ok(STANDARD.encode(combined))
    }

    /// Decrypt a base64(nonce || ciphertext || tag) string. Empty input
    /// stays empty.
    pub fn decrypt(&self, encrypted: &str) -> Result<String, CryptoError> {
        if encrypted.is_empty() {
            return Ok(String::new());
        }

        let combined = STANDARD
            .decode(encrypted)
            .map_err(|_| CryptoError::DecryptionFailed)?;

        if combined.len() <= NONCE_LEN {
            return Err(CryptoError::DecryptionFailed);
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed)?;

        String::from_utf8(plaintext).map_err(|_| CryptoError::DecryptionFailed)
    }

    /// Encrypt selected fields of a JSON object in place.
    ///
    /// Values are serialized canonically before encryption so that
    /// decryption restores identical structures, not just strings.
    pub fn encrypt_fields(
        &self,
        record: &mut serde_json::Map<String, Value>,
        fields: &[&str],
    ) -> Result<(), CryptoError> {
        for field in fields {
            if let Some(value) = record.get(*field) {
                if value.is_null() {
                    continue;
                }
                let canonical = crate::utils::canonical::to_canonical_json(value)?;
                let encrypted = self.encrypt(&canonical)?;
                record.insert((*field).to_string(), Value::String(encrypted));
            }
        }
        Ok(())
    }

    /// Reverse of [`encrypt_fields`]: decrypt and re-parse selected fields.
    pub fn decrypt_fields(
        &self,
        record: &mut serde_json::Map<String, Value>,
        fields: &[&str],
    ) -> Result<(), CryptoError> {
        for field in fields {
            if let Some(Value::String(encrypted)) = record.get(*field) {
                if encrypted.is_empty() {
                    continue;
                }
                let plaintext = self.decrypt(encrypted)?;
                let value: Value = serde_json::from_str(&plaintext)?;
                record.insert((*field).to_string(), value);
            }
        }
        Ok(())
    }

    /// Generate fresh 256-bit key material, base64-encoded.
    pub fn generate_key() -> String {
        let key = Aes256Gcm::generate_key(&mut OsRng);
        STANDARD.encode(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn encryptor() -> DataEncryptor {
        DataEncryptor::new(&[7u8; 32])
    }

    #[test]
    fn test_round_trip() {
        let enc = encryptor();
        let plaintext = "sensitive payload with unicode: żółć";

        let ciphertext = enc.encrypt(plaintext).unwrap();
        assert_ne!(ciphertext, plaintext);
        assert_eq!(enc.decrypt(&ciphertext).unwrap(), plaintext);
    }

    #[test]
    fn test_empty_string_passthrough() {
        let enc = encryptor();
        assert_eq!(enc.encrypt("").unwrap(), "");
        assert_eq!(enc.decrypt("").unwrap(), "");
    }

    #[test]
    fn test_nonce_uniqueness() {
        let enc = encryptor();
        let a = enc.encrypt("same input").unwrap();
        let b = enc.encrypt("same input").unwrap();
        assert_ne!(a, b, "fresh nonce per message");
    }

    #[test]
    fn test_tampering_detected() {
        let enc = encryptor();
        let ciphertext = enc.encrypt("integrity matters").unwrap();

        let mut raw = STANDARD.decode(&ciphertext).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let tampered = STANDARD.encode(raw);

        assert!(matches!(
            enc.decrypt(&tampered),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_wrong_key_fails() {
        let ciphertext = encryptor().encrypt("secret").unwrap();
        let other = DataEncryptor::new(&[8u8; 32]);
        assert!(matches!(
            other.decrypt(&ciphertext),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_field_encryption_restores_structure() {
        let enc = encryptor();
        let mut record = json!({
            "event_id": "e1",
            "details": {"method": "password", "count": 3},
            "ip_address": "198.51.100.7"
        });
        let map = record.as_object_mut().unwrap();

        enc.encrypt_fields(map, &["details", "ip_address"]).unwrap();
        assert!(map["details"].is_string());
        assert!(map["ip_address"].is_string());
        assert_eq!(map["event_id"], json!("e1"));

        enc.decrypt_fields(map, &["details", "ip_address"]).unwrap();
        assert_eq!(map["details"], json!({"method": "password", "count": 3}));
        assert_eq!(map["ip_address"], json!("198.51.100.7"));
    }

    #[test]
    fn test_generated_key_usable() {
        let key = DataEncryptor::generate_key();
        let enc = DataEncryptor::from_base64(&key).unwrap();
        let ct = enc.encrypt("x").unwrap();
        assert_eq!(enc.decrypt(&ct).unwrap(), "x");
    }
}
