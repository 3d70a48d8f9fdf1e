// Device fingerprinting
// Hashes the canonical encoding of the client-reported attribute map, so the
// same attributes always yield the same 64-character identifier regardless
// of key order.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use super::canonical::to_canonical_json;

/// Generate a device fingerprint from client characteristics.
///
/// Typical attributes: user_agent, screen_resolution, timezone, language,
/// platform, plugins. The map is canonicalized (sorted keys, compact JSON)
/// before hashing, giving a full SHA-256 hex digest.
pub fn device_fingerprint(device_info: &BTreeMap<String, Value>) -> String {
    let canonical =
        to_canonical_json(device_info).expect("JSON value map always serializes");

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());

    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_info() -> BTreeMap<String, Value> {
        let mut info = BTreeMap::new();
        info.insert("user_agent".to_string(), json!("Mozilla/5.0"));
        info.insert("screen_resolution".to_string(), json!("1920x1080"));
        info.insert("timezone".to_string(), json!("UTC"));
        info.insert("language".to_string(), json!("en-US"));
        info.insert("platform".to_string(), json!("Linux"));
        info
    }

    #[test]
    fn test_fingerprint_shape() {
        let fp = device_fingerprint(&sample_info());

        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_fingerprint_consistency() {
        let fp1 = device_fingerprint(&sample_info());
        let fp2 = device_fingerprint(&sample_info());

        assert_eq!(fp1, fp2, "same attributes should produce same fingerprint");
    }

    #[test]
    fn test_fingerprint_changes_with_attributes() {
        let mut altered = sample_info();
        altered.insert("platform".to_string(), json!("Windows"));

        assert_ne!(device_fingerprint(&sample_info()), device_fingerprint(&altered));
    }
}
