// Canonical JSON encoding: sorted keys, UTF-8, no extraneous whitespace.
// Fingerprints and encrypted-field round-trips depend on this being stable
// across processes, so objects are re-built key-sorted before serializing.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Serialize any serde value into its canonical JSON text.
pub fn to_canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let value = serde_json::to_value(value)?;
    Ok(canonicalize(&value).to_string())
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, Value> =
                map.iter().map(|(k, v)| (k, canonicalize(v))).collect();
            serde_json::to_value(sorted).expect("sorted map serializes")
        },
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sorts_keys_recursively() {
        let value = json!({"zeta": {"b": 2, "a": 1}, "alpha": [ {"y": 0, "x": 0} ]});

        let encoded = to_canonical_json(&value).unwrap();

        assert_eq!(encoded, r#"{"alpha":[{"x":0,"y":0}],"zeta":{"a":1,"b":2}}"#);
    }

    #[test]
    fn test_equal_maps_encode_identically() {
        let a = json!({"user_agent": "Mozilla/5.0", "platform": "Linux"});
        let b = json!({"platform": "Linux", "user_agent": "Mozilla/5.0"});

        assert_eq!(
            to_canonical_json(&a).unwrap(),
            to_canonical_json(&b).unwrap()
        );
    }

    #[test]
    fn test_scalars_pass_through() {
        assert_eq!(to_canonical_json(&json!("plain")).unwrap(), r#""plain""#);
        assert_eq!(to_canonical_json(&json!(42)).unwrap(), "42");
    }
}
