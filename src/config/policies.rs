// Declarative policy document
// Loaded once at startup and immutable afterwards. The document carries the
// ABAC policy list, the risk factor weight table, and device trust
// requirements.

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("failed to read policy document {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse policy document: {0}")]
    Parse(#[from] serde_json::Error),
}

/// A single ABAC policy: match on (resource, action), then require every
/// condition to hold.
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyRule {
    pub id: String,
    pub resource: String,
    pub action: String,
    #[serde(default)]
    pub conditions: BTreeMap<String, Condition>,
}

impl PolicyRule {
    /// Exact match or wildcard on both pattern sides.
    pub fn matches(&self, resource: &str, action: &str) -> bool {
        (self.resource == resource || self.resource == "*")
            && (self.action == action || self.action == "*")
    }
}

/// Condition shapes supported by policy documents.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Condition {
    /// The context attribute must equal this boolean.
    Flag(bool),

    /// The context attribute must be numeric and inside the closed range.
    /// A missing attribute fails the condition.
    Range {
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },

    /// At least one listed element must appear in the context attribute,
    /// treated as a set.
    OneOf(Vec<Value>),
}

/// Parsed policy document.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PolicyDocument {
    #[serde(default)]
    pub policies: Vec<PolicyRule>,

    /// Risk indicator name -> weight, overriding the built-in defaults.
    #[serde(default)]
    pub risk_factors: BTreeMap<String, u32>,

    /// Per-resource device trust requirements, opaque to the engine.
    #[serde(default)]
    pub device_trust_requirements: BTreeMap<String, Value>,
}

impl PolicyDocument {
    /// Load and parse the document from disk. Called once at startup; this
    /// is the only blocking file read in the core.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PolicyError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| PolicyError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let document = Self::from_json_str(&raw)?;
        info!(
            "Loaded {} policies from {}",
            document.policies.len(),
            path.display()
        );
        Ok(document)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, PolicyError> {
        Ok(serde_json::from_str(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "policies": [
            {
                "id": "account_read",
                "resource": "account",
                "action": "read",
                "conditions": {
                    "user_verified": true,
                    "risk_score": {"max": 60},
                    "roles": ["account_holder", "admin"]
                }
            },
            {"id": "admin_all", "resource": "*", "action": "*", "conditions": {}}
        ],
        "risk_factors": {"unknown_device": 30},
        "device_trust_requirements": {"payment": {"min_trust_score": 70}}
    }"#;

    #[test]
    fn test_parse_document() {
        let document = PolicyDocument::from_json_str(SAMPLE).unwrap();

        assert_eq!(document.policies.len(), 2);
        assert_eq!(document.risk_factors.get("unknown_device"), Some(&30));
        assert!(document.device_trust_requirements.contains_key("payment"));
    }

    #[test]
    fn test_condition_shapes() {
        let document = PolicyDocument::from_json_str(SAMPLE).unwrap();
        let conditions = &document.policies[0].conditions;

        assert!(matches!(conditions["user_verified"], Condition::Flag(true)));
        assert!(matches!(
            conditions["risk_score"],
            Condition::Range {
                min: None,
                max: Some(m)
            } if m == 60.0
        ));
        assert!(matches!(conditions["roles"], Condition::OneOf(ref l) if l.len() == 2));
    }

    #[test]
    fn test_pattern_matching() {
        let document = PolicyDocument::from_json_str(SAMPLE).unwrap();

        assert!(document.policies[0].matches("account", "read"));
        assert!(!document.policies[0].matches("account", "write"));
        assert!(document.policies[1].matches("anything", "delete"));
    }

    #[test]
    fn test_empty_document() {
        let document = PolicyDocument::from_json_str("{}").unwrap();
        assert!(document.policies.is_empty());
        assert!(document.risk_factors.is_empty());
    }
}
