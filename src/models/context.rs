// Request evaluation context
// A typed attribute set replaces the untyped per-request map: policies refer
// to attributes by a stable schema, with an extensions map as the escape
// hatch for install-specific condition keys.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;

/// Coarse geolocation attached to a request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GeoLocation {
    pub country: String,
    pub city: String,
}

impl GeoLocation {
    pub fn new(country: &str, city: &str) -> Self {
        Self {
            country: country.to_string(),
            city: city.to_string(),
        }
    }

    /// Canonical `country:city` member form for the known-location set.
    pub fn as_member(&self) -> String {
        format!("{}:{}", self.country, self.city)
    }
}

/// Attributes describing a single request, consumed by the risk analyzer
/// and the policy engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestContext {
    pub user_id: Option<String>,
    pub user_verified: bool,
    pub device_trusted: bool,
    pub mfa_verified: bool,
    pub roles: Vec<String>,
    pub risk_score: Option<u8>,
    pub transaction_amount: Option<f64>,
    pub location: Option<GeoLocation>,
    pub ip_address: Option<String>,
    pub device_id: Option<String>,
    pub session_id: Option<String>,
    pub decision_timestamp: Option<DateTime<Utc>>,

    /// Install-specific attributes referenced by policy conditions.
    #[serde(default)]
    pub extensions: HashMap<String, Value>,
}

impl RequestContext {
    pub fn for_user(user_id: &str) -> Self {
        Self {
            user_id: Some(user_id.to_string()),
            ..Self::default()
        }
    }

    /// Look up a condition attribute by key.
    ///
    /// Fixed attributes resolve from the typed fields; anything else falls
    /// through to the extensions map. Absent optional attributes resolve to
    /// `None`; range conditions treat a missing attribute as failed.
    pub fn attribute(&self, key: &str) -> Option<Value> {
        match key {
            "user_id" => self.user_id.as_ref().map(|v| json!(v)),
            "user_verified" => Some(json!(self.user_verified)),
            "device_trusted" => Some(json!(self.device_trusted)),
            "mfa_verified" => Some(json!(self.mfa_verified)),
            "roles" => Some(json!(self.roles)),
            "risk_score" => self.risk_score.map(|v| json!(v)),
            "transaction_amount" => self.transaction_amount.map(|v| json!(v)),
            "location" => self.location.as_ref().map(|v| json!(v)),
            "ip_address" => self.ip_address.as_ref().map(|v| json!(v)),
            "device_id" => self.device_id.as_ref().map(|v| json!(v)),
            "session_id" => self.session_id.as_ref().map(|v| json!(v)),
            other => self.extensions.get(other).cloned(),
        }
    }
}
