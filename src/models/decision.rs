// Authorization decision types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Risk level classification of a scored request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

/// Outcome of evaluating a (resource, action, context) tuple against the
/// policy set. Produced by the policy engine, before risk classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub allowed: bool,
    pub policy_id: Option<String>,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_conditions: Vec<String>,
}

impl PolicyDecision {
    pub fn allow(policy_id: &str) -> Self {
        Self {
            allowed: true,
            policy_id: Some(policy_id.to_string()),
            reason: "all policy conditions satisfied".to_string(),
            failed_conditions: Vec::new(),
        }
    }

    pub fn deny(policy_id: Option<&str>, reason: &str, failed_conditions: Vec<String>) -> Self {
        Self {
            allowed: false,
            policy_id: policy_id.map(str::to_string),
            reason: reason.to_string(),
            failed_conditions,
        }
    }

    pub fn no_matching_policy() -> Self {
        Self::deny(None, "no matching policy found", Vec::new())
    }
}

/// Full decision returned by the PDP: the policy outcome enriched with the
/// request identity, risk classification, and any step-up requirement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessDecision {
    pub allowed: bool,
    pub policy_id: Option<String>,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_conditions: Vec<String>,
    pub user_id: String,
    pub resource: String,
    pub action: String,
    pub risk_score: u8,
    pub risk_level: RiskLevel,
    pub requires_additional_verification: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_verification_methods: Vec<String>,
    pub decided_at: DateTime<Utc>,
}

/// A single entry in a batch evaluation request.
#[derive(Debug, Clone)]
pub struct AccessRequest {
    pub resource: String,
    pub action: String,
    pub context: crate::models::context::RequestContext,
}
