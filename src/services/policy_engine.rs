// ABAC policy evaluation
// Policies are matched on (resource, action) in declaration order; the first
// policy whose every condition holds allows the request. When nothing
// allows, the denial reports the first matching policy and its failed
// conditions.

use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

use crate::config::policies::{Condition, PolicyDocument, PolicyError, PolicyRule};
use crate::models::context::RequestContext;
use crate::models::decision::PolicyDecision;

pub struct PolicyEngine {
    document: PolicyDocument,
}

impl PolicyEngine {
    pub fn new(document: PolicyDocument) -> Self {
        Self { document }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PolicyError> {
        Ok(Self::new(PolicyDocument::load(path)?))
    }

    pub fn from_json_str(raw: &str) -> Result<Self, PolicyError> {
        Ok(Self::new(PolicyDocument::from_json_str(raw)?))
    }

    /// Risk indicator weight table shipped with the policy document.
    pub fn risk_factors(&self) -> &BTreeMap<String, u32> {
        &self.document.risk_factors
    }

    pub fn device_trust_requirements(&self) -> &BTreeMap<String, Value> {
        &self.document.device_trust_requirements
    }

    /// Evaluate a (resource, action, context) tuple against the policy set.
    pub fn evaluate(
        &self,
        resource: &str,
        action: &str,
        context: &RequestContext,
    ) -> PolicyDecision {
        let matching: Vec<&PolicyRule> = self
            .document
            .policies
            .iter()
            .filter(|policy| policy.matches(resource, action))
            .collect();

        if matching.is_empty() {
            warn!(
                "No policy found for resource: {}, action: {}",
                resource, action
            );
            return PolicyDecision::no_matching_policy();
        }

        for policy in &matching {
            if self.first_failed_condition(policy, context).is_none() {
                info!(
                    "Access granted - Policy: {}, Resource: {}, Action: {}",
                    policy.id, resource, action
                );
                return PolicyDecision::allow(&policy.id);
            }
        }

        // Denial reports the first matching policy.
        let first = matching[0];
        let failed = self.failed_conditions(first, context);
        let reason = self
            .first_failed_condition(first, context)
            .unwrap_or_else(|| "policy conditions not met".to_string());

        warn!("Access denied - Resource: {}, Action: {}", resource, action);
        PolicyDecision::deny(Some(&first.id), &reason, failed)
    }

    /// The reason for the first condition that fails, or None when all hold.
    fn first_failed_condition(
        &self,
        policy: &PolicyRule,
        context: &RequestContext,
    ) -> Option<String> {
        for (key, condition) in &policy.conditions {
            if let Some(reason) = Self::condition_failure(key, condition, context) {
                return Some(reason);
            }
        }
        None
    }

    /// Every failed condition of a policy, tagged with how it failed.
    fn failed_conditions(&self, policy: &PolicyRule, context: &RequestContext) -> Vec<String> {
        policy
            .conditions
            .iter()
            .filter_map(|(key, condition)| {
                Self::condition_failure(key, condition, context).map(|_| match condition {
                    Condition::Range { min, max } => {
                        let value = context.attribute(key).and_then(|v| v.as_f64());
                        match (value, max, min) {
                            (Some(v), Some(max), _) if v > *max => {
                                format!("{} (exceeds max)", key)
                            },
                            (Some(v), _, Some(min)) if v < *min => {
                                format!("{} (below min)", key)
                            },
                            _ => key.clone(),
                        }
                    },
                    _ => key.clone(),
                })
            })
            .collect()
    }

    /// Predicate per condition shape. Returns the failure reason, or None
    /// when the condition holds.
    fn condition_failure(
        key: &str,
        condition: &Condition,
        context: &RequestContext,
    ) -> Option<String> {
        let value = context.attribute(key);

        match condition {
            Condition::Flag(expected) => {
                if value.as_ref().and_then(Value::as_bool) == Some(*expected) {
                    None
                } else {
                    Some(format!("condition not met: {}", key))
                }
            },
            Condition::Range { min, max } => {
                let numeric = value.as_ref().and_then(Value::as_f64);
                match numeric {
                    None => Some(format!("condition not met: {} is not numeric", key)),
                    Some(v) => {
                        if let Some(max) = max {
                            if v > *max {
                                return Some(format!("{} exceeds maximum: {}", key, max));
                            }
                        }
                        if let Some(min) = min {
                            if v < *min {
                                return Some(format!("{} below minimum: {}", key, min));
                            }
                        }
                        None
                    },
                }
            },
            Condition::OneOf(required) => {
                let holds = match value {
                    Some(Value::Array(members)) => {
                        required.iter().any(|needed| members.contains(needed))
                    },
                    Some(single) => required.iter().any(|needed| *needed == single),
                    None => false,
                };
                if holds {
                    None
                } else {
                    Some(format!("required {} not present", key))
                }
            },
        }
    }

    /// Score a named indicator set against the document's weight table,
    /// capped at 100.
    pub fn calculate_risk_score(&self, indicators: &BTreeMap<String, bool>) -> u8 {
        let score: u32 = indicators
            .iter()
            .filter(|(_, present)| **present)
            .filter_map(|(name, _)| self.document.risk_factors.get(name))
            .sum();

        score.min(100) as u8
    }
}
