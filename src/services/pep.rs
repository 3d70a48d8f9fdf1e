// Policy Enforcement Point
// Surfaces PDP verdicts at the request boundary: allow passes the decision
// through, a step-up requirement and a denial become typed rejections that
// the transport layer maps onto its own status codes.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

use crate::models::context::RequestContext;
use crate::models::decision::AccessDecision;
use crate::services::pdp::PolicyDecisionPoint;
use crate::utils::access_error::AccessError;

/// Fixed action set used for permission matrices.
pub const ENFORCED_ACTIONS: [&str; 5] = ["read", "write", "create", "delete", "execute"];

pub struct PolicyEnforcementPoint {
    pdp: Arc<PolicyDecisionPoint>,
}

impl PolicyEnforcementPoint {
    pub fn new(pdp: Arc<PolicyDecisionPoint>) -> Self {
        Self { pdp }
    }

    /// Enforce a decision for one request.
    ///
    /// Returns the decision when access is allowed outright; a denial or a
    /// step-up requirement comes back as an [`AccessError`].
    pub async fn enforce(
        &self,
        user_id: &str,
        resource: &str,
        action: &str,
        context: &RequestContext,
    ) -> Result<AccessDecision, AccessError> {
        let decision = self.pdp.make_decision(user_id, resource, action, context).await;

        if !decision.allowed {
            warn!(
                "Access denied - User: {}, Resource: {}, Action: {}, Reason: {}",
                user_id, resource, action, decision.reason
            );
            return Err(AccessError::Forbidden {
                reason: decision.reason,
                policy_id: decision.policy_id,
                failed_conditions: decision.failed_conditions,
                risk_level: decision.risk_level,
            });
        }

        if decision.requires_additional_verification {
            return Err(AccessError::StepUpRequired {
                required_methods: decision.additional_verification_methods.clone(),
                risk_score: decision.risk_score,
            });
        }

        Ok(decision)
    }

    /// Non-raising permission check. Step-up counts as not permitted.
    pub async fn check_permission(
        &self,
        user_id: &str,
        resource: &str,
        action: &str,
        context: &RequestContext,
    ) -> bool {
        self.enforce(user_id, resource, action, context).await.is_ok()
    }

    /// Resource x action truth table over the fixed action set, e.g. for a
    /// UI deciding which controls to show.
    pub async fn get_user_permissions(
        &self,
        user_id: &str,
        resources: &[&str],
        context: &RequestContext,
    ) -> BTreeMap<String, BTreeMap<String, bool>> {
        let mut permissions = BTreeMap::new();

        for resource in resources {
            let mut actions = BTreeMap::new();
            for action in ENFORCED_ACTIONS {
                let permitted = self
                    .check_permission(user_id, resource, action, context)
                    .await;
                actions.insert(action.to_string(), permitted);
            }
            permissions.insert(resource.to_string(), actions);
        }

        permissions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_config::AppConfig;
    use crate::db::{KvStore, MemoryKv};
    use crate::models::decision::RiskLevel;
    use crate::services::audit::AuditService;
    use crate::services::policy_engine::PolicyEngine;
    use crate::services::risk::RiskAnalyzer;
    use crate::utils::clock::ManualClock;
    use chrono::{TimeZone, Utc};

    const DOCUMENT: &str = r#"{
        "policies": [
            {
                "id": "account_read",
                "resource": "account",
                "action": "read",
                "conditions": {"user_verified": true, "risk_score": {"max": 60}}
            },
            {
                "id": "account_write",
                "resource": "account",
                "action": "write",
                "conditions": {"user_verified": true, "mfa_verified": true}
            }
        ]
    }"#;

    fn pep() -> (PolicyEnforcementPoint, Arc<MemoryKv>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
        ));
        let kv = Arc::new(MemoryKv::with_clock(clock.clone()));
        let config = AppConfig::for_test();

        let engine = Arc::new(PolicyEngine::from_json_str(DOCUMENT).unwrap());
        let analyzer = Arc::new(RiskAnalyzer::new(kv.clone(), clock.clone()));
        let audit = Arc::new(AuditService::new(kv.clone(), clock.clone(), &config).unwrap());
        let pdp = Arc::new(PolicyDecisionPoint::new(
            engine,
            analyzer,
            audit,
            clock,
            &config,
        ));

        (PolicyEnforcementPoint::new(pdp), kv)
    }

    fn context() -> RequestContext {
        let mut context = RequestContext::for_user("u1");
        context.user_verified = true;
        context.device_trusted = true;
        context
    }

    #[tokio::test]
    async fn test_enforce_allows() {
        let (pep, _) = pep();

        let decision = pep.enforce("u1", "account", "read", &context()).await.unwrap();
        assert!(decision.allowed);
    }

    #[tokio::test]
    async fn test_enforce_forbids_with_details() {
        let (pep, _) = pep();
        let mut context = context();
        context.mfa_verified = false;

        let err = pep
            .enforce("u1", "account", "write", &context)
            .await
            .unwrap_err();

        match err {
            AccessError::Forbidden {
                policy_id,
                failed_conditions,
                risk_level,
                ..
            } => {
                assert_eq!(policy_id.as_deref(), Some("account_write"));
                assert!(failed_conditions.contains(&"mfa_verified".to_string()));
                assert_eq!(risk_level, RiskLevel::Low);
            },
            other => panic!("expected Forbidden, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_enforce_requires_step_up() {
        let (pep, kv) = pep();

        // Untrusted device + failed attempts + amount: risk 95, policy for
        // reads has a 60 cap so use a permissive context on `account_write`
        // instead: mfa ok, but the risk pushes past the step-up threshold.
        kv.set("failed_attempts/u1", "4", None).await.unwrap();
        let mut context = context();
        context.device_trusted = false;
        context.transaction_amount = Some(20_000.0);
        context.mfa_verified = true;

        let err = pep
            .enforce("u1", "account", "write", &context)
            .await
            .unwrap_err();

        match err {
            AccessError::StepUpRequired {
                required_methods,
                risk_score,
            } => {
                assert_eq!(required_methods, vec!["mfa", "security_question"]);
                assert_eq!(risk_score, 95);
            },
            other => panic!("expected StepUpRequired, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_permission_matrix() {
        let (pep, _) = pep();

        let permissions = pep
            .get_user_permissions("u1", &["account"], &context())
            .await;

        let account = &permissions["account"];
        assert!(account["read"]);
        assert!(!account["write"]); // mfa not verified
        assert!(!account["create"]); // no policy at all
        assert!(!account["delete"]);
        assert!(!account["execute"]);
    }
}
