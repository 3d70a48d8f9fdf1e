// Policy Decision Point
// Orchestrates risk scoring and policy evaluation into one decision:
// score the request, enrich the context, evaluate policies, classify the
// risk level, flag step-up on high-risk allows, and audit the outcome
// before returning it. Infrastructure failures never produce an allow.

use std::sync::Arc;
use tracing::error;

use crate::app_config::AppConfig;
use crate::db::KvError;
use crate::models::context::RequestContext;
use crate::models::decision::{AccessDecision, AccessRequest, RiskLevel};
use crate::services::audit::AuditService;
use crate::services::policy_engine::PolicyEngine;
use crate::services::risk::RiskAnalyzer;
use crate::utils::clock::Clock;

pub const STEP_UP_METHODS: [&str; 2] = ["mfa", "security_question"];

#[derive(Debug, Clone, Copy)]
struct RiskThresholds {
    low: u8,
    medium: u8,
    high: u8,
}

pub struct PolicyDecisionPoint {
    policy_engine: Arc<PolicyEngine>,
    risk_analyzer: Arc<RiskAnalyzer>,
    audit: Arc<AuditService>,
    clock: Arc<dyn Clock>,
    thresholds: RiskThresholds,
}

impl PolicyDecisionPoint {
    pub fn new(
        policy_engine: Arc<PolicyEngine>,
        risk_analyzer: Arc<RiskAnalyzer>,
        audit: Arc<AuditService>,
        clock: Arc<dyn Clock>,
        config: &AppConfig,
    ) -> Self {
        Self {
            policy_engine,
            risk_analyzer,
            audit,
            clock,
            thresholds: RiskThresholds {
                low: config.risk_threshold_low,
                medium: config.risk_threshold_medium,
                high: config.risk_threshold_high,
            },
        }
    }

    /// Make an authorization decision. Always audited before returning, and
    /// never an allow when infrastructure failed mid-decision.
    pub async fn make_decision(
        &self,
        user_id: &str,
        resource: &str,
        action: &str,
        context: &RequestContext,
    ) -> AccessDecision {
        let assessment = match self.risk_analyzer.assess(context).await {
            Ok(assessment) => assessment,
            Err(e) => {
                return self
                    .deny_on_infra_failure(user_id, resource, action, &e)
                    .await
            },
        };

        let mut enriched = context.clone();
        enriched.risk_score = Some(assessment.score);
        enriched.decision_timestamp = Some(self.clock.now());

        let policy_decision = self.policy_engine.evaluate(resource, action, &enriched);

        let step_up = policy_decision.allowed && assessment.score > self.thresholds.high;

        let decision = AccessDecision {
            allowed: policy_decision.allowed,
            policy_id: policy_decision.policy_id,
            reason: policy_decision.reason,
            failed_conditions: policy_decision.failed_conditions,
            user_id: user_id.to_string(),
            resource: resource.to_string(),
            action: action.to_string(),
            risk_score: assessment.score,
            risk_level: self.classify(assessment.score),
            requires_additional_verification: step_up,
            additional_verification_methods: if step_up {
                STEP_UP_METHODS.iter().map(|m| m.to_string()).collect()
            } else {
                Vec::new()
            },
            decided_at: self.clock.now(),
        };

        self.record(decision).await
    }

    /// Audit the decision; a failed audit write downgrades an allow to a
    /// deny, since an unrecorded allow would violate the audit guarantee.
    async fn record(&self, decision: AccessDecision) -> AccessDecision {
        let logged = self
            .audit
            .log_authorization(
                &decision.user_id,
                &decision.resource,
                &decision.action,
                decision.allowed,
                Some(decision.reason.clone()),
                Some(decision.risk_score),
            )
            .await;

        match logged {
            Ok(_) => decision,
            Err(e) => {
                error!("Failed to audit authorization decision: {}", e);
                AccessDecision {
                    allowed: false,
                    reason: "service_unavailable".to_string(),
                    requires_additional_verification: false,
                    additional_verification_methods: Vec::new(),
                    ..decision
                }
            },
        }
    }

    async fn deny_on_infra_failure(
        &self,
        user_id: &str,
        resource: &str,
        action: &str,
        err: &KvError,
    ) -> AccessDecision {
        let reason = match err {
            KvError::Timeout(_) => "timeout",
            KvError::Unavailable(_) => "service_unavailable",
        };
        error!(
            "Risk assessment failed for user {} on {}/{}: {}",
            user_id, resource, action, err
        );

        let decision = AccessDecision {
            allowed: false,
            policy_id: None,
            reason: reason.to_string(),
            failed_conditions: Vec::new(),
            user_id: user_id.to_string(),
            resource: resource.to_string(),
            action: action.to_string(),
            risk_score: 0,
            risk_level: RiskLevel::Low,
            requires_additional_verification: false,
            additional_verification_methods: Vec::new(),
            decided_at: self.clock.now(),
        };

        // Best effort: the deny stands even if this audit write also fails.
        if let Err(e) = self
            .audit
            .log_authorization(
                user_id,
                resource,
                action,
                false,
                Some(reason.to_string()),
                None,
            )
            .await
        {
            error!("Failed to audit infra-failure denial: {}", e);
        }

        decision
    }

    fn classify(&self, risk_score: u8) -> RiskLevel {
        if risk_score < self.thresholds.low {
            RiskLevel::Low
        } else if risk_score < self.thresholds.medium {
            RiskLevel::Medium
        } else if risk_score < self.thresholds.high {
            RiskLevel::High
        } else {
            RiskLevel::Critical
        }
    }

    /// Evaluate several requests for one user. Decisions are independent;
    /// there is no atomicity across the batch.
    pub async fn batch_evaluate(
        &self,
        user_id: &str,
        requests: &[AccessRequest],
    ) -> Vec<AccessDecision> {
        let mut decisions = Vec::with_capacity(requests.len());
        for request in requests {
            decisions.push(
                self.make_decision(user_id, &request.resource, &request.action, &request.context)
                    .await,
            );
        }
        decisions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{KvStore, MemoryKv};
    use crate::models::audit::EventSeverity;
    use crate::utils::clock::ManualClock;
    use chrono::{TimeZone, Utc};

    const DOCUMENT: &str = r#"{
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
            {
                "id": "transfer_any",
                "resource": "transfer",
                "action": "execute",
                "conditions": {"user_verified": true}
            }
        ]
    }"#;

    struct Fixture {
        pdp: PolicyDecisionPoint,
        audit: Arc<AuditService>,
        kv: Arc<MemoryKv>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
        ));
        let kv = Arc::new(MemoryKv::with_clock(clock.clone()));
        let config = AppConfig::for_test();

        let engine = Arc::new(PolicyEngine::from_json_str(DOCUMENT).unwrap());
        let analyzer = Arc::new(
            RiskAnalyzer::new(kv.clone(), clock.clone()).with_weights(engine.risk_factors()),
        );
        let audit = Arc::new(AuditService::new(kv.clone(), clock.clone(), &config).unwrap());

        Fixture {
            pdp: PolicyDecisionPoint::new(engine, analyzer, audit.clone(), clock, &config),
            audit,
            kv,
        }
    }

    fn verified_holder(user_id: &str) -> RequestContext {
        let mut context = RequestContext::for_user(user_id);
        context.user_verified = true;
        context.device_trusted = true;
        context.roles = vec!["account_holder".to_string()];
        context
    }

    #[tokio::test]
    async fn test_allow_with_low_risk() {
        let f = fixture();

        let decision = f
            .pdp
            .make_decision("u1", "account", "read", &verified_holder("u1"))
            .await;

        assert!(decision.allowed);
        assert_eq!(decision.policy_id.as_deref(), Some("account_read"));
        assert_eq!(decision.risk_score, 0);
        assert_eq!(decision.risk_level, RiskLevel::Low);
        assert!(!decision.requires_additional_verification);

        // The allow was audited at info severity
        let events = f.audit.user_events("u1", 10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, "authorization_granted");
        assert_eq!(events[0].severity, EventSeverity::Info);
    }

    #[tokio::test]
    async fn test_deny_is_audited_with_warning() {
        let f = fixture();

        // Untrusted device (30) + recent failures (40) push risk past 60
        f.kv.set("failed_attempts/u1", "4", None).await.unwrap();
        let mut context = verified_holder("u1");
        context.device_trusted = false;

        let decision = f.pdp.make_decision("u1", "account", "read", &context).await;

        assert!(!decision.allowed);
        assert_eq!(decision.risk_score, 70);
        assert_eq!(decision.risk_level, RiskLevel::High);

        let events = f.audit.user_events("u1", 10).await.unwrap();
        let warnings: Vec<_> = events
            .iter()
            .filter(|e| e.severity >= EventSeverity::Warning)
            .collect();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].action, "authorization_denied");
    }

    #[tokio::test]
    async fn test_step_up_on_critical_allow() {
        let f = fixture();

        // 30 (device) + 40 (failures) + 25 (amount) = 95: critical but the
        // transfer policy itself still allows
        f.kv.set("failed_attempts/u1", "4", None).await.unwrap();
        let mut context = verified_holder("u1");
        context.device_trusted = false;
        context.transaction_amount = Some(50_000.0);

        let decision = f
            .pdp
            .make_decision("u1", "transfer", "execute", &context)
            .await;

        assert!(decision.allowed);
        assert_eq!(decision.risk_score, 95);
        assert_eq!(decision.risk_level, RiskLevel::Critical);
        assert!(decision.requires_additional_verification);
        assert_eq!(
            decision.additional_verification_methods,
            vec!["mfa", "security_question"]
        );
    }

    #[tokio::test]
    async fn test_risk_level_classification() {
        let f = fixture();

        assert_eq!(f.pdp.classify(0), RiskLevel::Low);
        assert_eq!(f.pdp.classify(29), RiskLevel::Low);
        assert_eq!(f.pdp.classify(30), RiskLevel::Medium);
        assert_eq!(f.pdp.classify(59), RiskLevel::Medium);
        assert_eq!(f.pdp.classify(60), RiskLevel::High);
        assert_eq!(f.pdp.classify(79), RiskLevel::High);
        assert_eq!(f.pdp.classify(80), RiskLevel::Critical);
        assert_eq!(f.pdp.classify(100), RiskLevel::Critical);
    }

    #[tokio::test]
    async fn test_batch_evaluate_is_per_request() {
        let f = fixture();
        let context = verified_holder("u1");

        let requests = vec![
            AccessRequest {
                resource: "account".to_string(),
                action: "read".to_string(),
                context: context.clone(),
            },
            AccessRequest {
                resource: "ledger".to_string(),
                action: "write".to_string(),
                context,
            },
        ];

        let decisions = f.pdp.batch_evaluate("u1", &requests).await;

        assert_eq!(decisions.len(), 2);
        assert!(decisions[0].allowed);
        assert!(!decisions[1].allowed);
        assert_eq!(decisions[1].reason, "no matching policy found");
    }
}
