// Gateway core assembly
// Wires every component around the single shared KV client. Nothing here is
// a hidden singleton: the KV store, clock, and configuration are passed in
// explicitly and shared by reference.

use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::app_config::{AppConfig, ConfigError};
use crate::config::policies::PolicyError;
use crate::db::{KvError, KvStore, RedisKv};
use crate::services::audit::{AuditError, AuditService};
use crate::services::authenticator::Authenticator;
use crate::services::device::DeviceService;
use crate::services::key_manager::KeyManager;
use crate::services::pdp::PolicyDecisionPoint;
use crate::services::pep::PolicyEnforcementPoint;
use crate::services::policy_engine::PolicyEngine;
use crate::services::rate_limit::RateLimiter;
use crate::services::risk::{RiskAnalyzer, ThreatIntel};
use crate::services::session::SessionService;
use crate::services::token::TokenService;
use crate::utils::clock::{Clock, SystemClock};

#[derive(Error, Debug)]
pub enum InitError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Audit(#[from] AuditError),

    #[error(transparent)]
    Kv(#[from] KvError),
}

/// All gateway services, sharing one KV client and one clock.
pub struct GatewayCore {
    pub config: Arc<AppConfig>,
    pub kv: Arc<dyn KvStore>,
    pub authenticator: Arc<Authenticator>,
    pub tokens: Arc<TokenService>,
    pub devices: Arc<DeviceService>,
    pub risk: Arc<RiskAnalyzer>,
    pub sessions: Arc<SessionService>,
    pub policy_engine: Arc<PolicyEngine>,
    pub pdp: Arc<PolicyDecisionPoint>,
    pub pep: Arc<PolicyEnforcementPoint>,
    pub audit: Arc<AuditService>,
    pub keys: Arc<KeyManager>,
    pub rate_limiter: Arc<RateLimiter>,
}

impl GatewayCore {
    /// Assemble the core from explicit dependencies. The risk analyzer's
    /// weight table comes from the policy document.
    pub fn new(
        kv: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
        config: AppConfig,
        policy_engine: PolicyEngine,
        threat_intel: Option<Arc<dyn ThreatIntel>>,
    ) -> Result<Self, InitError> {
        let config = Arc::new(config);
        let policy_engine = Arc::new(policy_engine);

        let mut risk =
            RiskAnalyzer::new(kv.clone(), clock.clone()).with_weights(policy_engine.risk_factors());
        if let Some(threat_intel) = threat_intel {
            risk = risk.with_threat_intel(threat_intel);
        }
        let risk = Arc::new(risk);

        let audit = Arc::new(AuditService::new(kv.clone(), clock.clone(), &config)?);
        let pdp = Arc::new(PolicyDecisionPoint::new(
            policy_engine.clone(),
            risk.clone(),
            audit.clone(),
            clock.clone(),
            &config,
        ));

        Ok(Self {
            authenticator: Arc::new(Authenticator::new(kv.clone(), clock.clone(), &config)),
            tokens: Arc::new(TokenService::new(kv.clone(), clock.clone(), &config)),
            devices: Arc::new(DeviceService::new(kv.clone(), clock.clone(), &config)),
            sessions: Arc::new(SessionService::new(kv.clone(), clock.clone(), &config)),
            keys: Arc::new(KeyManager::new(kv.clone(), clock.clone())),
            rate_limiter: Arc::new(RateLimiter::new(kv.clone(), &config)),
            pep: Arc::new(PolicyEnforcementPoint::new(pdp.clone())),
            pdp,
            audit,
            risk,
            policy_engine,
            kv,
            config,
        })
    }

    /// Production wiring: environment configuration, the policy document
    /// from disk, and a Redis-backed KV pool.
    pub async fn connect() -> Result<Self, InitError> {
        let config = AppConfig::from_env()?;
        let policy_engine = PolicyEngine::from_file(&config.policies_path)?;

        info!("Connecting gateway core KV store");
        let kv = Arc::new(RedisKv::connect(config.kv.clone()).await?);

        Self::new(kv, Arc::new(SystemClock), config, policy_engine, None)
    }
}
