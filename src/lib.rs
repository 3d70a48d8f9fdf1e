// Library exports for the ZTA gateway core
// This file exposes modules and types for library consumers

pub mod app;
pub mod app_config;
pub mod config;
pub mod db;
pub mod models;
pub mod services;
pub mod utils;

// Re-export commonly used types
pub use app::{GatewayCore, InitError};
pub use app_config::{AppConfig, ConfigError};
pub use config::{Condition, PolicyDocument, PolicyError, PolicyRule};
pub use db::{KvError, KvStore, MemoryKv, RedisConfig, RedisKv};
pub use models::{
    AccessDecision, AccessRequest, AuditEvent, DeviceRecord, DeviceVerification, EventSeverity,
    EventType, GeoLocation, PolicyDecision, RequestContext, RiskLevel, SessionAnomaly,
    SessionRecord, SessionVerification, TokenClaims, TokenType, User, UserDirectory, UserError,
};
pub use services::{
    AuditService, AuthError, Authenticator, DataEncryptor, DeviceService, KeyManager,
    PolicyDecisionPoint, PolicyEnforcementPoint, PolicyEngine, RateLimiter, RiskAnalyzer,
    SessionService, TokenError, TokenService,
};
pub use utils::{AccessError, Clock, ManualClock, SystemClock};
