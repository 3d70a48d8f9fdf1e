pub mod audit;
pub mod authenticator;
pub mod device;
pub mod encryption;
pub mod key_manager;
pub mod pdp;
pub mod pep;
pub mod policy_engine;
pub mod rate_limit;
pub mod risk;
pub mod session;
pub mod token;

pub use audit::{AuditError, AuditService, NewAuditEvent};
pub use authenticator::{AuthError, Authenticator, FailedAttemptStatus};
pub use device::{DeviceError, DeviceService};
pub use encryption::{CryptoError, DataEncryptor};
pub use key_manager::{KeyError, KeyInfo, KeyManager, KeyRecord, KeyStatus, RotationOutcome};
pub use pdp::{PolicyDecisionPoint, STEP_UP_METHODS};
pub use pep::{PolicyEnforcementPoint, ENFORCED_ACTIONS};
pub use policy_engine::PolicyEngine;
pub use rate_limit::{RateLimitDecision, RateLimiter};
pub use risk::{CidrThreatIntel, RiskAnalyzer, RiskAssessment, ThreatIntel};
pub use session::{SessionError, SessionService};
pub use token::{TokenError, TokenService};
