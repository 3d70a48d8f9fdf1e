pub mod audit;
pub mod auth;
pub mod context;
pub mod decision;
pub mod device;
pub mod session;
pub mod user;

pub use audit::{AuditEvent, EventSeverity, EventType};
pub use auth::{TokenClaims, TokenType};
pub use context::{GeoLocation, RequestContext};
pub use decision::{AccessDecision, AccessRequest, PolicyDecision, RiskLevel};
pub use device::{DeviceRecord, DeviceVerification};
pub use session::{SessionAnomaly, SessionRecord, SessionVerification};
pub use user::{InMemoryUserDirectory, User, UserDirectory, UserError, UserOperations};
