// Boundary-level access errors
// The external surface distinguishes only these kinds; internal failure
// subtypes stay in the audit trail to avoid leaking detail to callers.

use thiserror::Error;

use crate::db::KvError;
use crate::models::decision::RiskLevel;
use crate::services::token::TokenError;

/// Rejection returned at the enforcement boundary.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AccessError {
    #[error("authentication required")]
    AuthenticationRequired,

    #[error("additional verification required")]
    StepUpRequired {
        required_methods: Vec<String>,
        risk_score: u8,
    },

    #[error("access denied: {reason}")]
    Forbidden {
        reason: String,
        policy_id: Option<String>,
        failed_conditions: Vec<String>,
        risk_level: RiskLevel,
    },

    #[error("rate limit exceeded")]
    RateLimited { retry_after_seconds: u64 },

    #[error("service unavailable")]
    ServiceUnavailable,
}

impl AccessError {
    /// Stable machine-readable code for the external response body.
    pub fn error_code(&self) -> &'static str {
        match self {
            AccessError::AuthenticationRequired => "AUTHENTICATION_REQUIRED",
            AccessError::StepUpRequired { .. } => "STEP_UP_REQUIRED",
            AccessError::Forbidden { .. } => "FORBIDDEN",
            AccessError::RateLimited { .. } => "RATE_LIMITED",
            AccessError::ServiceUnavailable => "SERVICE_UNAVAILABLE",
        }
    }

    /// Retry hint, where one applies.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            AccessError::RateLimited {
                retry_after_seconds,
            } => Some(*retry_after_seconds),
            _ => None,
        }
    }
}

// Token failures collapse to "not authenticated" at the boundary; the
// distinct subtype has already been audited by the verifier.
impl From<TokenError> for AccessError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Kv(_) => AccessError::ServiceUnavailable,
            _ => AccessError::AuthenticationRequired,
        }
    }
}

// Infra failures never fail open.
impl From<KvError> for AccessError {
    fn from(_: KvError) -> Self {
        AccessError::ServiceUnavailable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            AccessError::AuthenticationRequired.error_code(),
            "AUTHENTICATION_REQUIRED"
        );
        assert_eq!(
            AccessError::RateLimited {
                retry_after_seconds: 60
            }
            .error_code(),
            "RATE_LIMITED"
        );
    }

    #[test]
    fn test_retry_after_only_for_rate_limits() {
        let limited = AccessError::RateLimited {
            retry_after_seconds: 60,
        };
        assert_eq!(limited.retry_after(), Some(60));
        assert_eq!(AccessError::ServiceUnavailable.retry_after(), None);
    }
}
