// Token claim structures
// One claim set covers both token kinds; the `type` claim decides which
// fields are populated. Access tokens carry subject, roles, and arbitrary
// additional claims; refresh tokens carry only the (user, device) binding.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Token kind, serialized as the `type` claim.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
        }
    }
}

impl std::fmt::Display for TokenType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JWT claim set used by the token manager.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenClaims {
    /// Subject, present on access tokens only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    /// User the token was issued to
    pub user_id: String,

    /// Roles snapshot at issue time, access tokens only
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,

    /// Device binding
    pub device_id: String,

    /// Issued at (Unix epoch seconds)
    pub iat: i64,

    /// Expires at (Unix epoch seconds)
    pub exp: i64,

    #[serde(rename = "type")]
    pub token_type: TokenType,

    /// Caller-supplied additional claims
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl TokenClaims {
    pub fn access(
        subject: &str,
        user_id: &str,
        roles: Vec<String>,
        device_id: &str,
        iat: i64,
        exp: i64,
        extra: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            sub: Some(subject.to_string()),
            user_id: user_id.to_string(),
            roles,
            device_id: device_id.to_string(),
            iat,
            exp,
            token_type: TokenType::Access,
            extra,
        }
    }

    pub fn refresh(user_id: &str, device_id: &str, iat: i64, exp: i64) -> Self {
        Self {
            sub: None,
            user_id: user_id.to_string(),
            roles: Vec::new(),
            device_id: device_id.to_string(),
            iat,
            exp,
            token_type: TokenType::Refresh,
            extra: BTreeMap::new(),
        }
    }
}
