// Token issuance and verification (HS256 JWS)
// Access tokens are stateless and short-lived; revocation goes through a
// blacklist keyed by the exact token value with the remaining lifetime as
// TTL. Refresh tokens are mirrored in the KV store under their
// (user, device) binding so the server can revoke them.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::app_config::AppConfig;
use crate::db::{KvError, KvStore};
use crate::models::auth::{TokenClaims, TokenType};
use crate::utils::clock::Clock;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TokenError {
    #[error("token has expired")]
    Expired,

    #[error("invalid token signature")]
    BadSignature,

    #[error("unexpected token type: expected {expected}, got {actual}")]
    WrongType {
        expected: TokenType,
        actual: TokenType,
    },

    #[error("token has been revoked")]
    Revoked,

    #[error("malformed token")]
    Malformed,

    #[error(transparent)]
    Kv(#[from] KvError),
}

pub struct TokenService {
    kv: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    algorithm: Algorithm,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("algorithm", &self.algorithm)
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .field("encoding_key", &"<redacted>")
            .field("decoding_key", &"<redacted>")
            .finish()
    }
}

impl TokenService {
    pub fn new(kv: Arc<dyn KvStore>, clock: Arc<dyn Clock>, config: &AppConfig) -> Self {
        Self {
            kv,
            clock,
            encoding_key: EncodingKey::from_secret(config.jwt_secret_key.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.jwt_secret_key.as_bytes()),
            algorithm: Algorithm::HS256,
            access_ttl: config.access_token_ttl(),
            refresh_ttl: config.refresh_token_ttl(),
        }
    }

    fn blacklist_key(token: &str) -> String {
        format!("blacklist/{}", token)
    }

    fn refresh_mirror_key(user_id: &str, device_id: &str) -> String {
        format!("refresh/{}/{}", user_id, device_id)
    }

    /// Signature check with expiry and type deferred to [`verify_token`],
    /// which applies the ordered failure taxonomy.
    fn decode_claims(&self, token: &str) -> Result<TokenClaims, TokenError> {
        let mut validation = Validation::new(self.algorithm);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let data =
            decode::<TokenClaims>(token, &self.decoding_key, &validation).map_err(|e| {
                match e.kind() {
                    jsonwebtoken::errors::ErrorKind::InvalidSignature => TokenError::BadSignature,
                    _ => TokenError::Malformed,
                }
            })?;

        Ok(data.claims)
    }

    /// Issue an access token for `exp = now + access_ttl`.
    pub fn create_access_token(
        &self,
        subject: &str,
        user_id: &str,
        roles: Vec<String>,
        device_id: &str,
        extra: BTreeMap<String, Value>,
    ) -> Result<String, TokenError> {
        let now = self.clock.unix_timestamp();
        let claims = TokenClaims::access(
            subject,
            user_id,
            roles,
            device_id,
            now,
            now + self.access_ttl.as_secs() as i64,
            extra,
        );

        let token = encode(&Header::new(self.algorithm), &claims, &self.encoding_key)
            .map_err(|_| TokenError::Malformed)?;

        info!("Access token created for user: {}", user_id);
        Ok(token)
    }

    /// Issue a refresh token and mirror it under its (user, device) key so
    /// it can be revoked server-side.
    pub async fn create_refresh_token(
        &self,
        user_id: &str,
        device_id: &str,
    ) -> Result<String, TokenError> {
        let now = self.clock.unix_timestamp();
        let claims = TokenClaims::refresh(
            user_id,
            device_id,
            now,
            now + self.refresh_ttl.as_secs() as i64,
        );

        let token = encode(&Header::new(self.algorithm), &claims, &self.encoding_key)
            .map_err(|_| TokenError::Malformed)?;

        self.kv
            .set(
                &Self::refresh_mirror_key(user_id, device_id),
                &token,
                Some(self.refresh_ttl),
            )
            .await?;

        info!("Refresh token created for user: {}", user_id);
        Ok(token)
    }

    /// Verify signature, expiry, type, and revocation, in that order.
    pub async fn verify_token(
        &self,
        token: &str,
        expected_type: TokenType,
    ) -> Result<TokenClaims, TokenError> {
        let claims = self.decode_claims(token)?;

        if claims.exp <= self.clock.unix_timestamp() {
            return Err(TokenError::Expired);
        }

        if claims.token_type != expected_type {
            warn!(
                "Invalid token type. Expected: {}, got: {}",
                expected_type, claims.token_type
            );
            return Err(TokenError::WrongType {
                expected: expected_type,
                actual: claims.token_type,
            });
        }

        if self.kv.exists(&Self::blacklist_key(token)).await? {
            warn!("Token is blacklisted");
            return Err(TokenError::Revoked);
        }

        Ok(claims)
    }

    /// Blacklist a token for the remainder of its lifetime. Idempotent, and
    /// a no-op for tokens that are already past `exp`.
    pub async fn blacklist_token(&self, token: &str) -> Result<(), TokenError> {
        let claims = self.decode_claims(token)?;

        let remaining = claims.exp - self.clock.unix_timestamp();
        if remaining > 0 {
            self.kv
                .set(
                    &Self::blacklist_key(token),
                    "1",
                    Some(Duration::from_secs(remaining as u64)),
                )
                .await?;
            info!("Token blacklisted for {}s", remaining);
        }

        Ok(())
    }

    pub async fn is_token_blacklisted(&self, token: &str) -> Result<bool, TokenError> {
        Ok(self.kv.exists(&Self::blacklist_key(token)).await?)
    }

    /// Drop the refresh mirror for one (user, device) binding.
    pub async fn revoke_refresh_token(
        &self,
        user_id: &str,
        device_id: &str,
    ) -> Result<(), TokenError> {
        self.kv
            .del(&Self::refresh_mirror_key(user_id, device_id))
            .await?;
        info!(
            "Refresh token revoked for user: {}, device: {}",
            user_id, device_id
        );
        Ok(())
    }

    /// Drop every refresh mirror for a user. Returns how many were removed.
    pub async fn revoke_all_user_tokens(&self, user_id: &str) -> Result<usize, TokenError> {
        let keys = self
            .kv
            .scan_prefix(&format!("refresh/{}/", user_id))
            .await?;

        let mut revoked = 0;
        for key in keys {
            if self.kv.del(&key).await? {
                revoked += 1;
            }
        }

        info!("All refresh tokens revoked for user: {}", user_id);
        Ok(revoked)
    }
}
