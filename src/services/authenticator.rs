// Multi-factor authentication
// Password verification, TOTP with replay suppression, failed-attempt
// lockout, and single-use password reset tokens. All mutable state lives in
// the KV store so every gateway instance sees the same lockout and replay
// decisions.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use totp_rs::{Algorithm, Secret, TOTP};
use tracing::{info, warn};

use crate::app_config::AppConfig;
use crate::db::{KvError, KvStore};
use crate::utils::clock::Clock;
use crate::utils::password::{
    hash_password, verify_password, PasswordConfig, PasswordError, PasswordVerification,
};

const TOTP_STEP_SECONDS: u64 = 30;
const TOTP_DIGITS: usize = 6;
const TOTP_SKEW: u8 = 1;
const RESET_TOKEN_TTL: Duration = Duration::from_secs(3600);

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("invalid credentials")]
    BadCredentials,

    #[error("account is locked due to too many failed attempts")]
    AccountLocked { retry_after_seconds: u64 },

    #[error("multi-factor authentication required")]
    MfaRequired,

    #[error("MFA code already used")]
    MfaReplay,

    #[error("invalid MFA code")]
    MfaBadCode,

    #[error("invalid MFA secret: {0}")]
    InvalidMfaSecret(String),

    #[error(transparent)]
    Password(#[from] PasswordError),

    #[error(transparent)]
    Kv(#[from] KvError),
}

/// Failed-attempt counter state after an increment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedAttemptStatus {
    pub attempts: i64,
    pub locked: bool,
    pub lockout_seconds: u64,
}

pub struct Authenticator {
    kv: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    password_config: PasswordConfig,
    max_failed_attempts: i64,
    lockout_duration: Duration,
    mfa_issuer: String,
    mfa_required: bool,
}

impl Authenticator {
    pub fn new(kv: Arc<dyn KvStore>, clock: Arc<dyn Clock>, config: &AppConfig) -> Self {
        Self {
            kv,
            clock,
            password_config: PasswordConfig::default(),
            max_failed_attempts: config.max_failed_login_attempts as i64,
            lockout_duration: config.account_lockout_duration(),
            mfa_issuer: config.mfa_issuer.clone(),
            mfa_required: config.mfa_required,
        }
    }

    pub fn with_password_config(mut self, password_config: PasswordConfig) -> Self {
        self.password_config = password_config;
        self
    }

    fn attempts_key(username: &str) -> String {
        format!("failed_attempts/{}", username)
    }

    fn reset_key(token: &str) -> String {
        format!("reset_token/{}", token)
    }

    fn replay_key(secret: &str, code: &str) -> String {
        format!("mfa_used/{}/{}", secret, code)
    }

    // --- Passwords ---

    pub fn hash_password(&self, password: &str) -> Result<String, AuthError> {
        Ok(hash_password(password, &self.password_config)?)
    }

    /// Verify a password. A mismatch and a missing hash are reported
    /// identically; `rehash_needed` tells the caller to re-hash on the next
    /// successful login.
    pub fn verify_password(
        &self,
        password: &str,
        password_hash: &str,
    ) -> Result<PasswordVerification, AuthError> {
        let result = verify_password(password, password_hash, &self.password_config)?;
        if !result.verified {
            warn!("Password verification failed");
        }
        Ok(result)
    }

    // --- TOTP ---

    /// Generate a fresh base32 TOTP secret (20 bytes of entropy).
    pub fn generate_mfa_secret(&self) -> String {
        Secret::generate_secret().to_encoded().to_string()
    }

    /// Verification-only TOTP instance; no issuer or account needed.
    fn totp(secret: &str) -> Result<TOTP, AuthError> {
        let secret_bytes = Secret::Encoded(secret.to_string())
            .to_bytes()
            .map_err(|e| AuthError::InvalidMfaSecret(e.to_string()))?;

        TOTP::new(
            Algorithm::SHA1,
            TOTP_DIGITS,
            TOTP_SKEW,
            TOTP_STEP_SECONDS,
            secret_bytes,
            None,
            String::new(),
        )
        .map_err(|e| AuthError::InvalidMfaSecret(e.to_string()))
    }

    /// Provisioning URI (`otpauth://...`) for authenticator apps.
    pub fn mfa_provisioning_uri(&self, secret: &str, account: &str) -> Result<String, AuthError> {
        let secret_bytes = Secret::Encoded(secret.to_string())
            .to_bytes()
            .map_err(|e| AuthError::InvalidMfaSecret(e.to_string()))?;

        let totp = TOTP::new(
            Algorithm::SHA1,
            TOTP_DIGITS,
            TOTP_SKEW,
            TOTP_STEP_SECONDS,
            secret_bytes,
            Some(self.mfa_issuer.clone()),
            account.to_string(),
        )
        .map_err(|e| AuthError::InvalidMfaSecret(e.to_string()))?;

        Ok(totp.get_url())
    }

    /// Verify a TOTP code with a ±1 step window.
    ///
    /// An accepted code is marked used for one step so it can never verify
    /// twice; a replay is reported distinctly from a wrong code.
    pub async fn verify_mfa_token(&self, secret: &str, code: &str) -> Result<(), AuthError> {
        let totp = Self::totp(secret)?;
        let now = self.clock.unix_timestamp() as u64;

        if !totp.check(code, now) {
            return Err(AuthError::MfaBadCode);
        }

        let replay_key = Self::replay_key(secret, code);
        if self.kv.exists(&replay_key).await? {
            warn!("MFA token reuse attempt detected");
            return Err(AuthError::MfaReplay);
        }

        self.kv
            .set(
                &replay_key,
                "1",
                Some(Duration::from_secs(TOTP_STEP_SECONDS)),
            )
            .await?;

        Ok(())
    }

    /// First-factor login check: lockout, then password, with the failure
    /// counter updated on the outcome.
    ///
    /// A wrong password counts against the lockout threshold; a correct one
    /// clears the counter. When the user has MFA enrolled (or the install
    /// mandates it) the caller must complete [`verify_mfa_token`] before
    /// treating the login as authenticated.
    pub async fn verify_first_factor(
        &self,
        user: &crate::models::user::User,
        password: &str,
    ) -> Result<PasswordVerification, AuthError> {
        self.ensure_not_locked(&user.username).await?;

        let result = self.verify_password(password, &user.password_hash)?;
        if !result.verified {
            let status = self.track_failed_attempt(&user.username).await?;
            if status.locked {
                return Err(AuthError::AccountLocked {
                    retry_after_seconds: status.lockout_seconds,
                });
            }
            return Err(AuthError::BadCredentials);
        }

        self.clear_failed_attempts(&user.username).await?;

        if user.mfa_enabled || self.mfa_required {
            return Err(AuthError::MfaRequired);
        }

        Ok(result)
    }

    // --- Failed attempts / lockout ---

    /// Record a failed login. The counter's TTL is armed on the observed
    /// first increment; concurrent first touches may both see count 1, which
    /// is fine as long as one of them arms the TTL.
    pub async fn track_failed_attempt(
        &self,
        username: &str,
    ) -> Result<FailedAttemptStatus, AuthError> {
        let key = Self::attempts_key(username);
        let attempts = self.kv.incr(&key).await?;

        if attempts == 1 {
            self.kv.expire(&key, self.lockout_duration).await?;
        }

        let locked = attempts >= self.max_failed_attempts;
        warn!(
            "Failed login attempt for {}, count: {}{}",
            username,
            attempts,
            if locked { " (locked)" } else { "" }
        );

        Ok(FailedAttemptStatus {
            attempts,
            locked,
            lockout_seconds: if locked {
                self.lockout_duration.as_secs()
            } else {
                0
            },
        })
    }

    pub async fn clear_failed_attempts(&self, username: &str) -> Result<(), AuthError> {
        self.kv.del(&Self::attempts_key(username)).await?;
        Ok(())
    }

    pub async fn is_account_locked(&self, username: &str) -> Result<bool, AuthError> {
        let attempts: i64 = self
            .kv
            .get(&Self::attempts_key(username))
            .await?
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(0);

        Ok(attempts >= self.max_failed_attempts)
    }

    /// Lock check for login flows. No successful authentication may bypass
    /// this.
    pub async fn ensure_not_locked(&self, username: &str) -> Result<(), AuthError> {
        if self.is_account_locked(username).await? {
            return Err(AuthError::AccountLocked {
                retry_after_seconds: self.lockout_duration.as_secs(),
            });
        }
        Ok(())
    }

    // --- Password reset ---

    /// Issue a 256-bit single-use reset token valid for one hour.
    pub async fn generate_reset_token(&self, username: &str) -> Result<String, AuthError> {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        let token = URL_SAFE_NO_PAD.encode(bytes);

        self.kv
            .set(&Self::reset_key(&token), username, Some(RESET_TOKEN_TTL))
            .await?;

        info!("Password reset token generated for {}", username);
        Ok(token)
    }

    /// Consume a reset token. The token is deleted before the username is
    /// returned, so a second presentation always fails.
    pub async fn verify_reset_token(&self, token: &str) -> Result<Option<String>, AuthError> {
        let key = Self::reset_key(token);

        match self.kv.get(&key).await? {
            Some(username) => {
                self.kv.del(&key).await?;
                Ok(Some(username))
            },
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryKv;
    use crate::utils::clock::ManualClock;
    use chrono::{TimeZone, Utc};

    fn authenticator() -> (Authenticator, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
        ));
        let kv = Arc::new(MemoryKv::with_clock(clock.clone()));
        let config = AppConfig::for_test();
        let auth = Authenticator::new(kv, clock.clone(), &config).with_password_config(
            PasswordConfig {
                memory_cost: 4096,
                time_cost: 1,
                parallelism: 1,
                output_length: 32,
            },
        );
        (auth, clock)
    }

    #[tokio::test]
    async fn test_lockout_after_threshold() {
        let (auth, clock) = authenticator();

        for expected in 1..=4 {
            let status = auth.track_failed_attempt("alice").await.unwrap();
            assert_eq!(status.attempts, expected);
            assert!(!status.locked);
            assert_eq!(status.lockout_seconds, 0);
        }

        let fifth = auth.track_failed_attempt("alice").await.unwrap();
        assert_eq!(fifth.attempts, 5);
        assert!(fifth.locked);
        assert_eq!(fifth.lockout_seconds, 1800);

        assert!(auth.is_account_locked("alice").await.unwrap());
        assert!(matches!(
            auth.ensure_not_locked("alice").await,
            Err(AuthError::AccountLocked {
                retry_after_seconds: 1800
            })
        ));

        // Lock clears when the counter's TTL expires
        clock.advance(chrono::Duration::seconds(1801));
        assert!(!auth.is_account_locked("alice").await.unwrap());
    }

    #[tokio::test]
    async fn test_clear_failed_attempts() {
        let (auth, _) = authenticator();

        for _ in 0..5 {
            auth.track_failed_attempt("bob").await.unwrap();
        }
        assert!(auth.is_account_locked("bob").await.unwrap());

        auth.clear_failed_attempts("bob").await.unwrap();
        assert!(!auth.is_account_locked("bob").await.unwrap());
    }

    #[tokio::test]
    async fn test_totp_accept_then_replay() {
        let (auth, clock) = authenticator();
        let secret = auth.generate_mfa_secret();

        let totp = Authenticator::totp(&secret).unwrap();
        let code = totp.generate(clock.unix_timestamp() as u64);

        assert!(auth.verify_mfa_token(&secret, &code).await.is_ok());

        // Same code two seconds later is a replay, not a wrong code
        clock.advance(chrono::Duration::seconds(2));
        assert!(matches!(
            auth.verify_mfa_token(&secret, &code).await,
            Err(AuthError::MfaReplay)
        ));
    }

    #[tokio::test]
    async fn test_totp_wrong_code() {
        let (auth, _) = authenticator();
        let secret = auth.generate_mfa_secret();

        assert!(matches!(
            auth.verify_mfa_token(&secret, "000000").await,
            Err(AuthError::MfaBadCode)
        ));
    }

    #[tokio::test]
    async fn test_provisioning_uri_shape() {
        let (auth, _) = authenticator();
        let secret = auth.generate_mfa_secret();

        let uri = auth.mfa_provisioning_uri(&secret, "alice").unwrap();
        assert!(uri.starts_with("otpauth://totp/"));
        assert!(uri.contains("ZTA-Finance"));
    }

    #[tokio::test]
    async fn test_reset_token_single_use() {
        let (auth, _) = authenticator();

        let token = auth.generate_reset_token("carol").await.unwrap();

        assert_eq!(
            auth.verify_reset_token(&token).await.unwrap().as_deref(),
            Some("carol")
        );
        assert_eq!(auth.verify_reset_token(&token).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_reset_token_expires() {
        let (auth, clock) = authenticator();

        let token = auth.generate_reset_token("dave").await.unwrap();
        clock.advance(chrono::Duration::seconds(3601));

        assert_eq!(auth.verify_reset_token(&token).await.unwrap(), None);
    }

    fn user_with(auth: &Authenticator, password: &str, mfa_enabled: bool) -> crate::models::user::User {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        crate::models::user::User {
            id: "u1".to_string(),
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            password_hash: auth.hash_password(password).unwrap(),
            roles: vec!["account_holder".to_string()],
            mfa_enabled,
            mfa_secret: None,
            verified: true,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_first_factor_wrong_password_counts() {
        let (auth, _) = authenticator();
        let user = user_with(&auth, "Right-1!", false);

        for _ in 0..4 {
            assert!(matches!(
                auth.verify_first_factor(&user, "Wrong-1!").await,
                Err(AuthError::BadCredentials)
            ));
        }

        // The fifth miss trips the lock
        assert!(matches!(
            auth.verify_first_factor(&user, "Wrong-1!").await,
            Err(AuthError::AccountLocked { .. })
        ));

        // Even the right password cannot bypass the lock
        assert!(matches!(
            auth.verify_first_factor(&user, "Right-1!").await,
            Err(AuthError::AccountLocked { .. })
        ));
    }

    #[tokio::test]
    async fn test_first_factor_success_clears_counter() {
        let (auth, _) = authenticator();
        let user = user_with(&auth, "Right-1!", false);

        auth.verify_first_factor(&user, "Wrong-1!").await.unwrap_err();
        let result = auth.verify_first_factor(&user, "Right-1!").await.unwrap();
        assert!(result.verified);
        assert!(!auth.is_account_locked("alice").await.unwrap());
    }

    #[tokio::test]
    async fn test_first_factor_demands_mfa_when_enrolled() {
        let (auth, _) = authenticator();
        let user = user_with(&auth, "Right-1!", true);

        assert!(matches!(
            auth.verify_first_factor(&user, "Right-1!").await,
            Err(AuthError::MfaRequired)
        ));
    }

    #[tokio::test]
    async fn test_password_round_trip() {
        let (auth, _) = authenticator();

        let hash = auth.hash_password("S3cret!pass").unwrap();
        let ok = auth.verify_password("S3cret!pass", &hash).unwrap();
        assert!(ok.verified);

        let bad = auth.verify_password("wrong", &hash).unwrap();
        assert!(!bad.verified);
    }
}
