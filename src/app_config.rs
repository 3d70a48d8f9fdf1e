// Centralized configuration for the gateway core
// All values are loaded once at startup and immutable afterwards.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use thiserror::Error;

use crate::db::RedisConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingVar(String),

    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Complete gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    // Tokens
    pub jwt_secret_key: String,
    pub jwt_algorithm: String,
    pub access_token_ttl_minutes: u64,
    pub refresh_token_ttl_days: u64,

    // Field-level encryption (base64, 32 bytes once decoded)
    pub encryption_key: String,

    // MFA
    pub mfa_issuer: String,
    pub mfa_required: bool,

    // Rate limiting
    pub rate_limit_per_minute: u32,
    pub rate_limit_per_hour: u32,

    // Sessions
    pub session_timeout_minutes: u64,

    // Lockout
    pub max_failed_login_attempts: u32,
    pub account_lockout_duration_minutes: u64,

    // Risk thresholds
    pub risk_threshold_low: u8,
    pub risk_threshold_medium: u8,
    pub risk_threshold_high: u8,

    // Audit
    pub audit_log_retention_days: u64,
    pub audit_log_encryption: bool,

    // Devices
    pub device_fingerprint_required: bool,
    pub trusted_device_duration_days: u64,

    // Policy document
    pub policies_path: String,

    // KV store
    pub kv: RedisConfig,
}

impl AppConfig {
    /// Load configuration from the environment. `JWT_SECRET_KEY` and
    /// `ENCRYPTION_KEY` are required; everything else has a default.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let config = Self {
            jwt_secret_key: require_var("JWT_SECRET_KEY")?,
            jwt_algorithm: env_or("JWT_ALGORITHM", "HS256"),
            access_token_ttl_minutes: parse_var("ACCESS_TOKEN_TTL_MINUTES", 15)?,
            refresh_token_ttl_days: parse_var("REFRESH_TOKEN_TTL_DAYS", 7)?,
            encryption_key: require_var("ENCRYPTION_KEY")?,
            mfa_issuer: env_or("MFA_ISSUER", "ZTA-Finance"),
            mfa_required: parse_var("MFA_REQUIRED", false)?,
            rate_limit_per_minute: parse_var("RATE_LIMIT_PER_MINUTE", 60)?,
            rate_limit_per_hour: parse_var("RATE_LIMIT_PER_HOUR", 1000)?,
            session_timeout_minutes: parse_var("SESSION_TIMEOUT_MINUTES", 30)?,
            max_failed_login_attempts: parse_var("MAX_FAILED_LOGIN_ATTEMPTS", 5)?,
            account_lockout_duration_minutes: parse_var("ACCOUNT_LOCKOUT_DURATION_MINUTES", 30)?,
            risk_threshold_low: parse_var("RISK_THRESHOLD_LOW", 30)?,
            risk_threshold_medium: parse_var("RISK_THRESHOLD_MEDIUM", 60)?,
            risk_threshold_high: parse_var("RISK_THRESHOLD_HIGH", 80)?,
            audit_log_retention_days: parse_var("AUDIT_LOG_RETENTION_DAYS", 365)?,
            audit_log_encryption: parse_var("AUDIT_LOG_ENCRYPTION", false)?,
            device_fingerprint_required: parse_var("DEVICE_FINGERPRINT_REQUIRED", false)?,
            trusted_device_duration_days: parse_var("TRUSTED_DEVICE_DURATION_DAYS", 30)?,
            policies_path: env_or("POLICIES_PATH", "config/policies.json"),
            kv: RedisConfig {
                redis_url: env_or("REDIS_URL", "redis://127.0.0.1:6379"),
                pool_size: parse_var("REDIS_POOL_SIZE", 10)?,
                connection_timeout: Duration::from_secs(parse_var(
                    "REDIS_CONNECTION_TIMEOUT_SECONDS",
                    5,
                )?),
                command_timeout: Duration::from_secs(parse_var(
                    "REDIS_COMMAND_TIMEOUT_SECONDS",
                    2,
                )?),
                retry_attempts: parse_var("REDIS_RETRY_ATTEMPTS", 3)?,
                retry_delay: Duration::from_millis(parse_var("REDIS_RETRY_DELAY_MS", 100)?),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Deterministic configuration for tests; no environment access.
    pub fn for_test() -> Self {
        Self {
            jwt_secret_key: "test-jwt-secret-key-at-least-32-bytes!".to_string(),
            jwt_algorithm: "HS256".to_string(),
            access_token_ttl_minutes: 15,
            refresh_token_ttl_days: 7,
            // base64 of 32 zero bytes
            encryption_key: STANDARD.encode([0u8; 32]),
            mfa_issuer: "ZTA-Finance".to_string(),
            mfa_required: false,
            rate_limit_per_minute: 60,
            rate_limit_per_hour: 1000,
            session_timeout_minutes: 30,
            max_failed_login_attempts: 5,
            account_lockout_duration_minutes: 30,
            risk_threshold_low: 30,
            risk_threshold_medium: 60,
            risk_threshold_high: 80,
            audit_log_retention_days: 365,
            audit_log_encryption: false,
            device_fingerprint_required: false,
            trusted_device_duration_days: 30,
            policies_path: "config/policies.json".to_string(),
            kv: RedisConfig::default(),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt_secret_key.len() < 32 {
            return Err(ConfigError::InvalidValue(
                "JWT_SECRET_KEY".to_string(),
                "must be at least 32 bytes".to_string(),
            ));
        }
        if self.jwt_algorithm != "HS256" {
            return Err(ConfigError::InvalidValue(
                "JWT_ALGORITHM".to_string(),
                format!("unsupported algorithm: {}", self.jwt_algorithm),
            ));
        }
        match STANDARD.decode(&self.encryption_key) {
            Ok(key) if key.len() == 32 => {},
            _ => {
                return Err(ConfigError::InvalidValue(
                    "ENCRYPTION_KEY".to_string(),
                    "must be base64 of exactly 32 bytes".to_string(),
                ))
            },
        }
        if !(self.risk_threshold_low < self.risk_threshold_medium
            && self.risk_threshold_medium < self.risk_threshold_high)
        {
            return Err(ConfigError::InvalidValue(
                "RISK_THRESHOLD_*".to_string(),
                "thresholds must be strictly increasing".to_string(),
            ));
        }
        Ok(())
    }

    pub fn access_token_ttl(&self) -> Duration {
        Duration::from_secs(self.access_token_ttl_minutes * 60)
    }

    pub fn refresh_token_ttl(&self) -> Duration {
        Duration::from_secs(self.refresh_token_ttl_days * 86_400)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_minutes * 60)
    }

    pub fn account_lockout_duration(&self) -> Duration {
        Duration::from_secs(self.account_lockout_duration_minutes * 60)
    }

    pub fn trusted_device_duration(&self) -> Duration {
        Duration::from_secs(self.trusted_device_duration_days * 86_400)
    }

    pub fn audit_log_retention(&self) -> Duration {
        Duration::from_secs(self.audit_log_retention_days * 86_400)
    }

    /// Decoded AEAD key material.
    pub fn encryption_key_bytes(&self) -> Result<[u8; 32], ConfigError> {
        let decoded = STANDARD.decode(&self.encryption_key).map_err(|e| {
            ConfigError::InvalidValue("ENCRYPTION_KEY".to_string(), e.to_string())
        })?;
        decoded.try_into().map_err(|_| {
            ConfigError::InvalidValue(
                "ENCRYPTION_KEY".to_string(),
                "must decode to exactly 32 bytes".to_string(),
            )
        })
    }
}

fn require_var(name: &str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::MissingVar(name.to_string()))
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue(name.to_string(), raw)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_test_config_is_valid() {
        let config = AppConfig::for_test();
        assert!(config.validate().is_ok());
        assert_eq!(config.access_token_ttl(), Duration::from_secs(900));
        assert_eq!(config.refresh_token_ttl(), Duration::from_secs(7 * 86_400));
        assert_eq!(config.encryption_key_bytes().unwrap(), [0u8; 32]);
    }

    #[test]
    fn test_short_jwt_secret_rejected() {
        let config = AppConfig {
            jwt_secret_key: "too-short".to_string(),
            ..AppConfig::for_test()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue(_, _))
        ));
    }

    #[test]
    fn test_threshold_ordering_enforced() {
        let config = AppConfig {
            risk_threshold_low: 80,
            ..AppConfig::for_test()
        };
        assert!(config.validate().is_err());
    }
}
