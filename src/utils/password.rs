// Password hashing and verification using Argon2id
// Hashes are stored in PHC string format; verification reports whether the
// stored hash was produced with obsolete parameters so callers can re-hash
// on the next successful login.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PasswordError {
    #[error("failed to hash password: {0}")]
    HashingError(String),

    #[error("failed to verify password: {0}")]
    VerificationError(String),

    #[error("invalid password hash format")]
    InvalidHashFormat,
}

/// Outcome of a password check.
///
/// `rehash_needed` is true when the stored hash verifies but was produced
/// with parameters other than the installed ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordVerification {
    pub verified: bool,
    pub rehash_needed: bool,
}

/// Argon2id parameters, tunable per install.
/// Defaults follow the OWASP password storage recommendations.
#[derive(Debug, Clone)]
pub struct PasswordConfig {
    /// Memory cost in KiB (default: 19456 = 19 MiB)
    pub memory_cost: u32,
    /// Time cost (iterations, default: 2)
    pub time_cost: u32,
    /// Parallelism factor (default: 1)
    pub parallelism: u32,
    /// Output hash length in bytes (default: 32)
    pub output_length: usize,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            memory_cost: 19456,
            time_cost: 2,
            parallelism: 1,
            output_length: 32,
        }
    }
}

impl PasswordConfig {
    fn build_hasher(&self) -> Result<Argon2<'static>, PasswordError> {
        let params = Params::new(
            self.memory_cost,
            self.time_cost,
            self.parallelism,
            Some(self.output_length),
        )
        .map_err(|e| PasswordError::HashingError(e.to_string()))?;

        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

/// Hash a password with the installed configuration.
/// Each call embeds a fresh random salt, so equal passwords hash differently.
pub fn hash_password(password: &str, config: &PasswordConfig) -> Result<String, PasswordError> {
    let argon2 = config.build_hasher()?;
    let salt = SaltString::generate(&mut OsRng);

    let password_hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| PasswordError::HashingError(e.to_string()))?;

    Ok(password_hash.to_string())
}

/// Verify a password against a stored PHC-format hash.
///
/// A mismatch is reported as `verified: false` rather than an error; the
/// caller cannot distinguish "wrong password" from "no such hash" by error
/// shape.
pub fn verify_password(
    password: &str,
    hash: &str,
    config: &PasswordConfig,
) -> Result<PasswordVerification, PasswordError> {
    let parsed_hash = PasswordHash::new(hash).map_err(|_| PasswordError::InvalidHashFormat)?;

    // Params for verification come from the hash itself.
    match Argon2::default().verify_password(password.as_bytes(), &parsed_hash) {
        Ok(()) => Ok(PasswordVerification {
            verified: true,
            rehash_needed: needs_rehash(hash, config)?,
        }),
        Err(argon2::password_hash::Error::Password) => Ok(PasswordVerification {
            verified: false,
            rehash_needed: false,
        }),
        Err(e) => Err(PasswordError::VerificationError(e.to_string())),
    }
}

/// Check whether a stored hash should be upgraded to the installed parameters.
pub fn needs_rehash(hash: &str, config: &PasswordConfig) -> Result<bool, PasswordError> {
    let parsed_hash = PasswordHash::new(hash).map_err(|_| PasswordError::InvalidHashFormat)?;

    if parsed_hash.algorithm != Algorithm::Argon2id.ident() {
        return Ok(true);
    }

    for (ident, value) in parsed_hash.params.iter() {
        match ident.as_str() {
            "m" => {
                if let Ok(m) = value.decimal() {
                    if m != config.memory_cost {
                        return Ok(true);
                    }
                }
            },
            "t" => {
                if let Ok(t) = value.decimal() {
                    if t != config.time_cost {
                        return Ok(true);
                    }
                }
            },
            "p" => {
                if let Ok(p) = value.decimal() {
                    if p != config.parallelism {
                        return Ok(true);
                    }
                }
            },
            _ => {},
        }
    }

    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> PasswordConfig {
        // Lower memory cost so the test suite stays fast
        PasswordConfig {
            memory_cost: 4096,
            time_cost: 1,
            parallelism: 1,
            output_length: 32,
        }
    }

    #[test]
    fn test_hash_and_verify_password() {
        let config = test_config();
        let password = "MySecureP@ssw0rd123!";

        let hash = hash_password(password, &config).expect("failed to hash password");

        assert!(hash.starts_with("$argon2id$"));

        let ok = verify_password(password, &hash, &config).expect("failed to verify");
        assert!(ok.verified);
        assert!(!ok.rehash_needed);

        let bad = verify_password("WrongPassword", &hash, &config).expect("failed to verify");
        assert!(!bad.verified);
    }

    #[test]
    fn test_different_hashes_for_same_password() {
        let config = test_config();
        let password = "TestPassword123!";

        let hash1 = hash_password(password, &config).expect("failed to hash password");
        let hash2 = hash_password(password, &config).expect("failed to hash password");

        // Random salt: same password, different hashes
        assert_ne!(hash1, hash2);
        assert!(verify_password(password, &hash1, &config).unwrap().verified);
        assert!(verify_password(password, &hash2, &config).unwrap().verified);
    }

    #[test]
    fn test_rehash_flag_on_parameter_change() {
        let old_config = test_config();
        let password = "TestRehash123!";

        let hash = hash_password(password, &old_config).expect("failed to hash");

        assert!(!needs_rehash(&hash, &old_config).expect("rehash check"));

        let new_config = PasswordConfig {
            time_cost: 2,
            ..old_config
        };
        let result = verify_password(password, &hash, &new_config).expect("failed to verify");
        assert!(result.verified);
        assert!(result.rehash_needed);
    }

    #[test]
    fn test_invalid_hash_format() {
        let result = verify_password("password", "not_a_valid_hash", &test_config());
        assert!(matches!(result, Err(PasswordError::InvalidHashFormat)));
    }
}
