// Request rate limiting
// Fixed-window counters over the KV store, one per minute window and one
// per hour window. The TTL is armed on the observed first increment, the
// same discipline as the velocity and lockout counters.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::app_config::AppConfig;
use crate::db::{KvError, KvStore};
use crate::utils::access_error::AccessError;

const MINUTE_WINDOW: Duration = Duration::from_secs(60);
const HOUR_WINDOW: Duration = Duration::from_secs(3600);

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub minute_count: i64,
    pub hour_count: i64,
    /// Seconds until the violated window resets, when blocked.
    pub retry_after: Option<u64>,
}

pub struct RateLimiter {
    kv: Arc<dyn KvStore>,
    per_minute: i64,
    per_hour: i64,
}

impl RateLimiter {
    pub fn new(kv: Arc<dyn KvStore>, config: &AppConfig) -> Self {
        Self {
            kv,
            per_minute: config.rate_limit_per_minute as i64,
            per_hour: config.rate_limit_per_hour as i64,
        }
    }

    async fn bump(&self, key: &str, window: Duration) -> Result<i64, KvError> {
        let count = self.kv.incr(key).await?;
        if count == 1 {
            self.kv.expire(key, window).await?;
        }
        Ok(count)
    }

    /// Count this request against both windows for `subject` (typically a
    /// user id or peer address).
    pub async fn check(&self, subject: &str) -> Result<RateLimitDecision, KvError> {
        let minute_count = self
            .bump(&format!("rate_limit/minute/{}", subject), MINUTE_WINDOW)
            .await?;
        let hour_count = self
            .bump(&format!("rate_limit/hour/{}", subject), HOUR_WINDOW)
            .await?;

        let minute_blocked = minute_count > self.per_minute;
        let hour_blocked = hour_count > self.per_hour;

        let retry_after = if hour_blocked {
            Some(HOUR_WINDOW.as_secs())
        } else if minute_blocked {
            Some(MINUTE_WINDOW.as_secs())
        } else {
            None
        };

        if retry_after.is_some() {
            warn!(
                "Rate limit exceeded for {}: {}/min, {}/hour",
                subject, minute_count, hour_count
            );
        }

        Ok(RateLimitDecision {
            allowed: retry_after.is_none(),
            minute_count,
            hour_count,
            retry_after,
        })
    }

    /// Boundary-style check: a blocked request becomes `RateLimited`, an
    /// unreachable store becomes `ServiceUnavailable`.
    pub async fn enforce(&self, subject: &str) -> Result<(), AccessError> {
        let decision = self.check(subject).await?;

        if let Some(retry_after_seconds) = decision.retry_after {
            return Err(AccessError::RateLimited {
                retry_after_seconds,
            });
        }
        Ok(())
    }
}
