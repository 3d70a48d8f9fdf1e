// KV store abstraction
// Every component takes this trait as an explicit dependency; it is the only
// shared mutable state in the process. The operation set mirrors the subset
// of Redis the gateway relies on.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KvError {
    #[error("kv store unavailable: {0}")]
    Unavailable(String),

    #[error("kv operation timed out after {0:?}")]
    Timeout(Duration),
}

/// String-keyed store with TTL support, counters, lists, and sets.
///
/// Implementations must honor the per-call timeout they were configured
/// with; callers treat a `Timeout` as a failed decision, never as success.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    /// Set a value, optionally with a TTL. A `None` TTL persists the key.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), KvError>;

    /// Delete a key. Returns whether the key existed.
    async fn del(&self, key: &str) -> Result<bool, KvError>;

    async fn exists(&self, key: &str) -> Result<bool, KvError>;

    /// Atomically increment an integer value, creating it at 1.
    async fn incr(&self, key: &str) -> Result<i64, KvError>;

    /// Re-arm or set a key's TTL. Returns false when the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, KvError>;

    /// Push a value onto the head of a list.
    async fn lpush(&self, key: &str, value: &str) -> Result<(), KvError>;

    /// Trim a list to the inclusive index range.
    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> Result<(), KvError>;

    /// Read the inclusive index range of a list, head first.
    async fn lrange(&self, key: &str, start: isize, stop: isize)
        -> Result<Vec<String>, KvError>;

    /// Add a member to a set. Returns whether the member was new.
    async fn sadd(&self, key: &str, member: &str) -> Result<bool, KvError>;

    /// Remove a member from a set. Returns whether the member was present.
    async fn srem(&self, key: &str, member: &str) -> Result<bool, KvError>;

    async fn smembers(&self, key: &str) -> Result<Vec<String>, KvError>;

    /// All keys starting with the given prefix.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, KvError>;
}
