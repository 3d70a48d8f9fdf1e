// In-memory KV store
// Drop-in test double for the Redis pool with the same operation semantics,
// including TTL expiry. Time comes from the injected clock, so tests can
// advance past any TTL deterministically.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::hash_map::Entry as MapEntry;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::kv_store::{KvError, KvStore};
use crate::utils::clock::{Clock, SystemClock};

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    List(Vec<String>),
    Set(HashSet<String>),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Set(_) => "set",
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn persistent(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }
}

/// Clock-driven in-memory implementation of [`KvStore`].
pub struct MemoryKv {
    entries: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    fn wrong_type(expected: &str, found: &Value) -> KvError {
        KvError::Unavailable(format!(
            "wrong value type: expected {}, found {}",
            expected,
            found.type_name()
        ))
    }

    /// Lazily remove an entry whose TTL has lapsed.
    fn drop_if_expired(entries: &mut HashMap<String, Entry>, key: &str, now: DateTime<Utc>) {
        let expired = entries
            .get(key)
            .and_then(|e| e.expires_at)
            .map(|at| at <= now)
            .unwrap_or(false);

        if expired {
            entries.remove(key);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().expect("memory kv lock poisoned")
    }

    fn deadline(&self, ttl: Duration) -> DateTime<Utc> {
        self.clock.now() + chrono::Duration::from_std(ttl).unwrap_or_default()
    }
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let now = self.clock.now();
        let mut entries = self.lock();
        Self::drop_if_expired(&mut entries, key, now);

        match entries.get(key) {
            Some(entry) => match &entry.value {
                Value::Str(s) => Ok(Some(s.clone())),
                other => Err(Self::wrong_type("string", other)),
            },
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), KvError> {
        let expires_at = ttl.map(|ttl| self.deadline(ttl));

        self.lock().insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at,
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<bool, KvError> {
        let now = self.clock.now();
        let mut entries = self.lock();
        Self::drop_if_expired(&mut entries, key, now);

        Ok(entries.remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool, KvError> {
        let now = self.clock.now();
        let mut entries = self.lock();
        Self::drop_if_expired(&mut entries, key, now);

        Ok(entries.contains_key(key))
    }

    async fn incr(&self, key: &str) -> Result<i64, KvError> {
        let now = self.clock.now();
        let mut entries = self.lock();
        Self::drop_if_expired(&mut entries, key, now);

        match entries.entry(key.to_string()) {
            MapEntry::Occupied(mut occupied) => match &mut occupied.get_mut().value {
                Value::Str(s) => {
                    let count: i64 = s
                        .parse()
                        .map_err(|_| KvError::Unavailable("value is not an integer".into()))?;
                    let count = count + 1;
                    *s = count.to_string();
                    Ok(count)
                },
                other => Err(Self::wrong_type("string", other)),
            },
            MapEntry::Vacant(vacant) => {
                vacant.insert(Entry::persistent(Value::Str("1".to_string())));
                Ok(1)
            },
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, KvError> {
        let now = self.clock.now();
        let deadline = now + chrono::Duration::from_std(ttl).unwrap_or_default();
        let mut entries = self.lock();
        Self::drop_if_expired(&mut entries, key, now);

        match entries.get_mut(key) {
            Some(entry) => {
                entry.expires_at = Some(deadline);
                Ok(true)
            },
            None => Ok(false),
        }
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<(), KvError> {
        let now = self.clock.now();
        let mut entries = self.lock();
        Self::drop_if_expired(&mut entries, key, now);

        match entries.entry(key.to_string()) {
            MapEntry::Occupied(mut occupied) => match &mut occupied.get_mut().value {
                Value::List(items) => {
                    items.insert(0, value.to_string());
                    Ok(())
                },
                other => Err(Self::wrong_type("list", other)),
            },
            MapEntry::Vacant(vacant) => {
                vacant.insert(Entry::persistent(Value::List(vec![value.to_string()])));
                Ok(())
            },
        }
    }

    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> Result<(), KvError> {
        let now = self.clock.now();
        let mut entries = self.lock();
        Self::drop_if_expired(&mut entries, key, now);

        match entries.get_mut(key) {
            Some(entry) => match &mut entry.value {
                Value::List(items) => {
                    *items = match resolve_range(items.len(), start, stop) {
                        Some((lo, hi)) => items[lo..=hi].to_vec(),
                        None => Vec::new(),
                    };
                    Ok(())
                },
                other => Err(Self::wrong_type("list", other)),
            },
            None => Ok(()),
        }
    }

    async fn lrange(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, KvError> {
        let now = self.clock.now();
        let mut entries = self.lock();
        Self::drop_if_expired(&mut entries, key, now);

        match entries.get(key) {
            Some(entry) => match &entry.value {
                Value::List(items) => Ok(match resolve_range(items.len(), start, stop) {
                    Some((lo, hi)) => items[lo..=hi].to_vec(),
                    None => Vec::new(),
                }),
                other => Err(Self::wrong_type("list", other)),
            },
            None => Ok(Vec::new()),
        }
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool, KvError> {
        let now = self.clock.now();
        let mut entries = self.lock();
        Self::drop_if_expired(&mut entries, key, now);

        match entries.entry(key.to_string()) {
            MapEntry::Occupied(mut occupied) => match &mut occupied.get_mut().value {
                Value::Set(members) => Ok(members.insert(member.to_string())),
                other => Err(Self::wrong_type("set", other)),
            },
            MapEntry::Vacant(vacant) => {
                let mut members = HashSet::new();
                members.insert(member.to_string());
                vacant.insert(Entry::persistent(Value::Set(members)));
                Ok(true)
            },
        }
    }

    async fn srem(&self, key: &str, member: &str) -> Result<bool, KvError> {
        let now = self.clock.now();
        let mut entries = self.lock();
        Self::drop_if_expired(&mut entries, key, now);

        match entries.get_mut(key) {
            Some(entry) => match &mut entry.value {
                Value::Set(members) => Ok(members.remove(member)),
                other => Err(Self::wrong_type("set", other)),
            },
            None => Ok(false),
        }
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, KvError> {
        let now = self.clock.now();
        let mut entries = self.lock();
        Self::drop_if_expired(&mut entries, key, now);

        match entries.get(key) {
            Some(entry) => match &entry.value {
                Value::Set(members) => {
                    let mut members: Vec<String> = members.iter().cloned().collect();
                    members.sort();
                    Ok(members)
                },
                other => Err(Self::wrong_type("set", other)),
            },
            None => Ok(Vec::new()),
        }
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, KvError> {
        let now = self.clock.now();
        let mut entries = self.lock();

        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.expires_at.map(|at| at <= now).unwrap_or(false))
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            entries.remove(&key);
        }

        let mut keys: Vec<String> = entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

/// Translate Redis-style inclusive indices (negative = from the tail) into a
/// concrete slice range, or None when the range is empty.
fn resolve_range(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    if len == 0 {
        return None;
    }

    let len = len as isize;
    let lo = if start < 0 { (len + start).max(0) } else { start };
    let hi = if stop < 0 { len + stop } else { stop.min(len - 1) };

    if lo > hi || lo >= len || hi < 0 {
        None
    } else {
        Some((lo as usize, hi as usize))
    }
}
