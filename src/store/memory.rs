//! Memory Backend Module
//!
//! In-process key-value engine with per-key TTL and lazy expiry.
//! Connectivity is simulated so callers can exercise the unavailable and
//! reconnect paths without a running server.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{CacheError, Result};
use crate::store::{glob_match, Backend, ConnectError, StoreEntry, StoredValue};

const WRONG_TYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";
const NOT_INTEGER: &str = "ERR value is not an integer or out of range";

// == Memory Backend ==
/// In-memory store with TTL support.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    /// Key-value storage
    entries: RwLock<HashMap<String, StoreEntry>>,
    /// Connection established and not dropped
    ready: AtomicBool,
    /// Every connect attempt is refused while set
    refuse: AtomicBool,
    /// Number of upcoming connect attempts that fail transiently
    pending_failures: AtomicU32,
}

impl MemoryBackend {
    // == Constructor ==
    /// Creates a disconnected backend; call `connect` (or use `connected`).
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend that is already in the ready state.
    pub fn connected() -> Self {
        let backend = Self::new();
        backend.ready.store(true, Ordering::SeqCst);
        backend
    }

    // == Connectivity Simulation ==
    /// Makes every following connect attempt fail as refused.
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Makes the next `count` connect attempts fail transiently.
    pub fn fail_next_connects(&self, count: u32) {
        self.pending_failures.store(count, Ordering::SeqCst);
    }

    /// Drops or restores readiness, as a lost or recovered connection would.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    // == Inspection ==
    /// Remaining TTL of a live key in seconds; None if absent or persistent.
    pub async fn ttl_remaining(&self, key: &str) -> Option<u64> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|entry| !entry.is_expired())
            .and_then(StoreEntry::ttl_remaining)
    }

    /// Returns the number of live entries.
    pub async fn len(&self) -> usize {
        let entries = self.entries.read().await;
        entries.values().filter(|entry| !entry.is_expired()).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    // == Cleanup Expired ==
    /// Removes all expired entries and returns how many were dropped.
    pub async fn cleanup_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired());
        before - entries.len()
    }

    /// Applies `delta` to an integer text value, keeping any existing TTL.
    async fn add(&self, key: &str, delta: i64) -> Result<i64> {
        let mut entries = self.entries.write().await;
        purge_if_expired(&mut entries, key);

        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| StoreEntry::new(StoredValue::Text("0".to_string()), None));

        let current = match &entry.value {
            StoredValue::Text(text) => text
                .parse::<i64>()
                .map_err(|_| CacheError::Backend(NOT_INTEGER.to_string()))?,
            StoredValue::Hash(_) => return Err(CacheError::Backend(WRONG_TYPE.to_string())),
        };
        let next = current
            .checked_add(delta)
            .ok_or_else(|| CacheError::Backend(NOT_INTEGER.to_string()))?;
        entry.value = StoredValue::Text(next.to_string());
        Ok(next)
    }
}

/// Drops `key` if it has expired so callers see it as absent.
fn purge_if_expired(entries: &mut HashMap<String, StoreEntry>, key: &str) {
    if entries.get(key).is_some_and(StoreEntry::is_expired) {
        entries.remove(key);
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn connect(&self) -> std::result::Result<(), ConnectError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(ConnectError::refused("connect ECONNREFUSED (memory backend)"));
        }
        let pending = self.pending_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.pending_failures.store(pending - 1, Ordering::SeqCst);
            return Err(ConnectError::transient("connection reset (memory backend)"));
        }
        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.read().await;
        match entries.get(key).filter(|entry| !entry.is_expired()) {
            Some(StoreEntry {
                value: StoredValue::Text(text),
                ..
            }) => Ok(Some(text.clone())),
            Some(_) => Err(CacheError::Backend(WRONG_TYPE.to_string())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl_seconds: Option<u64>) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            StoreEntry::new(StoredValue::Text(value.to_string()), ttl_seconds),
        );
        debug!(key = key, ttl_seconds = ?ttl_seconds, "memory SET");
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl_seconds: Option<u64>) -> Result<bool> {
        let mut entries = self.entries.write().await;
        purge_if_expired(&mut entries, key);
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            StoreEntry::new(StoredValue::Text(value.to_string()), ttl_seconds),
        );
        Ok(true)
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        let mut entries = self.entries.write().await;
        let mut removed = 0;
        for key in keys {
            if let Some(entry) = entries.remove(key) {
                if !entry.is_expired() {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let entries = self.entries.read().await;
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(key, entry)| !entry.is_expired() && glob_match(pattern, key))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn exists(&self, keys: &[String]) -> Result<u64> {
        let entries = self.entries.read().await;
        // Repeated keys count once per occurrence, as the store does.
        Ok(keys
            .iter()
            .filter(|key| entries.get(*key).is_some_and(|entry| !entry.is_expired()))
            .count() as u64)
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        self.add(key, 1).await
    }

    async fn decr(&self, key: &str) -> Result<i64> {
        self.add(key, -1).await
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<bool> {
        let mut entries = self.entries.write().await;
        purge_if_expired(&mut entries, key);
        match entries.get_mut(key) {
            Some(entry) => {
                entry.expire_in(seconds);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn hset(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        let mut entries = self.entries.write().await;
        purge_if_expired(&mut entries, key);
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| StoreEntry::new(StoredValue::Hash(HashMap::new()), None));
        match &mut entry.value {
            StoredValue::Hash(map) => {
                for (field, value) in fields {
                    map.insert(field.clone(), value.clone());
                }
                Ok(())
            }
            StoredValue::Text(_) => Err(CacheError::Backend(WRONG_TYPE.to_string())),
        }
    }

    async fn hmget(&self, key: &str, fields: &[String]) -> Result<Vec<Option<String>>> {
        let entries = self.entries.read().await;
        match entries.get(key).filter(|entry| !entry.is_expired()) {
            Some(StoreEntry {
                value: StoredValue::Hash(map),
                ..
            }) => Ok(fields.iter().map(|field| map.get(field).cloned()).collect()),
            Some(_) => Err(CacheError::Backend(WRONG_TYPE.to_string())),
            None => Ok(vec![None; fields.len()]),
        }
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let entries = self.entries.read().await;
        match entries.get(key).filter(|entry| !entry.is_expired()) {
            Some(StoreEntry {
                value: StoredValue::Hash(map),
                ..
            }) => Ok(map.clone()),
            Some(_) => Err(CacheError::Backend(WRONG_TYPE.to_string())),
            None => Ok(HashMap::new()),
        }
    }

    async fn hdel(&self, key: &str, fields: &[String]) -> Result<u64> {
        let mut entries = self.entries.write().await;
        purge_if_expired(&mut entries, key);
        let (removed, now_empty) = match entries.get_mut(key) {
            Some(StoreEntry {
                value: StoredValue::Hash(map),
                ..
            }) => {
                let removed = fields
                    .iter()
                    .filter(|field| map.remove(*field).is_some())
                    .count() as u64;
                (removed, map.is_empty())
            }
            Some(_) => return Err(CacheError::Backend(WRONG_TYPE.to_string())),
            None => (0, false),
        };
        if now_empty {
            entries.remove(key);
        }
        Ok(removed)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
