//! Cache Client Module
//!
//! Typed front door over a store backend: direct keyed operations, counters,
//! hashes, pattern deletion, and the cache-aside ("promise") orchestration.
//!
//! Every operation is one round trip (two for counters with a TTL) and fails
//! fast with `CacheError::StoreUnavailable` when the connection is not ready.
//! A client built with a retry policy also starts reconnecting in the
//! background when it finds the connection dropped.
//!
//! A TTL of 0 means no expiry everywhere a TTL is accepted.

mod codec;
mod promise;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::error::{CacheError, Result};
use crate::resilience::{connect_with_retry, RetryPolicy};
use crate::store::Backend;

pub use codec::{decode_text, is_truthy};
pub use promise::PromiseIo;
pub(crate) use promise::refresh;

// == Cache Client ==
/// Shared handle to the store. Clones share the same connection.
#[derive(Clone)]
pub struct CacheClient {
    backend: Arc<dyn Backend>,
    reconnect: Option<Arc<Reconnector>>,
}

/// Background re-establishment of a dropped connection, one cycle at a time.
#[derive(Debug)]
struct Reconnector {
    policy: RetryPolicy,
    in_progress: AtomicBool,
}

impl std::fmt::Debug for CacheClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheClient")
            .field("backend", &self.backend.name())
            .field("ready", &self.backend.is_ready())
            .field("reconnect", &self.reconnect.is_some())
            .finish()
    }
}

impl CacheClient {
    // == Constructors ==
    /// Wraps a backend whose connection is managed elsewhere.
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            reconnect: None,
        }
    }

    /// Connects `backend` under `policy`, then wraps it.
    ///
    /// The returned client reconnects under the same policy whenever an
    /// operation finds the connection dropped.
    pub async fn connect(backend: Arc<dyn Backend>, policy: &RetryPolicy) -> Result<Self> {
        connect_with_retry(backend.as_ref(), policy).await?;
        Ok(Self::new(backend).with_reconnect(policy.clone()))
    }

    /// Enables background reconnection under `policy`.
    pub fn with_reconnect(mut self, policy: RetryPolicy) -> Self {
        self.reconnect = Some(Arc::new(Reconnector {
            policy,
            in_progress: AtomicBool::new(false),
        }));
        self
    }

    /// Whether operations can currently reach the store.
    pub fn is_available(&self) -> bool {
        self.backend.is_ready()
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.backend.is_ready() {
            Ok(())
        } else {
            self.start_reconnect();
            Err(CacheError::StoreUnavailable)
        }
    }

    /// Spawns one reconnect cycle unless one is already running.
    ///
    /// A cycle that ends in a terminal policy error leaves the store
    /// unavailable; the next operation that finds it down starts a new cycle.
    fn start_reconnect(&self) {
        let Some(reconnect) = self.reconnect.clone() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        if reconnect.in_progress.swap(true, Ordering::SeqCst) {
            return;
        }

        let backend = self.backend.clone();
        warn!(backend = backend.name(), "Store connection lost, reconnecting");
        runtime.spawn(async move {
            if let Err(err) = connect_with_retry(backend.as_ref(), &reconnect.policy).await {
                error!(
                    backend = backend.name(),
                    code = err.code(),
                    "Store reconnect abandoned: {}",
                    err
                );
            }
            reconnect.in_progress.store(false, Ordering::SeqCst);
        });
    }

    // == Get ==
    /// Reads the raw stored text.
    pub async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        self.ensure_ready()?;
        self.backend.get(key).await
    }

    /// Reads a value, parsed as JSON when possible and as a string otherwise.
    pub async fn get_value(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.get_raw(key).await?.map(decode_text))
    }

    /// Reads a value and deserializes it into `T`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get_value(key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    // == Set ==
    /// Stores `value` as JSON text, replacing any previous value and TTL.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl_seconds: Option<u64>,
    ) -> Result<()> {
        let text = serde_json::to_string(value)?;
        self.set_text(key, &text, ttl_seconds).await
    }

    /// Stores pre-encoded text as-is.
    pub async fn set_text(&self, key: &str, text: &str, ttl_seconds: Option<u64>) -> Result<()> {
        let ttl_seconds = ttl_seconds.filter(|s| *s > 0);
        self.ensure_ready()?;
        self.backend.set(key, text, ttl_seconds).await?;
        debug!(key = key, ttl_seconds = ?ttl_seconds, "cache SET");
        Ok(())
    }

    /// Atomically stores `value` (plain text form) only if `key` is absent.
    ///
    /// Returns true when the value was written. A `ttl_seconds` of 0 stores
    /// the value without expiry.
    pub async fn set_if_absent(
        &self,
        key: &str,
        value: impl ToString,
        ttl_seconds: u64,
    ) -> Result<bool> {
        self.ensure_ready()?;
        let ttl = Some(ttl_seconds).filter(|s| *s > 0);
        self.backend.set_nx_ex(key, &value.to_string(), ttl).await
    }

    // == Delete ==
    /// Deletes the given keys and returns how many existed.
    pub async fn delete<K: AsRef<str>>(&self, keys: &[K]) -> Result<u64> {
        self.ensure_ready()?;
        if keys.is_empty() {
            return Ok(0);
        }
        let keys: Vec<String> = keys.iter().map(|k| k.as_ref().to_string()).collect();
        self.backend.del(&keys).await
    }

    pub async fn delete_key(&self, key: &str) -> Result<u64> {
        self.delete(&[key]).await
    }

    /// Resolves `pattern` to concrete keys, then deletes them.
    ///
    /// A pattern with no matches is a no-op returning 0.
    pub async fn delete_by_pattern(&self, pattern: &str) -> Result<u64> {
        self.ensure_ready()?;
        let keys = self.backend.keys(pattern).await?;
        if keys.is_empty() {
            debug!(pattern = pattern, "cache pattern DEL matched nothing");
            return Ok(0);
        }
        let deleted = self.backend.del(&keys).await?;
        debug!(pattern = pattern, deleted = deleted, "cache pattern DEL");
        Ok(deleted)
    }

    /// Lists the keys matching `pattern`.
    pub async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.ensure_ready()?;
        self.backend.keys(pattern).await
    }

    // == Exists ==
    /// Counts how many of `keys` are present.
    pub async fn exists<K: AsRef<str>>(&self, keys: &[K]) -> Result<u64> {
        self.ensure_ready()?;
        let keys: Vec<String> = keys.iter().map(|k| k.as_ref().to_string()).collect();
        self.backend.exists(&keys).await
    }

    // == Counters ==
    /// Increments the counter, then applies `ttl_seconds` if given.
    ///
    /// The two steps are separate round trips and are not atomic together.
    pub async fn increment(&self, key: &str, ttl_seconds: Option<u64>) -> Result<i64> {
        self.ensure_ready()?;
        let count = self.backend.incr(key).await?;
        self.apply_counter_ttl(key, ttl_seconds).await?;
        Ok(count)
    }

    /// Decrements the counter, then applies `ttl_seconds` if given.
    pub async fn decrement(&self, key: &str, ttl_seconds: Option<u64>) -> Result<i64> {
        self.ensure_ready()?;
        let count = self.backend.decr(key).await?;
        self.apply_counter_ttl(key, ttl_seconds).await?;
        Ok(count)
    }

    async fn apply_counter_ttl(&self, key: &str, ttl_seconds: Option<u64>) -> Result<()> {
        if let Some(seconds) = ttl_seconds.filter(|s| *s > 0) {
            self.expire(key, seconds).await?;
        }
        Ok(())
    }

    // == Expire ==
    /// Sets a TTL on an existing key. Returns false if the key is absent.
    pub async fn expire(&self, key: &str, seconds: u64) -> Result<bool> {
        self.ensure_ready()?;
        self.backend.expire(key, seconds).await
    }

    // == Hashes ==
    /// Stores one hash field as JSON text.
    pub async fn hash_set_field<T: Serialize + ?Sized>(
        &self,
        key: &str,
        field: &str,
        value: &T,
    ) -> Result<()> {
        let text = serde_json::to_string(value)?;
        self.ensure_ready()?;
        self.backend.hset(key, &[(field.to_string(), text)]).await
    }

    /// Stores every top-level field of `value`, each as its own JSON text.
    ///
    /// `value` must serialize to a JSON object.
    pub async fn hash_set_all<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let fields = match serde_json::to_value(value)? {
            Value::Object(map) => map
                .into_iter()
                .map(|(field, v)| Ok((field, serde_json::to_string(&v)?)))
                .collect::<Result<Vec<_>>>()?,
            other => {
                return Err(CacheError::InvalidRequest(format!(
                    "hash value for {} must be an object, got {}",
                    key, other
                )))
            }
        };
        self.ensure_ready()?;
        self.backend.hset(key, &fields).await
    }

    /// Reads the given fields, decoding each with the raw-text fallback.
    pub async fn hash_get_fields(&self, key: &str, fields: &[&str]) -> Result<Vec<Option<Value>>> {
        self.ensure_ready()?;
        let fields: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
        let raw = self.backend.hmget(key, &fields).await?;
        Ok(raw.into_iter().map(|v| v.map(decode_text)).collect())
    }

    /// Reads the whole hash, decoding each field eagerly.
    ///
    /// Returns None when the key holds no hash.
    pub async fn hash_get_all(&self, key: &str) -> Result<Option<HashMap<String, Value>>> {
        self.ensure_ready()?;
        let raw = self.backend.hgetall(key).await?;
        if raw.is_empty() {
            return Ok(None);
        }
        Ok(Some(
            raw.into_iter()
                .map(|(field, text)| (field, decode_text(text)))
                .collect(),
        ))
    }

    /// Removes hash fields and returns how many existed.
    pub async fn hash_delete(&self, key: &str, fields: &[&str]) -> Result<u64> {
        self.ensure_ready()?;
        if fields.is_empty() {
            return Ok(0);
        }
        let fields: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
        self.backend.hdel(key, &fields).await
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBackend;
    use serde::Deserialize;
    use serde_json::json;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
        tags: Vec<String>,
    }

    fn setup() -> (Arc<MemoryBackend>, CacheClient) {
        let backend = Arc::new(MemoryBackend::connected());
        let client = CacheClient::new(backend.clone());
        (backend, client)
    }

    #[tokio::test]
    async fn test_set_get_structured_value() {
        let (_, client) = setup();
        let profile = Profile {
            name: "alice".into(),
            tags: vec!["admin".into()],
        };
        client.set("profile:1", &profile, None).await.unwrap();

        let cached: Option<Profile> = client.get("profile:1").await.unwrap();
        assert_eq!(cached, Some(profile));
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let (_, client) = setup();
        assert_eq!(client.get_value("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_get_value_raw_fallback() {
        let (backend, client) = setup();
        backend.set("legacy", "not json at all", None).await.unwrap();

        assert_eq!(
            client.get_value("legacy").await.unwrap(),
            Some(json!("not json at all"))
        );
        let as_string: Option<String> = client.get("legacy").await.unwrap();
        assert_eq!(as_string.as_deref(), Some("not json at all"));
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_fast() {
        let (backend, client) = setup();
        backend.set_ready(false);

        assert!(matches!(
            client.get_value("k").await,
            Err(CacheError::StoreUnavailable)
        ));
        assert!(matches!(
            client.set("k", &1, None).await,
            Err(CacheError::StoreUnavailable)
        ));
        assert!(matches!(
            client.increment("c", None).await,
            Err(CacheError::StoreUnavailable)
        ));
        assert!(matches!(
            client.delete_by_pattern("*").await,
            Err(CacheError::StoreUnavailable)
        ));
        assert!(!client.is_available());
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            step: Duration::from_millis(10),
            max_delay: Duration::from_millis(20),
            ..RetryPolicy::default()
        }
    }

    #[tokio::test]
    async fn test_dropped_connection_recovers_through_policy() {
        let backend = Arc::new(MemoryBackend::new());
        let client = CacheClient::connect(backend.clone(), &fast_policy())
            .await
            .unwrap();
        client.set("k", &1, None).await.unwrap();

        backend.fail_next_connects(2);
        backend.set_ready(false);
        assert!(matches!(
            client.get_value("k").await,
            Err(CacheError::StoreUnavailable)
        ));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(client.is_available());
        assert_eq!(client.get_value("k").await.unwrap(), Some(json!(1)));
    }

    #[tokio::test]
    async fn test_abandoned_reconnect_restarts_on_next_operation() {
        let backend = Arc::new(MemoryBackend::new());
        let client = CacheClient::connect(backend.clone(), &fast_policy())
            .await
            .unwrap();

        backend.refuse_connections(true);
        backend.set_ready(false);
        assert!(client.get_raw("k").await.is_err());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!client.is_available());

        backend.refuse_connections(false);
        assert!(client.get_raw("k").await.is_err());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(client.get_raw("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_client_without_policy_does_not_reconnect() {
        let (backend, client) = setup();
        backend.set_ready(false);
        assert!(client.get_raw("k").await.is_err());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!client.is_available());
    }

    #[tokio::test]
    async fn test_delete_counts_removed() {
        let (_, client) = setup();
        client.set("a", &1, None).await.unwrap();
        client.set("b", &2, None).await.unwrap();

        assert_eq!(client.delete(&["a", "b", "c"]).await.unwrap(), 2);
        assert_eq!(client.delete::<&str>(&[]).await.unwrap(), 0);
        assert_eq!(client.delete_key("a").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_by_pattern() {
        let (_, client) = setup();
        client.set("user:1", &1, None).await.unwrap();
        client.set("user:2", &2, None).await.unwrap();
        client.set("order:1", &3, None).await.unwrap();

        assert_eq!(client.delete_by_pattern("user:*").await.unwrap(), 2);
        assert_eq!(client.delete_by_pattern("user:*").await.unwrap(), 0);
        assert_eq!(client.exists(&["order:1"]).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_exists_counts_present() {
        let (_, client) = setup();
        client.set("a", &"x", None).await.unwrap();
        assert_eq!(client.exists(&["a", "b"]).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_set_if_absent() {
        let (_, client) = setup();
        assert!(client.set_if_absent("lock", 1, 30).await.unwrap());
        assert!(!client.set_if_absent("lock", 2, 30).await.unwrap());

        let held: Option<i64> = client.get("lock").await.unwrap();
        assert_eq!(held, Some(1));
    }

    #[tokio::test]
    async fn test_zero_ttl_means_no_expiry() {
        let (backend, client) = setup();
        client.set("k", &"v", Some(0)).await.unwrap();
        assert_eq!(client.get_value("k").await.unwrap(), Some(json!("v")));
        assert_eq!(backend.ttl_remaining("k").await, None);

        assert!(client.set_if_absent("lock", 1, 0).await.unwrap());
        assert!(!client.set_if_absent("lock", 2, 0).await.unwrap());
        let held: Option<i64> = client.get("lock").await.unwrap();
        assert_eq!(held, Some(1));
        assert_eq!(backend.ttl_remaining("lock").await, None);
    }

    #[tokio::test]
    async fn test_increment_with_ttl_applies_expiry() {
        let (backend, client) = setup();
        assert_eq!(client.increment("hits", None).await.unwrap(), 1);
        assert_eq!(backend.ttl_remaining("hits").await, None);

        assert_eq!(client.increment("hits", Some(60)).await.unwrap(), 2);
        assert!(backend.ttl_remaining("hits").await.is_some());

        assert_eq!(client.decrement("hits", None).await.unwrap(), 1);
        let value: Option<i64> = client.get("hits").await.unwrap();
        assert_eq!(value, Some(1));
    }

    #[tokio::test]
    async fn test_zero_ttl_is_ignored_for_counters() {
        let (backend, client) = setup();
        client.decrement("stock", Some(0)).await.unwrap();
        assert_eq!(backend.ttl_remaining("stock").await, None);
    }

    #[tokio::test]
    async fn test_expire() {
        let (backend, client) = setup();
        client.set("session", &"abc", None).await.unwrap();

        assert!(client.expire("session", 120).await.unwrap());
        assert!(backend.ttl_remaining("session").await.is_some());
        assert!(!client.expire("nope", 120).await.unwrap());
    }

    #[tokio::test]
    async fn test_hash_round_trip() {
        let (_, client) = setup();
        let profile = Profile {
            name: "bob".into(),
            tags: vec!["a".into(), "b".into()],
        };
        client.hash_set_all("profile", &profile).await.unwrap();
        client.hash_set_field("profile", "age", &41).await.unwrap();

        let all = client.hash_get_all("profile").await.unwrap().unwrap();
        assert_eq!(all["name"], json!("bob"));
        assert_eq!(all["tags"], json!(["a", "b"]));
        assert_eq!(all["age"], json!(41));

        let picked = client
            .hash_get_fields("profile", &["age", "missing"])
            .await
            .unwrap();
        assert_eq!(picked, vec![Some(json!(41)), None]);

        assert_eq!(client.hash_delete("profile", &["age"]).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_hash_raw_fallback_and_missing() {
        let (backend, client) = setup();
        backend
            .hset("h", &[("f".to_string(), "bare text".to_string())])
            .await
            .unwrap();

        let all = client.hash_get_all("h").await.unwrap().unwrap();
        assert_eq!(all["f"], json!("bare text"));
        assert!(client.hash_get_all("none").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_hash_set_all_rejects_non_object() {
        let (_, client) = setup();
        assert!(matches!(
            client.hash_set_all("h", &vec![1, 2]).await,
            Err(CacheError::InvalidRequest(_))
        ));
    }
}
