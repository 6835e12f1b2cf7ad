//! Cache-aside orchestration ("promise mode")
//!
//! `promise` returns the cached value or computes, stores and returns it.
//! `promise_io` hands back a reader and a force-refresher over the same
//! key/computation pair. There is no single-flight guard:
//! concurrent misses on one key each compute, and the last write wins.

use std::future::Future;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::client::CacheClient;
use crate::error::{CacheError, Result};

/// Runs `computation` and writes its result under `key`.
///
/// A failing computation writes nothing.
pub(crate) async fn refresh<T, F, Fut>(
    client: &CacheClient,
    key: &str,
    computation: &F,
    ttl_seconds: Option<u64>,
) -> Result<T>
where
    T: Serialize,
    F: Fn() -> Fut + ?Sized,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let data = computation().await.map_err(CacheError::Computation)?;
    let text = serde_json::to_string(&data)?;
    client.set_text(key, &text, ttl_seconds).await?;
    Ok(data)
}

/// Cache hit returns as-is; a miss (absent or JSON `null`) computes.
async fn resolve<T, F, Fut>(client: &CacheClient, key: &str, computation: &F) -> Result<T>
where
    T: Serialize + DeserializeOwned,
    F: Fn() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    match client.get_value(key).await? {
        Some(value) if !value.is_null() => {
            debug!(key = key, "promise cache HIT");
            Ok(serde_json::from_value(value)?)
        }
        _ => {
            debug!(key = key, "promise cache MISS");
            refresh(client, key, computation, None).await
        }
    }
}

impl CacheClient {
    // == Promise ==
    /// Returns the value cached under `key`, computing and caching it on a miss.
    ///
    /// # Arguments
    /// * `key` - Cache key
    /// * `computation` - Producer invoked only on a miss
    pub async fn promise<T, F, Fut>(&self, key: &str, computation: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: Fn() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        resolve(self, key, &computation).await
    }

    /// Binds `key` and `computation` without resolving.
    ///
    /// The returned pair lets each caller choose between accepting the cached
    /// value (`read`) and forcing recomputation (`force_refresh`).
    pub fn promise_io<T, F, Fut>(&self, key: impl Into<String>, computation: F) -> PromiseIo<T, F>
    where
        T: Serialize + DeserializeOwned,
        F: Fn() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        PromiseIo {
            client: self.clone(),
            key: key.into(),
            computation,
            _value: PhantomData,
        }
    }
}

// == Promise IO ==
/// Reader / force-refresher pair over one key.
pub struct PromiseIo<T, F> {
    client: CacheClient,
    key: String,
    computation: F,
    _value: PhantomData<fn() -> T>,
}

impl<T, F, Fut> PromiseIo<T, F>
where
    T: Serialize + DeserializeOwned,
    F: Fn() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Same as `CacheClient::promise` for the bound pair.
    pub async fn read(&self) -> Result<T> {
        resolve(&self.client, &self.key, &self.computation).await
    }

    /// Always recomputes and overwrites the cached value.
    pub async fn force_refresh(&self) -> Result<T> {
        refresh(&self.client, &self.key, &self.computation, None).await
    }
}
