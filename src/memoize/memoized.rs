//! Memoized method wrapper

use std::future::Future;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::client::{is_truthy, CacheClient};
use crate::error::{CacheError, Result};
use crate::memoize::{ArgsEncoder, CallOptions, MethodId};
use crate::store::escape_glob;

/// An async method wrapped in cache-aside semantics.
///
/// `A` is the positional argument list (usually a tuple), `T` the result.
pub struct Memoized<A, T, F> {
    client: CacheClient,
    id: MethodId,
    base_key: String,
    ttl: Option<u64>,
    encoder: ArgsEncoder<A>,
    method: F,
    _result: PhantomData<fn() -> T>,
}

impl<A, T, F> Memoized<A, T, F> {
    pub(crate) fn new(
        client: CacheClient,
        id: MethodId,
        base_key: String,
        ttl: Option<u64>,
        encoder: ArgsEncoder<A>,
        method: F,
    ) -> Self {
        Self {
            client,
            id,
            base_key,
            ttl,
            encoder,
            method,
            _result: PhantomData,
        }
    }

    pub fn id(&self) -> MethodId {
        self.id
    }

    pub fn base_key(&self) -> &str {
        &self.base_key
    }

    /// Full cache key for one argument list.
    pub fn key_for(&self, args: &A) -> Result<String> {
        Ok(format!("{}:{}", self.base_key, (self.encoder)(args)?))
    }

    /// Deletes every cached result of this method.
    pub async fn clear(&self) -> Result<u64> {
        self.client
            .delete_by_pattern(&format!("{}:*", escape_glob(&self.base_key)))
            .await
    }

    /// Deletes cached results whose encoded arguments start with `args`.
    pub async fn clear_args(&self, args: &A) -> Result<u64> {
        let prefix = self.key_for(args)?;
        self.client
            .delete_by_pattern(&format!("{}*", escape_glob(&prefix)))
            .await
    }
}

impl<A, T, F, Fut> Memoized<A, T, F>
where
    T: Serialize + DeserializeOwned,
    F: Fn(A) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    // == Call ==
    /// Invokes the method through the cache.
    ///
    /// A truthy cached value is returned without invoking the method unless
    /// `options.force_refresh` is set. A cached value that no longer decodes
    /// as `T` counts as a miss. Fresh results are cached only when truthy
    /// (not `null`, `false`, `0` or `""`).
    pub async fn call(&self, args: A, options: CallOptions) -> Result<T> {
        let full_key = self.key_for(&args)?;

        if !options.force_refresh {
            if let Some(value) = self.client.get_value(&full_key).await? {
                if is_truthy(&value) {
                    match serde_json::from_value(value) {
                        Ok(data) => {
                            debug!(key = %full_key, "memoized HIT");
                            return Ok(data);
                        }
                        Err(err) => {
                            debug!(
                                key = %full_key,
                                error = %err,
                                "memoized value undecodable, recomputing"
                            );
                        }
                    }
                }
            }
        }

        let data = (self.method)(args).await.map_err(CacheError::Computation)?;
        let encoded = serde_json::to_value(&data)?;
        if is_truthy(&encoded) {
            self.client.set(&full_key, &encoded, self.ttl).await?;
            debug!(key = %full_key, ttl_seconds = ?self.ttl, "memoized result cached");
        } else {
            debug!(key = %full_key, "memoized result empty, not cached");
        }
        Ok(data)
    }

    /// `call` with default options.
    pub async fn invoke(&self, args: A) -> Result<T> {
        self.call(args, CallOptions::default()).await
    }
}
