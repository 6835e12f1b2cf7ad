//! Memoize Module
//!
//! Wraps async methods in cache-aside semantics keyed by the method identity
//! and its arguments, and invalidates those keys per method or per argument
//! prefix.
//!
//! # Keys
//! - Base key: the explicit key, else `ServiceCache:<Owner>_<method>`
//! - Full key: `<base key>:<encoded args>`
//!
//! Base keys and argument encoders are registered when a method is wrapped,
//! so invalidation can rebuild the key family without an invocation.
//! Invalidation patterns escape glob metacharacters in the key text.

mod key;
mod memoized;

use std::any::Any;
use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;

use crate::client::CacheClient;
use crate::error::{CacheError, Result};
use crate::store::escape_glob;

pub use key::{default_encoder, encode_args, ArgsEncoder};
pub use memoized::Memoized;

// == Public Constants ==
/// Namespace prefixed to derived base keys.
pub const KEY_NAMESPACE: &str = "ServiceCache";

// == Method Identity ==
/// Declaring type and method name of a memoized operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodId {
    pub owner: &'static str,
    pub name: &'static str,
}

impl MethodId {
    pub const fn new(owner: &'static str, name: &'static str) -> Self {
        Self { owner, name }
    }

    /// Identity using the unqualified name of `O` as the owner.
    pub fn of<O: ?Sized>(name: &'static str) -> Self {
        let path = std::any::type_name::<O>();
        let base = path.split('<').next().unwrap_or(path);
        let owner = base.rsplit("::").next().unwrap_or(base);
        Self { owner, name }
    }

    /// `ServiceCache:<Owner>_<method>`
    pub fn derived_key(&self) -> String {
        format!("{}:{}_{}", KEY_NAMESPACE, self.owner, self.name)
    }
}

// == Method Spec ==
/// How a method is memoized.
#[derive(Debug, Clone)]
pub struct MethodSpec {
    pub id: MethodId,
    /// Explicit base key, used verbatim
    pub key: Option<String>,
    /// TTL in seconds for cached results
    pub ttl: Option<u64>,
}

impl MethodSpec {
    pub fn new(id: MethodId) -> Self {
        Self {
            id,
            key: None,
            ttl: None,
        }
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn ttl(mut self, seconds: u64) -> Self {
        self.ttl = Some(seconds);
        self
    }

    pub fn base_key(&self) -> String {
        self.key.clone().unwrap_or_else(|| self.id.derived_key())
    }
}

// == Call Options ==
/// Per-call switches. Never part of the cache key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallOptions {
    /// Skip the cache read and always invoke the method
    pub force_refresh: bool,
}

impl CallOptions {
    pub fn refresh() -> Self {
        Self {
            force_refresh: true,
        }
    }
}

// == Key Registry ==
/// Key family of one wrapped method.
#[derive(Clone)]
struct Registration {
    base_key: String,
    /// `ArgsEncoder<A>` of a custom-encoded method; None for the default encoding
    encoder: Option<Arc<dyn Any + Send + Sync>>,
}

/// Method identity to base key and encoder, filled at wrap time.
#[derive(Default)]
pub struct KeyRegistry {
    methods: DashMap<MethodId, Registration>,
}

impl std::fmt::Debug for KeyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyRegistry")
            .field("methods", &self.methods.len())
            .finish()
    }
}

impl KeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a method using the default argument encoding.
    pub fn register(&self, id: MethodId, base_key: String) {
        self.insert(
            id,
            Registration {
                base_key,
                encoder: None,
            },
        );
    }

    /// Registers a method with its custom argument encoder.
    pub fn register_with_encoder<A: 'static>(
        &self,
        id: MethodId,
        base_key: String,
        encoder: ArgsEncoder<A>,
    ) {
        self.insert(
            id,
            Registration {
                base_key,
                encoder: Some(Arc::new(encoder)),
            },
        );
    }

    fn insert(&self, id: MethodId, registration: Registration) {
        let base_key = registration.base_key.clone();
        if let Some(previous) = self.methods.insert(id, registration) {
            if previous.base_key != base_key {
                debug!(
                    owner = id.owner,
                    method = id.name,
                    previous = %previous.base_key,
                    "Memoized method re-registered under a new key"
                );
            }
        }
    }

    pub fn base_key(&self, id: &MethodId) -> Option<String> {
        self.methods.get(id).map(|entry| entry.base_key.clone())
    }

    /// Encodes `args` the way invocations of the method do.
    ///
    /// Returns None for an unregistered method. A custom-encoded method only
    /// accepts its own argument type.
    pub fn encode_for<A: Serialize + 'static>(
        &self,
        id: &MethodId,
        args: &A,
    ) -> Result<Option<String>> {
        let Some(registration) = self.methods.get(id).map(|entry| entry.value().clone()) else {
            return Ok(None);
        };
        let suffix = match &registration.encoder {
            None => encode_args(args)?,
            Some(custom) => match custom.downcast_ref::<ArgsEncoder<A>>() {
                Some(encoder) => encoder(args)?,
                None => {
                    return Err(CacheError::InvalidRequest(format!(
                        "arguments of type {} do not match the encoder of {}_{}",
                        std::any::type_name::<A>(),
                        id.owner,
                        id.name
                    )))
                }
            },
        };
        Ok(Some(format!("{}:{}", registration.base_key, suffix)))
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

// == Memoizer ==
/// Factory for memoized methods sharing one client and one key registry.
#[derive(Debug, Clone)]
pub struct Memoizer {
    client: CacheClient,
    registry: Arc<KeyRegistry>,
}

impl Memoizer {
    pub fn new(client: CacheClient) -> Self {
        Self {
            client,
            registry: Arc::new(KeyRegistry::new()),
        }
    }

    pub fn registry(&self) -> &KeyRegistry {
        &self.registry
    }

    /// Wraps `method` using the default argument encoding.
    pub fn wrap<A, T, F, Fut>(&self, spec: MethodSpec, method: F) -> Memoized<A, T, F>
    where
        A: Serialize + 'static,
        F: Fn(A) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let base_key = spec.base_key();
        self.registry.register(spec.id, base_key.clone());
        self.build(spec, base_key, default_encoder::<A>(), method)
    }

    /// Wraps `method` with a caller-supplied argument encoding.
    pub fn wrap_with_encoder<A, T, F, Fut>(
        &self,
        spec: MethodSpec,
        encoder: ArgsEncoder<A>,
        method: F,
    ) -> Memoized<A, T, F>
    where
        A: 'static,
        F: Fn(A) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let base_key = spec.base_key();
        self.registry
            .register_with_encoder(spec.id, base_key.clone(), encoder.clone());
        self.build(spec, base_key, encoder, method)
    }

    fn build<A, T, F>(
        &self,
        spec: MethodSpec,
        base_key: String,
        encoder: ArgsEncoder<A>,
        method: F,
    ) -> Memoized<A, T, F> {
        debug!(
            owner = spec.id.owner,
            method = spec.id.name,
            base_key = %base_key,
            "Memoized method registered"
        );
        Memoized::new(self.client.clone(), spec.id, base_key, spec.ttl, encoder, method)
    }

    // == Invalidation ==
    /// Deletes every cached result of the method. Returns 0 if never wrapped.
    pub async fn clear_for(&self, id: &MethodId) -> Result<u64> {
        match self.registry.base_key(id) {
            Some(base_key) => {
                self.client
                    .delete_by_pattern(&format!("{}:*", escape_glob(&base_key)))
                    .await
            }
            None => Ok(0),
        }
    }

    /// Deletes cached results whose encoded arguments start with `args`.
    ///
    /// Arguments are encoded as the method's invocations encode them;
    /// prefix matching may also catch longer argument lists that share the
    /// prefix.
    pub async fn clear_for_args<A: Serialize + 'static>(
        &self,
        id: &MethodId,
        args: &A,
    ) -> Result<u64> {
        match self.registry.encode_for(id, args)? {
            Some(prefix) => {
                self.client
                    .delete_by_pattern(&format!("{}*", escape_glob(&prefix)))
                    .await
            }
            None => Ok(0),
        }
    }
}
