//! Store Module
//!
//! The key-value engine the cache layer sits on. The engine itself is an
//! external collaborator: this module only defines the operations the layer
//! needs from it and ships the backends that provide them.
//!
//! # Backends
//! - `MemoryBackend` - in-process store with per-key TTL and simulated connectivity
//! - `RedisBackend` - Redis over a multiplexed async connection (`redis-backend` feature)

mod entry;
mod memory;
mod pattern;
#[cfg(feature = "redis-backend")]
mod redis_backend;
mod sweeper;

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::error::Result;

pub use entry::{current_timestamp_ms, StoreEntry, StoredValue};
pub use memory::MemoryBackend;
pub use pattern::{escape_glob, glob_match};
#[cfg(feature = "redis-backend")]
pub use redis_backend::RedisBackend;
pub use sweeper::spawn_expiry_sweeper;

// == Connect Error ==
/// How a connection attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectErrorKind {
    /// The remote actively refused the connection
    Refused,
    /// Anything else (timeouts, resets, DNS...)
    Transient,
}

/// Error raised by a single connection attempt.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct ConnectError {
    pub kind: ConnectErrorKind,
    pub message: String,
}

impl ConnectError {
    pub fn refused(message: impl Into<String>) -> Self {
        Self {
            kind: ConnectErrorKind::Refused,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ConnectErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn is_refused(&self) -> bool {
        self.kind == ConnectErrorKind::Refused
    }
}

// == Backend Trait ==
/// Operations the cache layer requires from the key-value store.
///
/// All values travel as text. Every method is a single round trip.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Performs one connection attempt.
    async fn connect(&self) -> std::result::Result<(), ConnectError>;

    /// Whether the connection is currently usable.
    fn is_ready(&self) -> bool;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Stores `value`, replacing any previous value and TTL.
    ///
    /// A TTL of `Some(0)` means no expiry.
    async fn set(&self, key: &str, value: &str, ttl_seconds: Option<u64>) -> Result<()>;

    /// Atomic set-if-absent. Returns true when the value was written.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl_seconds: Option<u64>) -> Result<bool>;

    async fn del(&self, keys: &[String]) -> Result<u64>;

    /// Resolves a glob pattern to the matching live keys.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    async fn exists(&self, keys: &[String]) -> Result<u64>;

    async fn incr(&self, key: &str) -> Result<i64>;

    async fn decr(&self, key: &str) -> Result<i64>;

    async fn expire(&self, key: &str, seconds: u64) -> Result<bool>;

    async fn hset(&self, key: &str, fields: &[(String, String)]) -> Result<()>;

    async fn hmget(&self, key: &str, fields: &[String]) -> Result<Vec<Option<String>>>;

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>>;

    async fn hdel(&self, key: &str, fields: &[String]) -> Result<u64>;

    /// Short provider name for logs.
    fn name(&self) -> &'static str;
}
