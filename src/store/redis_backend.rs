//! Redis backend
//!
//! Uses a `redis::aio::MultiplexedConnection` shared by every caller.
//! Requires the `redis-backend` feature flag.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::RedisError;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{CacheError, Result};
use crate::store::{Backend, ConnectError};

/// Redis-backed store.
pub struct RedisBackend {
    client: redis::Client,
    connection: RwLock<Option<MultiplexedConnection>>,
    ready: AtomicBool,
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend")
            .field("ready", &self.ready.load(Ordering::SeqCst))
            .finish()
    }
}

impl RedisBackend {
    /// Creates a disconnected backend for `url`.
    pub fn open(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(|e| {
            CacheError::InvalidRequest(format!("Invalid store url {}: {}", redact_url(url), e))
        })?;
        Ok(Self {
            client,
            connection: RwLock::new(None),
            ready: AtomicBool::new(false),
        })
    }

    async fn conn(&self) -> Result<MultiplexedConnection> {
        let guard = self.connection.read().await;
        guard.clone().ok_or(CacheError::StoreUnavailable)
    }

    /// Maps a command error, dropping readiness when the link itself failed.
    fn command_error(&self, command: &str, e: RedisError) -> CacheError {
        if e.is_io_error() || e.is_connection_dropped() {
            self.ready.store(false, Ordering::SeqCst);
        }
        CacheError::Backend(format!("Redis {} failed: {}", command, e))
    }
}

#[async_trait]
impl Backend for RedisBackend {
    async fn connect(&self) -> std::result::Result<(), ConnectError> {
        match self.client.get_multiplexed_async_connection().await {
            Ok(conn) => {
                *self.connection.write().await = Some(conn);
                self.ready.store(true, Ordering::SeqCst);
                Ok(())
            }
            Err(e) if e.is_connection_refusal() => Err(ConnectError::refused(e.to_string())),
            Err(e) => Err(ConnectError::transient(e.to_string())),
        }
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn().await?;
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| self.command_error("GET", e))?;
        debug!(key = key, hit = value.is_some(), "redis GET");
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl_seconds: Option<u64>) -> Result<()> {
        let mut conn = self.conn().await?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl_seconds.filter(|s| *s > 0) {
            cmd.arg("EX").arg(ttl);
        }
        cmd.query_async::<()>(&mut conn)
            .await
            .map_err(|e| self.command_error("SET", e))
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl_seconds: Option<u64>) -> Result<bool> {
        let mut conn = self.conn().await?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl_seconds.filter(|s| *s > 0) {
            cmd.arg("EX").arg(ttl);
        }
        let reply: Option<String> = cmd
            .arg("NX")
            .query_async(&mut conn)
            .await
            .map_err(|e| self.command_error("SET NX", e))?;
        Ok(reply.as_deref() == Some("OK"))
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn().await?;
        redis::cmd("DEL")
            .arg(keys)
            .query_async(&mut conn)
            .await
            .map_err(|e| self.command_error("DEL", e))
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.conn().await?;
        let mut found = Vec::new();
        let mut cursor: u64 = 0;

        // SCAN instead of KEYS so large keyspaces do not block the server
        loop {
            let (next_cursor, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .map_err(|e| self.command_error("SCAN", e))?;
            found.extend(batch);
            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        found.sort();
        found.dedup();
        Ok(found)
    }

    async fn exists(&self, keys: &[String]) -> Result<u64> {
        let mut conn = self.conn().await?;
        redis::cmd("EXISTS")
            .arg(keys)
            .query_async(&mut conn)
            .await
            .map_err(|e| self.command_error("EXISTS", e))
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn().await?;
        redis::cmd("INCR")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| self.command_error("INCR", e))
    }

    async fn decr(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn().await?;
        redis::cmd("DECR")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| self.command_error("DECR", e))
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<bool> {
        let mut conn = self.conn().await?;
        let updated: i64 = redis::cmd("EXPIRE")
            .arg(key)
            .arg(seconds)
            .query_async(&mut conn)
            .await
            .map_err(|e| self.command_error("EXPIRE", e))?;
        Ok(updated == 1)
    }

    async fn hset(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn().await?;
        let mut cmd = redis::cmd("HSET");
        cmd.arg(key);
        for (field, value) in fields {
            cmd.arg(field).arg(value);
        }
        cmd.query_async::<()>(&mut conn)
            .await
            .map_err(|e| self.command_error("HSET", e))
    }

    async fn hmget(&self, key: &str, fields: &[String]) -> Result<Vec<Option<String>>> {
        if fields.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn().await?;
        redis::cmd("HMGET")
            .arg(key)
            .arg(fields)
            .query_async(&mut conn)
            .await
            .map_err(|e| self.command_error("HMGET", e))
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.conn().await?;
        redis::cmd("HGETALL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| self.command_error("HGETALL", e))
    }

    async fn hdel(&self, key: &str, fields: &[String]) -> Result<u64> {
        if fields.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn().await?;
        redis::cmd("HDEL")
            .arg(key)
            .arg(fields)
            .query_async(&mut conn)
            .await
            .map_err(|e| self.command_error("HDEL", e))
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

/// Redact credentials from a Redis URL for logging
pub(crate) fn redact_url(url: &str) -> String {
    if let Some(at_pos) = url.find('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            return format!("{}***{}", &url[..=colon_pos], &url[at_pos..]);
        }
    }
    url.to_string()
}
