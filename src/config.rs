//! Configuration Module
//!
//! Loads store and retry settings from environment variables.

use std::env;
use std::time::Duration;

use crate::resilience::RetryPolicy;

/// Runtime configuration.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Store connection URL
    pub store_url: String,
    /// Connection attempts allowed per outage
    pub retry_max_attempts: u32,
    /// Total reconnect time allowed per outage, in milliseconds
    pub retry_max_time_ms: u64,
    /// Backoff growth per attempt, in milliseconds
    pub retry_step_ms: u64,
    /// Backoff ceiling, in milliseconds
    pub retry_max_delay_ms: u64,
    /// Expiry sweep interval of the in-memory backend, in seconds
    pub sweep_interval: u64,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_STORE_URL` - Store URL (default: redis://127.0.0.1:6379)
    /// - `CACHE_RETRY_MAX_ATTEMPTS` - Attempts per outage (default: 6)
    /// - `CACHE_RETRY_MAX_TIME_MS` - Retry time budget (default: 60000)
    /// - `CACHE_RETRY_STEP_MS` - Backoff step (default: 100)
    /// - `CACHE_RETRY_MAX_DELAY_MS` - Backoff cap (default: 3000)
    /// - `CACHE_SWEEP_INTERVAL` - Sweep frequency in seconds (default: 1)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            store_url: env::var("CACHE_STORE_URL").unwrap_or(defaults.store_url),
            retry_max_attempts: env::var("CACHE_RETRY_MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.retry_max_attempts),
            retry_max_time_ms: env::var("CACHE_RETRY_MAX_TIME_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.retry_max_time_ms),
            retry_step_ms: env::var("CACHE_RETRY_STEP_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.retry_step_ms),
            retry_max_delay_ms: env::var("CACHE_RETRY_MAX_DELAY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.retry_max_delay_ms),
            sweep_interval: env::var("CACHE_SWEEP_INTERVAL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.sweep_interval),
        }
    }

    /// Reconnect policy built from the retry settings.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retry_time: Duration::from_millis(self.retry_max_time_ms),
            max_attempts: self.retry_max_attempts,
            step: Duration::from_millis(self.retry_step_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_url: "redis://127.0.0.1:6379".to_string(),
            retry_max_attempts: 6,
            retry_max_time_ms: 60_000,
            retry_step_ms: 100,
            retry_max_delay_ms: 3_000,
            sweep_interval: 1,
        }
    }
}
