//! Connection Resilience
//!
//! Decides, after each failed connection attempt, whether the store client
//! should try again and how long to wait first.
//!
//! # Decision order
//! 1. Refused connection - fatal
//! 2. Cumulative retry time over budget - fatal
//! 3. Attempt count over budget - fatal
//! 4. Otherwise back off `min(attempt * step, max_delay)`

use std::time::{Duration, Instant};

use tracing::{error, info};

use crate::error::{CacheError, Result};
use crate::store::{Backend, ConnectError};

// == Retry Decision ==
/// Outcome of consulting the policy after a failed attempt.
#[derive(Debug)]
pub enum RetryDecision {
    /// Wait this long, then attempt again
    Retry(Duration),
    /// Stop reconnecting and surface this error
    Fail(CacheError),
}

// == Retry Policy ==
/// Reconnect budget and backoff shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Cumulative retry time after which reconnecting stops
    pub max_retry_time: Duration,
    /// Highest attempt number that may still be retried
    pub max_attempts: u32,
    /// Backoff growth per attempt
    pub step: Duration,
    /// Upper bound of a single backoff
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retry_time: Duration::from_millis(60_000),
            max_attempts: 6,
            step: Duration::from_millis(100),
            max_delay: Duration::from_millis(3_000),
        }
    }
}

impl RetryPolicy {
    // == Decide ==
    /// Evaluates a failed attempt.
    ///
    /// # Arguments
    /// * `error` - The error that ended the attempt
    /// * `attempt` - Number of failed attempts so far, starting at 1
    /// * `total_retry_time` - Time spent reconnecting so far
    pub fn decide(
        &self,
        error: &ConnectError,
        attempt: u32,
        total_retry_time: Duration,
    ) -> RetryDecision {
        error!(
            attempt = attempt,
            total_retry_ms = total_retry_time.as_millis() as u64,
            error = %error,
            "Store connection failed"
        );

        if error.is_refused() {
            return RetryDecision::Fail(CacheError::ConnectionRefused(error.message.clone()));
        }
        if total_retry_time > self.max_retry_time {
            return RetryDecision::Fail(CacheError::RetryTimeExhausted(
                total_retry_time.as_millis() as u64,
            ));
        }
        if attempt > self.max_attempts {
            return RetryDecision::Fail(CacheError::AttemptsExhausted(attempt));
        }
        RetryDecision::Retry(self.backoff(attempt))
    }

    /// Backoff before the attempt following `attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.step.saturating_mul(attempt).min(self.max_delay)
    }
}

// == Connect With Retry ==
/// Drives the connection lifecycle of `backend` under `policy`.
///
/// Returns once the backend reports a successful connection, or with the
/// policy's terminal error. Never panics on exhaustion; the caller decides
/// whether to run without the cache.
pub async fn connect_with_retry(backend: &dyn Backend, policy: &RetryPolicy) -> Result<()> {
    let started = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        match backend.connect().await {
            Ok(()) => {
                info!(
                    backend = backend.name(),
                    attempts = attempt + 1,
                    "Store connection ready"
                );
                return Ok(());
            }
            Err(err) => {
                attempt += 1;
                match policy.decide(&err, attempt, started.elapsed()) {
                    RetryDecision::Retry(delay) => tokio::time::sleep(delay).await,
                    RetryDecision::Fail(fatal) => return Err(fatal),
                }
            }
        }
    }
}
