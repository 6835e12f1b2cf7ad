//! TTL Sweeper Task
//!
//! Background task that periodically removes expired entries from a
//! `MemoryBackend`. Reads already treat expired keys as absent; the sweeper
//! only bounds memory held by keys nobody touches again.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::store::MemoryBackend;

/// Spawns a background task that periodically drops expired entries.
///
/// # Arguments
/// * `backend` - Shared reference to the memory backend
/// * `sweep_interval_secs` - Interval in seconds between sweeps
///
/// # Returns
/// A JoinHandle for the spawned task, which can be aborted during shutdown.
pub fn spawn_expiry_sweeper(
    backend: Arc<MemoryBackend>,
    sweep_interval_secs: u64,
) -> JoinHandle<()> {
    let interval = Duration::from_secs(sweep_interval_secs.max(1));

    tokio::spawn(async move {
        info!(
            "Starting TTL sweeper with interval of {} seconds",
            sweep_interval_secs
        );

        loop {
            tokio::time::sleep(interval).await;

            let removed = backend.cleanup_expired().await;
            if removed > 0 {
                info!("TTL sweep: removed {} expired entries", removed);
            } else {
                debug!("TTL sweep: no expired entries found");
            }
        }
    })
}
