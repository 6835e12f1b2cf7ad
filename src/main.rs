//! Keyed Cache demo service
//!
//! Connects to the configured store, keeps a heartbeat key refreshed in the
//! background and runs until interrupted.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use keyed_cache::{Backend, CacheClient, Config, IntervalOptions, TimeoutSchedule};

const HEARTBEAT_KEY: &str = "keyed_cache:heartbeat";

#[derive(Debug, Serialize, Deserialize)]
struct Heartbeat {
    pid: u32,
    at: String,
}

/// Main entry point for the demo service.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Open the store backend and connect under the retry policy
/// 4. Start the heartbeat refresh job
/// 5. Wait for SIGINT/SIGTERM
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keyed_cache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Keyed Cache");

    let config = Config::from_env();
    info!(
        "Configuration loaded: max_attempts={}, max_retry_time={}ms, sweep_interval={}s",
        config.retry_max_attempts, config.retry_max_time_ms, config.sweep_interval
    );

    let (backend, sweeper) = open_backend(&config)?;
    let client = CacheClient::connect(backend, &config.retry_policy()).await?;

    let heartbeat = client.interval(
        IntervalOptions::new(HEARTBEAT_KEY).timeout(
            TimeoutSchedule::new(Duration::from_secs(30)).with_error(Duration::from_secs(5)),
        ),
        || async {
            anyhow::Ok(Heartbeat {
                pid: std::process::id(),
                at: Utc::now().to_rfc3339(),
            })
        },
    );
    info!("Heartbeat job started for key {}", heartbeat.key());

    shutdown_signal(sweeper).await;
    info!("Shutdown complete");
    Ok(())
}

#[cfg(feature = "redis-backend")]
fn open_backend(config: &Config) -> anyhow::Result<(Arc<dyn Backend>, Option<JoinHandle<()>>)> {
    let backend = keyed_cache::RedisBackend::open(&config.store_url)?;
    Ok((Arc::new(backend), None))
}

#[cfg(not(feature = "redis-backend"))]
fn open_backend(config: &Config) -> anyhow::Result<(Arc<dyn Backend>, Option<JoinHandle<()>>)> {
    warn!("Built without redis-backend, using the in-memory store");
    let backend = Arc::new(keyed_cache::MemoryBackend::new());
    let sweeper = keyed_cache::spawn_expiry_sweeper(backend.clone(), config.sweep_interval);
    Ok((backend, Some(sweeper)))
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM), then stops the sweeper.
async fn shutdown_signal(sweeper: Option<JoinHandle<()>>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    if let Some(handle) = sweeper {
        handle.abort();
        warn!("Expiry sweeper aborted");
    }
}
