//! Interval job tasks
//!
//! Spawns the background tasks behind `CacheClient::interval` and exposes
//! the read/update handle returned to callers.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::{refresh, CacheClient};
use crate::error::Result;
use crate::interval::{IntervalOptions, TimeoutSchedule, TimingSchedule};

impl CacheClient {
    // == Interval ==
    /// Starts background refresh of `options.key` from `computation`.
    ///
    /// Each configured mode runs immediately and then on its own schedule.
    /// Must be called from within a Tokio runtime.
    pub fn interval<T, F, Fut>(&self, options: IntervalOptions, computation: F) -> IntervalHandle<T, F>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let computation = Arc::new(computation);
        let IntervalOptions {
            key,
            timeout,
            timing,
        } = options;

        if let Some(schedule) = timeout {
            spawn_timeout_job(self.clone(), key.clone(), computation.clone(), schedule);
        }
        if let Some(schedule) = timing {
            spawn_timing_job(self.clone(), key.clone(), computation.clone(), schedule);
        }

        IntervalHandle {
            client: self.clone(),
            key,
            computation,
            _value: PhantomData,
        }
    }
}

// == Interval Handle ==
/// Read accessor and on-demand updater for one interval job.
///
/// Dropping the handle does not stop the job.
pub struct IntervalHandle<T, F> {
    client: CacheClient,
    key: String,
    computation: Arc<F>,
    _value: PhantomData<fn() -> T>,
}

impl<T, F> Clone for IntervalHandle<T, F> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            key: self.key.clone(),
            computation: self.computation.clone(),
            _value: PhantomData,
        }
    }
}

impl<T, F, Fut> IntervalHandle<T, F>
where
    T: Serialize + DeserializeOwned,
    F: Fn() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Reads the current cached value. Never runs the computation.
    pub async fn get(&self) -> Result<Option<T>> {
        self.client.get(&self.key).await
    }

    /// Runs the computation now and writes the result.
    pub async fn update(&self) -> Result<T> {
        refresh(&self.client, &self.key, self.computation.as_ref(), None).await
    }
}

/// Self-rescheduling chain: run, then sleep `success` or `error` and repeat.
fn spawn_timeout_job<T, F, Fut>(
    client: CacheClient,
    key: String,
    computation: Arc<F>,
    schedule: TimeoutSchedule,
) -> JoinHandle<()>
where
    T: Serialize + Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    tokio::spawn(async move {
        debug!(key = %key, "Timeout job started");
        loop {
            let outcome = refresh(&client, &key, computation.as_ref(), None).await;
            let delay = schedule.next_delay(outcome.is_ok());
            if let Err(err) = outcome {
                warn!(
                    key = %key,
                    "Timeout job failed, retrying in {}s: {}",
                    delay.as_secs_f64(),
                    err
                );
            }
            tokio::time::sleep(delay).await;
        }
    })
}

/// Immediate run plus one run per calendar firing, each retried on failure.
///
/// At most one retry loop is active per job: a firing that arrives while the
/// previous run is still failing is skipped.
fn spawn_timing_job<T, F, Fut>(
    client: CacheClient,
    key: String,
    computation: Arc<F>,
    schedule: TimingSchedule,
) -> JoinHandle<()>
where
    T: Serialize + Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    let in_flight = Arc::new(AtomicBool::new(false));
    let error_delay = schedule.error;
    let start_run = move |client: &CacheClient, key: &str| {
        if in_flight.swap(true, Ordering::AcqRel) {
            debug!(key = %key, "Timing job firing skipped, previous run still retrying");
            return;
        }
        let guard = in_flight.clone();
        let (client, key, computation) = (client.clone(), key.to_string(), computation.clone());
        tokio::spawn(async move {
            run_until_success(client, key, computation, error_delay).await;
            guard.store(false, Ordering::Release);
        });
    };

    start_run(&client, &key);

    tokio::spawn(async move {
        let mut last_fire = Local::now();
        loop {
            // Never before the previous firing, so a slot cannot fire twice.
            let from = last_fire.max(Local::now());
            let Some(next) = schedule.next_fire_after(&from) else {
                info!(key = %key, "Timing job schedule has no further firings");
                return;
            };
            let wait = (next - Local::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::time::sleep(wait).await;
            last_fire = next;

            debug!(key = %key, fired_at = %next, "Timing job fired");
            start_run(&client, &key);
        }
    })
}

/// Runs the computation, retrying after `error_delay` until one run succeeds.
async fn run_until_success<T, F, Fut>(
    client: CacheClient,
    key: String,
    computation: Arc<F>,
    error_delay: Duration,
) where
    T: Serialize + Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    loop {
        match refresh(&client, &key, computation.as_ref(), None).await {
            Ok(_) => return,
            Err(err) => {
                warn!(
                    key = %key,
                    "Timing job failed, retrying in {}s: {}",
                    error_delay.as_secs_f64(),
                    err
                );
                tokio::time::sleep(error_delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacheError;
    use crate::store::MemoryBackend;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn client() -> CacheClient {
        CacheClient::new(Arc::new(MemoryBackend::connected()))
    }

    /// Computation returning 1, 2, 3... and counting its invocations.
    fn counting(calls: Arc<AtomicU32>) -> impl Fn() -> std::future::Ready<anyhow::Result<u32>> {
        move || std::future::ready(Ok(calls.fetch_add(1, Ordering::SeqCst) + 1))
    }

    #[tokio::test]
    async fn test_timeout_mode_runs_immediately_and_repeats() {
        let client = client();
        let calls = Arc::new(AtomicU32::new(0));
        let options = IntervalOptions::new("ticker")
            .timeout(TimeoutSchedule::new(Duration::from_millis(100)));

        let handle = client.interval(options, counting(calls.clone()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handle.get().await.unwrap(), Some(1));

        tokio::time::sleep(Duration::from_millis(300)).await;
        let runs = calls.load(Ordering::SeqCst);
        assert!(runs >= 3, "expected at least 3 runs, got {}", runs);
        assert!(handle.get().await.unwrap().unwrap() >= 3);
    }

    #[tokio::test]
    async fn test_timeout_mode_retries_failures_with_error_delay() {
        let client = client();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let options = IntervalOptions::new("flaky").timeout(
            TimeoutSchedule::new(Duration::from_secs(3600)).with_error(Duration::from_millis(50)),
        );

        // Fails twice, then succeeds; the long success delay keeps it quiet after.
        let handle = client.interval(options, move || {
            let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if attempt < 3 {
                    Err(anyhow::anyhow!("attempt {} failed", attempt))
                } else {
                    Ok(attempt)
                }
            }
        });

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(handle.get().await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn test_get_never_triggers_computation() {
        let client = client();
        let calls = Arc::new(AtomicU32::new(0));
        let options = IntervalOptions::new("idle");

        // No schedule configured: nothing runs in the background.
        let handle = client.interval(options, counting(calls.clone()));
        assert_eq!(handle.get().await.unwrap(), None);
        assert_eq!(handle.get().await.unwrap(), None);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_update_runs_and_writes() {
        let client = client();
        let calls = Arc::new(AtomicU32::new(0));
        let handle = client.interval(IntervalOptions::new("manual"), counting(calls.clone()));

        assert_eq!(handle.update().await.unwrap(), 1);
        assert_eq!(handle.update().await.unwrap(), 2);
        assert_eq!(handle.get().await.unwrap(), Some(2));
        assert_eq!(handle.key(), "manual");
    }

    #[tokio::test]
    async fn test_update_propagates_failure() {
        let client = client();
        let handle = client.interval(IntervalOptions::new("fails"), || async {
            Err::<u32, _>(anyhow::anyhow!("no source"))
        });

        assert!(matches!(
            handle.update().await,
            Err(CacheError::Computation(_))
        ));
        assert_eq!(handle.get().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_timing_mode_runs_immediately_and_on_schedule() {
        let client = client();
        let calls = Arc::new(AtomicU32::new(0));
        let timing = TimingSchedule::parse("* * * * * *", Duration::from_millis(50)).unwrap();
        let handle = client.interval(
            IntervalOptions::new("every-second").timing(timing),
            counting(calls.clone()),
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.get().await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(2100)).await;
        let runs = calls.load(Ordering::SeqCst);
        assert!(runs >= 3, "expected immediate run plus 2 firings, got {}", runs);
    }

    #[tokio::test]
    async fn test_timing_mode_failure_retries_after_error_delay() {
        let client = client();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        // Yearly schedule: only the immediate run and its retries happen here.
        let timing = TimingSchedule::parse("0 0 0 1 1 *", Duration::from_millis(50)).unwrap();

        let handle = client.interval(IntervalOptions::new("yearly").timing(timing), move || {
            let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if attempt == 1 {
                    Err(anyhow::anyhow!("cold start"))
                } else {
                    Ok(attempt)
                }
            }
        });

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(handle.get().await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_both_modes_each_run_immediately() {
        let client = client();
        let calls = Arc::new(AtomicU32::new(0));
        let options = IntervalOptions::new("dual")
            .timeout(TimeoutSchedule::new(Duration::from_secs(3600)))
            .timing(TimingSchedule::parse("0 0 0 1 1 *", Duration::from_millis(50)).unwrap());

        let handle = client.interval(options, counting(calls.clone()));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let value = handle.get().await.unwrap().unwrap();
        assert!((1..=2).contains(&value));
    }

    #[tokio::test]
    async fn test_firings_during_failing_run_do_not_stack_retries() {
        let client = client();
        let active = Arc::new(AtomicU32::new(0));
        let peak = Arc::new(AtomicU32::new(0));
        let (active_ref, peak_ref) = (active.clone(), peak.clone());
        let timing = TimingSchedule::parse("* * * * * *", Duration::from_millis(10)).unwrap();

        // Every run fails, so the first retry loop never ends.
        client.interval(IntervalOptions::new("down").timing(timing), move || {
            let (active, peak) = (active_ref.clone(), peak_ref.clone());
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(400)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Err::<u32, _>(anyhow::anyhow!("source down"))
            }
        });

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_job_survives_store_outage() {
        let backend = Arc::new(MemoryBackend::connected());
        let client = CacheClient::new(backend.clone());
        backend.set_ready(false);

        let calls = Arc::new(AtomicU32::new(0));
        let options = IntervalOptions::new("outage").timeout(
            TimeoutSchedule::new(Duration::from_secs(3600)).with_error(Duration::from_millis(50)),
        );
        let handle = client.interval(options, counting(calls.clone()));

        tokio::time::sleep(Duration::from_millis(120)).await;
        backend.set_ready(true);
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(handle.get().await.unwrap().is_some());
    }
}
