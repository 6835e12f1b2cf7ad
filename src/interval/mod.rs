//! Interval Module
//!
//! Background refresh ("interval mode"): a computation runs on its own
//! schedule and always writes into the cache, while readers only ever read
//! the key. Reads never trigger the computation.
//!
//! # Trigger modes
//! - Timeout: self-rescheduling chain, delay measured from the end of each run
//! - Timing: calendar (cron) firings plus an immediate run, failures retried
//!   after a fixed delay without touching the calendar. Calendar fields are
//!   read in the host's local time zone, so `0 0 3 * * *` fires at 03:00
//!   local time.
//!
//! Jobs are not persisted and have no stop operation; they run until the
//! runtime shuts down.

mod job;

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, TimeZone};
use cron::Schedule;

use crate::error::{CacheError, Result};

pub use job::IntervalHandle;

// == Timeout Schedule ==
/// Fixed delays between runs of a self-rescheduling job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutSchedule {
    /// Delay after a successful run
    pub success: Duration,
    /// Delay after a failed run; falls back to `success` when unset
    pub error: Option<Duration>,
}

impl TimeoutSchedule {
    pub fn new(success: Duration) -> Self {
        Self {
            success,
            error: None,
        }
    }

    pub fn with_error(mut self, error: Duration) -> Self {
        self.error = Some(error);
        self
    }

    /// Delay before the next run given how the last one ended.
    pub fn next_delay(&self, succeeded: bool) -> Duration {
        if succeeded {
            self.success
        } else {
            self.error.unwrap_or(self.success)
        }
    }
}

// == Timing Schedule ==
/// Calendar schedule plus the retry delay used when a run fails.
#[derive(Debug, Clone)]
pub struct TimingSchedule {
    pub schedule: Schedule,
    pub error: Duration,
}

impl TimingSchedule {
    pub fn new(schedule: Schedule, error: Duration) -> Self {
        Self { schedule, error }
    }

    /// Parses a cron expression (`sec min hour day month weekday [year]`).
    pub fn parse(expression: &str, error: Duration) -> Result<Self> {
        let schedule = Schedule::from_str(expression).map_err(|e| {
            CacheError::InvalidRequest(format!("invalid schedule '{}': {}", expression, e))
        })?;
        Ok(Self::new(schedule, error))
    }

    /// First firing strictly after `instant`, with calendar fields read in
    /// `instant`'s time zone.
    pub fn next_fire_after<Tz: TimeZone>(&self, instant: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        self.schedule.after(instant).next()
    }
}

// == Interval Options ==
/// Key and schedules of one background job. Both modes may be set at once.
#[derive(Debug, Clone)]
pub struct IntervalOptions {
    pub key: String,
    pub timeout: Option<TimeoutSchedule>,
    pub timing: Option<TimingSchedule>,
}

impl IntervalOptions {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            timeout: None,
            timing: None,
        }
    }

    pub fn timeout(mut self, timeout: TimeoutSchedule) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn timing(mut self, timing: TimingSchedule) -> Self {
        self.timing = Some(timing);
        self
    }
}
