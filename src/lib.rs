//! Keyed Cache - cache orchestration over a key-value store
//!
//! Provides cache-aside reads, background refresh jobs and method
//! memoization on top of a Redis-compatible store, with a bounded retry
//! policy for (re)connecting to it.

pub mod client;
pub mod config;
pub mod error;
pub mod interval;
pub mod memoize;
pub mod resilience;
pub mod store;


pub use client::{CacheClient, PromiseIo};
pub use config::Config;
pub use error::{CacheError, Result};
pub use interval::{IntervalHandle, IntervalOptions, TimeoutSchedule, TimingSchedule};
pub use memoize::{CallOptions, Memoized, Memoizer, MethodId, MethodSpec};
pub use resilience::{connect_with_retry, RetryDecision, RetryPolicy};
pub use store::{spawn_expiry_sweeper, Backend, MemoryBackend};
#[cfg(feature = "redis-backend")]
pub use store::RedisBackend;
