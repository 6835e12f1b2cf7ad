//! Error types for the cache layer
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache layer.
#[derive(Error, Debug)]
pub enum CacheError {
    /// The store connection is not in a ready state
    #[error("Store unavailable: client is not connected")]
    StoreUnavailable,

    /// The store actively refused the connection
    #[error("Store refused the connection: {0}")]
    ConnectionRefused(String),

    /// Cumulative reconnect time exceeded the retry budget
    #[error("Store retry time exhausted after {0} ms")]
    RetryTimeExhausted(u64),

    /// Reconnect attempts exceeded the attempt budget
    #[error("Store connection attempts exhausted after {0} attempts")]
    AttemptsExhausted(u32),

    /// Error reported by the store for an individual command
    #[error("Store backend error: {0}")]
    Backend(String),

    /// Value could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The wrapped value-producing computation failed
    #[error("Computation failed: {0}")]
    Computation(#[source] anyhow::Error),

    /// Invalid caller input (bad schedule, bad pattern...)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl CacheError {
    // == Error Code ==
    /// Stable numeric code, one per failure family.
    ///
    /// Connection failures use the 1002xx range.
    pub fn code(&self) -> u32 {
        match self {
            CacheError::ConnectionRefused(_) => 100201,
            CacheError::RetryTimeExhausted(_) => 100202,
            CacheError::AttemptsExhausted(_) => 100203,
            CacheError::StoreUnavailable => 100204,
            CacheError::Backend(_) => 100300,
            CacheError::Serialization(_) => 100301,
            CacheError::Computation(_) => 100400,
            CacheError::InvalidRequest(_) => 100500,
        }
    }

    /// Returns true for terminal connection failures.
    pub fn is_fatal_connection(&self) -> bool {
        matches!(
            self,
            CacheError::ConnectionRefused(_)
                | CacheError::RetryTimeExhausted(_)
                | CacheError::AttemptsExhausted(_)
        )
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache layer.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_codes() {
        assert_eq!(CacheError::ConnectionRefused("x".into()).code(), 100201);
        assert_eq!(CacheError::RetryTimeExhausted(60_001).code(), 100202);
        assert_eq!(CacheError::AttemptsExhausted(7).code(), 100203);
        assert_eq!(CacheError::StoreUnavailable.code(), 100204);
    }

    #[test]
    fn test_fatal_connection_family() {
        assert!(CacheError::AttemptsExhausted(7).is_fatal_connection());
        assert!(!CacheError::StoreUnavailable.is_fatal_connection());
        assert!(!CacheError::Backend("boom".into()).is_fatal_connection());
    }

    #[test]
    fn test_computation_error_keeps_source() {
        let err = CacheError::Computation(anyhow::anyhow!("upstream down"));
        assert_eq!(err.to_string(), "Computation failed: upstream down");
        assert!(std::error::Error::source(&err).is_some());
    }
}
