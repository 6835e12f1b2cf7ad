//! Store entries
//!
//! A value held by the memory backend plus its optional deadline.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Payload of an entry: a plain text value or a field map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredValue {
    Text(String),
    Hash(HashMap<String, String>),
}

// == Store Entry ==
#[derive(Debug, Clone)]
pub struct StoreEntry {
    pub value: StoredValue,
    /// Unix milliseconds after which the key reads as absent; None = persistent
    pub deadline_ms: Option<u64>,
}

impl StoreEntry {
    /// Wraps `value`, expiring `ttl_seconds` from now when given and non-zero.
    pub fn new(value: StoredValue, ttl_seconds: Option<u64>) -> Self {
        Self {
            value,
            deadline_ms: ttl_seconds.filter(|s| *s > 0).map(deadline_after),
        }
    }

    /// Expired once the clock reaches the deadline.
    pub fn is_expired(&self) -> bool {
        self.deadline_ms
            .is_some_and(|deadline| current_timestamp_ms() >= deadline)
    }

    /// Replaces the deadline with one `seconds` from now.
    pub fn expire_in(&mut self, seconds: u64) {
        self.deadline_ms = Some(deadline_after(seconds));
    }

    /// Whole seconds left before expiry; None for persistent entries.
    pub fn ttl_remaining(&self) -> Option<u64> {
        self.deadline_ms
            .map(|deadline| deadline.saturating_sub(current_timestamp_ms()) / 1000)
    }
}

fn deadline_after(seconds: u64) -> u64 {
    current_timestamp_ms().saturating_add(seconds.saturating_mul(1000))
}

/// Wall-clock Unix time in milliseconds (0 if the clock predates the epoch).
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    fn text(value: &str) -> StoredValue {
        StoredValue::Text(value.to_string())
    }

    #[test]
    fn test_persistent_entry() {
        let entry = StoreEntry::new(text("v"), None);

        assert_eq!(entry.value, text("v"));
        assert!(!entry.is_expired());
        assert!(entry.ttl_remaining().is_none());
    }

    #[test]
    fn test_zero_ttl_is_persistent() {
        let entry = StoreEntry::new(text("v"), Some(0));
        assert!(!entry.is_expired());
        assert!(entry.deadline_ms.is_none());
    }

    #[test]
    fn test_entry_expires_after_ttl() {
        let entry = StoreEntry::new(text("v"), Some(1));

        assert!(!entry.is_expired());
        sleep(Duration::from_millis(1100));
        assert!(entry.is_expired());
        assert_eq!(entry.ttl_remaining(), Some(0));
    }

    #[test]
    fn test_expire_in_sets_deadline() {
        let mut entry = StoreEntry::new(text("v"), None);
        entry.expire_in(10);

        let remaining = entry.ttl_remaining().unwrap();
        assert!((9..=10).contains(&remaining));
    }

    #[test]
    fn test_deadline_is_inclusive() {
        let entry = StoreEntry {
            value: text("v"),
            deadline_ms: Some(current_timestamp_ms()),
        };
        assert!(entry.is_expired());
    }
}
