//! Pluggable rate-limit state storage.
//!
//! State is restricted to `serde_json::Value` rather than arbitrary bytes: a limiter
//! never needs to deserialize an opaque blob into a caller-chosen type, only a handful
//! of JSON shapes it defines itself, so there is no path to arbitrary deserialization
//! regardless of backend.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A keyed store for rate-limiter state, with per-entry expiry.
///
/// Only an in-memory implementation ships here; a shared backend (e.g. for a
/// multi-instance gateway) would implement the same trait over a key-value store,
/// still restricted to `serde_json::Value`.
pub trait RateLimitStore: Send + Sync {
    /// Fetch the current value for `key`, if present and not expired.
    fn get(&self, key: &str) -> Option<serde_json::Value>;

    /// Store `value` under `key`, expiring it after `ttl`.
    fn set(&self, key: &str, value: serde_json::Value, ttl: Duration);
}

/// A single-process, mutex-guarded [`RateLimitStore`]. Expired entries are swept lazily
/// on access rather than by a background task.
#[derive(Default)]
pub struct InMemoryRateLimitStore {
    entries: Mutex<HashMap<String, (serde_json::Value, Instant)>>,
}

impl InMemoryRateLimitStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl RateLimitStore for InMemoryRateLimitStore {
    fn get(&self, key: &str) -> Option<serde_json::Value> {
        // Mutex poison is unrecoverable.
        #[allow(clippy::expect_used)]
        let mut entries = self.entries.lock().expect("rate limit store poisoned");
        match entries.get(key) {
            Some((value, expires_at)) if *expires_at > Instant::now() => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn set(&self, key: &str, value: serde_json::Value, ttl: Duration) {
        // Mutex poison is unrecoverable.
        #[allow(clippy::expect_used)]
        let mut entries = self.entries.lock().expect("rate limit store poisoned");
        entries.insert(key.to_string(), (value, Instant::now() + ttl));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stores_and_retrieves_a_value() {
        let store = InMemoryRateLimitStore::new();
        store.set("k", json!({"tokens": 5.0}), Duration::from_secs(60));
        assert_eq!(store.get("k"), Some(json!({"tokens": 5.0})));
    }

    #[test]
    fn expired_entries_are_not_returned() {
        let store = InMemoryRateLimitStore::new();
        store.set("k", json!(1), Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(store.get("k"), None);
    }

    #[test]
    fn missing_key_returns_none() {
        let store = InMemoryRateLimitStore::new();
        assert_eq!(store.get("missing"), None);
    }
}
