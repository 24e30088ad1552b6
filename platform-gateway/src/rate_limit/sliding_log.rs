//! Sliding window log limiter (spec §4.5): exact request-timestamp log per key.

use super::{ceil_duration_secs, LimitAction, RateLimitDecision, RateLimitStore, RateLimiter};
use platform_core::Clock;
use std::sync::Arc;
use std::time::Duration;

/// Keeps the timestamp of every allowed request in the window; evicts entries older
/// than `now - window` before counting. Exact (no boundary double-counting like
/// [`super::fixed_window::FixedWindowLimiter`]) at the cost of O(limit) storage per key.
pub struct SlidingWindowLogLimiter {
    limit: u64,
    window: Duration,
    store: Arc<dyn RateLimitStore>,
    clock: Arc<dyn Clock>,
}

impl SlidingWindowLogLimiter {
    /// Allow `limit` requests in any trailing `window`.
    #[must_use]
    pub fn new(limit: u64, window: Duration, store: Arc<dyn RateLimitStore>, clock: Arc<dyn Clock>) -> Self {
        Self { limit, window, store, clock }
    }
}

impl RateLimiter for SlidingWindowLogLimiter {
    fn is_allowed(&self, key: &str) -> RateLimitDecision {
        let now_millis = self.clock.now().timestamp_millis();
        let window_millis = self.window.as_millis() as i64;
        let cutoff = now_millis - window_millis;

        let mut log: Vec<i64> = self
            .store
            .get(key)
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();
        log.retain(|&ts| ts > cutoff);

        let allowed = (log.len() as u64) < self.limit;
        if allowed {
            log.push(now_millis);
        }

        let reset_secs = log
            .first()
            .map(|&oldest| ((oldest + window_millis - now_millis).max(0) as f64) / 1000.0)
            .unwrap_or(0.0);

        // A Vec<i64> always serializes.
        #[allow(clippy::expect_used)]
        self.store.set(key, serde_json::to_value(&log).expect("log serializes"), self.window);

        RateLimitDecision {
            allowed,
            action: LimitAction::Reject,
            limit: self.limit,
            remaining: self.limit.saturating_sub(log.len() as u64),
            reset_in: ceil_duration_secs(reset_secs),
            retry_after: if allowed { None } else { Some(ceil_duration_secs(reset_secs)) },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::store::InMemoryRateLimitStore;
    use chrono::Utc;
    use platform_core::FixedClock;

    #[test]
    fn rejects_once_limit_requests_are_logged_in_window() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let limiter = SlidingWindowLogLimiter::new(2, Duration::from_secs(10), Arc::new(InMemoryRateLimitStore::new()), clock);

        assert!(limiter.is_allowed("a").allowed);
        assert!(limiter.is_allowed("a").allowed);
        assert!(!limiter.is_allowed("a").allowed);
    }

    #[test]
    fn old_entries_fall_out_of_the_window() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let limiter = SlidingWindowLogLimiter::new(1, Duration::from_secs(5), Arc::new(InMemoryRateLimitStore::new()), clock.clone());

        assert!(limiter.is_allowed("a").allowed);
        assert!(!limiter.is_allowed("a").allowed);

        clock.advance(chrono::Duration::seconds(6));
        assert!(limiter.is_allowed("a").allowed);
    }
}
