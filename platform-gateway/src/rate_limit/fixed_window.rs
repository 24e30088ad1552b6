//! Fixed window limiter (spec §4.5): count requests per `floor(now / window)` bucket.

use super::{ceil_duration_secs, LimitAction, RateLimitDecision, RateLimitStore, RateLimiter};
use platform_core::Clock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct WindowState {
    window_index: i64,
    count: u64,
}

/// Allows up to `limit` requests per `window`-sized bucket of wall-clock time; the
/// counter resets the instant a new bucket begins, which is simple but permits up to
/// `2 * limit` requests across a bucket boundary (a known fixed-window tradeoff, unlike
/// the sliding-window variants below).
pub struct FixedWindowLimiter {
    limit: u64,
    window: Duration,
    store: Arc<dyn RateLimitStore>,
    clock: Arc<dyn Clock>,
}

impl FixedWindowLimiter {
    /// Allow `limit` requests per `window`.
    #[must_use]
    pub fn new(limit: u64, window: Duration, store: Arc<dyn RateLimitStore>, clock: Arc<dyn Clock>) -> Self {
        Self { limit, window, store, clock }
    }

    fn current_window_index(&self) -> i64 {
        let now_millis = self.clock.now().timestamp_millis();
        let window_millis = self.window.as_millis().max(1) as i64;
        now_millis.div_euclid(window_millis)
    }
}

impl RateLimiter for FixedWindowLimiter {
    fn is_allowed(&self, key: &str) -> RateLimitDecision {
        let window_index = self.current_window_index();
        let mut state = self
            .store
            .get(key)
            .and_then(|v| serde_json::from_value::<WindowState>(v).ok())
            .filter(|s| s.window_index == window_index)
            .unwrap_or(WindowState { window_index, count: 0 });

        let allowed = state.count < self.limit;
        if allowed {
            state.count += 1;
        }

        let window_millis = self.window.as_millis().max(1) as i64;
        let now_millis = self.clock.now().timestamp_millis();
        let window_end_millis = (window_index + 1) * window_millis;
        let reset_secs = ((window_end_millis - now_millis).max(0) as f64) / 1000.0;

        // A plain serde-derived struct always serializes.
        #[allow(clippy::expect_used)]
        self.store.set(
            key,
            serde_json::to_value(state).expect("WindowState serializes"),
            self.window,
        );

        RateLimitDecision {
            allowed,
            action: LimitAction::Reject,
            limit: self.limit,
            remaining: self.limit.saturating_sub(state.count),
            reset_in: ceil_duration_secs(reset_secs),
            retry_after: if allowed { None } else { Some(ceil_duration_secs(reset_secs)) },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::store::InMemoryRateLimitStore;
    use chrono::{TimeZone, Utc};
    use platform_core::FixedClock;

    #[test]
    fn rejects_past_the_limit_within_a_window() {
        let clock = Arc::new(FixedClock::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap()));
        let limiter = FixedWindowLimiter::new(3, Duration::from_secs(10), Arc::new(InMemoryRateLimitStore::new()), clock);

        assert!(limiter.is_allowed("a").allowed);
        assert!(limiter.is_allowed("a").allowed);
        assert!(limiter.is_allowed("a").allowed);
        assert!(!limiter.is_allowed("a").allowed);
    }

    #[test]
    fn new_window_resets_the_count() {
        let clock = Arc::new(FixedClock::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap()));
        let limiter = FixedWindowLimiter::new(2, Duration::from_secs(10), Arc::new(InMemoryRateLimitStore::new()), clock.clone());

        assert!(limiter.is_allowed("a").allowed);
        assert!(limiter.is_allowed("a").allowed);
        assert!(!limiter.is_allowed("a").allowed);

        clock.advance(chrono::Duration::seconds(10));
        assert!(limiter.is_allowed("a").allowed);
    }
}
