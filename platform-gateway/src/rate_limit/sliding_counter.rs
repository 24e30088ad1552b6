//! Sliding window counter limiter (spec §4.5): blends the previous and current fixed
//! window counts, weighted by how far into the current window `now` falls — a
//! constant-size approximation of [`super::sliding_log::SlidingWindowLogLimiter`].

use super::{ceil_duration_secs, LimitAction, RateLimitDecision, RateLimitStore, RateLimiter};
use platform_core::Clock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct CounterState {
    window_index: i64,
    current_count: u64,
    previous_count: u64,
}

/// Estimated count = `current_count + previous_count * (1 - elapsed_fraction)`.
pub struct SlidingWindowCounterLimiter {
    limit: u64,
    window: Duration,
    store: Arc<dyn RateLimitStore>,
    clock: Arc<dyn Clock>,
}

impl SlidingWindowCounterLimiter {
    /// Allow `limit` requests per `window`, approximated via the blended estimate.
    #[must_use]
    pub fn new(limit: u64, window: Duration, store: Arc<dyn RateLimitStore>, clock: Arc<dyn Clock>) -> Self {
        Self { limit, window, store, clock }
    }
}

impl RateLimiter for SlidingWindowCounterLimiter {
    fn is_allowed(&self, key: &str) -> RateLimitDecision {
        let window_millis = self.window.as_millis().max(1) as i64;
        let now_millis = self.clock.now().timestamp_millis();
        let window_index = now_millis.div_euclid(window_millis);
        let elapsed_fraction = ((now_millis - window_index * window_millis) as f64) / (window_millis as f64);

        let mut state = self
            .store
            .get(key)
            .and_then(|v| serde_json::from_value::<CounterState>(v).ok())
            .map(|s| match window_index - s.window_index {
                0 => s,
                1 => CounterState { window_index, current_count: 0, previous_count: s.current_count },
                _ => CounterState { window_index, current_count: 0, previous_count: 0 },
            })
            .unwrap_or(CounterState { window_index, current_count: 0, previous_count: 0 });

        let estimated = state.current_count as f64 + state.previous_count as f64 * (1.0 - elapsed_fraction);
        let allowed = estimated < self.limit as f64;
        if allowed {
            state.current_count += 1;
        }

        let reset_secs = ((window_index + 1) * window_millis - now_millis).max(0) as f64 / 1000.0;

        // A plain serde-derived struct always serializes.
        #[allow(clippy::expect_used)]
        self.store.set(key, serde_json::to_value(state).expect("CounterState serializes"), self.window * 2);

        RateLimitDecision {
            allowed,
            action: LimitAction::Reject,
            limit: self.limit,
            remaining: (self.limit as f64 - estimated).floor().max(0.0) as u64,
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
        let limiter = SlidingWindowCounterLimiter::new(3, Duration::from_secs(10), Arc::new(InMemoryRateLimitStore::new()), clock);

        assert!(limiter.is_allowed("a").allowed);
        assert!(limiter.is_allowed("a").allowed);
        assert!(limiter.is_allowed("a").allowed);
        assert!(!limiter.is_allowed("a").allowed);
    }

    #[test]
    fn carries_a_weighted_fraction_of_the_previous_window() {
        let clock = Arc::new(FixedClock::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap()));
        let limiter = SlidingWindowCounterLimiter::new(2, Duration::from_secs(10), Arc::new(InMemoryRateLimitStore::new()), clock.clone());

        assert!(limiter.is_allowed("a").allowed);
        assert!(limiter.is_allowed("a").allowed);

        clock.advance(chrono::Duration::seconds(10));
        assert!(!limiter.is_allowed("a").allowed);
    }
}
