//! Leaky bucket limiter (spec §4.5): a virtual queue that drains at a constant rate.

use super::{ceil_duration_secs, LimitAction, RateLimitDecision, RateLimitStore, RateLimiter};
use platform_core::Clock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct BucketState {
    level: f64,
    last_leak_millis: i64,
}

/// A request is allowed iff the bucket's current water level (after leaking since the
/// last check) is below `capacity`; allowing a request adds one unit of water.
pub struct LeakyBucketLimiter {
    capacity: f64,
    leak_rate_per_sec: f64,
    store: Arc<dyn RateLimitStore>,
    clock: Arc<dyn Clock>,
}

impl LeakyBucketLimiter {
    /// `capacity` units drain at `leak_rate_per_sec` units/sec.
    #[must_use]
    pub fn new(
        capacity: u64,
        leak_rate_per_sec: f64,
        store: Arc<dyn RateLimitStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            capacity: capacity as f64,
            leak_rate_per_sec,
            store,
            clock,
        }
    }

    fn load(&self) -> BucketState {
        BucketState {
            level: 0.0,
            last_leak_millis: self.clock.now().timestamp_millis(),
        }
    }
}

impl RateLimiter for LeakyBucketLimiter {
    fn is_allowed(&self, key: &str) -> RateLimitDecision {
        let mut state = self
            .store
            .get(key)
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_else(|| self.load());

        let now_millis = self.clock.now().timestamp_millis();
        let elapsed_secs = ((now_millis - state.last_leak_millis).max(0) as f64) / 1000.0;
        state.level = (state.level - elapsed_secs * self.leak_rate_per_sec).max(0.0);
        state.last_leak_millis = now_millis;

        let allowed = state.level < self.capacity;
        if allowed {
            state.level += 1.0;
        }

        let overflow = (state.level - self.capacity).max(0.0);
        let reset_secs = overflow / self.leak_rate_per_sec;

        // A plain serde-derived struct always serializes.
        #[allow(clippy::expect_used)]
        self.store.set(
            key,
            serde_json::to_value(state).expect("BucketState serializes"),
            Duration::from_secs(3600),
        );

        RateLimitDecision {
            allowed,
            action: LimitAction::Reject,
            limit: self.capacity as u64,
            remaining: (self.capacity - state.level).floor().max(0.0) as u64,
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
    fn rejects_once_capacity_is_reached() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let limiter = LeakyBucketLimiter::new(5, 1.0, Arc::new(InMemoryRateLimitStore::new()), clock);

        let mut allowed = 0;
        for _ in 0..8 {
            if limiter.is_allowed("a").allowed {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 5);
    }

    #[test]
    fn leaking_over_time_frees_capacity() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let limiter = LeakyBucketLimiter::new(5, 1.0, Arc::new(InMemoryRateLimitStore::new()), clock.clone());

        for _ in 0..5 {
            assert!(limiter.is_allowed("a").allowed);
        }
        assert!(!limiter.is_allowed("a").allowed);

        clock.advance(chrono::Duration::seconds(2));
        assert!(limiter.is_allowed("a").allowed);
    }
}
