//! Token bucket limiter (spec §4.5, boundary scenario S1).

use super::{ceil_duration_secs, LimitAction, RateLimitDecision, RateLimitStore, RateLimiter};
use platform_core::Clock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct BucketState {
    tokens: f64,
    last_refill_millis: i64,
}

/// Classic token bucket: `capacity = requests_per_window + burst_size` tokens, refilled
/// continuously at `requests_per_window / window` tokens/sec, one token spent per
/// allowed request.
pub struct TokenBucketLimiter {
    capacity: f64,
    refill_rate_per_sec: f64,
    store: Arc<dyn RateLimitStore>,
    clock: Arc<dyn Clock>,
}

impl TokenBucketLimiter {
    /// `requests_per_window` tokens refill every `window`, plus `burst_size` extra
    /// capacity that never refills beyond the base rate.
    #[must_use]
    pub fn new(
        requests_per_window: u64,
        window: Duration,
        burst_size: u64,
        store: Arc<dyn RateLimitStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let window_secs = window.as_secs_f64().max(f64::EPSILON);
        Self {
            capacity: requests_per_window as f64 + burst_size as f64,
            refill_rate_per_sec: requests_per_window as f64 / window_secs,
            store,
            clock,
        }
    }

    fn load(&self, key: &str) -> BucketState {
        self.store
            .get(key)
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or(BucketState {
                tokens: self.capacity,
                last_refill_millis: self.clock.now().timestamp_millis(),
            })
    }

    fn save(&self, key: &str, state: BucketState) {
        // A plain serde-derived struct always serializes.
        #[allow(clippy::expect_used)]
        let value = serde_json::to_value(state).expect("BucketState serializes");
        self.store.set(key, value, Duration::from_secs(3600));
    }
}

impl RateLimiter for TokenBucketLimiter {
    fn is_allowed(&self, key: &str) -> RateLimitDecision {
        let mut state = self.load(key);
        let now_millis = self.clock.now().timestamp_millis();
        let elapsed_secs = ((now_millis - state.last_refill_millis).max(0) as f64) / 1000.0;
        state.tokens = (state.tokens + elapsed_secs * self.refill_rate_per_sec).min(self.capacity);
        state.last_refill_millis = now_millis;

        let allowed = state.tokens >= 1.0;
        if allowed {
            state.tokens -= 1.0;
        }

        let deficit = (1.0 - state.tokens).max(0.0);
        let reset_secs = deficit / self.refill_rate_per_sec;

        self.save(key, state);

        RateLimitDecision {
            allowed,
            action: LimitAction::Reject,
            limit: self.capacity as u64,
            remaining: state.tokens.floor().max(0.0) as u64,
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

    fn limiter(clock: Arc<FixedClock>) -> TokenBucketLimiter {
        TokenBucketLimiter::new(
            10,
            Duration::from_secs(1),
            0,
            Arc::new(InMemoryRateLimitStore::new()),
            clock,
        )
    }

    #[test]
    fn s1_first_ten_allowed_rest_rejected_with_retry_after_one_second() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let limiter = limiter(clock.clone());

        let mut allowed_count = 0;
        let mut first_rejection = None;
        for _ in 0..15 {
            let decision = limiter.is_allowed("client-a");
            if decision.allowed {
                allowed_count += 1;
            } else if first_rejection.is_none() {
                first_rejection = Some(decision);
            }
        }

        assert_eq!(allowed_count, 10);
        let rejection = first_rejection.expect("at least one rejection");
        assert_eq!(rejection.retry_after, Some(Duration::from_secs(1)));
    }

    #[test]
    fn s1_full_window_elapse_refills_capacity() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let limiter = limiter(clock.clone());

        for _ in 0..10 {
            assert!(limiter.is_allowed("client-a").allowed);
        }
        assert!(!limiter.is_allowed("client-a").allowed);

        clock.advance(chrono::Duration::seconds(1));

        let mut allowed_count = 0;
        for _ in 0..10 {
            if limiter.is_allowed("client-a").allowed {
                allowed_count += 1;
            }
        }
        assert_eq!(allowed_count, 10);
    }

    #[test]
    fn distinct_keys_have_independent_buckets() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let limiter = limiter(clock);
        for _ in 0..10 {
            assert!(limiter.is_allowed("a").allowed);
        }
        assert!(limiter.is_allowed("b").allowed);
    }
}
