//! Rate limiting (spec §4.5): five algorithms sharing one `is_allowed`/`generate_key`
//! contract over a pluggable state store.

mod fixed_window;
mod key;
mod leaky_bucket;
mod sliding_counter;
mod sliding_log;
mod store;
mod token_bucket;

pub use fixed_window::FixedWindowLimiter;
pub use key::KeyGenerator;
pub use leaky_bucket::LeakyBucketLimiter;
pub use sliding_counter::SlidingWindowCounterLimiter;
pub use sliding_log::SlidingWindowLogLimiter;
pub use store::{InMemoryRateLimitStore, RateLimitStore};
pub use token_bucket::TokenBucketLimiter;

use std::time::Duration;

/// What the pipeline should do when a key has exceeded its limit (spec §4.5 "Actions").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitAction {
    /// Reject with 429 and `Retry-After`.
    Reject,
    /// Attach a delay marker; upstream logic sleeps before proceeding.
    Delay,
    /// Attach a throttle factor; the pipeline may shape downstream traffic.
    Throttle,
    /// Record the violation but allow the request through.
    LogOnly,
}

/// Outcome of a single `is_allowed` check, carrying everything needed for the
/// `X-RateLimit-*`/`Retry-After` response headers (spec §4.5).
#[derive(Debug, Clone)]
pub struct RateLimitDecision {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// The action to take if `allowed` is `false`.
    pub action: LimitAction,
    /// The configured limit for this key's window.
    pub limit: u64,
    /// Remaining requests in the current window, floored at zero.
    pub remaining: u64,
    /// Seconds until the window resets (for `X-RateLimit-Reset`).
    pub reset_in: Duration,
    /// Seconds the client should wait before retrying, set only when rejected.
    pub retry_after: Option<Duration>,
}

/// Shared contract every rate-limiting algorithm implements.
pub trait RateLimiter: Send + Sync {
    /// Evaluate whether a request keyed by `key` is allowed right now, updating the
    /// limiter's persisted state as a side effect.
    fn is_allowed(&self, key: &str) -> RateLimitDecision;
}

#[must_use]
fn ceil_duration_secs(secs: f64) -> Duration {
    Duration::from_secs_f64(secs.max(0.0).ceil().max(0.0))
}
