//! API gateway components: route matching, rate limiting, load balancing, and the
//! request/response pipeline that ties them together.
//!
//! Each concern is its own module so it can be used standalone (e.g. a service that only
//! needs [`router`]'s `PathRouter` without the rest of the pipeline).

pub mod auth;
pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod load_balancer;
pub mod matcher;
pub mod pipeline;
pub mod rate_limit;
pub mod route;
pub mod router;
pub mod security;
pub mod transform;

pub use auth::{AuthProvider, AuthenticationFailure, AuthorizationEngine, Combinator, Effect, Principal, Rule};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, State as CircuitBreakerState};
pub use error::GatewayError;
pub use load_balancer::{Algorithm as LoadBalancingAlgorithm, HealthChecker, Pool, ServiceInstance, StickyConfig};
pub use matcher::{ExactMatcher, Matcher, PatternCache, PrefixMatcher, RegexMatcher, TemplateMatcher, WildcardMatcher};
pub use security::{
    AttackType, CorsConfig, CorsHandler, SecurityConfig, SecurityEvent, SecurityHeadersConfig,
    SecurityValidator, Severity,
};
pub use rate_limit::{
    FixedWindowLimiter, InMemoryRateLimitStore, KeyGenerator, LeakyBucketLimiter, LimitAction,
    RateLimitDecision, RateLimitStore, RateLimiter, SlidingWindowCounterLimiter,
    SlidingWindowLogLimiter, TokenBucketLimiter,
};
pub use pipeline::{GatewayPipeline, ReqwestUpstreamClient, Router, UpstreamClient};
pub use route::{MatchKind, MatcherSet, RequestContext, ResponseContext, Route, TransformerRef};
pub use router::{CompositeRouter, NormalizationConfig, PathRouter, RouteMatch, WeightedRouter, WeightedTarget};
pub use transform::{
    Action as TransformAction, BodyFormat, Direction as TransformDirection, Rule as TransformRule,
    TransformConfig, TransformEngine, TransformError, TransformType,
};
