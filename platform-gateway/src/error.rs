//! Gateway error taxonomy, mapped to the HTTP status contract in the external
//! interfaces section: 401/403/404/429/502/503, everything else 500.

use thiserror::Error;

/// Errors the gateway pipeline can terminate a request with.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// No route matched the request. Maps to 404.
    #[error("no route matched")]
    NoRouteMatched,

    /// Authentication failed; `scheme` becomes the `WWW-Authenticate` challenge. Maps to
    /// 401.
    #[error("authentication failed: {reason}")]
    Unauthenticated {
        /// Challenge scheme (`"Bearer"`, `"Basic"`, ...).
        scheme: String,
        /// Human-readable reason, not sent to the client.
        reason: String,
    },

    /// Authorization denied. Maps to 403 with body `"Forbidden: {reason}"`.
    #[error("authorization denied: {reason}")]
    Forbidden {
        /// Reason included verbatim in the response body.
        reason: String,
    },

    /// Rate limit exceeded. Maps to 429.
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited {
        /// Seconds until the client may retry.
        retry_after_secs: u64,
        /// Configured limit, for the `X-RateLimit-Limit` header.
        limit: u64,
        /// Unix timestamp (seconds) when the window resets.
        reset_at: i64,
    },

    /// A security validator flagged the request as HIGH/CRITICAL or the source IP
    /// exceeded its attack budget. Maps to 403 with body
    /// `"Forbidden: Security policy violation"`.
    #[error("security policy violation")]
    SecurityViolation,

    /// No selectable upstream server. Maps to 503.
    #[error("no server selectable for pool {pool}")]
    NoServerAvailable {
        /// The pool that had no selectable instance.
        pool: String,
    },

    /// The upstream call itself failed (connection error, non-2xx treated as passthrough
    /// unless configured otherwise). Maps to 502.
    #[error("upstream error: {0}")]
    UpstreamError(String),

    /// Anything else: surfaced as 500 with a generic body per spec §7.
    #[error("internal gateway error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// The HTTP status code this error maps to.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::NoRouteMatched => 404,
            Self::Unauthenticated { .. } => 401,
            Self::Forbidden { .. } | Self::SecurityViolation => 403,
            Self::RateLimited { .. } => 429,
            Self::NoServerAvailable { .. } => 503,
            Self::UpstreamError(_) => 502,
            Self::Internal(_) => 500,
        }
    }
}
