//! `Route` (spec §3) and the inbound request view routes are matched against.

use crate::matcher::Matcher;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// The kind of pattern a route's `path_pattern` is matched with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// Exact string match.
    Exact,
    /// Prefix match, remainder captured as `"*"`.
    Prefix,
    /// Regex with named groups.
    Regex,
    /// Shell-style glob.
    Wildcard,
    /// `{name}` placeholders.
    Template,
}

/// A single ordered transformation rule applied to a request or response (spec §4.7).
/// Full transform semantics live in [`crate::transform`]; this only names the ordering
/// slot on a route.
#[derive(Debug, Clone)]
pub struct TransformerRef {
    /// Index into the pipeline's registered transformer set this route applies, in
    /// order.
    pub id: String,
}

/// A routable endpoint (spec §3, `Route`).
#[derive(Clone)]
pub struct Route {
    /// Unique, human-readable name.
    pub name: String,
    /// Higher runs first when multiple routes match (ties broken by insertion order).
    pub priority: i32,
    /// The pattern matched against the request path, interpreted per `match_kind`.
    pub path_pattern: String,
    /// Which [`Matcher`] strategy `path_pattern` uses.
    pub match_kind: MatchKind,
    /// HTTP methods this route accepts. Empty means ANY.
    pub methods: Vec<String>,
    /// If set, the request's `Host` header must match this pattern (same `match_kind`).
    pub host_pattern: Option<String>,
    /// Headers that must be present with these exact values.
    pub required_headers: HashMap<String, String>,
    /// Query parameters that must be present with these exact values.
    pub required_query_params: HashMap<String, String>,
    /// Name of the upstream pool to forward matching requests to.
    pub target_service: String,
    /// If set, rewrite the upstream path to this value (may reference captured params
    /// via `{name}`).
    pub path_rewrite: Option<String>,
    /// Per-route upstream timeout.
    pub timeout: Option<Duration>,
    /// Retry count on transient upstream failure.
    pub retries: u32,
    /// Ordered transformer chain applied to requests/responses on this route.
    pub transformers: Vec<TransformerRef>,
    /// Whether the circuit breaker applies to this route's upstream pool.
    pub circuit_breaker_enabled: bool,
}

impl Route {
    /// Construct a route with default timeout/retry/transformer settings.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        priority: i32,
        path_pattern: impl Into<String>,
        match_kind: MatchKind,
        target_service: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            priority,
            path_pattern: path_pattern.into(),
            match_kind,
            methods: Vec::new(),
            host_pattern: None,
            required_headers: HashMap::new(),
            required_query_params: HashMap::new(),
            target_service: target_service.into(),
            path_rewrite: None,
            timeout: None,
            retries: 0,
            transformers: Vec::new(),
            circuit_breaker_enabled: true,
        }
    }

    /// Whether this route accepts every HTTP method.
    #[must_use]
    pub fn accepts_any_method(&self) -> bool {
        self.methods.is_empty()
    }
}

/// The fields of an inbound request relevant to matching and the pipeline.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// HTTP method, e.g. `"GET"`.
    pub method: String,
    /// Request path, not yet normalized.
    pub path: String,
    /// `Host` header, if present.
    pub host: Option<String>,
    /// All request headers (case-preserved as received; lookups should be
    /// case-insensitive at the call site).
    pub headers: HashMap<String, String>,
    /// Parsed query parameters.
    pub query_params: HashMap<String, String>,
    /// Raw request body, if any. `None` for bodyless methods; distinct from `Some(String::new())`.
    pub body: Option<String>,
}

/// The fields of an upstream response relevant to the response-direction pipeline
/// (transformation, security headers, CORS headers).
#[derive(Debug, Clone)]
pub struct ResponseContext {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: HashMap<String, String>,
    /// Raw response body, if any.
    pub body: Option<String>,
}

/// Whether `route` matches `request` at the path/method/host/header/query level (spec
/// §4.4 "Route match requires"). Caller is responsible for normalizing `request.path`
/// first.
#[must_use]
pub fn route_matches(route: &Route, request: &RequestContext, matcher: &dyn Matcher) -> bool {
    if !route.accepts_any_method()
        && !route
            .methods
            .iter()
            .any(|m| m.eq_ignore_ascii_case(&request.method))
    {
        return false;
    }

    if !matcher.matches(&route.path_pattern, &request.path) {
        return false;
    }

    if let Some(host_pattern) = &route.host_pattern {
        match &request.host {
            Some(host) if matcher.matches(host_pattern, host) => {}
            _ => return false,
        }
    }

    for (key, expected) in &route.required_headers {
        match request.headers.get(key) {
            Some(actual) if actual == expected => {}
            _ => return false,
        }
    }

    for (key, expected) in &route.required_query_params {
        match request.query_params.get(key) {
            Some(actual) if actual == expected => {}
            _ => return false,
        }
    }

    true
}

/// Resolve the [`Matcher`] implementation for a [`MatchKind`], sharing compiled-pattern
/// caches across calls via the `Arc`s passed in.
pub struct MatcherSet {
    /// Exact-match matcher (stateless).
    pub exact: Arc<dyn Matcher>,
    /// Prefix matcher (stateless).
    pub prefix: Arc<dyn Matcher>,
    /// Regex matcher, backed by a bounded pattern cache.
    pub regex: Arc<dyn Matcher>,
    /// Wildcard matcher, backed by a bounded pattern cache.
    pub wildcard: Arc<dyn Matcher>,
    /// Template matcher, backed by a bounded pattern cache.
    pub template: Arc<dyn Matcher>,
}

impl MatcherSet {
    /// Build matchers with each compiled-pattern cache bounded to `cache_size`.
    #[must_use]
    pub fn new(cache_size: usize) -> Self {
        use crate::matcher::{ExactMatcher, PrefixMatcher, RegexMatcher, TemplateMatcher, WildcardMatcher};
        Self {
            exact: Arc::new(ExactMatcher),
            prefix: Arc::new(PrefixMatcher),
            regex: Arc::new(RegexMatcher::new(cache_size)),
            wildcard: Arc::new(WildcardMatcher::new(cache_size)),
            template: Arc::new(TemplateMatcher::new(cache_size)),
        }
    }

    /// The matcher implementing `kind`.
    #[must_use]
    pub fn for_kind(&self, kind: MatchKind) -> &Arc<dyn Matcher> {
        match kind {
            MatchKind::Exact => &self.exact,
            MatchKind::Prefix => &self.prefix,
            MatchKind::Regex => &self.regex,
            MatchKind::Wildcard => &self.wildcard,
            MatchKind::Template => &self.template,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(method: &str, path: &str) -> RequestContext {
        RequestContext {
            method: method.to_string(),
            path: path.to_string(),
            host: None,
            headers: HashMap::new(),
            query_params: HashMap::new(),
            body: None,
        }
    }

    #[test]
    fn method_mismatch_rejects() {
        let matchers = MatcherSet::new(16);
        let mut route = Route::new("get-users", 0, "/users", MatchKind::Exact, "users-service");
        route.methods = vec!["GET".to_string()];
        let req = request("POST", "/users");
        assert!(!route_matches(&route, &req, matchers.for_kind(MatchKind::Exact)));
    }

    #[test]
    fn required_header_must_match_exactly() {
        let matchers = MatcherSet::new(16);
        let mut route = Route::new("admin", 0, "/admin", MatchKind::Exact, "admin-service");
        route.required_headers.insert("X-Role".to_string(), "admin".to_string());

        let mut req = request("GET", "/admin");
        assert!(!route_matches(&route, &req, matchers.for_kind(MatchKind::Exact)));

        req.headers.insert("X-Role".to_string(), "admin".to_string());
        assert!(route_matches(&route, &req, matchers.for_kind(MatchKind::Exact)));
    }
}
