//! The full request/response pipeline (spec §4.7): security scanning,
//! authentication, authorization, rate limiting, transformation, routing, and
//! load balancing, composed into one ordered chain with a uniform short-circuit
//! contract. Grounded on
//! `original_source/.../gateway/api_gateway.py`'s `APIGateway.handle_request`
//! (the per-request step sequence, `_create_error_response` shape) and
//! `original_source/.../gateway/middleware.py`'s `MiddlewareChain` (short-circuit
//! on the first terminal response, request id generation, always running the
//! response-direction chain over whatever response resulted).

use async_trait::async_trait;
use crate::auth::{AuthProvider, AuthorizationEngine};
use crate::error::GatewayError;
use crate::load_balancer::Pool;
use crate::rate_limit::{KeyGenerator, LimitAction, RateLimiter};
use crate::route::{RequestContext, ResponseContext, Route};
use crate::router::RouteMatch;
use crate::security::{CorsHandler, SecurityHeadersConfig, SecurityValidator};
use crate::transform::TransformEngine;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const REQUEST_ID_HEADER: &str = "X-Request-Id";
const DEFAULT_ROUTE_TIMEOUT: Duration = Duration::from_secs(30);

/// Header names never forwarded upstream or back to the client (RFC 7230 §6.1).
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn is_hop_by_hop(header: &str) -> bool {
    HOP_BY_HOP_HEADERS.iter().any(|h| h.eq_ignore_ascii_case(header))
}

/// Resolves a matched route's target pool to an upstream HTTP call. Implementations
/// are expected to apply their own connection pooling/TLS config; the pipeline only
/// handles routing, timeout enforcement, and retry-free forwarding.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Send `request` to `url`, returning the upstream's response or an error
    /// description (used verbatim in the 502 body's logs, never sent to the client).
    async fn send(&self, url: &str, request: &RequestContext) -> Result<ResponseContext, String>;
}

/// An [`UpstreamClient`] backed by a shared `reqwest::Client`.
pub struct ReqwestUpstreamClient {
    client: reqwest::Client,
}

impl Default for ReqwestUpstreamClient {
    fn default() -> Self {
        Self { client: reqwest::Client::new() }
    }
}

impl ReqwestUpstreamClient {
    /// A client using reqwest's default TLS/connection-pool configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UpstreamClient for ReqwestUpstreamClient {
    async fn send(&self, url: &str, request: &RequestContext) -> Result<ResponseContext, String> {
        let method =
            reqwest::Method::from_bytes(request.method.as_bytes()).map_err(|e| e.to_string())?;
        let mut builder = self.client.request(method, url);
        for (key, value) in &request.headers {
            if !is_hop_by_hop(key) {
                builder = builder.header(key, value);
            }
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(|e| e.to_string())?;
        let status = response.status().as_u16();
        let mut headers = HashMap::new();
        for (key, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers.insert(key.to_string(), value.to_string());
            }
        }
        let body = response.text().await.map_err(|e| e.to_string())?;
        Ok(ResponseContext { status, headers, body: Some(body) })
    }
}

/// Looks up the next-hop [`Router`]-resolved route against its named [`Pool`].
/// Implemented for [`crate::router::PathRouter`] and [`crate::router::CompositeRouter`]
/// so the pipeline can take either without a generic parameter.
pub trait Router: Send + Sync {
    /// The first matching route, if any.
    fn find(&self, request: &RequestContext) -> Option<RouteMatch>;
}

impl Router for crate::router::PathRouter {
    fn find(&self, request: &RequestContext) -> Option<RouteMatch> {
        crate::router::PathRouter::find(self, request)
    }
}

impl Router for crate::router::CompositeRouter {
    fn find(&self, request: &RequestContext) -> Option<RouteMatch> {
        crate::router::CompositeRouter::find(self, request)
    }
}

/// Everything the pipeline needs wired up front (spec §4.7).
pub struct GatewayPipeline {
    /// Security scanner + attack-rate budget.
    pub security: SecurityValidator,
    /// CORS policy handler.
    pub cors: CorsHandler,
    /// Security response headers applied to every non-preflight response.
    pub security_headers: SecurityHeadersConfig,
    /// Authentication provider.
    pub auth: AuthProvider,
    /// Authorization engine.
    pub authz: AuthorizationEngine,
    /// Rate limiting algorithm.
    pub rate_limiter: Arc<dyn RateLimiter>,
    /// Rate-limit key composition.
    pub rate_limit_key: KeyGenerator,
    /// Request/response transformation rules.
    pub transform: TransformEngine,
    /// Route table.
    pub router: Arc<dyn Router>,
    /// Upstream pools, keyed by `Route::target_service`.
    pub pools: HashMap<String, Arc<Pool>>,
    /// Upstream HTTP client.
    pub upstream: Arc<dyn UpstreamClient>,
    /// Scheme used to build upstream base URLs (`"http"`/`"https"`).
    pub upstream_scheme: String,
}

impl GatewayPipeline {
    fn request_id(request: &mut RequestContext) -> String {
        if let Some(existing) = request.headers.get(REQUEST_ID_HEADER) {
            return existing.clone();
        }
        let generated = Uuid::new_v4().to_string();
        request.headers.insert(REQUEST_ID_HEADER.to_string(), generated.clone());
        generated
    }

    fn error_response(&self, error: &GatewayError, request_id: &str) -> ResponseContext {
        tracing::warn!(request_id, error = %error, "gateway rejected request");
        metrics::counter!("gateway.responses.total").increment(1);
        let mut headers = HashMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        headers.insert(REQUEST_ID_HEADER.to_string(), request_id.to_string());

        if let GatewayError::Unauthenticated { scheme, .. } = error {
            headers.insert("WWW-Authenticate".to_string(), scheme.clone());
        }
        if let GatewayError::RateLimited { retry_after_secs, limit, reset_at } = error {
            headers.insert("Retry-After".to_string(), retry_after_secs.to_string());
            headers.insert("X-RateLimit-Limit".to_string(), limit.to_string());
            headers.insert("X-RateLimit-Reset".to_string(), reset_at.to_string());
        }

        let body = match error {
            GatewayError::Forbidden { reason } | GatewayError::Unauthenticated { reason, .. } => {
                format!(r#"{{"error":"{reason}"}}"#)
            }
            other => format!(r#"{{"error":"{other}"}}"#),
        };

        ResponseContext { status: error.status_code(), headers, body: Some(body) }
    }

    fn finalize_response(&self, request: &RequestContext, mut response: ResponseContext, request_id: &str) -> ResponseContext {
        if let Err(e) = self.transform.transform_response(&mut response) {
            tracing::error!(request_id, error = %e, "response transformation failed");
        }

        for (key, value) in self.security_headers.headers() {
            response.headers.insert(key, value);
        }
        for (key, value) in self.cors.response_headers(request) {
            response.headers.insert(key, value);
        }
        response.headers.insert(REQUEST_ID_HEADER.to_string(), request_id.to_string());
        response
    }

    /// Run the full pipeline over `request`, always returning a response (never an
    /// error) — every failure mode maps to a terminal [`ResponseContext`] per spec §7.
    pub async fn handle(&self, mut request: RequestContext) -> ResponseContext {
        let request_id = Self::request_id(&mut request);
        metrics::counter!("gateway.requests.total").increment(1);

        if CorsHandler::is_preflight(&request) {
            let mut headers: HashMap<String, String> = self.cors.preflight_headers(&request).into_iter().collect();
            headers.insert(REQUEST_ID_HEADER.to_string(), request_id.clone());
            return ResponseContext { status: 200, headers, body: None };
        }

        let events = self.security.scan(&request);
        if self.security.decide(&events) {
            return self.finalize_response(&request, self.error_response(&GatewayError::SecurityViolation, &request_id), &request_id);
        }

        let principal = match self.auth.authenticate(&request).await {
            Ok(principal) => principal,
            Err(failure) => {
                let error = GatewayError::Unauthenticated { scheme: failure.scheme, reason: failure.reason };
                return self.finalize_response(&request, self.error_response(&error, &request_id), &request_id);
            }
        };

        if !self.authz.is_authorized(&principal, &request) {
            let error = GatewayError::Forbidden { reason: "insufficient permissions".to_string() };
            return self.finalize_response(&request, self.error_response(&error, &request_id), &request_id);
        }

        let rate_limit_key = self.rate_limit_key.generate(&request);
        let decision = self.rate_limiter.is_allowed(&rate_limit_key);
        if !decision.allowed && decision.action == LimitAction::Reject {
            let error = GatewayError::RateLimited {
                retry_after_secs: decision.retry_after.unwrap_or_default().as_secs(),
                limit: decision.limit,
                reset_at: chrono::Utc::now().timestamp() + decision.reset_in.as_secs() as i64,
            };
            return self.finalize_response(&request, self.error_response(&error, &request_id), &request_id);
        }

        if let Err(e) = self.transform.transform_request(&mut request) {
            let error = GatewayError::Internal(e.to_string());
            return self.finalize_response(&request, self.error_response(&error, &request_id), &request_id);
        }

        let route_match = match self.router.find(&request) {
            Some(route_match) => route_match,
            None => {
                return self.finalize_response(&request, self.error_response(&GatewayError::NoRouteMatched, &request_id), &request_id);
            }
        };

        let pool = match self.pools.get(&route_match.route.target_service) {
            Some(pool) => pool.clone(),
            None => {
                let error = GatewayError::NoServerAvailable { pool: route_match.route.target_service.clone() };
                return self.finalize_response(&request, self.error_response(&error, &request_id), &request_id);
            }
        };

        let client_key = request.headers.get("X-Forwarded-For").map(String::as_str);
        let instance = match pool.select(client_key).await {
            Some(instance) => instance,
            None => {
                let error = GatewayError::NoServerAvailable { pool: route_match.route.target_service.clone() };
                return self.finalize_response(&request, self.error_response(&error, &request_id), &request_id);
            }
        };

        let response = match self.forward(&route_match.route, &route_match.params, &instance, &request).await {
            Ok(response) => response,
            Err(error) => self.error_response(&error, &request_id),
        };

        self.finalize_response(&request, response, &request_id)
    }

    async fn forward(
        &self,
        route: &Route,
        params: &HashMap<String, String>,
        instance: &Arc<crate::load_balancer::ServiceInstance>,
        request: &RequestContext,
    ) -> Result<ResponseContext, GatewayError> {
        let path = match &route.path_rewrite {
            Some(template) => apply_path_template(template, params),
            None => request.path.clone(),
        };

        let mut url = format!("{}{path}", instance.base_url(&self.upstream_scheme));
        if !request.query_params.is_empty() {
            let query = serde_urlencoded::to_string(&request.query_params)
                .map_err(|e| GatewayError::Internal(e.to_string()))?;
            url = format!("{url}?{query}");
        }

        let timeout = route.timeout.unwrap_or(DEFAULT_ROUTE_TIMEOUT);
        let upstream = self.upstream.clone();
        let url_for_call = url.clone();
        let request_for_call = request.clone();

        let outcome = instance
            .call(|| async move {
                match tokio::time::timeout(timeout, upstream.send(&url_for_call, &request_for_call)).await {
                    Ok(result) => result,
                    Err(_) => Err("upstream request timed out".to_string()),
                }
            })
            .await;

        match outcome {
            Some(Ok(response)) => Ok(response),
            Some(Err(reason)) => Err(GatewayError::UpstreamError(reason)),
            None => Err(GatewayError::NoServerAvailable { pool: route.target_service.clone() }),
        }
    }
}

fn apply_path_template(template: &str, params: &HashMap<String, String>) -> String {
    let mut result = template.to_string();
    for (key, value) in params {
        result = result.replace(&format!("{{{key}}}"), value);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Combinator, Principal};
    use crate::load_balancer::{Algorithm, ServiceInstance};
    use crate::rate_limit::InMemoryRateLimitStore;
    use crate::rate_limit::TokenBucketLimiter;
    use crate::route::MatchKind;
    use crate::router::{NormalizationConfig, PathRouter};
    use crate::security::{CorsConfig, SecurityConfig};
    use crate::transform::TransformConfig;
    use platform_core::SystemClock;
    use std::collections::HashSet;
    use std::time::Duration;

    struct EchoUpstream;

    #[async_trait]
    impl UpstreamClient for EchoUpstream {
        async fn send(&self, _url: &str, _request: &RequestContext) -> Result<ResponseContext, String> {
            Ok(ResponseContext { status: 200, headers: HashMap::new(), body: Some("ok".to_string()) })
        }
    }

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

    fn pipeline() -> GatewayPipeline {
        let router = PathRouter::new(Arc::new(crate::route::MatcherSet::new(16)), NormalizationConfig::default(), 16);
        router.add_route(Route::new("echo", 0, "/echo", MatchKind::Exact, "echo-service"));

        let mut pools = HashMap::new();
        let instance = Arc::new(ServiceInstance::new("s0", "localhost", 9999, 1));
        pools.insert("echo-service".to_string(), Arc::new(Pool::new("echo-pool", Algorithm::RoundRobin, vec![instance])));

        GatewayPipeline {
            security: SecurityValidator::new(SecurityConfig::default(), Arc::new(SystemClock)),
            cors: CorsHandler::new(CorsConfig::default()),
            security_headers: SecurityHeadersConfig::default(),
            auth: AuthProvider::None,
            authz: AuthorizationEngine::new(Vec::new(), Combinator::PermitOverrides, HashSet::new()),
            rate_limiter: Arc::new(TokenBucketLimiter::new(
                100,
                Duration::from_secs(1),
                200,
                Arc::new(InMemoryRateLimitStore::default()),
                Arc::new(SystemClock),
            )),
            rate_limit_key: KeyGenerator::new(),
            transform: TransformEngine::new(TransformConfig::default()),
            router: Arc::new(router),
            pools,
            upstream: Arc::new(EchoUpstream),
            upstream_scheme: "http".to_string(),
        }
    }

    #[tokio::test]
    async fn unmatched_route_returns_404() {
        let response = pipeline().handle(request("GET", "/missing")).await;
        assert_eq!(response.status, 404);
    }

    #[tokio::test]
    async fn matched_route_forwards_and_returns_upstream_response() {
        let response = pipeline().handle(request("GET", "/echo")).await;
        assert_eq!(response.status, 200);
        assert_eq!(response.body.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn preflight_short_circuits_with_cors_headers() {
        let mut req = request("OPTIONS", "/echo");
        req.headers.insert("Origin".to_string(), "https://example.com".to_string());
        let response = pipeline().handle(req).await;
        assert_eq!(response.status, 200);
        assert!(response.headers.contains_key("Access-Control-Allow-Methods"));
    }

    #[tokio::test]
    async fn response_carries_security_headers() {
        let response = pipeline().handle(request("GET", "/echo")).await;
        assert_eq!(response.headers.get("X-Frame-Options").map(String::as_str), Some("DENY"));
    }
}
