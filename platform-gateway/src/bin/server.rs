//! Binds [`platform_gateway::pipeline::GatewayPipeline`] to an axum HTTP listener.
//!
//! Route/pool/auth/rate-limit configuration is expected to be assembled by the
//! deploying operator (e.g. loaded from a routing config file); this binary wires the
//! pipeline's pure `RequestContext -> ResponseContext` contract to axum's request/
//! response types and the bound listen address to [`GatewayConfig`].

use axum::body::{to_bytes, Body};
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method};
use axum::response::Response;
use axum::routing::any;
use axum::Router;
use platform_core::SystemClock;
use platform_gateway::{
    AuthProvider, AuthorizationEngine, Combinator, CompositeRouter, CorsConfig, CorsHandler,
    GatewayPipeline, InMemoryRateLimitStore, KeyGenerator, ReqwestUpstreamClient, SecurityConfig,
    SecurityHeadersConfig, SecurityValidator, TokenBucketLimiter, TransformConfig, TransformEngine,
};
use platform_gateway::config::GatewayConfig;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

#[tokio::main]
async fn main() {
    // A binary entry point has no caller to propagate a config error to; a bad or
    // missing environment is a startup failure, not a recoverable runtime condition.
    #[allow(clippy::expect_used)]
    let config = GatewayConfig::load().expect("failed to load gateway configuration");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_filter.clone().into()),
        )
        .init();

    let pipeline = Arc::new(build_pipeline(&config));

    let app = Router::new()
        .route("/*path", any(handle))
        .route("/", any(handle))
        .with_state(pipeline);

    tracing::info!(addr = %config.listen_addr, "gateway listening");
    // Same rationale as the config load above: nothing downstream of `main` can act on
    // a bind/serve failure, so surfacing it as a startup panic is the correct behavior.
    #[allow(clippy::expect_used)]
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .expect("failed to bind listen address");
    #[allow(clippy::expect_used)]
    axum::serve(listener, app).await.expect("gateway server crashed");
}

/// An empty, unauthenticated pipeline: no routes are registered yet. Operators wire
/// [`CompositeRouter`]/[`platform_gateway::load_balancer::Pool`] entries for their own
/// topology before deploying; this constructs the pipeline's ambient policy (security,
/// auth, rate limiting, transforms) from `config`-driven defaults.
fn build_pipeline(config: &GatewayConfig) -> GatewayPipeline {
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
        router: Arc::new(CompositeRouter::new(Vec::new())),
        pools: HashMap::new(),
        upstream: Arc::new(ReqwestUpstreamClient::new()),
        upstream_scheme: config.upstream_scheme.clone(),
    }
}

async fn handle(
    State(pipeline): State<Arc<GatewayPipeline>>,
    request: axum::extract::Request,
) -> Response {
    let context = match to_request_context(request).await {
        Ok(context) => context,
        Err(status) => {
            // A numeric status with an empty body is always a valid response.
            #[allow(clippy::expect_used)]
            return Response::builder()
                .status(status)
                .body(Body::empty())
                .expect("static error response is always valid");
        }
    };

    let response = pipeline.handle(context).await;
    from_response_context(response)
}

async fn to_request_context(
    request: axum::extract::Request,
) -> Result<platform_gateway::RequestContext, u16> {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let headers = request.headers().clone();
    let body_bytes = to_bytes(request.into_body(), MAX_BODY_BYTES)
        .await
        .map_err(|_| 413u16)?;

    let mut header_map = HashMap::new();
    for (name, value) in &headers {
        if let Ok(value) = value.to_str() {
            header_map.insert(name.to_string(), value.to_string());
        }
    }

    let query_params = uri
        .query()
        .map(|query| serde_urlencoded::from_str::<HashMap<String, String>>(query).unwrap_or_default())
        .unwrap_or_default();

    let host = header_map.get("host").cloned();
    let body = if body_bytes.is_empty() {
        None
    } else {
        Some(String::from_utf8_lossy(&body_bytes).into_owned())
    };

    Ok(platform_gateway::RequestContext {
        method: method_string(&method),
        path: uri.path().to_string(),
        host,
        headers: header_map,
        query_params,
        body,
    })
}

fn method_string(method: &Method) -> String {
    method.as_str().to_string()
}

fn from_response_context(context: platform_gateway::ResponseContext) -> Response {
    let mut headers = HeaderMap::new();
    for (key, value) in &context.headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            headers.insert(name, value);
        }
    }

    let mut builder = Response::builder().status(context.status);
    // `headers_mut` only returns `None` once the builder has already errored, which a
    // freshly-built `status`-only builder never has.
    #[allow(clippy::expect_used)]
    {
        *builder.headers_mut().expect("builder not yet consumed") = headers;
    }
    // A status/header set copied from an already-built `ResponseContext` is always valid.
    #[allow(clippy::expect_used)]
    builder
        .body(Body::from(context.body.unwrap_or_default()))
        .expect("response built from a validated status/header set is always valid")
}
