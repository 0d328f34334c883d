//! HTTP routing configuration with rate limiting.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{HeaderValue, Request, Response, StatusCode},
    middleware::{self, Next},
    response::IntoResponse,
    routing::{get, post},
};
use governor::{Quota, RateLimiter};
use tower::ServiceBuilder;
use tower_http::{
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::app::AppState;
use crate::config::RateLimitSettings;
use crate::domain::{ErrorDetail, ErrorResponse, RateLimitResponse};

use super::handlers::{
    compute_hash_handler, health_check_handler, list_networks_handler, liveness_handler,
    metrics_handler, payment_status_handler, precommit_handler, readiness_handler,
    submit_payment_handler, user_limits_handler, validate_currency_handler,
};
use super::middleware::auth_middleware;

/// Upper bound on one request, including `?wait=true` status polls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

type KeyedLimiter = RateLimiter<
    IpAddr,
    governor::state::keyed::DashMapStateStore<IpAddr>,
    governor::clock::DefaultClock,
>;

/// Rate limiter configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Requests per second for API endpoints
    pub general_rps: u32,
    /// Burst size for API endpoints
    pub general_burst: u32,
    /// Requests per second for health endpoints
    pub health_rps: u32,
    /// Burst size for health endpoints
    pub health_burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            general_rps: 10,
            general_burst: 20,
            health_rps: 100,
            health_burst: 100,
        }
    }
}

impl RateLimitConfig {
    /// API limits from the `[rate_limit]` config section; health limits keep their defaults.
    pub fn from_settings(settings: RateLimitSettings) -> Self {
        Self {
            general_rps: settings.rps,
            general_burst: settings.burst,
            ..Self::default()
        }
    }
}

/// Shared rate limiter state, keyed by client IP
pub struct RateLimitState {
    api_limiter: KeyedLimiter,
    health_limiter: KeyedLimiter,
    config: RateLimitConfig,
}

fn quota(rps: u32, burst: u32) -> Quota {
    Quota::per_second(NonZeroU32::new(rps).unwrap_or(NonZeroU32::MIN))
        .allow_burst(NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN))
}

impl RateLimitState {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            api_limiter: RateLimiter::dashmap(quota(config.general_rps, config.general_burst)),
            health_limiter: RateLimiter::dashmap(quota(config.health_rps, config.health_burst)),
            config,
        }
    }
}

/// Extract client IP from request (X-Forwarded-For, X-Real-IP, or ConnectInfo).
/// Unknown clients share the 0.0.0.0 bucket.
fn client_ip_from_request<B>(request: &Request<B>) -> IpAddr {
    // Client is first in X-Forwarded-For
    if let Some(ip) = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .and_then(|first| first.trim().parse::<IpAddr>().ok())
    {
        return ip;
    }
    if let Some(ip) = request
        .headers()
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<IpAddr>().ok())
    {
        return ip;
    }
    if let Some(addr) = request.extensions().get::<SocketAddr>() {
        return addr.ip();
    }
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

/// Whole seconds to wait, rounded up so clients never retry before a cell frees.
fn retry_after_secs(wait: Duration) -> u64 {
    wait.as_secs() + u64::from(wait.subsec_nanos() > 0)
}

/// Rate limit middleware for API endpoints
async fn rate_limit_api_middleware(
    State(rate_limit): State<Arc<RateLimitState>>,
    request: Request<Body>,
    next: Next,
) -> Response<Body> {
    let client_ip = client_ip_from_request(&request);
    let limit = HeaderValue::from(rate_limit.config.general_rps);
    match rate_limit.api_limiter.check_key(&client_ip) {
        Ok(_) => {
            let mut response = next.run(request).await;
            response.headers_mut().insert("X-RateLimit-Limit", limit);
            response
        }
        Err(not_until) => {
            let retry_after = retry_after_secs(not_until.wait_time_from(
                governor::clock::Clock::now(&governor::clock::DefaultClock::default()),
            ));
            tracing::debug!(client = %client_ip, retry_after, "API rate limit hit");

            let body = RateLimitResponse {
                error: ErrorDetail {
                    r#type: "rate_limited".to_string(),
                    message: "Rate limit exceeded. Please slow down your requests.".to_string(),
                },
                retry_after,
            };

            let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
            let headers = response.headers_mut();
            headers.insert("X-RateLimit-Limit", limit);
            headers.insert("X-RateLimit-Remaining", HeaderValue::from(0u32));
            headers.insert("Retry-After", HeaderValue::from(retry_after));
            response
        }
    }
}

/// Rate limit middleware for health endpoints
async fn rate_limit_health_middleware(
    State(rate_limit): State<Arc<RateLimitState>>,
    request: Request<Body>,
    next: Next,
) -> Response<Body> {
    let client_ip = client_ip_from_request(&request);
    match rate_limit.health_limiter.check_key(&client_ip) {
        Ok(_) => next.run(request).await,
        Err(not_until) => {
            let retry_after = retry_after_secs(not_until.wait_time_from(
                governor::clock::Clock::now(&governor::clock::DefaultClock::default()),
            ));

            let body = ErrorResponse {
                error: ErrorDetail {
                    r#type: "rate_limited".to_string(),
                    message: "Rate limit exceeded".to_string(),
                },
            };

            let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
            response
                .headers_mut()
                .insert("Retry-After", HeaderValue::from(retry_after));
            response
        }
    }
}

fn api_routes(app_state: &Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/commit-hash", post(compute_hash_handler))
        .route("/payments", post(submit_payment_handler))
        .route("/payments/{network}/{reference}", get(payment_status_handler))
        .route("/precommit", post(precommit_handler))
        .route("/limits/{network}/{address}", get(user_limits_handler))
        .route("/networks", get(list_networks_handler))
        .route(
            "/networks/{network}/currencies/{currency}",
            get(validate_currency_handler),
        )
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(app_state),
            auth_middleware,
        ))
}

fn health_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(health_check_handler))
        .route("/live", get(liveness_handler))
        .route("/ready", get(readiness_handler))
}

fn common_layers(router: Router<Arc<AppState>>) -> Router<Arc<AppState>> {
    let middleware = ServiceBuilder::new()
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            REQUEST_TIMEOUT,
        ));
    router.layer(middleware)
}

/// Create router without rate limiting
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let router = Router::new()
        .nest("/api", api_routes(&app_state))
        .nest("/health", health_routes())
        .route("/metrics", get(metrics_handler));

    common_layers(router).with_state(app_state)
}

/// Create router with rate limiting enabled
pub fn create_router_with_rate_limit(app_state: Arc<AppState>, config: RateLimitConfig) -> Router {
    let rate_limit_state = Arc::new(RateLimitState::new(config));

    let api = api_routes(&app_state).layer(middleware::from_fn_with_state(
        Arc::clone(&rate_limit_state),
        rate_limit_api_middleware,
    ));

    let health = health_routes().layer(middleware::from_fn_with_state(
        Arc::clone(&rate_limit_state),
        rate_limit_health_middleware,
    ));

    let metrics = Router::new()
        .route("/metrics", get(metrics_handler))
        .layer(middleware::from_fn_with_state(
            rate_limit_state,
            rate_limit_health_middleware,
        ));

    let router = Router::new()
        .nest("/api", api)
        .nest("/health", health)
        .merge(metrics);

    common_layers(router).with_state(app_state)
}
