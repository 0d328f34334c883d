//! HTTP middleware for API layer.

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{Method, Request, Response, StatusCode},
    middleware::Next,
    response::IntoResponse,
};
use secrecy::ExposeSecret;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::warn;

use crate::app::AppState;
use crate::domain::{ErrorDetail, ErrorResponse};

/// Constant-time comparison of two byte slices to prevent timing attacks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

fn unauthorized(message: &str) -> Response<Body> {
    let body = ErrorResponse {
        error: ErrorDetail {
            r#type: "authentication_error".to_string(),
            message: message.to_string(),
        },
    };
    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}

/// API key authentication middleware.
///
/// When an API key is configured, POST requests must carry it in the
/// `x-api-key` header; reads pass through. Keys are compared through their
/// SHA-256 digests in constant time.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response<Body> {
    let Some(expected) = state.api_key.as_ref() else {
        return next.run(request).await;
    };
    if request.method() != Method::POST {
        return next.run(request).await;
    }

    let Some(provided) = request
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
    else {
        warn!("API auth failed: missing x-api-key header");
        return unauthorized("missing x-api-key header");
    };

    let expected_hash = Sha256::digest(expected.expose_secret().as_bytes());
    let provided_hash = Sha256::digest(provided.as_bytes());

    if !constant_time_eq(expected_hash.as_slice(), provided_hash.as_slice()) {
        warn!("API auth failed: invalid x-api-key");
        return unauthorized("invalid x-api-key");
    }

    next.run(request).await
}
