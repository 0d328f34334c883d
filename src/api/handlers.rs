//! HTTP request handlers.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::error;
use validator::Validate;

use crate::app::AppState;
use crate::domain::{
    AppError, BlockchainError, ComputeHashRequest, ComputeHashResponse,
    CurrencyValidationResponse, ErrorDetail, ErrorResponse, HealthResponse, HealthStatus,
    NetworkSummary, PaymentSubmission, PrecommitRequest, PrecommitResponse, SubmitPaymentRequest,
    TransactionRecord, UserLimits, ValidationError,
};

/// Query parameters of the status endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct StatusParams {
    /// Block until the payment is included or the confirmation timeout passes
    #[serde(default)]
    pub wait: bool,
}

/// Compute the commit hash binding payer, recipient, amount and opt
pub async fn compute_hash_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ComputeHashRequest>,
) -> Result<Json<ComputeHashResponse>, AppError> {
    let hash = state.service.compute_commit_hash(&payload)?;
    Ok(Json(ComputeHashResponse {
        hash: hash.to_hex(),
    }))
}

/// Submit a payment
pub async fn submit_payment_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SubmitPaymentRequest>,
) -> Result<Json<PaymentSubmission>, AppError> {
    let submission = state.service.submit_payment_request(&payload).await?;
    Ok(Json(submission))
}

/// Record a commit hash on chain ahead of the payment
pub async fn precommit_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<PrecommitRequest>,
) -> Result<Json<PrecommitResponse>, AppError> {
    payload.validate()?;
    let response = state
        .service
        .precommit(&payload.network, &payload.commit_hash)
        .await?;
    Ok(Json(response))
}

/// Transaction status, optionally waiting for inclusion
pub async fn payment_status_handler(
    State(state): State<Arc<AppState>>,
    Path((network, reference)): Path<(String, String)>,
    Query(params): Query<StatusParams>,
) -> Result<Json<TransactionRecord>, AppError> {
    let record = if params.wait {
        state.service.await_payment(&network, &reference, None).await?
    } else {
        state.service.get_status(&network, &reference).await?
    };
    Ok(Json(record))
}

/// Payment limit counters of a payer
pub async fn user_limits_handler(
    State(state): State<Arc<AppState>>,
    Path((network, address)): Path<(String, String)>,
) -> Result<Json<UserLimits>, AppError> {
    let limits = state.service.get_limits(&network, &address).await?;
    Ok(Json(limits))
}

/// Configured networks with their currencies and signer
pub async fn list_networks_handler(
    State(state): State<Arc<AppState>>,
) -> Json<Vec<NetworkSummary>> {
    Json(state.service.networks())
}

/// Check that a network offers a currency
pub async fn validate_currency_handler(
    State(state): State<Arc<AppState>>,
    Path((network, currency)): Path<(String, String)>,
) -> Result<Json<CurrencyValidationResponse>, AppError> {
    let response = state
        .service
        .validate_network_currency(&network, &currency)?;
    Ok(Json(response))
}

/// Detailed health check
pub async fn health_check_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let health = state.service.health_check().await;
    Json(health)
}

/// Kubernetes liveness probe
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Kubernetes readiness probe
pub async fn readiness_handler(State(state): State<Arc<AppState>>) -> StatusCode {
    let health = state.service.health_check().await;
    match health.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Prometheus scrape endpoint
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

fn validation_type(err: &ValidationError) -> &'static str {
    match err {
        ValidationError::UnsupportedNetwork { .. } => "unsupported_network",
        ValidationError::UnsupportedCurrency { .. } => "unsupported_currency",
        ValidationError::TokenAddressMismatch { .. } => "token_address_mismatch",
        _ => "validation_error",
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, error_type) = match &self {
            AppError::Validation(err) => (StatusCode::BAD_REQUEST, validation_type(err)),
            AppError::Blockchain(bc_err) => match bc_err {
                BlockchainError::TransactionNotFound(_) => {
                    (StatusCode::NOT_FOUND, "transaction_not_found")
                }
                BlockchainError::AccountNotFound(_) => {
                    (StatusCode::NOT_FOUND, "account_not_found")
                }
                BlockchainError::SimulationFailed(_) => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "simulation_failed")
                }
                BlockchainError::SubmissionFailed(_) => {
                    (StatusCode::BAD_GATEWAY, "submission_failed")
                }
                BlockchainError::InsufficientFunds => {
                    (StatusCode::PAYMENT_REQUIRED, "insufficient_funds")
                }
                BlockchainError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
                BlockchainError::InvalidSignature(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "signer_error")
                }
                BlockchainError::Connection(_)
                | BlockchainError::RpcError(_)
                | BlockchainError::DeserializationFailed(_) => {
                    (StatusCode::BAD_GATEWAY, "blockchain_error")
                }
            },
            AppError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "configuration_error"),
            AppError::Authentication(_) => (StatusCode::UNAUTHORIZED, "authentication_error"),
            AppError::Serialization(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "serialization_error")
            }
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            AppError::NotSupported(_) => (StatusCode::NOT_IMPLEMENTED, "not_supported"),
            AppError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
        };
        let message = self.to_string();

        if status.is_server_error() {
            error!(error_type = %error_type, message = %message, "Server error");
        }

        let body = Json(ErrorResponse {
            error: ErrorDetail {
                r#type: error_type.to_string(),
                message,
            },
        });

        (status, body).into_response()
    }
}
