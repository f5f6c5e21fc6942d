//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use saga::SagaError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Bad request from the client.
    BadRequest(String),
    /// Saga execution error.
    Saga(SagaError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, serde_json::json!({ "error": msg }))
            }
            ApiError::Saga(err) => saga_error_to_response(err),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    serde_json::json!({ "error": msg }),
                )
            }
        };

        (status, axum::Json(body)).into_response()
    }
}

fn saga_error_to_response(err: SagaError) -> (StatusCode, serde_json::Value) {
    let status = match &err {
        SagaError::InvalidRequest(_) | SagaError::PricingMismatch { .. } => StatusCode::BAD_REQUEST,
        SagaError::ItemsNotFound { .. } => StatusCode::NOT_FOUND,
        SagaError::CatalogUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        SagaError::Failed { reversal, .. } | SagaError::Cancelled { reversal } => {
            if reversal.is_complete() {
                StatusCode::CONFLICT
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        tracing::error!(error = %err, "saga ended without a clean outcome");
    }

    let mut body = serde_json::json!({
        "error": err.to_string(),
        "retryable": err.is_retryable(),
    });
    if let Some(reversal) = err.reversal() {
        body["reversal"] = serde_json::to_value(reversal).unwrap_or_default();
    }
    (status, body)
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Saga(err)
    }
}
