//! HTTP error mapping for registration failures.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use onboarding_core::{FieldErrors, FlowError};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the HTTP layer.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Flow(#[from] FlowError),

    #[error("Rate limit exceeded")]
    RateLimitExceeded { retry_after: Duration },
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    /// Per-field messages for validation failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<FieldErrors>,
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Flow(e) => match e {
                FlowError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                FlowError::Expired => (StatusCode::GONE, "FLOW_EXPIRED"),
                FlowError::StepNotAccessible(_) => (StatusCode::CONFLICT, "STEP_NOT_ACCESSIBLE"),
                FlowError::ValidationFailed(_) => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_FAILED")
                }
                FlowError::ChallengeMismatch => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "CHALLENGE_MISMATCH")
                }
                FlowError::PinMismatch => (StatusCode::UNPROCESSABLE_ENTITY, "PIN_MISMATCH"),
                FlowError::ProvisioningFailed(_) => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "PROVISIONING_FAILED")
                }
                FlowError::Delivery(_) => (StatusCode::BAD_GATEWAY, "DELIVERY_FAILED"),
                FlowError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
                FlowError::Encryption(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "ENCRYPTION_ERROR")
                }
                FlowError::Credential(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "CREDENTIAL_ERROR")
                }
                FlowError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            },
            ApiError::RateLimitExceeded { .. } => (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMIT_EXCEEDED"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let fields = match &self {
            ApiError::Flow(FlowError::ValidationFailed(fields))
            | ApiError::Flow(FlowError::ProvisioningFailed(fields)) => Some(fields.clone()),
            _ => None,
        };

        let body = ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
            fields,
        };

        let mut response = (status, Json(body)).into_response();
        if let ApiError::RateLimitExceeded { retry_after } = self {
            // Whole seconds, rounded up.
            let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs.max(1)));
        }
        response
    }
}
