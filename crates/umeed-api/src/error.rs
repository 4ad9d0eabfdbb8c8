//! # API Error Types
//!
//! Structured error type implementing `axum::response::IntoResponse`.
//! Maps domain errors from umeed-state and umeed-core to HTTP status codes
//! and returns JSON bodies with an error code, message, and optional details.
//! Internal error details never reach the client.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use umeed_state::{DeviceError, OrderError, RepairError, TaskError};

/// Structured JSON error response body.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g. "NOT_FOUND", "VALIDATION_ERROR").
    pub code: String,
    pub message: String,
    /// Additional details, present only for client errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Application-level error type that implements [`IntoResponse`] for Axum.
#[derive(Error, Debug)]
pub enum AppError {
    /// Resource not found, or hidden from the caller (404).
    #[error("not found: {0}")]
    NotFound(String),

    /// Request validation failed (422).
    #[error("validation error: {0}")]
    Validation(String),

    /// Request body could not be parsed (400).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Missing, expired, or invalid credentials (401).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Caller's role does not permit the operation (403).
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Conflict with current resource state, e.g. an out-of-order status
    /// transition or an already-sold listing (409).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A required backing service is not configured (503).
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Internal server error (500). Logged, never returned to the client.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR"),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            Self::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            Self::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            Self::ServiceUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }

    /// Shorthand for a 404 naming the resource kind and id.
    pub fn not_found(kind: &str, id: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("{kind} {id} not found"))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = match &self {
            Self::Internal(_) => "An internal error occurred".to_string(),
            other => other.to_string(),
        };

        if matches!(&self, Self::Internal(_)) {
            tracing::error!(error = %self, "internal server error");
        }

        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message,
                details: None,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<umeed_core::ValidationError> for AppError {
    fn from(err: umeed_core::ValidationError) -> Self {
        Self::Validation(err.to_string())
    }
}

/// Unknown names are validation failures; ordering violations are conflicts
/// with the device's current state.
impl From<DeviceError> for AppError {
    fn from(err: DeviceError) -> Self {
        match &err {
            DeviceError::OutOfOrder { .. } => Self::Conflict(err.to_string()),
            DeviceError::UnknownStatus(_)
            | DeviceError::UnknownApproval(_)
            | DeviceError::UnknownCategory(_)
            | DeviceError::UnknownCondition(_) => Self::Validation(err.to_string()),
        }
    }
}

impl From<TaskError> for AppError {
    fn from(err: TaskError) -> Self {
        match &err {
            TaskError::WrongStatus { .. } | TaskError::AlreadyFinished(_) => {
                Self::Conflict(err.to_string())
            }
            TaskError::UnknownStatus(_) | TaskError::UnknownType(_) => {
                Self::Validation(err.to_string())
            }
        }
    }
}

impl From<RepairError> for AppError {
    fn from(err: RepairError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<OrderError> for AppError {
    fn from(err: OrderError) -> Self {
        Self::Validation(err.to_string())
    }
}
