//! Centralized error types for the relay.
//!
//! Uses `thiserror` for ergonomic error definitions and provides HTTP-friendly
//! error variants that convert directly into API responses. Error codes are
//! part of the wire contract — do not rename variants without updating
//! clients.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

tokio::task_local! {
    /// The ambient request id for the request currently being handled,
    /// set by the caller-auth layer's request-id middleware and read here
    /// so a logged error and the id in its JSON response body always match
    /// the `X-Request-Id` header the client actually received (§7, §9b).
    pub static REQUEST_ID: String;
}

/// The current request's id, or `"unknown"` outside of a request scope
/// (e.g. a unit test that builds a `RelayError` response directly).
fn current_request_id() -> String {
    REQUEST_ID.try_with(|id| id.clone()).unwrap_or_else(|_| "unknown".to_string())
}

/// Core application error type used across the relay.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Authentication failed")]
    AuthFailed,

    #[error("Forbidden")]
    Forbidden,

    #[error("{resource} not found")]
    NotFound { resource: String },

    #[error("Validation failed: {message}")]
    Validation { message: String },

    #[error("Rate limited. Retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Device limit exceeded")]
    DeviceLimitExceeded,

    #[error("Circle limit exceeded")]
    CircleLimitExceeded,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Storage error: {0}")]
    Storage(anyhow::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// JSON error response body sent to clients.
#[derive(Serialize)]
struct ErrorResponse {
    code: String,
    message: String,
    request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_secs: Option<u64>,
}

impl RelayError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound { resource: resource.into() }
    }

    /// Map error to HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::AuthFailed => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::DeviceLimitExceeded | Self::CircleLimitExceeded => StatusCode::BAD_REQUEST,
            Self::Database(_) | Self::Redis(_) | Self::Storage(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable error code string, part of the wire contract (§7).
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::AuthFailed => "AUTH_FAILED",
            Self::Forbidden => "FORBIDDEN",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::DeviceLimitExceeded => "DEVICE_LIMIT_EXCEEDED",
            Self::CircleLimitExceeded => "CIRCLE_LIMIT_EXCEEDED",
            Self::Database(_) | Self::Redis(_) | Self::Storage(_) | Self::Internal(_) => {
                "INTERNAL_ERROR"
            }
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let request_id = current_request_id();

        // Never leak infrastructure details or plaintext phones to clients.
        let message = match &self {
            RelayError::Database(e) => {
                tracing::error!(request_id, error = %e, "database error");
                "An internal error occurred".to_string()
            }
            RelayError::Redis(e) => {
                tracing::error!(request_id, error = %e, "redis error");
                "An internal error occurred".to_string()
            }
            RelayError::Storage(e) => {
                tracing::error!(request_id, error = %e, "storage error");
                "An internal error occurred".to_string()
            }
            RelayError::Internal(e) => {
                tracing::error!(request_id, error = %e, "internal error");
                "An internal error occurred".to_string()
            }
            other => other.to_string(),
        };

        let retry_after_secs = if let RelayError::RateLimited { retry_after_secs } = &self {
            Some(*retry_after_secs)
        } else {
            None
        };

        let body = ErrorResponse {
            code: self.error_code().to_string(),
            message,
            request_id,
            retry_after_secs,
        };

        let mut response = (status, axum::Json(body)).into_response();
        if let Some(secs) = retry_after_secs {
            if let Ok(value) = axum::http::HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(axum::http::header::RETRY_AFTER, value);
            }
        }
        response
    }
}

/// Convenience type alias for Results using RelayError.
pub type RelayResult<T> = Result<T, RelayError>;
