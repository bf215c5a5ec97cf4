//! Request-level error taxonomy.
//!
//! Every error maps to one HTTP status code and a stable `error_code`, and
//! carries the correlation id of the request that produced it. Transient
//! infrastructure failures (broker, cache, blob, KMS) are 503 with a
//! `Retry-After` header and never mutate persistent state into a terminal
//! failure; deterministic failures are recorded on the affected row and
//! surfaced on the next poll rather than as a 500.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Maximum length of a client-visible error message.
const MAX_MESSAGE_LEN: usize = 200;

/// Errors surfaced to API clients.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed or semantically invalid request (400).
    #[error("validation error: {0}")]
    Validation(String),

    /// Missing or invalid API key (401).
    #[error("auth error: {0}")]
    Auth(String),

    /// Authenticated but not allowed: scope, IP, or tenant mismatch (403).
    #[error("forbidden: {message}")]
    Forbidden {
        /// Stable error code, e.g. `scope_denied`, `ip_denied`.
        code: &'static str,
        /// Human-readable detail.
        message: String,
    },

    /// Unknown resource (404).
    #[error("not found: {0}")]
    NotFound(String),

    /// Idempotency key replayed with a differing body (409).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Token bucket exhausted (429).
    #[error("rate limit exceeded")]
    RateLimited {
        /// Seconds the client should wait before retrying.
        retry_after_secs: u64,
    },

    /// Broker, cache, blob, or KMS unavailable (503).
    #[error("transient infrastructure error: {message}")]
    TransientInfra {
        /// Stable error code, e.g. `BROKER_UNAVAILABLE`.
        code: &'static str,
        /// Human-readable detail.
        message: String,
        /// Seconds the client should wait before retrying.
        retry_after_secs: u64,
    },

    /// Unexpected internal failure (500). Details are logged, not returned.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Shorthand for the broker-down condition.
    #[must_use]
    pub fn broker_unavailable() -> Self {
        Self::TransientInfra {
            code: "BROKER_UNAVAILABLE",
            message: "task broker unreachable".to_string(),
            retry_after_secs: 30,
        }
    }

    /// HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::TransientInfra { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code for the response body.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::Auth(_) => "auth_error",
            Self::Forbidden { code, .. } => code,
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "idempotency_conflict",
            Self::RateLimited { .. } => "rate_limited",
            Self::TransientInfra { code, .. } => code,
            Self::Internal(_) => "internal_error",
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        Self::Internal(format!("database error: {err}"))
    }
}

/// JSON body of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Stable machine-readable code.
    pub error_code: String,

    /// Short human-readable message, capped at 200 characters.
    pub message: String,

    /// Correlation id of the failing request, when known.
    pub correlation_id: Option<String>,
}

/// An [`ApiError`] bound to its request's correlation id.
#[derive(Debug)]
pub struct CorrelatedError {
    /// The underlying error.
    pub error: ApiError,

    /// Correlation id of the failing request.
    pub correlation_id: Option<String>,
}

impl ApiError {
    /// Attaches the request's correlation id for the response body.
    #[must_use]
    pub fn with_correlation(self, correlation_id: impl Into<String>) -> CorrelatedError {
        CorrelatedError {
            error: self,
            correlation_id: Some(correlation_id.into()),
        }
    }
}

impl From<ApiError> for CorrelatedError {
    fn from(error: ApiError) -> Self {
        Self {
            error,
            correlation_id: None,
        }
    }
}

impl IntoResponse for CorrelatedError {
    fn into_response(self) -> Response {
        let status = self.error.status_code();

        // Internal details stay in the logs.
        let message = match &self.error {
            ApiError::Internal(detail) => {
                tracing::error!(detail = %detail, "internal error");
                "internal server error".to_string()
            }
            other => truncate(&other.client_message(), MAX_MESSAGE_LEN),
        };

        let body = ErrorBody {
            error_code: self.error.error_code().to_string(),
            message,
            correlation_id: self.correlation_id,
        };

        let retry_after = match &self.error {
            ApiError::RateLimited { retry_after_secs }
            | ApiError::TransientInfra {
                retry_after_secs, ..
            } => Some(*retry_after_secs),
            _ => None,
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = secs.to_string().parse() {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        CorrelatedError::from(self).into_response()
    }
}

impl ApiError {
    fn client_message(&self) -> String {
        match self {
            Self::Validation(m) | Self::Auth(m) | Self::NotFound(m) | Self::Conflict(m) => {
                m.clone()
            }
            Self::Forbidden { message, .. } => message.clone(),
            Self::RateLimited { .. } => "rate limit exceeded, retry later".to_string(),
            Self::TransientInfra { message, .. } => message.clone(),
            Self::Internal(_) => "internal server error".to_string(),
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s[..end].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ApiError::Validation("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Auth("x".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::Forbidden {
                code: "scope_denied",
                message: "x".into()
            }
            .status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Conflict("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::RateLimited {
                retry_after_secs: 60
            }
            .status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ApiError::broker_unavailable().status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_broker_unavailable_shape() {
        let err = ApiError::broker_unavailable();
        assert_eq!(err.error_code(), "BROKER_UNAVAILABLE");
        match err {
            ApiError::TransientInfra {
                retry_after_secs, ..
            } => assert_eq!(retry_after_secs, 30),
            _ => panic!("expected TransientInfra"),
        }
    }

    #[test]
    fn test_message_truncation() {
        let long = "x".repeat(500);
        assert_eq!(truncate(&long, MAX_MESSAGE_LEN).len(), MAX_MESSAGE_LEN);
        assert_eq!(truncate("short", MAX_MESSAGE_LEN), "short");
    }

    #[test]
    fn test_scope_denied_code_passthrough() {
        let err = ApiError::Forbidden {
            code: "scope_denied",
            message: "missing scope ingest:write".into(),
        };
        assert_eq!(err.error_code(), "scope_denied");
    }
}
