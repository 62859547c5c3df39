// HTTP API Error Types
use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;

use crate::ratelimit::RateLimited;
use crate::session::SessionError;

/// HTTP API error with appropriate status codes and client-friendly messages
///
/// Authorization failures come in two distinguishable flavors: an
/// unresolvable credential (`InvalidSession`) and a valid session hitting a
/// route for the wrong lifecycle stage (`StatusMismatch`). Clients and tests
/// branch on the `code` field, never on message text.
#[derive(Debug)]
pub enum ApiError {
    // 400 Bad Request
    BadRequest(String),
    Validation {
        message: String,
        field_errors: HashMap<String, String>,
    },

    // 401 Unauthorized
    InvalidSession(String),
    StatusMismatch(String),

    // 404 Not Found
    NotFound(String),

    // 429 Too Many Requests
    RateLimited { retry_after: Duration },

    // 500 Internal Server Error
    StoreUnavailable(String),
    Internal(String),
}

impl ApiError {
    /// Get HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Validation { .. } => StatusCode::BAD_REQUEST,
            ApiError::InvalidSession(_) => StatusCode::UNAUTHORIZED,
            ApiError::StatusMismatch(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::StoreUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Validation { .. } => "VALIDATION_ERROR",
            ApiError::InvalidSession(_) => "INVALID_SESSION",
            ApiError::StatusMismatch(_) => "STATUS_MISMATCH",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::RateLimited { .. } => "TOO_MANY_REQUESTS",
            ApiError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            ApiError::Internal(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    /// Get client-safe error message
    pub fn message(&self) -> String {
        match self {
            ApiError::BadRequest(msg) => msg.clone(),
            ApiError::Validation { message, .. } => message.clone(),
            ApiError::InvalidSession(msg) => msg.clone(),
            ApiError::StatusMismatch(msg) => msg.clone(),
            ApiError::NotFound(msg) => msg.clone(),
            ApiError::RateLimited { retry_after } => {
                format!("Rate limit exceeded, retry after {}s", retry_secs(*retry_after))
            }
            // Store/internal details are logged, never sent to clients
            ApiError::StoreUnavailable(_) => "Service temporarily unavailable".to_string(),
            ApiError::Internal(_) => "An error occurred while processing your request".to_string(),
        }
    }

    /// Convert to JSON response body
    pub fn to_json(&self) -> Value {
        let mut body = json!({
            "error": true,
            "message": self.message(),
            "code": self.error_code(),
        });

        match self {
            ApiError::Validation { field_errors, .. } => {
                body["field_errors"] = json!(field_errors);
            }
            ApiError::RateLimited { retry_after } => {
                body["retry_after"] = json!(retry_secs(*retry_after));
            }
            _ => {}
        }

        body
    }
}

// Static constructor methods
impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn validation(
        message: impl Into<String>,
        field_errors: HashMap<String, String>,
    ) -> Self {
        ApiError::Validation {
            message: message.into(),
            field_errors,
        }
    }

    pub fn invalid_session(message: impl Into<String>) -> Self {
        ApiError::InvalidSession(message.into())
    }

    pub fn status_mismatch(message: impl Into<String>) -> Self {
        ApiError::StatusMismatch(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    pub fn store_unavailable(message: impl Into<String>) -> Self {
        ApiError::StoreUnavailable(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ApiError::Internal(message.into())
    }
}

fn retry_secs(retry_after: Duration) -> u64 {
    // Round up so "retry after 0s" can never be sent while still limited
    retry_after.as_secs().max(1)
}

impl From<RateLimited> for ApiError {
    fn from(err: RateLimited) -> Self {
        ApiError::RateLimited {
            retry_after: err.retry_after,
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound => {
                ApiError::invalid_session("Unknown or expired session token")
            }
            SessionError::Unavailable(msg) => {
                tracing::error!("session store unavailable: {}", msg);
                ApiError::store_unavailable(msg)
            }
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ApiError::not_found("not found"),
            other => {
                // Log the real error but return a generic message
                tracing::error!("database error: {}", other);
                ApiError::internal(other.to_string())
            }
        }
    }
}

// Standard error trait implementations
impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ApiError {}

// Automatic HTTP response conversion for Axum
impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = self.to_json();

        if let ApiError::RateLimited { retry_after } = &self {
            return (
                status,
                [("retry-after", retry_secs(*retry_after).to_string())],
                Json(body),
            )
                .into_response();
        }

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorization_failures_have_distinct_codes() {
        let invalid = ApiError::invalid_session("no token");
        let mismatch = ApiError::status_mismatch("wrong stage");

        assert_eq!(invalid.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(mismatch.status_code(), StatusCode::UNAUTHORIZED);
        assert_ne!(invalid.error_code(), mismatch.error_code());
    }

    #[test]
    fn validation_body_carries_field_errors() {
        let mut fields = HashMap::new();
        fields.insert("email".to_string(), "must be an email address".to_string());
        fields.insert("otp".to_string(), "must be 6 digits".to_string());

        let body = ApiError::validation("Invalid request", fields).to_json();
        assert_eq!(body["code"], "VALIDATION_ERROR");
        assert_eq!(body["field_errors"]["email"], "must be an email address");
        assert_eq!(body["field_errors"]["otp"], "must be 6 digits");
    }

    #[test]
    fn rate_limited_reports_whole_seconds() {
        let err = ApiError::RateLimited {
            retry_after: Duration::from_millis(200),
        };
        assert_eq!(err.to_json()["retry_after"], 1);
    }

    #[test]
    fn store_errors_do_not_leak_details() {
        let err = ApiError::store_unavailable("connection refused on 10.0.0.5:5432");
        assert!(!err.message().contains("10.0.0.5"));
    }
}
