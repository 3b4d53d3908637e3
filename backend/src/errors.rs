// backend/src/errors.rs
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Custom error type for the application.
///
/// The variants track the error taxonomy of the service: authentication and
/// quota failures terminate the session or turn, provider errors carry their
/// retry class, tool failures are never fatal (they are folded into tool
/// results upstream and should not normally reach a response), and
/// persistence failures distinguish fatal reads from warn-and-continue
/// writes.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Authentication required")]
    AuthRequired,

    #[error("Invalid or expired token")]
    AuthInvalid,

    #[error("Daily quota exhausted")]
    QuotaExhausted,

    #[error("LLM provider rate limited: {0}")]
    ProviderRateLimited(String),

    #[error("LLM provider connection error: {0}")]
    ProviderTransient(String),

    #[error("LLM provider error: {0}")]
    ProviderFatal(String),

    #[error("Tool failure: {0}")]
    ToolFailure(String),

    #[error("No document at {0}")]
    UpstreamNotFound(String),

    #[error("Ownership violation: {0}")]
    OwnershipViolation(String),

    #[error("Persistence read failure: {0}")]
    PersistenceRead(String),

    #[error("Persistence write failure: {0}")]
    PersistenceWrite(String),

    #[error("Upstream HTTP error: {0}")]
    HttpRequestError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Embedding error: {0}")]
    EmbeddingError(String),

    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Turn timed out")]
    TurnTimeout,

    #[error("Internal Server Error")]
    InternalServerError(#[from] anyhow::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] diesel::result::Error),

    #[error("Database pool error: {0}")]
    DbPoolError(String),

    #[error("Task join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),

    #[error("IO Error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Multipart error: {0}")]
    MultipartError(#[from] axum::extract::multipart::MultipartError),

    #[error("Invalid UUID: {0}")]
    UuidError(#[from] uuid::Error),
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        Self::HttpRequestError(err.to_string())
    }
}

impl AppError {
    /// Short classification tag surfaced to clients. Stable across releases;
    /// never leaks provider internals.
    pub fn classification(&self) -> &'static str {
        match self {
            Self::ConfigError(_) => "config",
            Self::AuthRequired | Self::AuthInvalid => "auth_invalid",
            Self::QuotaExhausted => "quota_exhausted",
            Self::ProviderRateLimited(_) => "provider_rate_limited",
            Self::ProviderTransient(_) => "provider_transient",
            Self::ProviderFatal(_) => "provider_error",
            Self::ToolFailure(_) => "tool_failure",
            Self::UpstreamNotFound(_) => "not_found",
            Self::OwnershipViolation(_) => "ownership_violation",
            Self::PersistenceRead(_) | Self::PersistenceWrite(_) => "persistence",
            Self::TurnTimeout => "timeout",
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Conflict(_) => "conflict",
            _ => "internal",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            Self::ConfigError(ref message) => {
                error!("Configuration error: {}", message);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Server configuration error".to_string(),
                )
            }
            Self::AuthRequired => (
                StatusCode::UNAUTHORIZED,
                "Authentication required".to_string(),
            ),
            Self::AuthInvalid => (
                StatusCode::UNAUTHORIZED,
                "Invalid or expired token".to_string(),
            ),
            Self::QuotaExhausted => (
                StatusCode::TOO_MANY_REQUESTS,
                "Daily quota exhausted".to_string(),
            ),
            Self::ProviderRateLimited(ref msg)
            | Self::ProviderTransient(ref msg)
            | Self::ProviderFatal(ref msg) => {
                error!("LLM provider error: {}", msg);
                (
                    StatusCode::BAD_GATEWAY,
                    "An error occurred with the language model".to_string(),
                )
            }
            Self::ToolFailure(ref msg) => {
                error!("Tool failure escaped the turn boundary: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
            Self::UpstreamNotFound(ref what) => {
                (StatusCode::NOT_FOUND, format!("No document at {what}"))
            }
            Self::OwnershipViolation(ref msg) => {
                error!("Ownership violation: {}", msg);
                (StatusCode::FORBIDDEN, "Forbidden".to_string())
            }
            Self::PersistenceRead(ref msg) | Self::PersistenceWrite(ref msg) => {
                error!("Persistence error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "A storage error occurred".to_string(),
                )
            }
            Self::HttpRequestError(ref msg) => {
                error!("Upstream HTTP error: {}", msg);
                (
                    StatusCode::BAD_GATEWAY,
                    "An upstream service is unavailable".to_string(),
                )
            }
            Self::SerializationError(ref msg) => {
                error!("Serialization error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
            Self::EmbeddingError(ref msg) => {
                error!("Embedding error: {}", msg);
                (
                    StatusCode::BAD_GATEWAY,
                    "An upstream service is unavailable".to_string(),
                )
            }
            Self::NotFound(ref message) => (StatusCode::NOT_FOUND, message.clone()),
            Self::BadRequest(ref message) => (StatusCode::BAD_REQUEST, message.clone()),
            Self::Conflict(ref message) => (StatusCode::CONFLICT, message.clone()),
            Self::TurnTimeout => (StatusCode::GATEWAY_TIMEOUT, "Turn timed out".to_string()),
            Self::InternalServerError(ref err) => {
                error!("Internal Server Error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
            Self::DatabaseError(ref err) => {
                error!("Database error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "A database error occurred".to_string(),
                )
            }
            Self::DbPoolError(ref msg) => {
                error!("DB pool error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Could not acquire database connection".to_string(),
                )
            }
            Self::JoinError(ref err) => {
                error!("Task join error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Background task failed".to_string(),
                )
            }
            Self::IoError(ref err) => {
                error!("IO error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An input/output error occurred".to_string(),
                )
            }
            Self::MultipartError(ref err) => (
                StatusCode::BAD_REQUEST,
                format!("Failed to process multipart form data: {err}"),
            ),
            Self::UuidError(ref err) => (
                StatusCode::BAD_REQUEST,
                format!("Invalid identifier format: {err}"),
            ),
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

pub type Result<T, E = AppError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use axum::response::Response;
    use serde_json::Value;

    async fn get_body_json(response: Response) -> Value {
        let body = response.into_body();
        let body_bytes = to_bytes(body, usize::MAX)
            .await
            .expect("Failed to read body bytes");
        serde_json::from_slice(&body_bytes).expect("Failed to parse JSON body")
    }

    #[tokio::test]
    async fn test_auth_invalid_response() {
        let response = AppError::AuthInvalid.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = get_body_json(response).await;
        assert_eq!(body["error"], "Invalid or expired token");
    }

    #[tokio::test]
    async fn test_quota_exhausted_response() {
        let response = AppError::QuotaExhausted.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_ownership_violation_is_forbidden_and_generic() {
        let response =
            AppError::OwnershipViolation("fingerprint mismatch on delete".into()).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = get_body_json(response).await;
        // The offending fingerprint must not leak into the response body.
        assert_eq!(body["error"], "Forbidden");
    }

    #[tokio::test]
    async fn test_provider_errors_do_not_leak_internals() {
        let response =
            AppError::ProviderFatal("api_key=sk-secret rejected by upstream".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = get_body_json(response).await;
        assert_eq!(body["error"], "An error occurred with the language model");
    }

    #[tokio::test]
    async fn test_not_found_response() {
        let msg = "Resource not found".to_string();
        let response = AppError::NotFound(msg.clone()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = get_body_json(response).await;
        assert_eq!(body["error"], msg);
    }

    #[test]
    fn test_classification_tags() {
        assert_eq!(AppError::TurnTimeout.classification(), "timeout");
        assert_eq!(AppError::QuotaExhausted.classification(), "quota_exhausted");
        assert_eq!(
            AppError::ProviderRateLimited("x".into()).classification(),
            "provider_rate_limited"
        );
        assert_eq!(
            AppError::OwnershipViolation("x".into()).classification(),
            "ownership_violation"
        );
    }
}
