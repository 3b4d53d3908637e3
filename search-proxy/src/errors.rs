// search-proxy/src/errors.rs

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Ownership(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("{0} not configured")]
    NotConfigured(&'static str),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Self::Ownership(msg) => {
                // Ownership violations are surfaced, never silently dropped.
                error!("Ownership violation: {msg}");
                (StatusCode::FORBIDDEN, msg.clone())
            }
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            Self::Upstream(msg) => {
                error!("Upstream error: {msg}");
                (StatusCode::BAD_GATEWAY, "Search backend error".to_string())
            }
            Self::NotConfigured(what) => {
                error!("{what} not configured");
                (StatusCode::SERVICE_UNAVAILABLE, format!("{what} not configured"))
            }
            Self::Internal(msg) => {
                error!("Internal error: {msg}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal error".to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub type Result<T, E = ProxyError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            ProxyError::Validation("bad".into()).into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ProxyError::Ownership("nope".into()).into_response().status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ProxyError::NotFound("gone".into()).into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ProxyError::Upstream("boom".into()).into_response().status(),
            StatusCode::BAD_GATEWAY
        );
    }
}
