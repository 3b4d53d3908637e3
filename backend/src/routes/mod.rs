// backend/src/routes/mod.rs

pub mod chat;
pub mod documents;
pub mod health;

use crate::errors::AppError;
use crate::state::AppState;
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;

/// The authenticated visitor for one request. Admin tokens bypass quota;
/// everyone else is identified by fingerprint.
#[derive(Debug, Clone)]
pub struct Visitor {
    pub fingerprint: Option<String>,
    pub is_admin: bool,
}

/// Validates the bearer token and extracts the visitor identity. Auth
/// failures terminate the request; they are never retried here.
pub fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Visitor, AppError> {
    let verifier = state
        .token_verifier
        .as_ref()
        .ok_or_else(|| AppError::ConfigError("JWT_SECRET not configured".to_string()))?;

    let token = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(AppError::AuthRequired)?;

    let claims = verifier.verify(token)?;
    if !claims.is_admin && claims.fingerprint.is_none() {
        return Err(AppError::AuthInvalid);
    }
    Ok(Visitor {
        fingerprint: claims.fingerprint,
        is_admin: claims.is_admin,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::test_state;
    use axum::http::HeaderValue;

    #[test]
    fn missing_token_is_auth_required() {
        let state = test_state();
        let headers = HeaderMap::new();
        assert!(matches!(
            authenticate(&state, &headers),
            Err(AppError::AuthRequired)
        ));
    }

    #[test]
    fn garbage_token_is_auth_invalid() {
        let state = test_state();
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer nonsense"));
        assert!(matches!(
            authenticate(&state, &headers),
            Err(AppError::AuthInvalid)
        ));
    }

    #[test]
    fn valid_token_yields_visitor() {
        let state = test_state();
        let token = crate::test_helpers::issue_token(&state, Some("fp-0123456789"), false);
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        let visitor = authenticate(&state, &headers).unwrap();
        assert_eq!(visitor.fingerprint.as_deref(), Some("fp-0123456789"));
        assert!(!visitor.is_admin);
    }
}
