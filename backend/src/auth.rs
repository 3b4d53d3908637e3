// backend/src/auth.rs
//
// Token verification for the visitor-fingerprint scheme. Issuance (and the
// fingerprinting itself) happens in a separate service; this side only
// validates the opaque bearer and extracts the claims the turn needs.

use crate::errors::AppError;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub fingerprint: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
    pub exp: i64,
}

#[derive(Clone)]
pub struct TokenVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(jwt_secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(jwt_secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Decodes and validates a bearer token. Expired or malformed tokens are
    /// rejected; auth failures are never retried.
    pub fn verify(&self, token: &str) -> Result<Claims, AppError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|_| AppError::AuthInvalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};

    fn token(secret: &str, claims: &Claims) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn valid_token_yields_claims() {
        let verifier = TokenVerifier::new("secret");
        let claims = Claims {
            fingerprint: Some("fp-0123456789".into()),
            is_admin: false,
            exp: chrono::Utc::now().timestamp() + 3600,
        };
        let decoded = verifier.verify(&token("secret", &claims)).unwrap();
        assert_eq!(decoded.fingerprint.as_deref(), Some("fp-0123456789"));
        assert!(!decoded.is_admin);
    }

    #[test]
    fn wrong_secret_and_expired_tokens_are_rejected() {
        let verifier = TokenVerifier::new("secret");
        let claims = Claims {
            fingerprint: Some("fp-0123456789".into()),
            is_admin: false,
            exp: chrono::Utc::now().timestamp() + 3600,
        };
        assert!(matches!(
            verifier.verify(&token("other", &claims)),
            Err(AppError::AuthInvalid)
        ));

        let expired = Claims {
            exp: chrono::Utc::now().timestamp() - 3600,
            ..claims
        };
        assert!(matches!(
            verifier.verify(&token("secret", &expired)),
            Err(AppError::AuthInvalid)
        ));
    }
}
