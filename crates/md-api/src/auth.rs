//! Bearer token authentication
//!
//! Tokens are HS256 JWTs carrying the operator's `{id, email}`. The
//! `Authenticated` extractor rejects missing or invalid tokens with 401 and
//! hands the verified `Actor` to handlers.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{FromRef, FromRequestParts};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use md_common::{Actor, User};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ApiError;

/// JWT claims carried by bearer tokens.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Operator user id
    pub sub: i64,
    pub email: String,
    pub iat: i64,
    pub exp: i64,
}

/// Signing and verification keys derived from `JWT_SECRET`.
pub struct AuthKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    expires_in: Duration,
}

impl AuthKeys {
    pub fn from_secret(secret: &str, expires_in: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            expires_in,
        }
    }

    /// Issue a token for an operator.
    pub fn issue_token(&self, user: &User) -> Result<String, ApiError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user.id,
            email: user.email.clone(),
            iat: now.timestamp(),
            exp: (now + chrono::Duration::seconds(self.expires_in.as_secs() as i64)).timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| ApiError::internal(format!("failed to sign token: {e}")))
    }

    /// Verify a token and extract the actor it carries.
    pub fn verify(&self, token: &str) -> Result<Actor, ApiError> {
        let validation = Validation::new(Algorithm::HS256);
        let data = decode::<Claims>(token, &self.decoding, &validation)
            .map_err(|e| ApiError::unauthorized(format!("invalid token: {e}")))?;

        debug!(sub = data.claims.sub, "Bearer token verified");
        Ok(Actor::new(data.claims.sub, data.claims.email))
    }
}

/// Extractor yielding the authenticated actor.
pub struct Authenticated(pub Actor);

impl<S> FromRequestParts<S> for Authenticated
where
    Arc<AuthKeys>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let keys = Arc::<AuthKeys>::from_ref(state);

        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| ApiError::unauthorized("missing Authorization header"))?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError::unauthorized("expected Bearer token"))?;
        if token.is_empty() {
            return Err(ApiError::unauthorized("empty Bearer token"));
        }

        let actor = keys.verify(token)?;
        Ok(Authenticated(actor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn user(id: i64, email: &str) -> User {
        User {
            id,
            email: email.to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_token_roundtrip() {
        let keys = AuthKeys::from_secret("test-secret", Duration::from_secs(3600));
        let token = keys.issue_token(&user(7, "ops@example.com")).unwrap();

        let actor = keys.verify(&token).unwrap();
        assert_eq!(actor.id, 7);
        assert_eq!(actor.email, "ops@example.com");
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let keys = AuthKeys::from_secret("secret-a", Duration::from_secs(3600));
        let token = keys.issue_token(&user(7, "ops@example.com")).unwrap();

        let other = AuthKeys::from_secret("secret-b", Duration::from_secs(3600));
        assert!(matches!(
            other.verify(&token),
            Err(ApiError::Unauthorized { .. })
        ));
    }

    #[test]
    fn test_garbage_token_is_rejected() {
        let keys = AuthKeys::from_secret("secret", Duration::from_secs(3600));
        assert!(matches!(
            keys.verify("not-a-jwt"),
            Err(ApiError::Unauthorized { .. })
        ));
    }
}
