//! Admin panel authentication: bcrypt-hashed password, HS256 bearer tokens.

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Request};
use axum::middleware::Next;
use axum::response::Response;
use chrono::Duration;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::errors::ApiError;
use crate::models::china_now;
use crate::state::AppState;

const ACCESS_TOKEN_HOURS: i64 = 24;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid password")]
    InvalidPassword,
    #[error(transparent)]
    Hash(#[from] bcrypt::BcryptError),
    #[error(transparent)]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

pub fn verify_password(plain: &str, hash: &str) -> bool {
    bcrypt::verify(plain, hash).unwrap_or(false)
}

pub fn hash_password(plain: &str) -> Result<String, AuthError> {
    Ok(bcrypt::hash(plain, bcrypt::DEFAULT_COST)?)
}

pub fn create_access_token(secret: &str) -> Result<String, AuthError> {
    let exp = (china_now() + Duration::hours(ACCESS_TOKEN_HOURS)).timestamp();
    let claims = Claims { sub: "admin".to_string(), exp };
    let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))?;
    Ok(token)
}

pub fn decode_access_token(token: &str, secret: &str) -> Option<Claims> {
    decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &Validation::default())
        .map(|data| data.claims)
        .ok()
}

/// Gates every `/admin/api/*` route except `/admin/api/login` behind a valid
/// bearer token.
pub async fn admin_auth_gate(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let path = request.uri().path();
    if path == "/admin/api/login" {
        return Ok(next.run(request).await);
    }

    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|raw| raw.strip_prefix("Bearer "));

    let Some(token) = token else {
        return Err(ApiError::Unauthorized);
    };
    if decode_access_token(token, &state.config.jwt_secret).is_none() {
        return Err(ApiError::Unauthorized);
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_round_trips_through_bcrypt() {
        let hash = hash_password("admin123").unwrap();
        assert!(verify_password("admin123", &hash));
        assert!(!verify_password("wrong", &hash));
    }

    #[test]
    fn token_round_trips_and_carries_subject() {
        let secret = "test-secret";
        let token = create_access_token(secret).unwrap();
        let claims = decode_access_token(&token, secret).unwrap();
        assert_eq!(claims.sub, "admin");
    }

    #[test]
    fn token_signed_with_different_secret_is_rejected() {
        let token = create_access_token("secret-a").unwrap();
        assert!(decode_access_token(&token, "secret-b").is_none());
    }
}
