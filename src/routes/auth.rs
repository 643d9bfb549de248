use actix_web::http::header::AUTHORIZATION;
use actix_web::HttpRequest;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing Authorization header")]
    MissingHeader,

    #[error("expected Bearer token")]
    NotBearer,

    #[error("invalid token: {0}")]
    InvalidToken(String),
}

/// Claims the submission executor signs its callbacks with
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

/// Validate an HS256 bearer token, returning its subject
pub fn verify_bearer(req: &HttpRequest, secret: &str) -> Result<String, AuthError> {
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or(AuthError::MissingHeader)?;

    let token = header.strip_prefix("Bearer ").ok_or(AuthError::NotBearer)?;

    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|err| AuthError::InvalidToken(err.to_string()))?;

    Ok(data.claims.sub)
}
