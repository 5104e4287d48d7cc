//! JWT session token creation and verification.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::user::User;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: Uuid,
    pub email: String,
    pub tier: String,
    pub iat: i64,
    pub exp: i64,
}

impl SessionClaims {
    /// `expiry_hours` is bounded by `Config` at startup.
    pub fn new(user: &User, expiry_hours: i64) -> Self {
        let now = Utc::now();
        Self {
            sub: user.id,
            email: user.email.clone(),
            tier: user.tier.clone(),
            iat: now.timestamp(),
            exp: (now + Duration::hours(expiry_hours)).timestamp(),
        }
    }
}

pub fn create_session_token(
    user: &User,
    secret: &str,
    expiry_hours: i64,
) -> Result<String, AppError> {
    encode_claims(&SessionClaims::new(user, expiry_hours), secret)
}

fn encode_claims(claims: &SessionClaims, secret: &str) -> Result<String, AppError> {
    let key = EncodingKey::from_secret(secret.as_bytes());
    encode(&Header::default(), claims, &key)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("create JWT: {e}")))
}

/// Any decoding failure (bad signature, expiry, malformed token) is a 401.
pub fn verify_session_token(token: &str, secret: &str) -> Result<SessionClaims, AppError> {
    let key = DecodingKey::from_secret(secret.as_bytes());
    decode::<SessionClaims>(token, &key, &Validation::default())
        .map(|data| data.claims)
        .map_err(|e| {
            tracing::debug!("Rejected session token: {e}");
            AppError::Unauthorized
        })
}
