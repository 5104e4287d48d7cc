use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use uuid::Uuid;

use crate::auth::session::verify_session_token;
use crate::billing::plans::Tier;
use crate::errors::AppError;
use crate::models::user::User;
use crate::state::AppState;

/// The signed-in dashboard user, resolved from `Authorization: Bearer <jwt>`.
///
/// The row is re-read on every request so tier changes from billing
/// webhooks apply without waiting for a new token.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: Uuid,
    pub email: String,
    pub tier: Tier,
    pub stripe_customer_id: Option<String>,
}

impl From<User> for CurrentUser {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            tier: Tier::from_db(&user.tier),
            stripe_customer_id: user.stripe_customer_id,
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or(AppError::Unauthorized)?;
        let claims = verify_session_token(token, &state.config.jwt_secret)?;

        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(claims.sub)
            .fetch_optional(&state.db)
            .await?
            .ok_or(AppError::Unauthorized)?;

        if user.tier != claims.tier {
            tracing::debug!(
                "Tier for {} changed from {} to {} since token issue",
                claims.email,
                claims.tier,
                user.tier
            );
        }
        Ok(user.into())
    }
}

/// Returns the token from an `Authorization: Bearer ...` header, if any.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            v.strip_prefix("Bearer ")
                .or_else(|| v.strip_prefix("bearer "))
        })
        .map(str::trim)
        .filter(|t| !t.is_empty())
}
