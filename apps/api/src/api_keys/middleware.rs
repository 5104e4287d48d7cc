//! API key authentication for the public `/v1/*` routes.
//!
//! Resolves the key, enforces the tier's rate limit and monthly quota, then
//! meters the request once the handler has produced a response.

use std::time::Instant;

use axum::{
    extract::{MatchedPath, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::api_keys::{hash_key, looks_like_key};
use crate::auth::current_user::bearer_token;
use crate::billing::plans::Tier;
use crate::errors::AppError;
use crate::state::AppState;
use crate::usage::rate_limit::{enforce, LimitCheck};
use crate::usage::tracker::{spawn_record, UsageEvent};

const API_KEY_HEADER: &str = "x-api-key";
const LIMIT_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const REMAINING_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

/// Injected into request extensions for authenticated API calls.
#[derive(Debug, Clone)]
pub struct ApiKeyContext {
    pub key_id: Uuid,
    pub user_id: Uuid,
    pub tier: Tier,
}

/// Reads `x-api-key`, falling back to `Authorization: Bearer mc_...`.
pub fn extract_api_key(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .or_else(|| bearer_token(headers).filter(|t| t.starts_with("mc_")))
}

pub async fn require_api_key(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let started = Instant::now();

    let key = extract_api_key(request.headers()).ok_or(AppError::Unauthorized)?;
    if !looks_like_key(key) {
        return Err(AppError::Unauthorized);
    }
    let key_hash = hash_key(key);

    let (key_id, user_id, tier): (Uuid, Uuid, String) = sqlx::query_as(
        r#"
        SELECT k.id, k.user_id, u.tier
        FROM api_keys k
        JOIN users u ON u.id = k.user_id
        WHERE k.key_hash = $1 AND k.revoked_at IS NULL
        "#,
    )
    .bind(&key_hash)
    .fetch_optional(&state.db)
    .await?
    .ok_or(AppError::Unauthorized)?;

    let ctx = ApiKeyContext {
        key_id,
        user_id,
        tier: Tier::from_db(&tier),
    };
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let (limit, remaining, mut response) =
        match enforce(&state.redis, ctx.key_id, ctx.user_id, ctx.tier, Utc::now()).await {
            LimitCheck::Allowed { limit, remaining } => {
                request.extensions_mut().insert(ctx.clone());
                (limit, remaining, next.run(request).await)
            }
            LimitCheck::MinuteExceeded { limit } => {
                debug!("Key {} exceeded {limit} requests/minute", ctx.key_id);
                let response = AppError::RateLimited(format!(
                    "Rate limit of {limit} requests per minute exceeded"
                ))
                .into_response();
                (limit, 0, response)
            }
            LimitCheck::QuotaExceeded { quota } => {
                debug!("User {} exhausted monthly quota of {quota}", ctx.user_id);
                let response = AppError::RateLimited(format!(
                    "Monthly quota of {quota} requests exhausted; upgrade your plan for more"
                ))
                .into_response();
                (ctx.tier.limits().requests_per_minute, 0, response)
            }
        };

    let headers = response.headers_mut();
    headers.insert(LIMIT_HEADER, HeaderValue::from(limit));
    headers.insert(REMAINING_HEADER, HeaderValue::from(remaining));

    spawn_record(
        state.db.clone(),
        UsageEvent {
            user_id: ctx.user_id,
            api_key_id: ctx.key_id,
            endpoint,
            status_code: response.status().as_u16(),
            latency_ms: started.elapsed().as_millis(),
        },
    );

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::AUTHORIZATION;

    #[test]
    fn test_extract_api_key_prefers_header() {
        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, HeaderValue::from_static("mc_live_a"));
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer mc_live_b"));
        assert_eq!(extract_api_key(&headers), Some("mc_live_a"));
    }

    #[test]
    fn test_extract_api_key_from_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer mc_live_b"));
        assert_eq!(extract_api_key(&headers), Some("mc_live_b"));
    }

    #[test]
    fn test_extract_api_key_ignores_session_jwt() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer eyJhbGciOi.x.y"));
        assert_eq!(extract_api_key(&headers), None);
        assert_eq!(extract_api_key(&HeaderMap::new()), None);
    }
}
