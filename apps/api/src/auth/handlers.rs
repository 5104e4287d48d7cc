//! Axum route handlers for account signup, login and Google OAuth.

use axum::{
    extract::{Query, State},
    response::Redirect,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

use crate::auth::current_user::CurrentUser;
use crate::auth::oauth::{generate_state, state_key, GoogleUserInfo, STATE_TTL_SECS};
use crate::auth::password::{hash_password_blocking, is_strong_enough, verify_password_blocking};
use crate::auth::session::create_session_token;
use crate::errors::AppError;
use crate::models::user::User;
use crate::state::AppState;

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Validate)]
pub struct SignupRequest {
    #[validate(email(message = "must be a valid email address"))]
    pub email: String,
    #[validate(length(min = 8, max = 128, message = "must be 8 to 128 characters"))]
    pub password: String,
    #[validate(length(max = 200))]
    pub full_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: User,
}

#[derive(Debug, Deserialize)]
pub struct OAuthCallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /auth/signup
pub async fn handle_signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    req.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;
    if !is_strong_enough(&req.password) {
        return Err(AppError::Validation(
            "password must contain at least one letter and one digit".to_string(),
        ));
    }

    let email = normalize_email(&req.email);
    let password_hash = hash_password_blocking(req.password).await?;
    let full_name = req
        .full_name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty());

    let user = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (email, password_hash, full_name)
        VALUES ($1, $2, $3)
        ON CONFLICT (email) DO NOTHING
        RETURNING *
        "#,
    )
    .bind(&email)
    .bind(&password_hash)
    .bind(full_name)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::Conflict("An account with this email already exists".to_string()))?;

    info!("Created account {} via email signup", user.id);
    let token = create_session_token(&user, &state.config.jwt_secret, state.config.jwt_expiry_hours)?;
    Ok(Json(AuthResponse { token, user }))
}

/// POST /auth/login
///
/// Unknown email, wrong password and OAuth-only accounts all return the same 401.
pub async fn handle_login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let email = normalize_email(&req.email);
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
        .bind(&email)
        .fetch_optional(&state.db)
        .await?
        .ok_or(AppError::Unauthorized)?;

    let hash = user.password_hash.clone().ok_or(AppError::Unauthorized)?;
    if !verify_password_blocking(req.password, hash).await? {
        return Err(AppError::Unauthorized);
    }

    let token = create_session_token(&user, &state.config.jwt_secret, state.config.jwt_expiry_hours)?;
    Ok(Json(AuthResponse { token, user }))
}

/// GET /auth/me
pub async fn handle_me(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<Json<User>, AppError> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(current.id)
        .fetch_optional(&state.db)
        .await?
        .ok_or(AppError::Unauthorized)?;
    Ok(Json(user))
}

/// GET /auth/oauth/google
pub async fn handle_google_start(State(state): State<AppState>) -> Result<Redirect, AppError> {
    let google = state
        .google
        .as_ref()
        .ok_or(AppError::NotConfigured("Google sign-in"))?;

    let oauth_state = generate_state();
    let mut conn = state.redis.get_multiplexed_async_connection().await?;
    let _: () = redis::cmd("SET")
        .arg(state_key(&oauth_state))
        .arg("1")
        .arg("EX")
        .arg(STATE_TTL_SECS)
        .query_async(&mut conn)
        .await?;

    Ok(Redirect::to(&google.authorize_url(&oauth_state)?))
}

/// GET /auth/oauth/google/callback
pub async fn handle_google_callback(
    State(state): State<AppState>,
    Query(params): Query<OAuthCallbackParams>,
) -> Result<Redirect, AppError> {
    let google = state
        .google
        .as_ref()
        .ok_or(AppError::NotConfigured("Google sign-in"))?;

    if let Some(error) = params.error {
        info!("Google sign-in cancelled: {error}");
        return Ok(Redirect::to(&format!(
            "{}/login?error=oauth_denied",
            state.config.frontend_url.trim_end_matches('/')
        )));
    }

    let (code, oauth_state) = match (params.code, params.state) {
        (Some(code), Some(s)) => (code, s),
        _ => return Err(AppError::Validation("code and state are required".to_string())),
    };

    let mut conn = state.redis.get_multiplexed_async_connection().await?;
    let stored: Option<String> = redis::cmd("GETDEL")
        .arg(state_key(&oauth_state))
        .query_async(&mut conn)
        .await?;
    if stored.is_none() {
        return Err(AppError::OAuth("unknown or already used state".to_string()));
    }

    let info = google.exchange_code(&code).await?;
    let user = upsert_oauth_user(&state, &info).await?;
    info!("User {} signed in with Google", user.id);

    let token = create_session_token(&user, &state.config.jwt_secret, state.config.jwt_expiry_hours)?;
    Ok(Redirect::to(&frontend_callback_url(
        &state.config.frontend_url,
        &token,
    )))
}

/// Links a Google identity to an existing email account, or creates one.
async fn upsert_oauth_user(state: &AppState, info: &GoogleUserInfo) -> Result<User, AppError> {
    Ok(sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (email, full_name, oauth_provider, oauth_subject)
        VALUES ($1, $2, 'google', $3)
        ON CONFLICT (email) DO UPDATE SET
            oauth_provider = COALESCE(users.oauth_provider, EXCLUDED.oauth_provider),
            oauth_subject  = COALESCE(users.oauth_subject, EXCLUDED.oauth_subject),
            full_name      = COALESCE(users.full_name, EXCLUDED.full_name),
            updated_at     = NOW()
        RETURNING *
        "#,
    )
    .bind(normalize_email(&info.email))
    .bind(&info.name)
    .bind(&info.sub)
    .fetch_one(&state.db)
    .await?)
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// The token travels in the fragment so it never reaches server logs.
fn frontend_callback_url(frontend_url: &str, token: &str) -> String {
    format!(
        "{}/auth/callback#token={}",
        frontend_url.trim_end_matches('/'),
        token
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Coder@Clinic.ORG "), "coder@clinic.org");
    }

    #[test]
    fn test_frontend_callback_url() {
        assert_eq!(
            frontend_callback_url("https://app.example.com/", "abc"),
            "https://app.example.com/auth/callback#token=abc"
        );
    }

    #[test]
    fn test_signup_validation() {
        let ok = SignupRequest {
            email: "coder@clinic.org".to_string(),
            password: "longenough1".to_string(),
            full_name: None,
        };
        assert!(ok.validate().is_ok());

        let bad_email = SignupRequest {
            email: "not-an-email".to_string(),
            ..ok
        };
        assert!(bad_email.validate().is_err());

        let short = SignupRequest {
            email: "coder@clinic.org".to_string(),
            password: "a1".to_string(),
            full_name: None,
        };
        assert!(short.validate().is_err());
    }
}
