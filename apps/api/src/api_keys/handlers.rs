//! Axum route handlers for API key management (dashboard, JWT auth).

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::api_keys::{generate_key, hash_key, key_prefix, MAX_ACTIVE_KEYS};
use crate::auth::current_user::CurrentUser;
use crate::errors::AppError;
use crate::models::api_key::ApiKeyRow;
use crate::state::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateKeyRequest {
    #[validate(length(min = 1, max = 64, message = "must be 1 to 64 characters"))]
    pub name: String,
}

/// Creation response. `key` is never retrievable again.
#[derive(Debug, Serialize)]
pub struct CreatedKeyResponse {
    pub key: String,
    #[serde(flatten)]
    pub api_key: ApiKeyRow,
}

const LOCK_USER_SQL: &str = "SELECT id FROM users WHERE id = $1 FOR UPDATE";
const COUNT_ACTIVE_SQL: &str =
    "SELECT COUNT(*)::BIGINT FROM api_keys WHERE user_id = $1 AND revoked_at IS NULL";

/// POST /api/v1/keys
pub async fn handle_create_key(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<CreateKeyRequest>,
) -> Result<(StatusCode, Json<CreatedKeyResponse>), AppError> {
    let req = CreateKeyRequest {
        name: req.name.trim().to_string(),
    };
    req.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    // Locking the user row serializes concurrent creates for that user.
    let mut tx = state.db.begin().await?;
    sqlx::query(LOCK_USER_SQL)
        .bind(user.id)
        .execute(&mut *tx)
        .await?;

    let active: i64 = sqlx::query_scalar(COUNT_ACTIVE_SQL)
        .bind(user.id)
        .fetch_one(&mut *tx)
        .await?;
    if active >= MAX_ACTIVE_KEYS {
        return Err(AppError::Conflict(format!(
            "At most {MAX_ACTIVE_KEYS} active keys are allowed; revoke one first"
        )));
    }

    let key = generate_key();
    let api_key = sqlx::query_as::<_, ApiKeyRow>(
        r#"
        INSERT INTO api_keys (user_id, name, key_prefix, key_hash)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(user.id)
    .bind(&req.name)
    .bind(key_prefix(&key))
    .bind(hash_key(&key))
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;

    info!("User {} created API key {}", user.id, api_key.id);
    Ok((StatusCode::CREATED, Json(CreatedKeyResponse { key, api_key })))
}

/// GET /api/v1/keys
pub async fn handle_list_keys(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<Vec<ApiKeyRow>>, AppError> {
    let keys = sqlx::query_as::<_, ApiKeyRow>(
        r#"
        SELECT * FROM api_keys
        WHERE user_id = $1
        ORDER BY revoked_at IS NOT NULL, created_at DESC
        "#,
    )
    .bind(user.id)
    .fetch_all(&state.db)
    .await?;
    Ok(Json(keys))
}

/// DELETE /api/v1/keys/:id
///
/// Revoking an already revoked key keeps the first `revoked_at`.
pub async fn handle_revoke_key(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiKeyRow>, AppError> {
    let key = sqlx::query_as::<_, ApiKeyRow>(
        r#"
        UPDATE api_keys
        SET revoked_at = COALESCE(revoked_at, NOW())
        WHERE id = $1 AND user_id = $2
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(user.id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("API key {id} not found")))?;

    info!("User {} revoked API key {}", user.id, key.id);
    Ok(Json(key))
}
