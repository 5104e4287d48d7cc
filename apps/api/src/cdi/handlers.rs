//! Axum route handlers for the CDI assistant.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use sqlx::types::Json as SqlJson;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::auth::current_user::CurrentUser;
use crate::cdi::analyzer::analyze_note;
use crate::cdi::history::{delete_entry, get_entry, list_history, HistoryParams};
use crate::errors::AppError;
use crate::models::cdi::CdiQueryRow;
use crate::state::AppState;

const EXCERPT_CHARS: usize = 500;

#[derive(Debug, Deserialize, Validate)]
pub struct AnalyzeRequest {
    #[validate(length(min = 20, max = 20000, message = "must be 20 to 20000 characters"))]
    pub note_text: String,
    #[validate(length(max = 64))]
    pub encounter_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub items: Vec<CdiQueryRow>,
    pub total: i64,
}

/// POST /api/v1/cdi/analyze
pub async fn handle_analyze(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<AnalyzeRequest>,
) -> Result<(StatusCode, Json<CdiQueryRow>), AppError> {
    let req = AnalyzeRequest {
        note_text: req.note_text.trim().to_string(),
        encounter_type: req
            .encounter_type
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty()),
    };
    req.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    info!("Running CDI analysis for user {}", user.id);
    let analysis = analyze_note(
        &state.db,
        &state.llm,
        &req.note_text,
        req.encounter_type.as_deref(),
    )
    .await?;

    let row = sqlx::query_as::<_, CdiQueryRow>(
        r#"
        INSERT INTO cdi_queries (user_id, note_excerpt, encounter_type, result, raf_score, gap_count)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(user.id)
    .bind(note_excerpt(&req.note_text))
    .bind(&req.encounter_type)
    .bind(SqlJson(&analysis))
    .bind(analysis.raf.score)
    .bind(analysis.gap_count())
    .fetch_one(&state.db)
    .await?;

    Ok((StatusCode::CREATED, Json(row)))
}

/// GET /api/v1/cdi/history
pub async fn handle_history(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryResponse>, AppError> {
    let filter = params.normalize()?;
    let (items, total) = list_history(&state.db, user.id, &filter).await?;
    Ok(Json(HistoryResponse { items, total }))
}

/// GET /api/v1/cdi/history/:id
pub async fn handle_get_history_entry(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<CdiQueryRow>, AppError> {
    get_entry(&state.db, user.id, id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("CDI query {id} not found")))
}

/// DELETE /api/v1/cdi/history/:id
pub async fn handle_delete_history_entry(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    if delete_entry(&state.db, user.id, id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("CDI query {id} not found")))
    }
}

fn note_excerpt(note: &str) -> String {
    note.chars().take(EXCERPT_CHARS).collect()
}
