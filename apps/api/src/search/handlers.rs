//! Axum route handlers for the public code lookup API (`/v1/codes/*`).
//! Callers are authenticated by `api_keys::middleware::require_api_key`.

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::api_keys::middleware::ApiKeyContext;
use crate::errors::AppError;
use crate::models::code::{CodeSystem, MedicalCodeRow};
use crate::search::keyword::{find_code, keyword_search};
use crate::search::scoring::ScoreBreakdown;
use crate::search::{semantic_search, CodeHit, SearchMode};
use crate::state::AppState;

const MAX_QUERY_CHARS: usize = 200;
const DEFAULT_LIMIT: usize = 10;
const MAX_LIMIT: usize = 50;

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub q: String,
    pub system: Option<String>,
    pub limit: Option<usize>,
    pub mode: Option<SearchMode>,
    #[serde(default)]
    pub explain: bool,
}

#[derive(Debug, Serialize)]
pub struct SearchResult {
    #[serde(flatten)]
    pub hit: CodeHit,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<ScoreBreakdown>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub mode: SearchMode,
    pub total: usize,
    pub results: Vec<SearchResult>,
}

/// GET /v1/codes/search
///
/// Semantic mode falls back to keyword mode when no embedder is configured,
/// the index is empty, or embedding fails (including a vector whose length
/// does not match the index). `mode` in the response
/// is the mode actually used.
pub async fn handle_search(
    State(state): State<AppState>,
    Extension(caller): Extension<ApiKeyContext>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, AppError> {
    let query = validate_query(&params.q)?;
    let system = parse_system(params.system.as_deref())?;
    let limit = resolve_limit(params.limit);
    let requested = params.mode.unwrap_or_default();
    let calibration = &state.config.score_calibration;

    let semantic = match (&state.embedder, requested) {
        (Some(embedder), SearchMode::Semantic) if !state.code_index.is_empty() => {
            match semantic_search(
                embedder.as_ref(),
                &state.code_index,
                &query,
                system,
                limit,
                calibration,
            )
            .await
            {
                Ok(hits) => Some(hits),
                Err(e) => {
                    warn!("Semantic search failed, falling back to keyword search: {e}");
                    None
                }
            }
        }
        _ => None,
    };

    let (mode, hits) = match semantic {
        Some(hits) => (SearchMode::Semantic, hits),
        None => (
            SearchMode::Keyword,
            keyword_search(&state.db, &query, system, limit, calibration).await?,
        ),
    };

    debug!(
        "User {} ({}) searched {:?} in {:?} mode: {} hits",
        caller.user_id,
        caller.tier.as_str(),
        query,
        mode,
        hits.len()
    );

    let results: Vec<SearchResult> = hits
        .into_iter()
        .map(|hit| SearchResult {
            explanation: params.explain.then(|| hit.breakdown.clone()),
            hit,
        })
        .collect();

    Ok(Json(SearchResponse {
        query,
        mode,
        total: results.len(),
        results,
    }))
}

/// GET /v1/codes/:system/:code
pub async fn handle_get_code(
    State(state): State<AppState>,
    Path((system, code)): Path<(String, String)>,
) -> Result<Json<MedicalCodeRow>, AppError> {
    let system = CodeSystem::parse(&system)
        .ok_or_else(|| AppError::Validation(format!("Unknown code system '{system}'")))?;
    let row = find_code(&state.db, system, &code)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Code {code} not found in {}", system.as_str())))?;
    Ok(Json(row))
}

fn validate_query(q: &str) -> Result<String, AppError> {
    let trimmed = q.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation("q cannot be empty".to_string()));
    }
    if trimmed.chars().count() > MAX_QUERY_CHARS {
        return Err(AppError::Validation(format!(
            "q must be at most {MAX_QUERY_CHARS} characters"
        )));
    }
    Ok(trimmed.to_string())
}

fn parse_system(system: Option<&str>) -> Result<Option<CodeSystem>, AppError> {
    match system {
        None => Ok(None),
        Some(s) if s.trim().is_empty() => Ok(None),
        Some(s) => CodeSystem::parse(s)
            .map(Some)
            .ok_or_else(|| AppError::Validation(format!("Unknown code system '{s}'"))),
    }
}

fn resolve_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_query_trims() {
        assert_eq!(validate_query("  diabetes ").unwrap(), "diabetes");
    }

    #[test]
    fn test_validate_query_rejects_empty_and_long() {
        assert!(matches!(validate_query("   "), Err(AppError::Validation(_))));
        let long = "a".repeat(MAX_QUERY_CHARS + 1);
        assert!(matches!(validate_query(&long), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_resolve_limit_clamps() {
        assert_eq!(resolve_limit(None), DEFAULT_LIMIT);
        assert_eq!(resolve_limit(Some(0)), 1);
        assert_eq!(resolve_limit(Some(500)), MAX_LIMIT);
        assert_eq!(resolve_limit(Some(7)), 7);
    }

    #[test]
    fn test_parse_system() {
        assert_eq!(parse_system(None).unwrap(), None);
        assert_eq!(parse_system(Some("")).unwrap(), None);
        assert_eq!(parse_system(Some("cpt")).unwrap(), Some(CodeSystem::Cpt));
        assert!(parse_system(Some("loinc")).is_err());
    }

    #[test]
    fn test_search_params_deserialize() {
        let params: SearchParams =
            serde_json::from_str(r#"{"q":"asthma","mode":"keyword","explain":true}"#).unwrap();
        assert_eq!(params.mode, Some(SearchMode::Keyword));
        assert!(params.explain);
        assert_eq!(params.limit, None);
    }
}
