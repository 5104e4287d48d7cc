use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::state::AppState;

/// GET /health
/// Service version plus which optional integrations are active.
pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "medcode-api",
        "semantic_search": state.embedder.is_some() && !state.code_index.is_empty(),
        "indexed_codes": state.code_index.len(),
        "billing": state.stripe.is_some(),
        "google_oauth": state.google.is_some(),
    }))
}
