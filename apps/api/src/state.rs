use std::sync::Arc;

use redis::Client as RedisClient;
use sqlx::PgPool;

use crate::auth::oauth::GoogleOAuthClient;
use crate::billing::stripe::StripeClient;
use crate::config::Config;
use crate::llm_client::LlmClient;
use crate::search::embedding::Embedder;
use crate::search::index::CodeIndex;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    /// Rate-limit counters and OAuth state.
    pub redis: RedisClient,
    pub llm: LlmClient,
    pub config: Config,
    /// `None` disables semantic search; requests fall back to keyword mode.
    pub embedder: Option<Arc<dyn Embedder>>,
    /// Built once at startup from `medical_codes.embedding`.
    pub code_index: Arc<CodeIndex>,
    pub stripe: Option<StripeClient>,
    pub google: Option<GoogleOAuthClient>,
}
