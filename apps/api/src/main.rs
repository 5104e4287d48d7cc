mod api_keys;
mod auth;
mod billing;
mod cdi;
mod config;
mod db;
mod errors;
mod llm_client;
mod models;
mod routes;
mod search;
mod state;
mod usage;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::auth::oauth::GoogleOAuthClient;
use crate::billing::stripe::StripeClient;
use crate::config::Config;
use crate::db::create_pool;
use crate::llm_client::LlmClient;
use crate::routes::build_router;
use crate::search::embedding::{Embedder, HttpEmbedder};
use crate::search::index::CodeIndex;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Configuration first: startup fails on missing required env vars
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_CRATE_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting MedCode API v{}", env!("CARGO_PKG_VERSION"));

    let db = create_pool(&config.database_url).await?;

    let redis = redis::Client::open(config.redis_url.clone())?;
    info!("Redis client initialized");

    let llm = LlmClient::new(config.anthropic_api_key.clone())?;
    info!("LLM client initialized (model: {})", llm_client::MODEL);

    let embedder: Option<Arc<dyn Embedder>> = match &config.embedding {
        Some(embedding) => {
            let embedder = HttpEmbedder::new(embedding)?;
            info!("Semantic search enabled (model: {})", embedder.model());
            Some(Arc::new(embedder))
        }
        None => {
            warn!("EMBEDDING_API_KEY not set, semantic search falls back to keyword mode");
            None
        }
    };

    let code_index = Arc::new(CodeIndex::load(&db).await?);

    let stripe = config.stripe.clone().map(StripeClient::new);
    if stripe.is_none() {
        info!("Stripe not configured, billing endpoints disabled");
    }

    let google = config.google.clone().map(GoogleOAuthClient::new).transpose()?;
    if google.is_none() {
        info!("Google OAuth not configured, sign-in with Google disabled");
    }

    let state = AppState {
        db,
        redis,
        llm,
        config: config.clone(),
        embedder,
        code_index,
        stripe,
        google,
    };

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
