pub mod health;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};

use crate::api_keys::middleware::require_api_key;
use crate::state::AppState;
use crate::{api_keys, auth, billing, cdi, search, usage};

pub fn build_router(state: AppState) -> Router {
    // Public lookup API: API-key auth, rate limited and metered.
    let public_api = Router::new()
        .route("/v1/codes/search", get(search::handlers::handle_search))
        .route(
            "/v1/codes/:system/:code",
            get(search::handlers::handle_get_code),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    Router::new()
        .route("/health", get(health::health_handler))
        // Accounts
        .route("/auth/signup", post(auth::handlers::handle_signup))
        .route("/auth/login", post(auth::handlers::handle_login))
        .route("/auth/me", get(auth::handlers::handle_me))
        .route(
            "/auth/oauth/google",
            get(auth::handlers::handle_google_start),
        )
        .route(
            "/auth/oauth/google/callback",
            get(auth::handlers::handle_google_callback),
        )
        // Dashboard: API keys
        .route(
            "/api/v1/keys",
            post(api_keys::handlers::handle_create_key).get(api_keys::handlers::handle_list_keys),
        )
        .route(
            "/api/v1/keys/:id",
            delete(api_keys::handlers::handle_revoke_key),
        )
        // Dashboard: usage
        .route("/api/v1/usage", get(usage::handlers::handle_usage))
        // Billing
        .route(
            "/api/v1/billing/checkout",
            post(billing::handlers::handle_checkout),
        )
        .route(
            "/api/v1/billing/portal",
            post(billing::handlers::handle_portal),
        )
        .route(
            "/api/v1/billing/subscription",
            get(billing::handlers::handle_get_subscription),
        )
        .route("/billing/webhook", post(billing::handlers::handle_webhook))
        // CDI assistant
        .route("/api/v1/cdi/analyze", post(cdi::handlers::handle_analyze))
        .route("/api/v1/cdi/history", get(cdi::handlers::handle_history))
        .route(
            "/api/v1/cdi/history/:id",
            get(cdi::handlers::handle_get_history_entry)
                .delete(cdi::handlers::handle_delete_history_entry),
        )
        .merge(public_api)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use sqlx::postgres::PgPoolOptions;
    use tower::ServiceExt;

    use super::*;
    use crate::config::Config;
    use crate::llm_client::LlmClient;
    use crate::search::index::CodeIndex;
    use crate::search::scoring::ScoreCalibration;

    // Nothing here touches Postgres or Redis: every request is rejected
    // before the first query.
    fn test_state() -> AppState {
        let config = Config {
            database_url: "postgres://localhost/medcode_test".to_string(),
            redis_url: "redis://127.0.0.1/".to_string(),
            jwt_secret: "test-secret".to_string(),
            jwt_expiry_hours: 1,
            anthropic_api_key: "test".to_string(),
            frontend_url: "http://localhost:3000".to_string(),
            port: 0,
            rust_log: "debug".to_string(),
            embedding: None,
            stripe: None,
            google: None,
            score_calibration: ScoreCalibration::default(),
        };
        AppState {
            db: PgPoolOptions::new()
                .connect_lazy(&config.database_url)
                .unwrap(),
            redis: redis::Client::open(config.redis_url.as_str()).unwrap(),
            llm: LlmClient::new(config.anthropic_api_key.clone()).unwrap(),
            embedder: None,
            code_index: Arc::new(CodeIndex::default()),
            stripe: None,
            google: None,
            config,
        }
    }

    async fn status_of(request: Request<Body>) -> StatusCode {
        build_router(test_state())
            .oneshot(request)
            .await
            .unwrap()
            .status()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_health_ok() {
        assert_eq!(status_of(get_request("/health")).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_public_api_requires_key() {
        assert_eq!(
            status_of(get_request("/v1/codes/search?q=asthma")).await,
            StatusCode::UNAUTHORIZED
        );
    }

    #[tokio::test]
    async fn test_public_api_rejects_malformed_key() {
        let request = Request::builder()
            .uri("/v1/codes/icd10/E11.9")
            .header("x-api-key", "not-a-key")
            .body(Body::empty())
            .unwrap();
        assert_eq!(status_of(request).await, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_dashboard_requires_session() {
        assert_eq!(
            status_of(get_request("/api/v1/keys")).await,
            StatusCode::UNAUTHORIZED
        );
        let request = Request::builder()
            .uri("/api/v1/usage")
            .header("authorization", "Bearer not.a.jwt")
            .body(Body::empty())
            .unwrap();
        assert_eq!(status_of(request).await, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unconfigured_integrations_return_501() {
        let webhook = Request::builder()
            .method("POST")
            .uri("/billing/webhook")
            .body(Body::from("{}"))
            .unwrap();
        assert_eq!(status_of(webhook).await, StatusCode::NOT_IMPLEMENTED);
        assert_eq!(
            status_of(get_request("/auth/oauth/google")).await,
            StatusCode::NOT_IMPLEMENTED
        );
    }
}
