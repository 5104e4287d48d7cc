use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

/// One metered API request.
#[derive(Debug, Clone)]
pub struct UsageEvent {
    pub user_id: Uuid,
    pub api_key_id: Uuid,
    pub endpoint: String,
    pub status_code: u16,
    pub latency_ms: u128,
}

/// Writes the usage row and bumps the key's `last_used_at`.
pub async fn record_usage(pool: &PgPool, event: &UsageEvent) -> Result<(), sqlx::Error> {
    let latency_ms = i32::try_from(event.latency_ms).unwrap_or(i32::MAX);

    sqlx::query(
        r#"
        INSERT INTO usage_logs (user_id, api_key_id, endpoint, status_code, latency_ms)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(event.user_id)
    .bind(event.api_key_id)
    .bind(&event.endpoint)
    .bind(i32::from(event.status_code))
    .bind(latency_ms)
    .execute(pool)
    .await?;

    sqlx::query("UPDATE api_keys SET last_used_at = NOW() WHERE id = $1")
        .bind(event.api_key_id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Fire-and-forget: the response is never delayed by metering.
pub fn spawn_record(pool: PgPool, event: UsageEvent) {
    tokio::spawn(async move {
        if let Err(e) = record_usage(&pool, &event).await {
            warn!(
                "Failed to record usage for key {} on {}: {e}",
                event.api_key_id, event.endpoint
            );
        }
    });
}
