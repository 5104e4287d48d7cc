//! Axum route handler for the usage dashboard.

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{Datelike, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::auth::current_user::CurrentUser;
use crate::billing::plans::Tier;
use crate::errors::AppError;
use crate::models::usage::{DailyUsageRow, EndpointUsageRow, UsageLogRow};
use crate::state::AppState;
use crate::usage::stats::{clamp_days, fill_missing_days, quota_remaining, window_start};

const TOP_ENDPOINTS: i64 = 20;
const RECENT_REQUESTS: i64 = 20;

#[derive(Debug, Deserialize)]
pub struct UsageParams {
    pub days: Option<i64>,
}

#[derive(Debug, FromRow)]
struct UsageTotals {
    total: i64,
    errors: i64,
    avg_latency_ms: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct UsageResponse {
    pub days: i64,
    pub tier: Tier,
    pub total_requests: i64,
    pub error_requests: i64,
    pub avg_latency_ms: f64,
    pub daily: Vec<DailyUsageRow>,
    pub by_endpoint: Vec<EndpointUsageRow>,
    pub recent: Vec<UsageLogRow>,
    pub month_to_date: i64,
    pub monthly_quota: Option<u64>,
    pub quota_remaining: Option<u64>,
}

/// GET /api/v1/usage?days=N
pub async fn handle_usage(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(params): Query<UsageParams>,
) -> Result<Json<UsageResponse>, AppError> {
    let days = clamp_days(params.days);
    let now = Utc::now();
    let today = now.date_naive();
    let start = window_start(today, days);
    let since = start.and_time(NaiveTime::MIN).and_utc();
    let month_start = today
        .with_day(1)
        .unwrap_or(today)
        .and_time(NaiveTime::MIN)
        .and_utc();

    let totals = sqlx::query_as::<_, UsageTotals>(
        r#"
        SELECT COUNT(*)::BIGINT AS total,
               COUNT(*) FILTER (WHERE status_code >= 400)::BIGINT AS errors,
               AVG(latency_ms)::FLOAT8 AS avg_latency_ms
        FROM usage_logs
        WHERE user_id = $1 AND created_at >= $2
        "#,
    )
    .bind(user.id)
    .bind(since)
    .fetch_one(&state.db)
    .await?;

    let daily_rows = sqlx::query_as::<_, DailyUsageRow>(
        r#"
        SELECT (created_at AT TIME ZONE 'UTC')::DATE AS day,
               COUNT(*)::BIGINT AS requests,
               COUNT(*) FILTER (WHERE status_code >= 400)::BIGINT AS errors
        FROM usage_logs
        WHERE user_id = $1 AND created_at >= $2
        GROUP BY day
        ORDER BY day
        "#,
    )
    .bind(user.id)
    .bind(since)
    .fetch_all(&state.db)
    .await?;

    let by_endpoint = sqlx::query_as::<_, EndpointUsageRow>(
        r#"
        SELECT endpoint,
               COUNT(*)::BIGINT AS requests,
               AVG(latency_ms)::FLOAT8 AS avg_latency_ms
        FROM usage_logs
        WHERE user_id = $1 AND created_at >= $2
        GROUP BY endpoint
        ORDER BY requests DESC, endpoint
        LIMIT $3
        "#,
    )
    .bind(user.id)
    .bind(since)
    .bind(TOP_ENDPOINTS)
    .fetch_all(&state.db)
    .await?;

    let recent = sqlx::query_as::<_, UsageLogRow>(
        "SELECT * FROM usage_logs WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2",
    )
    .bind(user.id)
    .bind(RECENT_REQUESTS)
    .fetch_all(&state.db)
    .await?;

    let month_to_date: i64 = sqlx::query_scalar(
        "SELECT COUNT(*)::BIGINT FROM usage_logs WHERE user_id = $1 AND created_at >= $2",
    )
    .bind(user.id)
    .bind(month_start)
    .fetch_one(&state.db)
    .await?;

    let monthly_quota = user.tier.limits().monthly_quota;
    Ok(Json(UsageResponse {
        days,
        tier: user.tier,
        total_requests: totals.total,
        error_requests: totals.errors,
        avg_latency_ms: round_latency(totals.avg_latency_ms.unwrap_or(0.0)),
        daily: fill_missing_days(daily_rows, start, today),
        by_endpoint,
        recent,
        month_to_date,
        monthly_quota,
        quota_remaining: quota_remaining(monthly_quota, u64::try_from(month_to_date).unwrap_or(0)),
    }))
}

fn round_latency(ms: f64) -> f64 {
    (ms * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_latency() {
        assert_eq!(round_latency(12.345), 12.3);
        assert_eq!(round_latency(0.0), 0.0);
    }
}
