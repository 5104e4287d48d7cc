use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UsageLogRow {
    pub id: i64,
    pub user_id: Uuid,
    pub api_key_id: Option<Uuid>,
    pub endpoint: String,
    pub status_code: i32,
    pub latency_ms: i32,
    pub created_at: DateTime<Utc>,
}

/// One day of the dashboard series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct DailyUsageRow {
    pub day: NaiveDate,
    pub requests: i64,
    pub errors: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EndpointUsageRow {
    pub endpoint: String,
    pub requests: i64,
    pub avg_latency_ms: Option<f64>,
}
