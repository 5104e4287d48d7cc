use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CdiQueryRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub note_excerpt: String,
    pub encounter_type: Option<String>,
    pub result: Value,
    pub raf_score: f64,
    pub gap_count: i32,
    pub created_at: DateTime<Utc>,
}
