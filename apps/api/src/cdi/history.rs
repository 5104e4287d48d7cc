use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Deserialize;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::cdi::CdiQueryRow;
use crate::search::keyword::escape_like;

const DEFAULT_LIMIT: i64 = 20;
const MAX_LIMIT: i64 = 100;
const MAX_SEARCH_CHARS: usize = 200;

/// Raw query-string parameters for `GET /api/v1/cdi/history`.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryParams {
    pub search: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub min_gaps: Option<i32>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Validated filter. Dates become a half-open `[since, until)` timestamp range.
/// A `to` on the last representable day leaves `until` open.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryFilter {
    pub search: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub min_gaps: Option<i32>,
    pub limit: i64,
    pub offset: i64,
}

impl HistoryParams {
    pub fn normalize(self) -> Result<HistoryFilter, AppError> {
        if let (Some(from), Some(to)) = (self.from, self.to) {
            if from > to {
                return Err(AppError::Validation("from must not be after to".to_string()));
            }
        }
        let search = self
            .search
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        if search
            .as_deref()
            .is_some_and(|s| s.chars().count() > MAX_SEARCH_CHARS)
        {
            return Err(AppError::Validation(format!(
                "search must be at most {MAX_SEARCH_CHARS} characters"
            )));
        }

        Ok(HistoryFilter {
            search,
            since: self.from.map(start_of_day),
            until: self.to.and_then(|d| d.succ_opt()).map(start_of_day),
            min_gaps: self.min_gaps.filter(|n| *n > 0),
            limit: self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
            offset: self.offset.unwrap_or(0).max(0),
        })
    }
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, user_id: Uuid, filter: &HistoryFilter) {
    qb.push(" WHERE user_id = ").push_bind(user_id);
    if let Some(search) = &filter.search {
        let pattern = format!("%{}%", escape_like(search));
        qb.push(" AND (note_excerpt ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR result->>'summary' ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(since) = filter.since {
        qb.push(" AND created_at >= ").push_bind(since);
    }
    if let Some(until) = filter.until {
        qb.push(" AND created_at < ").push_bind(until);
    }
    if let Some(min_gaps) = filter.min_gaps {
        qb.push(" AND gap_count >= ").push_bind(min_gaps);
    }
}

fn select_query(user_id: Uuid, filter: &HistoryFilter) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new("SELECT * FROM cdi_queries");
    push_filters(&mut qb, user_id, filter);
    qb.push(" ORDER BY created_at DESC, id LIMIT ")
        .push_bind(filter.limit)
        .push(" OFFSET ")
        .push_bind(filter.offset);
    qb
}

fn count_query(user_id: Uuid, filter: &HistoryFilter) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new("SELECT COUNT(*)::BIGINT FROM cdi_queries");
    push_filters(&mut qb, user_id, filter);
    qb
}

/// One page of the user's history plus the total matching row count.
pub async fn list_history(
    pool: &PgPool,
    user_id: Uuid,
    filter: &HistoryFilter,
) -> Result<(Vec<CdiQueryRow>, i64), AppError> {
    let items = select_query(user_id, filter)
        .build_query_as::<CdiQueryRow>()
        .fetch_all(pool)
        .await?;
    let total = count_query(user_id, filter)
        .build_query_scalar::<i64>()
        .fetch_one(pool)
        .await?;
    Ok((items, total))
}

pub async fn get_entry(
    pool: &PgPool,
    user_id: Uuid,
    id: Uuid,
) -> Result<Option<CdiQueryRow>, AppError> {
    Ok(
        sqlx::query_as::<_, CdiQueryRow>(
            "SELECT * FROM cdi_queries WHERE id = $1 AND user_id = $2",
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(pool)
        .await?,
    )
}

/// Returns whether a row was deleted.
pub async fn delete_entry(pool: &PgPool, user_id: Uuid, id: Uuid) -> Result<bool, AppError> {
    let result = sqlx::query("DELETE FROM cdi_queries WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_normalize_defaults() {
        let filter = HistoryParams::default().normalize().unwrap();
        assert_eq!(filter.limit, 20);
        assert_eq!(filter.offset, 0);
        assert_eq!(filter.search, None);
        assert_eq!(filter.since, None);
    }

    #[test]
    fn test_normalize_clamps_paging() {
        let filter = HistoryParams {
            limit: Some(1_000),
            offset: Some(-5),
            ..Default::default()
        }
        .normalize()
        .unwrap();
        assert_eq!(filter.limit, 100);
        assert_eq!(filter.offset, 0);

        let filter = HistoryParams {
            limit: Some(0),
            ..Default::default()
        }
        .normalize()
        .unwrap();
        assert_eq!(filter.limit, 1);
    }

    #[test]
    fn test_normalize_to_date_is_inclusive() {
        let filter = HistoryParams {
            from: Some(date(2025, 2, 1)),
            to: Some(date(2025, 2, 28)),
            ..Default::default()
        }
        .normalize()
        .unwrap();
        assert_eq!(filter.since.unwrap().to_rfc3339(), "2025-02-01T00:00:00+00:00");
        assert_eq!(filter.until.unwrap().to_rfc3339(), "2025-03-01T00:00:00+00:00");
    }

    #[test]
    fn test_normalize_last_representable_day_has_no_upper_bound() {
        let params = HistoryParams {
            from: Some(date(2025, 1, 1)),
            to: Some(NaiveDate::MAX),
            ..Default::default()
        };
        let filter = params.normalize().unwrap();
        assert_eq!(filter.until, None);
        assert!(filter.since.is_some());
        assert!(!select_query(Uuid::nil(), &filter).sql().contains("created_at <"));
    }

    #[test]
    fn test_normalize_rejects_inverted_range() {
        let result = HistoryParams {
            from: Some(date(2025, 3, 2)),
            to: Some(date(2025, 3, 1)),
            ..Default::default()
        }
        .normalize();
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[test]
    fn test_normalize_blank_search_and_zero_gaps_dropped() {
        let filter = HistoryParams {
            search: Some("   ".to_string()),
            min_gaps: Some(0),
            ..Default::default()
        }
        .normalize()
        .unwrap();
        assert_eq!(filter.search, None);
        assert_eq!(filter.min_gaps, None);
    }

    #[test]
    fn test_select_query_includes_only_requested_filters() {
        let filter = HistoryParams {
            search: Some("sepsis".to_string()),
            min_gaps: Some(2),
            ..Default::default()
        }
        .normalize()
        .unwrap();
        let qb = select_query(Uuid::nil(), &filter);
        let sql = qb.sql();
        assert!(sql.starts_with("SELECT * FROM cdi_queries WHERE user_id = $1"));
        assert!(sql.contains("note_excerpt ILIKE $2 OR result->>'summary' ILIKE $3"));
        assert!(sql.contains("gap_count >= $4"));
        assert!(!sql.contains("created_at >="));
        assert!(sql.ends_with("LIMIT $5 OFFSET $6"));
    }

    #[test]
    fn test_count_query_has_no_paging() {
        let filter = HistoryParams::default().normalize().unwrap();
        let qb = count_query(Uuid::nil(), &filter);
        assert_eq!(
            qb.sql(),
            "SELECT COUNT(*)::BIGINT FROM cdi_queries WHERE user_id = $1"
        );
    }
}
