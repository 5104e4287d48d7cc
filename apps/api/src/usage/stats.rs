use std::collections::HashMap;

use chrono::{Duration, NaiveDate};

use crate::models::usage::DailyUsageRow;

pub const DEFAULT_DAYS: i64 = 30;
pub const MAX_DAYS: i64 = 90;

pub fn clamp_days(days: Option<i64>) -> i64 {
    days.unwrap_or(DEFAULT_DAYS).clamp(1, MAX_DAYS)
}

/// First day of a window of `days` days ending on (and including) `today`.
pub fn window_start(today: NaiveDate, days: i64) -> NaiveDate {
    today - Duration::days(days - 1)
}

/// Expands the sparse per-day aggregate into one row per day in `start..=end`.
pub fn fill_missing_days(
    rows: Vec<DailyUsageRow>,
    start: NaiveDate,
    end: NaiveDate,
) -> Vec<DailyUsageRow> {
    let by_day: HashMap<NaiveDate, DailyUsageRow> =
        rows.into_iter().map(|r| (r.day, r)).collect();

    start
        .iter_days()
        .take_while(|day| *day <= end)
        .map(|day| {
            by_day.get(&day).cloned().unwrap_or(DailyUsageRow {
                day,
                requests: 0,
                errors: 0,
            })
        })
        .collect()
}

/// `None` when the tier has no monthly cap.
pub fn quota_remaining(monthly_quota: Option<u64>, used: u64) -> Option<u64> {
    monthly_quota.map(|quota| quota.saturating_sub(used))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, d).unwrap()
    }

    #[test]
    fn test_clamp_days() {
        assert_eq!(clamp_days(None), 30);
        assert_eq!(clamp_days(Some(0)), 1);
        assert_eq!(clamp_days(Some(365)), 90);
        assert_eq!(clamp_days(Some(7)), 7);
    }

    #[test]
    fn test_window_start_includes_today() {
        assert_eq!(window_start(day(10), 1), day(10));
        assert_eq!(window_start(day(10), 7), day(4));
    }

    #[test]
    fn test_fill_missing_days_zero_fills_gaps() {
        let rows = vec![
            DailyUsageRow {
                day: day(2),
                requests: 5,
                errors: 1,
            },
            DailyUsageRow {
                day: day(4),
                requests: 3,
                errors: 0,
            },
        ];
        let filled = fill_missing_days(rows, day(1), day(5));
        assert_eq!(filled.len(), 5);
        assert_eq!(filled[0].requests, 0);
        assert_eq!(filled[1].requests, 5);
        assert_eq!(filled[1].errors, 1);
        assert_eq!(filled[2].day, day(3));
        assert_eq!(filled[2].requests, 0);
        assert_eq!(filled[3].requests, 3);
        assert_eq!(filled[4].day, day(5));
    }

    #[test]
    fn test_fill_missing_days_ignores_rows_outside_window() {
        let rows = vec![DailyUsageRow {
            day: day(20),
            requests: 9,
            errors: 0,
        }];
        let filled = fill_missing_days(rows, day(1), day(3));
        assert_eq!(filled.len(), 3);
        assert!(filled.iter().all(|r| r.requests == 0));
    }

    #[test]
    fn test_quota_remaining() {
        assert_eq!(quota_remaining(Some(1_000), 250), Some(750));
        assert_eq!(quota_remaining(Some(1_000), 5_000), Some(0));
        assert_eq!(quota_remaining(None, 5_000), None);
    }
}
