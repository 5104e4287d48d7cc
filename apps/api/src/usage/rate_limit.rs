//! Fixed-window rate limiting backed by Redis counters.
//!
//! Two windows per request: a per-key minute window and a per-user calendar
//! month window. Redis being unavailable never blocks API traffic.

use chrono::{DateTime, Datelike, Utc};
use redis::aio::MultiplexedConnection;
use tracing::warn;
use uuid::Uuid;

use crate::billing::plans::{Tier, TierLimits};

pub const MINUTE_TTL_SECS: i64 = 60;
pub const QUOTA_TTL_SECS: i64 = 35 * 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed { remaining: u64 },
    Limited,
}

/// `count` includes the current request.
pub fn decide(count: u64, limit: u64) -> Decision {
    if count > limit {
        Decision::Limited
    } else {
        Decision::Allowed {
            remaining: limit - count,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitCheck {
    Allowed { limit: u32, remaining: u64 },
    MinuteExceeded { limit: u32 },
    QuotaExceeded { quota: u64 },
}

impl LimitCheck {
    fn open(limits: TierLimits) -> Self {
        LimitCheck::Allowed {
            limit: limits.requests_per_minute,
            remaining: u64::from(limits.requests_per_minute),
        }
    }
}

pub fn minute_key(key_id: Uuid, now: DateTime<Utc>) -> String {
    format!("rl:{key_id}:{}", now.timestamp() / 60)
}

pub fn quota_key(user_id: Uuid, now: DateTime<Utc>) -> String {
    format!("quota:{user_id}:{:04}{:02}", now.year(), now.month())
}

/// Counts the request against both windows and decides whether it may proceed.
///
/// The monthly counter is only advanced for requests that pass the minute window.
pub async fn enforce(
    redis: &redis::Client,
    key_id: Uuid,
    user_id: Uuid,
    tier: Tier,
    now: DateTime<Utc>,
) -> LimitCheck {
    let limits = tier.limits();
    match count_request(redis, key_id, user_id, limits, now).await {
        Ok(check) => check,
        Err(e) => {
            warn!("Rate limiter unavailable, allowing request for key {key_id}: {e}");
            LimitCheck::open(limits)
        }
    }
}

async fn count_request(
    redis: &redis::Client,
    key_id: Uuid,
    user_id: Uuid,
    limits: TierLimits,
    now: DateTime<Utc>,
) -> Result<LimitCheck, redis::RedisError> {
    let mut conn = redis.get_multiplexed_async_connection().await?;

    let minute_count = increment(&mut conn, &minute_key(key_id, now), MINUTE_TTL_SECS).await?;
    let remaining = match decide(minute_count, u64::from(limits.requests_per_minute)) {
        Decision::Allowed { remaining } => remaining,
        Decision::Limited => {
            return Ok(LimitCheck::MinuteExceeded {
                limit: limits.requests_per_minute,
            })
        }
    };

    if let Some(quota) = limits.monthly_quota {
        let month_count = increment(&mut conn, &quota_key(user_id, now), QUOTA_TTL_SECS).await?;
        if decide(month_count, quota) == Decision::Limited {
            return Ok(LimitCheck::QuotaExceeded { quota });
        }
    }

    Ok(LimitCheck::Allowed {
        limit: limits.requests_per_minute,
        remaining,
    })
}

/// INCR, setting the TTL when the window is first opened.
async fn increment(
    conn: &mut MultiplexedConnection,
    key: &str,
    ttl_secs: i64,
) -> Result<u64, redis::RedisError> {
    let count: u64 = redis::cmd("INCR").arg(key).query_async(conn).await?;
    if count == 1 {
        let _: () = redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl_secs)
            .query_async(conn)
            .await?;
    }
    Ok(count)
}
