use serde::{Deserialize, Serialize};

use crate::config::StripeConfig;

/// Subscription tier. Stored in `users.tier` as its lowercase name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Free,
    Starter,
    Pro,
    Enterprise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TierLimits {
    pub requests_per_minute: u32,
    /// `None` = unlimited.
    pub monthly_quota: Option<u64>,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Starter => "starter",
            Tier::Pro => "pro",
            Tier::Enterprise => "enterprise",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Some(Tier::Free),
            "starter" => Some(Tier::Starter),
            "pro" => Some(Tier::Pro),
            "enterprise" => Some(Tier::Enterprise),
            _ => None,
        }
    }

    /// Unknown stored values degrade to `Free` rather than failing the request.
    pub fn from_db(s: &str) -> Self {
        Self::parse(s).unwrap_or_else(|| {
            tracing::warn!("Unknown tier '{s}' in database, treating as free");
            Tier::Free
        })
    }

    pub fn limits(&self) -> TierLimits {
        match self {
            Tier::Free => TierLimits {
                requests_per_minute: 10,
                monthly_quota: Some(1_000),
            },
            Tier::Starter => TierLimits {
                requests_per_minute: 60,
                monthly_quota: Some(50_000),
            },
            Tier::Pro => TierLimits {
                requests_per_minute: 300,
                monthly_quota: Some(500_000),
            },
            Tier::Enterprise => TierLimits {
                requests_per_minute: 1_000,
                monthly_quota: None,
            },
        }
    }

    /// Stripe price for a paid tier, if configured.
    pub fn price_id<'a>(&self, stripe: &'a StripeConfig) -> Option<&'a str> {
        match self {
            Tier::Free => None,
            Tier::Starter => stripe.price_starter.as_deref(),
            Tier::Pro => stripe.price_pro.as_deref(),
            Tier::Enterprise => stripe.price_enterprise.as_deref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stripe() -> StripeConfig {
        StripeConfig {
            secret_key: "sk_test".to_string(),
            webhook_secret: "whsec".to_string(),
            price_starter: Some("price_starter".to_string()),
            price_pro: Some("price_pro".to_string()),
            price_enterprise: None,
        }
    }

    #[test]
    fn test_parse_round_trip() {
        for tier in [Tier::Free, Tier::Starter, Tier::Pro, Tier::Enterprise] {
            assert_eq!(Tier::parse(tier.as_str()), Some(tier));
        }
        assert_eq!(Tier::parse("PRO"), Some(Tier::Pro));
        assert_eq!(Tier::parse("platinum"), None);
    }

    #[test]
    fn test_from_db_defaults_to_free() {
        assert_eq!(Tier::from_db("legacy"), Tier::Free);
        assert_eq!(Tier::from_db("starter"), Tier::Starter);
    }

    #[test]
    fn test_limits_increase_with_tier() {
        let tiers = [Tier::Free, Tier::Starter, Tier::Pro, Tier::Enterprise];
        for pair in tiers.windows(2) {
            assert!(pair[0].limits().requests_per_minute < pair[1].limits().requests_per_minute);
        }
        assert_eq!(Tier::Enterprise.limits().monthly_quota, None);
        assert_eq!(Tier::Free.limits().monthly_quota, Some(1_000));
    }

    #[test]
    fn test_price_ids() {
        let cfg = stripe();
        assert_eq!(Tier::Free.price_id(&cfg), None);
        assert_eq!(Tier::Pro.price_id(&cfg), Some("price_pro"));
        assert_eq!(Tier::Enterprise.price_id(&cfg), None);
    }
}
