use anyhow::{Context, Result};

use crate::search::scoring::ScoreCalibration;

/// One year. Session tokens cannot outlive this.
pub const MAX_JWT_EXPIRY_HOURS: i64 = 24 * 365;

/// Stripe settings. Billing endpoints return 501 when absent.
#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub price_starter: Option<String>,
    pub price_pro: Option<String>,
    pub price_enterprise: Option<String>,
}

/// Google OAuth settings. OAuth endpoints return 501 when absent.
#[derive(Debug, Clone)]
pub struct GoogleOAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: String,
}

/// Embedding backend settings. Semantic search is disabled when absent.
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
}

/// Application configuration loaded from environment variables.
/// Startup fails if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub jwt_secret: String,
    pub jwt_expiry_hours: i64,
    pub anthropic_api_key: String,
    pub frontend_url: String,
    pub port: u16,
    pub rust_log: String,
    pub embedding: Option<EmbeddingConfig>,
    pub stripe: Option<StripeConfig>,
    pub google: Option<GoogleOAuthConfig>,
    pub score_calibration: ScoreCalibration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let embedding = optional_env("EMBEDDING_API_KEY").map(|api_key| EmbeddingConfig {
            api_url: optional_env("EMBEDDING_API_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            api_key,
            model: optional_env("EMBEDDING_MODEL")
                .unwrap_or_else(|| "text-embedding-3-small".to_string()),
        });

        let stripe = match optional_env("STRIPE_SECRET_KEY") {
            Some(secret_key) => Some(StripeConfig {
                secret_key,
                webhook_secret: require_env("STRIPE_WEBHOOK_SECRET")?,
                price_starter: optional_env("STRIPE_PRICE_STARTER"),
                price_pro: optional_env("STRIPE_PRICE_PRO"),
                price_enterprise: optional_env("STRIPE_PRICE_ENTERPRISE"),
            }),
            None => None,
        };

        let google = match optional_env("GOOGLE_CLIENT_ID") {
            Some(client_id) => Some(GoogleOAuthConfig {
                client_id,
                client_secret: require_env("GOOGLE_CLIENT_SECRET")?,
                redirect_url: require_env("GOOGLE_REDIRECT_URL")?,
            }),
            None => None,
        };

        let score_calibration = score_calibration_from_env()?;

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            redis_url: require_env("REDIS_URL")?,
            jwt_secret: require_env("JWT_SECRET")?,
            jwt_expiry_hours: validate_jwt_expiry(parse_env("JWT_EXPIRY_HOURS", 24)?)?,
            anthropic_api_key: require_env("ANTHROPIC_API_KEY")?,
            frontend_url: optional_env("FRONTEND_URL")
                .unwrap_or_else(|| "http://localhost:3000".to_string()),
            port: parse_env("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            embedding,
            stripe,
            google,
            score_calibration,
        })
    }
}

fn score_calibration_from_env() -> Result<ScoreCalibration> {
    let defaults = ScoreCalibration::default();
    let calibration = ScoreCalibration {
        raw_low: parse_env("SCORE_RAW_LOW", defaults.raw_low)?,
        raw_high: parse_env("SCORE_RAW_HIGH", defaults.raw_high)?,
        exponent: parse_env("SCORE_EXPONENT", defaults.exponent)?,
        exact_match_boost: parse_env("SCORE_EXACT_BOOST", defaults.exact_match_boost)?,
        keyword_boost_weight: parse_env("SCORE_KEYWORD_WEIGHT", defaults.keyword_boost_weight)?,
        max_total_boost: parse_env("SCORE_MAX_BOOST", defaults.max_total_boost)?,
        ..defaults
    };
    calibration
        .validate()
        .context("Invalid SCORE_* calibration settings")?;
    Ok(calibration)
}

fn validate_jwt_expiry(hours: i64) -> Result<i64> {
    anyhow::ensure!(
        (1..=MAX_JWT_EXPIRY_HOURS).contains(&hours),
        "JWT_EXPIRY_HOURS must be between 1 and {MAX_JWT_EXPIRY_HOURS}, got {hours}"
    );
    Ok(hours)
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional_env(key) {
        Some(raw) => raw
            .parse::<T>()
            .with_context(|| format!("Environment variable '{key}' has an invalid value")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jwt_expiry_bounds() {
        assert_eq!(validate_jwt_expiry(24).unwrap(), 24);
        assert_eq!(validate_jwt_expiry(MAX_JWT_EXPIRY_HOURS).unwrap(), MAX_JWT_EXPIRY_HOURS);
        assert!(validate_jwt_expiry(0).is_err());
        assert!(validate_jwt_expiry(-1).is_err());
        assert!(validate_jwt_expiry(i64::MAX).is_err());
    }
}
