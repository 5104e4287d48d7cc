//! Google OAuth 2.0 authorization-code flow.
//!
//! `state` values are single-use: stored in Redis with a short TTL and
//! consumed with GETDEL, so a replayed callback is rejected.

use rand::{distributions::Alphanumeric, Rng};
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use crate::config::GoogleOAuthConfig;
use crate::errors::AppError;

const AUTHORIZE_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const USERINFO_URL: &str = "https://openidconnect.googleapis.com/v1/userinfo";
pub const STATE_TTL_SECS: u64 = 600;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleUserInfo {
    pub sub: String,
    pub email: String,
    #[serde(default)]
    pub email_verified: bool,
    pub name: Option<String>,
}

#[derive(Clone)]
pub struct GoogleOAuthClient {
    client: Client,
    config: GoogleOAuthConfig,
}

impl GoogleOAuthClient {
    pub fn new(config: GoogleOAuthConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .map_err(|e| AppError::OAuth(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn authorize_url(&self, state: &str) -> Result<String, AppError> {
        build_authorize_url(&self.config, state)
    }

    /// Exchanges the authorization code and fetches the verified profile.
    pub async fn exchange_code(&self, code: &str) -> Result<GoogleUserInfo, AppError> {
        let token_response = self
            .client
            .post(TOKEN_URL)
            .form(&[
                ("code", code),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("redirect_uri", self.config.redirect_url.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .map_err(|e| AppError::OAuth(format!("token request failed: {e}")))?;

        if !token_response.status().is_success() {
            let status = token_response.status();
            let body = token_response.text().await.unwrap_or_default();
            return Err(AppError::OAuth(format!(
                "token endpoint returned {status}: {body}"
            )));
        }

        let token: TokenResponse = token_response
            .json()
            .await
            .map_err(|e| AppError::OAuth(format!("invalid token response: {e}")))?;

        let info: GoogleUserInfo = self
            .client
            .get(USERINFO_URL)
            .bearer_auth(&token.access_token)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AppError::OAuth(format!("userinfo request failed: {e}")))?
            .json()
            .await
            .map_err(|e| AppError::OAuth(format!("invalid userinfo response: {e}")))?;

        if !info.email_verified {
            return Err(AppError::OAuth(format!(
                "Google account {} has no verified email",
                info.sub
            )));
        }
        Ok(info)
    }
}

pub fn generate_state() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

pub fn state_key(state: &str) -> String {
    format!("oauth_state:{state}")
}

fn build_authorize_url(config: &GoogleOAuthConfig, state: &str) -> Result<String, AppError> {
    let url = Url::parse_with_params(
        AUTHORIZE_URL,
        &[
            ("client_id", config.client_id.as_str()),
            ("redirect_uri", config.redirect_url.as_str()),
            ("response_type", "code"),
            ("scope", "openid email profile"),
            ("state", state),
            ("prompt", "select_account"),
        ],
    )
    .map_err(|e| AppError::OAuth(format!("invalid authorize URL: {e}")))?;
    Ok(url.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> GoogleOAuthConfig {
        GoogleOAuthConfig {
            client_id: "client-123".to_string(),
            client_secret: "shh".to_string(),
            redirect_url: "https://api.example.com/auth/oauth/google/callback".to_string(),
        }
    }

    #[test]
    fn test_authorize_url_contains_params() {
        let url = build_authorize_url(&config(), "xyz").unwrap();
        let parsed = Url::parse(&url).unwrap();
        let pairs: std::collections::HashMap<_, _> = parsed.query_pairs().into_owned().collect();
        assert_eq!(pairs["client_id"], "client-123");
        assert_eq!(pairs["state"], "xyz");
        assert_eq!(pairs["response_type"], "code");
        assert_eq!(
            pairs["redirect_uri"],
            "https://api.example.com/auth/oauth/google/callback"
        );
        assert!(!url.contains("shh"));
    }

    #[test]
    fn test_generate_state_is_random_alphanumeric() {
        let a = generate_state();
        let b = generate_state();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_userinfo_defaults_unverified() {
        let info: GoogleUserInfo =
            serde_json::from_str(r#"{"sub":"1","email":"a@b.com"}"#).unwrap();
        assert!(!info.email_verified);
    }
}
