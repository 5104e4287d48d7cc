//! Query embedding client. Talks to any OpenAI-compatible `/embeddings` endpoint.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::EmbeddingConfig;
use crate::errors::AppError;

const MAX_RETRIES: u32 = 3;

/// Turns a search query into a vector comparable with the stored code embeddings.
///
/// Carried in `AppState` as `Option<Arc<dyn Embedder>>`; `None` disables semantic mode.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError>;
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Clone)]
pub struct HttpEmbedder {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .map_err(|e| AppError::Embedding(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: embeddings_endpoint(&config.api_url),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    /// Retries on 429 and 5xx with exponential backoff (250ms, 500ms).
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
        let body = EmbeddingRequest {
            model: &self.model,
            input: text,
        };

        let mut last_error = String::from("no attempts made");

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                let delay = std::time::Duration::from_millis(250 * (1 << (attempt - 1)));
                warn!(
                    "Embedding attempt {} failed ({}), retrying after {}ms...",
                    attempt,
                    last_error,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            let response = match self
                .client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    last_error = e.to_string();
                    continue;
                }
            };

            let status = response.status();
            if status.as_u16() == 429 || status.is_server_error() {
                last_error = format!("status {status}");
                continue;
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(AppError::Embedding(format!(
                    "embedding API returned {status}: {body}"
                )));
            }

            let parsed: EmbeddingResponse = response
                .json()
                .await
                .map_err(|e| AppError::Embedding(format!("invalid embedding response: {e}")))?;
            let vector = parsed
                .data
                .into_iter()
                .next()
                .map(|d| d.embedding)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| AppError::Embedding("embedding response was empty".to_string()))?;

            debug!("Embedded query into {} dimensions", vector.len());
            return Ok(vector);
        }

        Err(AppError::Embedding(format!(
            "embedding failed after {MAX_RETRIES} attempts: {last_error}"
        )))
    }
}

fn embeddings_endpoint(api_url: &str) -> String {
    format!("{}/embeddings", api_url.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embeddings_endpoint_trailing_slash() {
        assert_eq!(
            embeddings_endpoint("https://api.openai.com/v1/"),
            "https://api.openai.com/v1/embeddings"
        );
        assert_eq!(
            embeddings_endpoint("http://localhost:8081/v1"),
            "http://localhost:8081/v1/embeddings"
        );
    }

    #[test]
    fn test_response_parsing() {
        let json = r#"{"object":"list","data":[{"object":"embedding","index":0,"embedding":[0.1,-0.2,0.3]}],"model":"m"}"#;
        let parsed: EmbeddingResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.data[0].embedding, vec![0.1, -0.2, 0.3]);
    }
}
