//! Embedding provider client.
//!
//! Speaks an OpenAI-compatible `POST {base}/embeddings` JSON API. The
//! gateway only depends on the [`EmbeddingProvider`] trait, so tests plug
//! in scripted providers.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use nexsus_core::config::EmbeddingConfig;
use nexsus_core::error::{NexsusError, Result};

pub const SERVICE: &str = "embedding";

/// Whether a text is indexed content or a search query. Providers that
/// distinguish the two produce asymmetric embeddings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputType {
    Document,
    Query,
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// One vector per input text, in order.
    async fn embed(&self, texts: &[String], input_type: InputType) -> Result<Vec<Vec<f32>>>;
}

pub struct HttpEmbeddingProvider {
    client: Client,
    config: EmbeddingConfig,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    input_type: InputType,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

impl HttpEmbeddingProvider {
    pub fn new(config: EmbeddingConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| NexsusError::Config(format!("embedding http client: {e}")))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed(&self, texts: &[String], input_type: InputType) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.config.base_url.trim_end_matches('/'));
        let body = EmbeddingRequest {
            model: &self.config.model,
            input: texts,
            input_type,
        };

        let mut request = self.client.post(&url).json(&body);
        if !self.config.api_key.is_empty() {
            request = request.header("Authorization", format!("Bearer {}", self.config.api_key));
        }

        let response = request
            .send()
            .await
            .map_err(|e| NexsusError::transient(SERVICE, e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            let text = response.text().await.unwrap_or_default();
            return Err(NexsusError::transient(SERVICE, format!("{status}: {text}")));
        }
        if status.is_client_error() {
            let text = response.text().await.unwrap_or_default();
            return Err(NexsusError::rejected(SERVICE, format!("{status}: {text}")));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| NexsusError::transient(SERVICE, format!("bad response body: {e}")))?;

        if parsed.data.len() != texts.len() {
            return Err(NexsusError::transient(
                SERVICE,
                format!(
                    "provider returned {} vectors for {} inputs",
                    parsed.data.len(),
                    texts.len()
                ),
            ));
        }
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}
