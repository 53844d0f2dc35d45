//! Embedding provider trait and the Jina CLIP backend.
//!
//! The pipeline needs one joint image-text model so both modalities land in
//! the same space; `jina-clip-v2` exposes both encoders behind a single
//! embeddings endpoint.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::{ConfigError, PipelineError};
use crate::llm::{resolve_env_var, ImageInput};

/// Trait over joint image-text embedding backends.
///
/// For a fixed model checkpoint and fixed input the returned vector must be
/// bit-reproducible; providers must not inject randomness.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider name for logging.
    fn name(&self) -> &str;

    /// Encode a keyword string.
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, PipelineError>;

    /// Encode an image.
    async fn embed_image(&self, image: &ImageInput) -> Result<Vec<f32>, PipelineError>;

    /// Per-request timeout for this provider.
    fn timeout(&self) -> Duration;
}

/// Jina embeddings API provider (`jina-clip-v2`).
#[derive(Debug)]
pub struct JinaProvider {
    api_key: String,
    model: String,
    endpoint: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl JinaProvider {
    /// Build the provider from config, resolving the API key from the
    /// environment. A missing key fails fast before any stage runs.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, ConfigError> {
        let api_key = resolve_env_var(&config.api_key).ok_or_else(|| {
            ConfigError::MissingCredential {
                var: crate::llm::provider::env_var_name(&config.api_key),
                hint: "required for the embedding stage".to_string(),
            }
        })?;
        Ok(Self {
            api_key,
            model: config.model.clone(),
            endpoint: config.endpoint.clone(),
            timeout: Duration::from_millis(config.timeout_ms),
            client: reqwest::Client::new(),
        })
    }

    async fn embed_input(&self, input: EmbeddingInput) -> Result<Vec<f32>, PipelineError> {
        let body = EmbeddingsRequest {
            model: self.model.clone(),
            input: vec![input],
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| PipelineError::Embedding {
                message: format!("Jina request failed: {e}"),
                status_code: None,
            })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(PipelineError::Embedding {
                message: format!("Jina HTTP {status}: {text}"),
                status_code: Some(status.as_u16()),
            });
        }

        let parsed: EmbeddingsResponse =
            resp.json().await.map_err(|e| PipelineError::Embedding {
                message: format!("Failed to parse Jina response: {e}"),
                status_code: None,
            })?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| PipelineError::Embedding {
                message: "Jina returned empty data array".to_string(),
                status_code: None,
            })
    }
}

// --- Wire types ---

#[derive(Serialize)]
struct EmbeddingsRequest {
    model: String,
    input: Vec<EmbeddingInput>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum EmbeddingInput {
    Text { text: String },
    Image { image: String },
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for JinaProvider {
    fn name(&self) -> &str {
        "jina"
    }

    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, PipelineError> {
        self.embed_input(EmbeddingInput::Text {
            text: text.to_string(),
        })
        .await
    }

    async fn embed_image(&self, image: &ImageInput) -> Result<Vec<f32>, PipelineError> {
        self.embed_input(EmbeddingInput::Image {
            image: image.data.clone(),
        })
        .await
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}
