//! Vision provider trait and request/response types.
//!
//! Defines the interface that all vision backends implement, plus the
//! factory that creates the right provider from the labeling config.

use crate::config::LabelingConfig;
use crate::error::{ConfigError, PipelineError};
use async_trait::async_trait;
use base64::Engine;
use std::time::Duration;

/// Base64-encoded image ready to send to a vision API.
#[derive(Debug, Clone)]
pub struct ImageInput {
    /// Base64-encoded image bytes
    pub data: String,
    /// MIME type (e.g., "image/jpeg", "image/png")
    pub media_type: String,
}

impl ImageInput {
    /// Create an `ImageInput` from raw bytes and a format identifier
    /// (e.g., "jpeg", "png", "webp").
    pub fn from_bytes(bytes: &[u8], format: &str) -> Self {
        let media_type = match format {
            "jpeg" | "jpg" => "image/jpeg",
            "png" => "image/png",
            "webp" => "image/webp",
            "gif" => "image/gif",
            other => {
                tracing::warn!("Unknown image format '{other}', defaulting to image/png");
                "image/png"
            }
        };

        Self {
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
            media_type: media_type.to_string(),
        }
    }

    /// Return a data URL suitable for OpenAI-style APIs.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.data)
    }
}

/// A request to label one cluster from its representative images.
#[derive(Debug, Clone)]
pub struct LabelRequest {
    /// Representative images, nearest-to-centroid first
    pub images: Vec<ImageInput>,
    /// Text prompt for the model
    pub prompt: String,
    /// Maximum tokens to generate
    pub max_tokens: u32,
    /// Sampling temperature (0 keeps labels stable across runs)
    pub temperature: f32,
}

impl LabelRequest {
    /// Build a theme-label request from representative images and their
    /// keywords. The keywords anchor the model when the pictogram style is
    /// ambiguous.
    pub fn theme_label(images: Vec<ImageInput>, keywords: &[String]) -> Self {
        let prompt = if keywords.is_empty() {
            "These pictogram cards all belong to one cluster. \
             Reply with a short theme label (1-3 words) that covers all of them. \
             Reply with the label only, no punctuation or explanation."
                .to_string()
        } else {
            format!(
                "These pictogram cards all belong to one cluster. \
                 Their keywords are: {}. \
                 Reply with a short theme label (1-3 words) that covers all of them. \
                 Reply with the label only, no punctuation or explanation.",
                keywords.join(", ")
            )
        };

        Self {
            images,
            prompt,
            max_tokens: 30,
            temperature: 0.0,
        }
    }
}

/// The response from a vision labeling call.
#[derive(Debug, Clone)]
pub struct LabelResponse {
    /// Generated label text
    pub text: String,
    /// Model identifier used
    pub model: String,
    /// Number of tokens used (input + output), if reported
    pub tokens_used: Option<u32>,
    /// Round-trip latency in milliseconds
    pub latency_ms: u64,
}

/// Trait that all vision providers implement.
///
/// Uses `async_trait` because native async fn in trait is not object-safe
/// (we need `Box<dyn VisionProvider>` for dynamic dispatch).
#[async_trait]
pub trait VisionProvider: Send + Sync + std::fmt::Debug {
    /// Provider name for logging (e.g., "openai", "anthropic").
    fn name(&self) -> &str;

    /// Generate a label for the given request.
    async fn label(&self, request: &LabelRequest) -> Result<LabelResponse, PipelineError>;

    /// Per-request timeout for this provider.
    fn timeout(&self) -> Duration;
}

/// Resolve `${ENV_VAR}` references in config strings.
pub fn resolve_env_var(value: &str) -> Option<String> {
    if value.starts_with("${") && value.ends_with('}') {
        let var_name = &value[2..value.len() - 1];
        std::env::var(var_name).ok()
    } else if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Name of the env var referenced by a `${ENV_VAR}` config string, for
/// diagnostics when resolution fails.
pub(crate) fn env_var_name(value: &str) -> String {
    if value.starts_with("${") && value.ends_with('}') {
        value[2..value.len() - 1].to_string()
    } else {
        value.to_string()
    }
}

/// Factory that creates the appropriate provider from the labeling config.
///
/// A missing credential is a configuration error: the run fails fast here,
/// before any stage executes. The sanctioned way to run without a key is
/// `labeling.enabled = false`.
pub struct VisionProviderFactory;

impl VisionProviderFactory {
    pub fn create(config: &LabelingConfig) -> Result<Box<dyn VisionProvider>, ConfigError> {
        match config.provider.as_str() {
            "openai" => {
                let cfg = config.openai.clone().unwrap_or_default();
                let api_key = resolve_env_var(&cfg.api_key).ok_or_else(|| {
                    ConfigError::MissingCredential {
                        var: env_var_name(&cfg.api_key),
                        hint: "required for vision labeling; set labeling.enabled = false to skip"
                            .to_string(),
                    }
                })?;
                Ok(Box::new(super::openai::OpenAiProvider::new(
                    &api_key, &cfg.model,
                )))
            }
            "anthropic" => {
                let cfg = config.anthropic.clone().unwrap_or_default();
                let api_key = resolve_env_var(&cfg.api_key).ok_or_else(|| {
                    ConfigError::MissingCredential {
                        var: env_var_name(&cfg.api_key),
                        hint: "required for vision labeling; set labeling.enabled = false to skip"
                            .to_string(),
                    }
                })?;
                Ok(Box::new(super::anthropic::AnthropicProvider::new(
                    &api_key, &cfg.model,
                )))
            }
            other => Err(ConfigError::ValidationError(format!(
                "Unknown labeling provider: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_input_from_bytes_png() {
        let input = ImageInput::from_bytes(&[0x89, 0x50, 0x4E, 0x47], "png");
        assert_eq!(input.media_type, "image/png");
        assert!(!input.data.is_empty());
    }

    #[test]
    fn test_image_input_data_url() {
        let input = ImageInput::from_bytes(&[1, 2, 3], "jpeg");
        let url = input.data_url();
        assert!(url.starts_with("data:image/jpeg;base64,"));
    }

    #[test]
    fn test_theme_label_includes_keywords() {
        let images = vec![ImageInput::from_bytes(&[1, 2, 3], "png")];
        let request =
            LabelRequest::theme_label(images, &["apple".to_string(), "pear".to_string()]);
        assert!(request.prompt.contains("apple, pear"));
        assert_eq!(request.temperature, 0.0);
    }

    #[test]
    fn test_theme_label_without_keywords() {
        let images = vec![ImageInput::from_bytes(&[1, 2, 3], "png")];
        let request = LabelRequest::theme_label(images, &[]);
        assert!(request.prompt.contains("theme label"));
        assert!(!request.prompt.contains("keywords are"));
    }

    #[test]
    fn test_resolve_env_var() {
        // Non-env-var strings pass through
        assert_eq!(resolve_env_var("plain-key"), Some("plain-key".to_string()));
        // Empty returns None
        assert_eq!(resolve_env_var(""), None);
        // Unset env var returns None
        assert_eq!(resolve_env_var("${DEFINITELY_NOT_SET_XYZ_123}"), None);
    }

    #[test]
    fn test_factory_fails_fast_without_credential() {
        let mut config = LabelingConfig::default();
        config.openai = Some(crate::config::OpenAiConfig {
            api_key: "${DEFINITELY_NOT_SET_XYZ_123}".to_string(),
            model: "gpt-4o-mini".to_string(),
        });
        let err = VisionProviderFactory::create(&config).unwrap_err();
        assert!(err.to_string().contains("DEFINITELY_NOT_SET_XYZ_123"));
    }

    #[test]
    fn test_factory_rejects_unknown_provider() {
        let config = LabelingConfig {
            provider: "geminiish".to_string(),
            ..LabelingConfig::default()
        };
        assert!(VisionProviderFactory::create(&config).is_err());
    }
}
