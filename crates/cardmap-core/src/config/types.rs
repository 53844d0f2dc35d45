//! Sub-configuration structs with pipeline defaults.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Candidate intake settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakeConfig {
    /// Max candidates drawn per topic before filtering (0 = no limit).
    /// This is the per-topic sampling weight of the candidate pool; it does
    /// not affect clustering math once the pool is fixed.
    pub pool_per_topic: usize,

    /// Seed for the per-topic sampling shuffle
    pub seed: u64,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            pool_per_topic: 0,
            seed: 42,
        }
    }
}

/// Filter stage settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FilterConfig {
    /// Extra disallowed terms, merged with the built-in list
    pub disallowed_terms: Vec<String>,

    /// Extra domain-exclusion terms, merged with the built-in list
    pub domain_exclusions: Vec<String>,

    /// Pause the run after filtering until `cardmap approve` is invoked
    pub require_approval: bool,
}

/// Embedding stage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Embedding model name
    pub model: String,

    /// API endpoint
    pub endpoint: String,

    /// API key (supports ${ENV_VAR} syntax)
    pub api_key: String,

    /// Weight of the image vector in the fused embedding, in [0, 1].
    /// The keyword vector gets `1 - image_weight`. Changing this invalidates
    /// previously persisted embedding artifacts.
    pub image_weight: f32,

    /// Maximum concurrent embedding requests
    pub parallel: usize,

    /// Per-request timeout in milliseconds
    pub timeout_ms: u64,

    /// Max retry attempts for transient failures
    pub retry_attempts: u32,

    /// Base backoff delay in milliseconds
    pub retry_delay_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "jina-clip-v2".to_string(),
            endpoint: "https://api.jina.ai/v1/embeddings".to_string(),
            api_key: "${JINA_API_KEY}".to_string(),
            image_weight: 0.5,
            parallel: 4,
            timeout_ms: 30_000,
            retry_attempts: 3,
            retry_delay_ms: 1000,
        }
    }
}

/// Clustering stage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    /// Target number of leaf clusters (K)
    pub target_leaf_count: usize,

    /// Sub-clusters per split. With 2 the leaf count grows by one per
    /// split, so K is reached exactly whenever nodes remain splittable.
    pub branch_factor: usize,

    /// Nodes smaller than twice this are never split further
    pub min_leaf_size: usize,

    /// Iteration bound for one k-means run
    pub max_iterations: u32,

    /// Seed for centroid initialization
    pub seed: u64,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            target_leaf_count: 96,
            branch_factor: 2,
            min_leaf_size: 3,
            max_iterations: 50,
            seed: 42,
        }
    }
}

/// Vision labeling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelingConfig {
    /// When false, every leaf gets a deterministic keyword-derived
    /// placeholder tag and no external call is made
    pub enabled: bool,

    /// Provider identifier ("openai" or "anthropic")
    pub provider: String,

    /// Representative images sent per cluster
    pub representatives: usize,

    /// Maximum concurrent labeling requests
    pub parallel: usize,

    /// Per-request timeout in milliseconds
    pub timeout_ms: u64,

    /// Max retry attempts before falling back to a placeholder tag
    pub retry_attempts: u32,

    /// Base backoff delay in milliseconds
    pub retry_delay_ms: u64,

    /// OpenAI configuration
    pub openai: Option<OpenAiConfig>,

    /// Anthropic configuration
    pub anthropic: Option<AnthropicConfig>,
}

impl Default for LabelingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: "openai".to_string(),
            representatives: 4,
            parallel: 2,
            timeout_ms: 60_000,
            retry_attempts: 3,
            retry_delay_ms: 1000,
            openai: None,
            anthropic: None,
        }
    }
}

/// OpenAI configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    /// API key (supports ${ENV_VAR} syntax)
    pub api_key: String,

    /// Model name
    pub model: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: "${OPENAI_API_KEY}".to_string(),
            model: "gpt-4o-mini".to_string(),
        }
    }
}

/// Anthropic configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicConfig {
    /// API key (supports ${ENV_VAR} syntax)
    pub api_key: String,

    /// Model name
    pub model: String,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_key: "${ANTHROPIC_API_KEY}".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
        }
    }
}

/// Output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory where artifacts and run state are written
    pub artifact_dir: PathBuf,

    /// Pretty-print artifact JSON
    pub pretty: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            artifact_dir: PathBuf::from("./cardmap-out"),
            pretty: false,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: error, warn, info, debug, trace
    pub level: String,

    /// Log format: "pretty" or "json"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}
