//! Error types for the cardmap taxonomy pipeline.
//!
//! Errors are organized by stage. Per-item failures (a bad image, one failed
//! embedding call) are handled inside their stage and never surface here;
//! everything in this module is either a whole-step failure or a
//! configuration problem that must stop the run before any stage executes.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for cardmap operations.
#[derive(Error, Debug)]
pub enum CardmapError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Pipeline processing errors
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// General I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration-specific errors. These always fail the run fast.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read the config file from disk
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse TOML configuration
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Configuration values are invalid
    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    /// A required credential is not present in the environment
    #[error("Missing credential: set the {var} environment variable ({hint})")]
    MissingCredential { var: String, hint: String },
}

/// Pipeline errors, organized by stage.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Candidate intake failed (unreadable manifest, empty directory)
    #[error("Intake error for {path}: {message}")]
    Intake { path: PathBuf, message: String },

    /// Remote embedding call failed
    #[error("Embedding error: {message}")]
    Embedding {
        message: String,
        status_code: Option<u16>,
    },

    /// Clustering could not produce a valid tree
    #[error("Clustering error: {0}")]
    Clustering(String),

    /// Vision labeling call failed
    #[error("Labeling error: {message}")]
    Labeling {
        message: String,
        status_code: Option<u16>,
    },

    /// Operation timed out
    #[error("Timeout in {stage} stage after {timeout_ms}ms")]
    Timeout { stage: String, timeout_ms: u64 },

    /// An artifact expected on disk is missing
    #[error("Missing artifact: {0} (run the earlier steps first)")]
    MissingArtifact(PathBuf),

    /// An artifact on disk could not be parsed or failed its header check
    #[error("Artifact error for {path}: {message}")]
    Artifact { path: PathBuf, message: String },

    /// The run is paused at the filter checkpoint
    #[error("Run is awaiting filter approval: {0} (run `cardmap approve`)")]
    AwaitingApproval(PathBuf),
}

/// Convenience type alias for cardmap results.
pub type Result<T> = std::result::Result<T, CardmapError>;

/// Convenience type alias for pipeline-specific results.
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
