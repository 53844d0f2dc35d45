//! Configuration management for cardmap.
//!
//! Configuration is loaded from a platform config directory with sensible
//! defaults for every section. The whole config is an immutable value
//! threaded explicitly through every stage call; nothing reads it from
//! global state, which keeps steps independently testable and resumable.

mod types;
mod validate;

pub use types::*;

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root configuration structure for cardmap.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Candidate intake settings
    pub intake: IntakeConfig,

    /// Filter stage settings
    pub filter: FilterConfig,

    /// Embedding stage settings
    pub embedding: EmbeddingConfig,

    /// Clustering stage settings
    pub clustering: ClusteringConfig,

    /// Vision labeling settings
    pub labeling: LabelingConfig,

    /// Output settings
    pub output: OutputConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// Returns default configuration if the file doesn't exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default config file path.
    ///
    /// Uses platform-appropriate directories, falling back to
    /// `~/.cardmap/config.toml` if directory detection fails.
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("com", "cardmap", "cardmap")
            .map(|dirs| dirs.config_dir().to_path_buf().join("config.toml"))
            .unwrap_or_else(|| {
                let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
                PathBuf::from(home).join(".cardmap").join("config.toml")
            })
    }

    /// Get the resolved artifact directory path (with ~ expansion).
    pub fn artifact_dir(&self) -> PathBuf {
        let path_str = self.output.artifact_dir.to_string_lossy();
        let expanded = shellexpand::tilde(&path_str);
        PathBuf::from(expanded.into_owned())
    }

    /// Serialize the config to a pretty TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ValidationError(e.to_string()))
    }

    /// Stable fingerprint of the configuration, embedded in every artifact
    /// header so a resumed step can detect that its inputs were produced
    /// under a different configuration.
    pub fn fingerprint(&self) -> String {
        let toml = self.to_toml().unwrap_or_default();
        blake3::hash(toml.as_bytes()).to_hex().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.clustering.target_leaf_count, 96);
        assert_eq!(config.clustering.branch_factor, 2);
        assert_eq!(config.embedding.parallel, 4);
        assert!(config.labeling.enabled);
    }

    #[test]
    fn test_config_to_toml() {
        let config = Config::default();
        let toml = config.to_toml().unwrap();
        assert!(toml.contains("[intake]"));
        assert!(toml.contains("[clustering]"));
        assert!(toml.contains("[labeling]"));
    }

    #[test]
    fn test_fingerprint_stable_and_sensitive() {
        let a = Config::default();
        let b = Config::default();
        assert_eq!(a.fingerprint(), b.fingerprint());

        let mut c = Config::default();
        c.clustering.target_leaf_count = 32;
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_load_from_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[clustering]\ntarget_leaf_count = 12\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.clustering.target_leaf_count, 12);
        // Unspecified sections keep their defaults
        assert_eq!(config.embedding.model, "jina-clip-v2");
    }

    #[test]
    fn test_load_from_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[clustering]\ntarget_leaf_count = 0\n").unwrap();

        assert!(Config::load_from(&path).is_err());
    }
}
