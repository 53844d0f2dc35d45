//! Configuration validation with range checks.
//!
//! Everything here fails the run before any stage executes.

use crate::error::ConfigError;

use super::Config;

impl Config {
    /// Validate configuration values are within acceptable ranges.
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.clustering.target_leaf_count == 0 {
            return Err(ConfigError::ValidationError(
                "clustering.target_leaf_count must be > 0".into(),
            ));
        }
        if self.clustering.branch_factor < 2 {
            return Err(ConfigError::ValidationError(
                "clustering.branch_factor must be >= 2".into(),
            ));
        }
        if self.clustering.min_leaf_size == 0 {
            return Err(ConfigError::ValidationError(
                "clustering.min_leaf_size must be > 0".into(),
            ));
        }
        if self.clustering.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "clustering.max_iterations must be > 0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.embedding.image_weight) {
            return Err(ConfigError::ValidationError(
                "embedding.image_weight must be between 0.0 and 1.0".into(),
            ));
        }
        if self.embedding.parallel == 0 {
            return Err(ConfigError::ValidationError(
                "embedding.parallel must be > 0".into(),
            ));
        }
        if self.embedding.timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "embedding.timeout_ms must be > 0".into(),
            ));
        }
        if self.labeling.representatives == 0 {
            return Err(ConfigError::ValidationError(
                "labeling.representatives must be > 0".into(),
            ));
        }
        if self.labeling.parallel == 0 {
            return Err(ConfigError::ValidationError(
                "labeling.parallel must be > 0".into(),
            ));
        }
        if self.labeling.timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "labeling.timeout_ms must be > 0".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_passes_validation() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_leaf_count() {
        let mut config = Config::default();
        config.clustering.target_leaf_count = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("target_leaf_count"));
    }

    #[test]
    fn test_validate_rejects_unary_branch_factor() {
        let mut config = Config::default();
        config.clustering.branch_factor = 1;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("branch_factor"));
    }

    #[test]
    fn test_validate_rejects_invalid_image_weight() {
        let mut config = Config::default();
        config.embedding.image_weight = 1.5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("image_weight"));

        config.embedding.image_weight = -0.1;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("image_weight"));
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let mut config = Config::default();
        config.embedding.parallel = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("embedding.parallel"));
    }

    #[test]
    fn test_validate_rejects_zero_representatives() {
        let mut config = Config::default();
        config.labeling.representatives = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("representatives"));
    }
}
