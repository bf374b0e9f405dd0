//! Configuration for the state machine

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for [`crate::Fsm`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsmConfig {
    /// Batches taking longer than this to apply are logged as slow
    pub slow_apply_threshold: Duration,
    /// Reject batches whose indices are not contiguous and increasing
    pub validate_batches: bool,
}

impl Default for FsmConfig {
    fn default() -> Self {
        Self {
            slow_apply_threshold: Duration::from_millis(500),
            validate_batches: true,
        }
    }
}

/// Builder for FsmConfig
pub struct FsmConfigBuilder {
    config: FsmConfig,
}

impl FsmConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self {
            config: FsmConfig::default(),
        }
    }

    /// Set the slow apply threshold
    pub fn slow_apply_threshold(mut self, threshold: Duration) -> Self {
        self.config.slow_apply_threshold = threshold;
        self
    }

    /// Enable or disable batch validation
    pub fn validate_batches(mut self, validate: bool) -> Self {
        self.config.validate_batches = validate;
        self
    }

    /// Build the configuration
    pub fn build(self) -> FsmConfig {
        self.config
    }
}

impl Default for FsmConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FsmConfig::default();
        assert_eq!(config.slow_apply_threshold, Duration::from_millis(500));
        assert!(config.validate_batches);
    }

    #[test]
    fn test_builder() {
        let config = FsmConfigBuilder::new()
            .slow_apply_threshold(Duration::from_secs(2))
            .validate_batches(false)
            .build();

        assert_eq!(config.slow_apply_threshold, Duration::from_secs(2));
        assert!(!config.validate_batches);
    }

    #[test]
    fn test_serialization() {
        let config = FsmConfigBuilder::new().validate_batches(false).build();

        let json = serde_json::to_string_pretty(&config).unwrap();
        let deserialized: FsmConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(
            deserialized.slow_apply_threshold,
            config.slow_apply_threshold
        );
        assert_eq!(deserialized.validate_batches, config.validate_batches);
    }
}
