//! Network configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Configuration shared by the base and every device of one network.
///
/// ```yaml
/// network_id: 18287
/// network_key: 48384
/// beacon_settle_ms: 3000
/// assign_settle_ms: 2000
/// max_retries: 10
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Identifier carried in every beacon.
    pub network_id: u16,
    /// Shared secret for control packet tags.
    pub network_key: u16,
    /// How long to collect beacon responses (milliseconds).
    pub beacon_settle_ms: u64,
    /// How long to wait after each round of address assignments (milliseconds).
    pub assign_settle_ms: u64,
    /// Maximum AssignAddress transmissions per node.
    pub max_retries: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            network_id: 18287,
            network_key: 48384,
            beacon_settle_ms: 3000,
            assign_settle_ms: 2000,
            max_retries: 10,
        }
    }
}

impl NetworkConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: NetworkConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries == 0 {
            return Err(ConfigError::Invalid("max_retries must be at least 1".into()));
        }
        Ok(())
    }

    /// Set the network id.
    pub fn with_network_id(mut self, network_id: u16) -> Self {
        self.network_id = network_id;
        self
    }

    /// Set the network key.
    pub fn with_network_key(mut self, network_key: u16) -> Self {
        self.network_key = network_key;
        self
    }

    /// Set both settle intervals.
    pub fn with_settle_ms(mut self, beacon_settle_ms: u64, assign_settle_ms: u64) -> Self {
        self.beacon_settle_ms = beacon_settle_ms;
        self.assign_settle_ms = assign_settle_ms;
        self
    }

    /// Set the per-node AssignAddress limit.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Beacon settle interval.
    pub fn beacon_settle(&self) -> Duration {
        Duration::from_millis(self.beacon_settle_ms)
    }

    /// Assign settle interval.
    pub fn assign_settle(&self) -> Duration {
        Duration::from_millis(self.assign_settle_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NetworkConfig::default();
        assert_eq!(config.network_id, 18287);
        assert_eq!(config.network_key, 48384);
        assert_eq!(config.beacon_settle(), Duration::from_secs(3));
        assert_eq!(config.assign_settle(), Duration::from_secs(2));
        assert_eq!(config.max_retries, 10);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config = NetworkConfig::from_yaml_str("network_key: 1234\nmax_retries: 3\n").unwrap();
        assert_eq!(config.network_key, 1234);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.network_id, 18287);
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = NetworkConfig::default()
            .with_network_id(7)
            .with_settle_ms(10, 20);
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert_eq!(NetworkConfig::from_yaml_str(&yaml).unwrap(), config);
    }

    #[test]
    fn test_zero_retries_rejected() {
        let err = NetworkConfig::from_yaml_str("max_retries: 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_bad_yaml() {
        assert!(matches!(
            NetworkConfig::from_yaml_str("network_id: [1, 2]"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            NetworkConfig::from_yaml_str("network_id: 70000"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            NetworkConfig::load("/nonexistent/meshnet.yaml"),
            Err(ConfigError::Io(_))
        ));
    }
}
