//! Network service configuration.
//!
//! All fields have defaults, so an empty YAML document is a valid config:
//!
//! ```yaml
//! default_vpc_cidr: 10.0.0.0/16
//! default_az_usage_limit: 3
//! carrier_gateway: true
//! backoff:
//!   initial_interval_ms: 1000
//!   factor: 2.0
//!   jitter: 0.1
//!   max_interval_ms: 20000
//!   steps: 32
//! ```

use cloudnet_common::Backoff;
use cloudnet_types::{Ipv4Cidr, DEFAULT_AZ_USAGE_LIMIT};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// CIDR block used when the declared VPC leaves it empty.
pub const DEFAULT_VPC_CIDR: &str = "10.0.0.0/16";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid configuration for {field}: {message}")]
    Invalid { field: String, message: String },
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Tunables of the network service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Retry policy for eventually-consistent provider calls.
    pub backoff: Backoff,
    pub default_vpc_cidr: String,
    /// Zones used for default subnets when the VPC sets no limit.
    pub default_az_usage_limit: usize,
    /// Create carrier gateways for public wavelength-zone subnets.
    pub carrier_gateway: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            backoff: Backoff::default(),
            default_vpc_cidr: DEFAULT_VPC_CIDR.to_string(),
            default_az_usage_limit: DEFAULT_AZ_USAGE_LIMIT,
            carrier_gateway: true,
        }
    }
}

impl NetworkConfig {
    /// Parses and validates a YAML config.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: NetworkConfig = if yaml.trim().is_empty() {
            NetworkConfig::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a YAML config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&yaml)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.default_vpc_cidr
            .parse::<Ipv4Cidr>()
            .map_err(|e| ConfigError::invalid("default_vpc_cidr", e.to_string()))?;

        if self.default_az_usage_limit == 0 {
            return Err(ConfigError::invalid(
                "default_az_usage_limit",
                "must be at least 1",
            ));
        }
        if self.backoff.steps == 0 {
            return Err(ConfigError::invalid("backoff.steps", "must be at least 1"));
        }
        if self.backoff.factor < 1.0 {
            return Err(ConfigError::invalid("backoff.factor", "must be at least 1.0"));
        }
        if !(0.0..=1.0).contains(&self.backoff.jitter) {
            return Err(ConfigError::invalid("backoff.jitter", "must be within 0.0..=1.0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_empty_yaml_is_default() {
        assert_eq!(NetworkConfig::from_yaml_str("").unwrap(), NetworkConfig::default());
    }

    #[test]
    fn test_partial_yaml() {
        let config = NetworkConfig::from_yaml_str(
            "default_vpc_cidr: 192.168.0.0/16\nbackoff:\n  steps: 5\n",
        )
        .unwrap();
        assert_eq!(config.default_vpc_cidr, "192.168.0.0/16");
        assert_eq!(config.backoff.steps, 5);
        assert_eq!(config.backoff.initial_interval_ms, 1000);
        assert!(config.carrier_gateway);
    }

    #[test]
    fn test_invalid_cidr_rejected() {
        let err = NetworkConfig::from_yaml_str("default_vpc_cidr: nope\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref field, .. } if field == "default_vpc_cidr"));
    }

    #[test]
    fn test_zero_steps_rejected() {
        let err = NetworkConfig::from_yaml_str("backoff:\n  steps: 0\n").unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid configuration for backoff.steps: must be at least 1"
        );
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "default_az_usage_limit: 2").unwrap();
        let config = NetworkConfig::from_file(file.path()).unwrap();
        assert_eq!(config.default_az_usage_limit, 2);

        let missing = NetworkConfig::from_file("/nonexistent/cloudnet.yaml").unwrap_err();
        assert!(matches!(missing, ConfigError::Io { .. }));
    }
}
