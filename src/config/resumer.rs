//! Response resumer configuration.
//!
//! # Example
//!
//! ```toml
//! [resumer]
//! locator_ttl_secs = 30
//! locator_refresh_secs = 10
//! temp_dir = "/var/tmp/engram"
//! temp_file_retention_secs = 3600
//! advertised_address = "node-a.internal:9090"
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Response resumer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResumerConfig {
    /// Override for whether the resumer is active. When unset, the resumer
    /// is enabled iff a shared locator store is configured.
    #[serde(default)]
    pub enabled: Option<bool>,

    /// TTL attached to locator keys. A recording whose node dies stops
    /// refreshing and the locator ages out. Default: 30s
    #[serde(default = "default_locator_ttl_secs")]
    pub locator_ttl_secs: u64,

    /// How often an open recording re-upserts its locator.
    /// Must be smaller than `locator_ttl_secs`. Default: 10s
    #[serde(default = "default_locator_refresh_secs")]
    pub locator_refresh_secs: u64,

    /// Directory for recording spool files. Default: the OS temp dir.
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,

    /// Spool files older than this are deleted at startup. Default: 1h
    #[serde(default = "default_temp_file_retention_secs")]
    pub temp_file_retention_secs: u64,

    /// This node's address as other nodes should dial it, `host:port`.
    /// Falls back to `hostname:0`; port 0 means "cannot be redirected to".
    #[serde(default)]
    pub advertised_address: Option<String>,
}

impl Default for ResumerConfig {
    fn default() -> Self {
        Self {
            enabled: None,
            locator_ttl_secs: default_locator_ttl_secs(),
            locator_refresh_secs: default_locator_refresh_secs(),
            temp_dir: None,
            temp_file_retention_secs: default_temp_file_retention_secs(),
            advertised_address: None,
        }
    }
}

impl ResumerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.locator_refresh_secs >= self.locator_ttl_secs {
            return Err(ConfigError::Validation(
                "locator_refresh_secs must be less than locator_ttl_secs".into(),
            ));
        }
        Ok(())
    }

    pub fn locator_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.locator_ttl_secs)
    }

    pub fn locator_refresh(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.locator_refresh_secs)
    }

    pub fn temp_file_retention(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.temp_file_retention_secs)
    }

    /// Spool directory, defaulting to the OS temp dir.
    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}

fn default_locator_ttl_secs() -> u64 {
    30
}

fn default_locator_refresh_secs() -> u64 {
    10
}

fn default_temp_file_retention_secs() -> u64 {
    3600
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ResumerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.locator_ttl(), std::time::Duration::from_secs(30));
        assert_eq!(config.locator_refresh(), std::time::Duration::from_secs(10));
    }

    #[test]
    fn test_refresh_must_be_below_ttl() {
        let toml = r#"
            locator_ttl_secs = 10
            locator_refresh_secs = 10
        "#;
        let config: ResumerConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            enabled = true
            locator_ttl_secs = 60
            locator_refresh_secs = 15
            temp_dir = "/var/tmp/engram"
            temp_file_retention_secs = 7200
            advertised_address = "node-a:9090"
        "#;
        let config: ResumerConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.enabled, Some(true));
        assert_eq!(config.temp_dir(), PathBuf::from("/var/tmp/engram"));
        assert_eq!(config.advertised_address.as_deref(), Some("node-a:9090"));
        assert!(config.validate().is_ok());
    }
}
