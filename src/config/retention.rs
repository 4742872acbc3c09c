//! Eviction configuration.
//!
//! Controls the background worker that hard-deletes soft-deleted
//! conversation groups and stale memory epochs after their retention
//! window.
//!
//! # Example
//!
//! ```toml
//! [retention]
//! enabled = true
//! retention_days = 30
//! interval_secs = 3600
//! batch_size = 100
//! delay_ms = 100
//! ```

use serde::{Deserialize, Serialize};

/// Eviction worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetentionConfig {
    /// Whether the eviction worker runs.
    /// Default: true
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Days a soft-deleted group (or a superseded memory epoch) is kept
    /// before hard deletion. Default: 30
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// How often the worker runs, in seconds. Default: 3600 (hourly)
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Groups hard-deleted per batch. Default: 100
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Pause between batches, in milliseconds. Default: 100
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retention_days: default_retention_days(),
            interval_secs: default_interval_secs(),
            batch_size: default_batch_size(),
            delay_ms: default_delay_ms(),
        }
    }
}

impl RetentionConfig {
    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.interval_secs)
    }

    pub fn batch_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.delay_ms)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.retention_days as i64)
    }
}

fn default_true() -> bool {
    true
}

fn default_retention_days() -> u32 {
    30
}

fn default_interval_secs() -> u64 {
    3600
}

fn default_batch_size() -> u32 {
    100
}

fn default_delay_ms() -> u64 {
    100
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RetentionConfig::default();
        assert!(config.enabled);
        assert_eq!(config.retention_days, 30);
        assert_eq!(config.interval_secs, 3600);
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.delay_ms, 100);
    }

    #[test]
    fn test_parse_minimal_config() {
        let toml = r#"
            enabled = false
        "#;
        let config: RetentionConfig = toml::from_str(toml).unwrap();
        assert!(!config.enabled);
        assert_eq!(config.retention_days, 30);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            enabled = true
            retention_days = 7
            interval_secs = 600
            batch_size = 50
            delay_ms = 250
        "#;
        let config: RetentionConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.retention_days, 7);
        assert_eq!(config.interval(), std::time::Duration::from_secs(600));
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.batch_delay(), std::time::Duration::from_millis(250));
    }

    #[test]
    fn test_retention_duration() {
        let config = RetentionConfig::default();
        assert_eq!(config.retention(), chrono::Duration::days(30));
    }
}
