use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Cache configuration for the memory-entries cache and, when Redis is
/// selected, the shared response-locator registry.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum CacheConfig {
    /// No cache: every memory read goes to the database, and response
    /// recordings cannot be redirected across nodes.
    #[default]
    None,

    /// In-process cache. Single-node only.
    Memory,

    /// Redis-backed cache shared across nodes.
    Redis(RedisConfig),
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            CacheConfig::Redis(c) => c.validate(),
            _ => Ok(()),
        }
    }
}

/// Redis connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisConfig {
    /// Connection URL, e.g. `redis://localhost:6379`.
    pub url: String,

    /// Per-operation timeout. On timeout the cache degrades to a miss and
    /// the locator registry reports "not available".
    #[serde(default = "default_op_timeout_ms")]
    pub op_timeout_ms: u64,
}

impl RedisConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::Validation("Redis URL cannot be empty".into()));
        }
        Ok(())
    }
}

fn default_op_timeout_ms() -> u64 {
    2000
}

/// Sliding TTL settings for the memory-entries cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EpochCacheConfig {
    /// Sliding TTL for cached current-epoch entry lists.
    /// Refreshed on every read and write. Default: 10 minutes.
    #[serde(default = "default_epoch_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for EpochCacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_epoch_ttl_secs(),
        }
    }
}

impl EpochCacheConfig {
    pub fn ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.ttl_secs)
    }
}

fn default_epoch_ttl_secs() -> u64 {
    600 // 10 minutes
}
