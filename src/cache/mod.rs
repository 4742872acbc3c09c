mod epoch;
mod error;
mod keys;
mod memory;
#[cfg(feature = "redis")]
mod redis;
mod traits;

use std::sync::Arc;

// Public API exports
pub use epoch::EpochCache;
pub use error::{CacheError, CacheResult};
pub use keys::CacheKeys;
pub use memory::MemoryCache;
#[cfg(feature = "redis")]
pub use redis::RedisCache;
pub use traits::{Cache, CacheExt};

use crate::config::CacheConfig;

/// Build the shared cache backend from configuration.
///
/// Returns `None` when caching is disabled; callers fall back to the
/// persistence layer on every read.
pub fn from_config(config: &CacheConfig) -> CacheResult<Option<Arc<dyn Cache>>> {
    match config {
        CacheConfig::None => Ok(None),
        CacheConfig::Memory => Ok(Some(Arc::new(MemoryCache::default()))),
        #[cfg(feature = "redis")]
        CacheConfig::Redis(redis_config) => {
            Ok(Some(Arc::new(RedisCache::from_config(redis_config)?)))
        }
        #[cfg(not(feature = "redis"))]
        CacheConfig::Redis(_) => Err(CacheError::Internal(
            "redis cache requested but the redis feature is disabled".to_string(),
        )),
    }
}
