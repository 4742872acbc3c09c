use std::time::Duration;

use async_trait::async_trait;

use super::error::CacheResult;

/// Key-value cache with per-key TTLs.
///
/// Backs both the memory-entries cache and the response-locator registry,
/// so the surface is deliberately small: bytes in, bytes out, TTL control.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Get raw bytes from cache
    async fn get_bytes(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Set raw bytes in cache with TTL
    async fn set_bytes(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()>;

    /// Delete a value from cache
    async fn delete(&self, key: &str) -> CacheResult<()>;

    /// Check whether a key exists (and is unexpired).
    async fn exists(&self, key: &str) -> CacheResult<bool>;

    /// Set or update the TTL (expiration) of a key.
    /// Returns true if the TTL was set, false if the key doesn't exist.
    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool>;
}

// Helper extension trait for working with JSON
pub trait CacheExt: Cache {
    async fn get_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        use super::error::CacheError;
        match self.get_bytes(key).await? {
            Some(bytes) => {
                let value = serde_json::from_slice(&bytes)
                    .map_err(|e| CacheError::Deserialization(e.to_string()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn set_json<T: serde::Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> CacheResult<()> {
        use super::error::CacheError;
        let bytes =
            serde_json::to_vec(value).map_err(|e| CacheError::Serialization(e.to_string()))?;
        self.set_bytes(key, &bytes, ttl).await
    }
}

// Blanket implementation for all Cache types
impl<T: Cache + ?Sized> CacheExt for T {}
