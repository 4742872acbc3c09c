use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;

use super::{
    error::{CacheError, CacheResult},
    traits::Cache,
};
use crate::config::RedisConfig;

/// Redis-backed cache. One instance serves both the memory-entries cache
/// and the response-locator registry, which need shared visibility across
/// nodes.
pub struct RedisCache {
    client: redis::Client,
    op_timeout: Duration,
}

impl RedisCache {
    pub fn from_config(config: &RedisConfig) -> CacheResult<Self> {
        let client = redis::Client::open(config.url.as_str())?;
        Ok(Self {
            client,
            op_timeout: Duration::from_millis(config.op_timeout_ms),
        })
    }

    async fn connection(&self) -> CacheResult<MultiplexedConnection> {
        let conn = self.client.get_multiplexed_async_connection().await?;
        Ok(conn)
    }

    /// Bound a cache call so slow or partitioned Redis degrades to a
    /// `Timeout` error instead of stalling the caller.
    async fn bounded<T>(
        &self,
        fut: impl Future<Output = Result<T, redis::RedisError>>,
    ) -> CacheResult<T> {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(CacheError::Timeout),
        }
    }

    /// TTL in whole seconds, rounded up so sub-second TTLs still expire.
    fn ttl_secs(ttl: Duration) -> u64 {
        ttl.as_secs().max(1)
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get_bytes(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let mut conn = self.connection().await?;
        let value: Option<Vec<u8>> = self
            .bounded(redis::cmd("GET").arg(key).query_async(&mut conn))
            .await?;
        Ok(value)
    }

    async fn set_bytes(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()> {
        let mut conn = self.connection().await?;
        if ttl.is_zero() {
            self.bounded(redis::cmd("SET").arg(key).arg(value).query_async::<()>(&mut conn))
                .await?;
        } else {
            self.bounded(
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("EX")
                    .arg(Self::ttl_secs(ttl))
                    .query_async::<()>(&mut conn),
            )
            .await?;
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.connection().await?;
        self.bounded(redis::cmd("DEL").arg(key).query_async::<()>(&mut conn))
            .await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.connection().await?;
        let exists: bool = self
            .bounded(redis::cmd("EXISTS").arg(key).query_async(&mut conn))
            .await?;
        Ok(exists)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        let mut conn = self.connection().await?;
        let set: bool = self
            .bounded(
                redis::cmd("EXPIRE")
                    .arg(key)
                    .arg(Self::ttl_secs(ttl))
                    .query_async(&mut conn),
            )
            .await?;
        Ok(set)
    }
}
