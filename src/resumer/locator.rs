use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use uuid::Uuid;

use super::{
    address::NodeAddress,
    error::{ResumerError, ResumerResult},
};
use crate::cache::{Cache, CacheKeys};

/// Where a response recording lives: the owning node and its spool file.
///
/// Wire format in the shared registry is ASCII `host|port|fileName`; the
/// key's TTL doubles as the liveness signal, refreshed while recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    pub host: String,
    pub port: u16,
    pub file_name: String,
}

impl Locator {
    pub fn new(address: &NodeAddress, file_name: impl Into<String>) -> Self {
        Self {
            host: address.host.clone(),
            port: address.port,
            file_name: file_name.into(),
        }
    }

    pub fn address(&self) -> NodeAddress {
        NodeAddress::new(self.host.clone(), self.port)
    }

    pub fn encode(&self) -> String {
        format!("{}|{}|{}", self.host, self.port, self.file_name)
    }

    pub fn decode(raw: &str) -> ResumerResult<Self> {
        let mut parts = raw.splitn(3, '|');
        let (Some(host), Some(port), Some(file_name)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(ResumerError::Transient(format!(
                "malformed locator value: {raw:?}"
            )));
        };

        let port = port
            .parse::<u16>()
            .map_err(|_| ResumerError::Transient(format!("malformed locator port: {raw:?}")))?;

        Ok(Self {
            host: host.to_string(),
            port,
            file_name: file_name.to_string(),
        })
    }
}

/// Shared `conversation -> locator` registry.
#[async_trait]
pub trait LocatorStore: Send + Sync {
    /// Upsert the locator with a fresh TTL. The last writer wins by
    /// design; a recorder that lost the race is discovered via redirect.
    async fn put(&self, conversation_id: Uuid, locator: &Locator, ttl: Duration)
    -> ResumerResult<()>;

    async fn get(&self, conversation_id: Uuid) -> ResumerResult<Option<Locator>>;

    async fn remove(&self, conversation_id: Uuid) -> ResumerResult<()>;

    /// Bulk existence check, same order as the input.
    async fn check(&self, conversation_ids: &[Uuid]) -> ResumerResult<Vec<bool>>;
}

/// Locator registry over the shared cache backend (Redis in multi-node
/// deployments, in-process memory for single-node and tests).
pub struct CacheLocatorStore {
    cache: Arc<dyn Cache>,
}

impl CacheLocatorStore {
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl LocatorStore for CacheLocatorStore {
    async fn put(
        &self,
        conversation_id: Uuid,
        locator: &Locator,
        ttl: Duration,
    ) -> ResumerResult<()> {
        let key = CacheKeys::resume_locator(conversation_id);
        self.cache
            .set_bytes(&key, locator.encode().as_bytes(), ttl)
            .await?;
        Ok(())
    }

    async fn get(&self, conversation_id: Uuid) -> ResumerResult<Option<Locator>> {
        let key = CacheKeys::resume_locator(conversation_id);
        match self.cache.get_bytes(&key).await? {
            Some(bytes) => {
                let raw = String::from_utf8(bytes).map_err(|_| {
                    ResumerError::Transient("locator value is not UTF-8".to_string())
                })?;
                Ok(Some(Locator::decode(&raw)?))
            }
            None => Ok(None),
        }
    }

    async fn remove(&self, conversation_id: Uuid) -> ResumerResult<()> {
        let key = CacheKeys::resume_locator(conversation_id);
        self.cache.delete(&key).await?;
        Ok(())
    }

    async fn check(&self, conversation_ids: &[Uuid]) -> ResumerResult<Vec<bool>> {
        let mut results = Vec::with_capacity(conversation_ids.len());
        for id in conversation_ids {
            let key = CacheKeys::resume_locator(*id);
            results.push(self.cache.exists(&key).await?);
        }
        Ok(results)
    }
}
