use std::{sync::Arc, time::Duration};

use uuid::Uuid;

use super::{CacheExt, CacheKeys, traits::Cache};
use crate::models::StoredEntry;

/// Typed wrapper over the shared cache holding the full current-epoch
/// memory-entry list per `(conversation, client)`.
///
/// The TTL is sliding: refreshed on every read and overwritten on every
/// write. Values hold `StoredEntry` records, so entry content stays
/// ciphertext inside the cache backend.
///
/// Cache failures never fail the caller; they degrade to a miss (reads)
/// or a dropped write-through (writes), with a warning logged.
pub struct EpochCache {
    cache: Arc<dyn Cache>,
    ttl: Duration,
}

impl EpochCache {
    pub fn new(cache: Arc<dyn Cache>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    /// Look up the cached current-epoch list, refreshing the sliding TTL
    /// on a hit.
    pub async fn get(&self, conversation_id: Uuid, client_id: &str) -> Option<Vec<StoredEntry>> {
        let key = CacheKeys::epoch_entries(conversation_id, client_id);
        match self.cache.get_json::<Vec<StoredEntry>>(&key).await {
            Ok(Some(entries)) => {
                if let Err(e) = self.cache.expire(&key, self.ttl).await {
                    tracing::warn!(error = %e, key = %key, "Failed to refresh epoch cache TTL");
                }
                Some(entries)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, key = %key, "Epoch cache read failed, treating as miss");
                None
            }
        }
    }

    /// Replace the cached list. An empty list removes the key.
    pub async fn put(&self, conversation_id: Uuid, client_id: &str, entries: &[StoredEntry]) {
        let key = CacheKeys::epoch_entries(conversation_id, client_id);
        let result = if entries.is_empty() {
            self.cache.delete(&key).await
        } else {
            self.cache.set_json(&key, &entries, self.ttl).await
        };

        if let Err(e) = result {
            tracing::warn!(error = %e, key = %key, "Epoch cache write-through failed");
        }
    }

    /// Drop the cached list for a key.
    pub async fn remove(&self, conversation_id: Uuid, client_id: &str) {
        let key = CacheKeys::epoch_entries(conversation_id, client_id);
        if let Err(e) = self.cache.delete(&key).await {
            tracing::warn!(error = %e, key = %key, "Epoch cache invalidation failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::{
        cache::MemoryCache,
        models::{Channel, StoredEntry},
    };

    fn entry(epoch: i64) -> StoredEntry {
        StoredEntry {
            id: Uuid::new_v4(),
            conversation_id: Uuid::new_v4(),
            group_id: Uuid::new_v4(),
            user_id: None,
            client_id: Some("k1".to_string()),
            channel: Channel::Memory,
            epoch: Some(epoch),
            content_type: "application/json".to_string(),
            content: b"[]".to_vec(),
            indexed_content: None,
            indexed_at: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let cache = EpochCache::new(Arc::new(MemoryCache::default()), Duration::from_secs(60));
        let conv = Uuid::new_v4();

        assert!(cache.get(conv, "k1").await.is_none());

        let entries = vec![entry(1), entry(1)];
        cache.put(conv, "k1", &entries).await;

        let cached = cache.get(conv, "k1").await.unwrap();
        assert_eq!(cached.len(), 2);
        assert_eq!(cached[0].id, entries[0].id);
    }

    #[tokio::test]
    async fn test_empty_put_removes_key() {
        let cache = EpochCache::new(Arc::new(MemoryCache::default()), Duration::from_secs(60));
        let conv = Uuid::new_v4();

        cache.put(conv, "k1", &[entry(1)]).await;
        cache.put(conv, "k1", &[]).await;
        assert!(cache.get(conv, "k1").await.is_none());
    }

    #[tokio::test]
    async fn test_keys_are_isolated_per_client() {
        let cache = EpochCache::new(Arc::new(MemoryCache::default()), Duration::from_secs(60));
        let conv = Uuid::new_v4();

        cache.put(conv, "k1", &[entry(1)]).await;
        assert!(cache.get(conv, "k2").await.is_none());
    }
}
