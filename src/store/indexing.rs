use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

use super::{
    ConversationStore,
    error::{StoreError, StoreResult},
};
use crate::{
    db::repos::cursor::{TimeCursor, truncate_to_millis},
    models::{
        Channel, Entry, EvictableEpoch, NewTask, TASK_RETRY_VECTOR_INDEX, TASK_VECTOR_STORE_DELETE,
    },
};

/// One plaintext projection to attach to a HISTORY entry.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub conversation_id: Uuid,
    pub entry_id: Uuid,
    pub indexed_content: String,
}

/// A page of entries awaiting plaintext projection.
#[derive(Debug, Clone)]
pub struct UnindexedPage {
    pub items: Vec<Entry>,
    /// Opaque cursor (base64 of the last emitted `created_at`); pass back
    /// to continue.
    pub cursor: Option<String>,
}

impl ConversationStore {
    /// Attach plaintext search projections to HISTORY entries and, when a
    /// vector backend is wired, upsert embeddings synchronously.
    ///
    /// Embedding failures are swallowed: the projection is persisted,
    /// `indexed_at` stays null, and a singleton retry task is enqueued for
    /// the async worker.
    pub async fn index_entries(&self, items: Vec<IndexEntry>) -> StoreResult<()> {
        for item in items {
            let stored = self
                .db
                .entries()
                .find_in_conversation(item.conversation_id, item.entry_id)
                .await?
                .ok_or_else(|| StoreError::not_found("entry", item.entry_id))?;

            if stored.channel != Channel::History {
                return Err(StoreError::invalid(
                    "entry",
                    "only history entries are indexable",
                ));
            }

            self.db
                .entries()
                .set_indexed_content(item.entry_id, &item.indexed_content)
                .await?;

            let Some(vector_index) = &self.vector_index else {
                continue;
            };

            let entry = self.decrypt_entry(stored)?;
            match vector_index
                .upsert_entry(&entry, &item.indexed_content)
                .await
            {
                Ok(()) => {
                    self.db
                        .entries()
                        .set_indexed_at(item.entry_id, truncate_to_millis(Utc::now()))
                        .await?;
                }
                Err(e) => {
                    tracing::warn!(
                        entry_id = %item.entry_id,
                        error = %e,
                        "Vector upsert failed; scheduling retry"
                    );
                    self.db
                        .tasks()
                        .enqueue(&NewTask::singleton(
                            TASK_RETRY_VECTOR_INDEX,
                            TASK_RETRY_VECTOR_INDEX,
                            json!({}),
                        ))
                        .await?;
                }
            }
        }

        Ok(())
    }

    /// Page through HISTORY entries that have no plaintext projection yet,
    /// oldest first.
    pub async fn list_unindexed_entries(
        &self,
        limit: i64,
        cursor: Option<&str>,
    ) -> StoreResult<UnindexedPage> {
        let after = cursor
            .map(TimeCursor::decode)
            .transpose()
            .map_err(|e| StoreError::invalid("cursor", e.to_string()))?
            .map(|c| c.0);

        let stored = self.db.entries().list_unindexed(limit, after).await?;
        let cursor = stored
            .last()
            .map(|entry| TimeCursor(entry.created_at).encode());

        Ok(UnindexedPage {
            items: self.decrypt_entries(stored)?,
            cursor,
        })
    }

    /// Entries whose projection exists but whose vector upsert has not
    /// succeeded yet. Consumed by the retry worker.
    pub async fn find_entries_pending_vector_indexing(
        &self,
        limit: i64,
    ) -> StoreResult<Vec<Entry>> {
        let stored = self.db.entries().find_pending_vector_indexing(limit).await?;
        self.decrypt_entries(stored)
    }

    /// Stamp an entry as vector-indexed.
    pub async fn set_indexed_at(&self, entry_id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        self.db.entries().set_indexed_at(entry_id, at).await?;
        Ok(())
    }

    // ==================== Eviction hooks ====================

    pub async fn count_evictable_groups(&self, cutoff: DateTime<Utc>) -> StoreResult<i64> {
        Ok(self.db.groups().count_evictable(cutoff).await?)
    }

    pub async fn find_evictable_group_ids(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Uuid>> {
        Ok(self.db.groups().find_evictable_ids(cutoff, limit).await?)
    }

    /// Claim and hard-delete one batch of evictable groups in a single
    /// transaction, with a singleton `vector_store_delete` task enqueued
    /// per group before the delete commits. The eviction worker's path;
    /// safe under concurrent workers.
    pub async fn evict_group_batch(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Uuid>> {
        Ok(self.db.groups().evict_batch(cutoff, limit).await?)
    }

    /// Hard-delete specific groups, enqueueing one singleton
    /// `vector_store_delete` task per group first. Admin hook; the
    /// enqueue and the delete are separate statements here, so use
    /// [`ConversationStore::evict_group_batch`] for competing workers.
    pub async fn hard_delete_conversation_groups(&self, ids: &[Uuid]) -> StoreResult<u64> {
        for group_id in ids {
            self.db
                .tasks()
                .enqueue(&NewTask::singleton(
                    &format!("{}:{}", TASK_VECTOR_STORE_DELETE, group_id),
                    TASK_VECTOR_STORE_DELETE,
                    json!({ "group_id": group_id }),
                ))
                .await?;
        }
        Ok(self.db.groups().hard_delete(ids).await?)
    }

    pub async fn find_evictable_epochs(
        &self,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<Vec<EvictableEpoch>> {
        Ok(self.db.entries().find_evictable_epochs(cutoff).await?)
    }

    pub async fn count_evictable_epoch_entries(&self, cutoff: DateTime<Utc>) -> StoreResult<i64> {
        Ok(self.db.entries().count_evictable_epoch_entries(cutoff).await?)
    }

    /// Delete the entries of superseded epochs, enqueueing a per-entry
    /// vector-cleanup task first.
    pub async fn delete_entries_for_epochs(
        &self,
        epochs: &[EvictableEpoch],
    ) -> StoreResult<u64> {
        let entry_ids = self.db.entries().list_entry_ids_for_epochs(epochs).await?;
        for entry_id in entry_ids {
            self.db
                .tasks()
                .enqueue(&NewTask::singleton(
                    &format!(
                        "{}:{}",
                        crate::models::TASK_VECTOR_STORE_DELETE_ENTRY,
                        entry_id
                    ),
                    crate::models::TASK_VECTOR_STORE_DELETE_ENTRY,
                    json!({ "entry_id": entry_id }),
                ))
                .await?;
        }
        Ok(self.db.entries().delete_for_epochs(epochs).await?)
    }
}
