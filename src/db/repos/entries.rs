use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    db::error::DbResult,
    models::{EvictableEpoch, NewStoredEntry, StoredEntry, SyncGuard},
};

#[async_trait]
pub trait EntryRepo: Send + Sync {
    /// Insert a batch of entries verbatim (HISTORY entries and MEMORY
    /// entries with an explicit epoch).
    async fn insert(&self, entries: &[NewStoredEntry]) -> DbResult<Vec<StoredEntry>>;

    /// Insert a batch of MEMORY entries, resolving the epoch inside one
    /// transaction: the current latest epoch for `(conversation, client)`,
    /// or 1 when none exists. All entries in the batch share the epoch.
    async fn insert_resolving_epoch(
        &self,
        conversation_id: Uuid,
        client_id: &str,
        entries: Vec<NewStoredEntry>,
    ) -> DbResult<Vec<StoredEntry>>;

    /// Append one MEMORY entry, but only if the latest `(epoch, entry id)`
    /// for `(conversation, client)` still matches the guard the caller's
    /// sync decision was based on. Returns `Conflict` otherwise; the
    /// caller re-reads and re-decides.
    async fn insert_guarded(
        &self,
        guard: SyncGuard,
        entry: NewStoredEntry,
    ) -> DbResult<StoredEntry>;

    /// Highest MEMORY epoch recorded for `(conversation, client)`.
    async fn latest_epoch(&self, conversation_id: Uuid, client_id: &str)
    -> DbResult<Option<i64>>;

    /// The entries at the latest epoch for `(conversation, client)`, in
    /// insertion order. Empty when no memory entries exist.
    async fn list_latest_epoch(
        &self,
        conversation_id: Uuid,
        client_id: &str,
    ) -> DbResult<Vec<StoredEntry>>;

    /// Every entry in a group, ordered by `(created_at, id)` ascending.
    /// This is the single scan the fork-aware read path walks.
    async fn list_by_group(&self, group_id: Uuid) -> DbResult<Vec<StoredEntry>>;

    /// Look up an entry, verifying it belongs to the conversation.
    async fn find_in_conversation(
        &self,
        conversation_id: Uuid,
        entry_id: Uuid,
    ) -> DbResult<Option<StoredEntry>>;

    // ==================== Indexing Operations ====================

    /// Write the plaintext search projection of an entry.
    async fn set_indexed_content(&self, entry_id: Uuid, content: &str) -> DbResult<()>;

    /// Stamp `indexed_at` after a successful vector upsert.
    async fn set_indexed_at(&self, entry_id: Uuid, at: DateTime<Utc>) -> DbResult<()>;

    /// HISTORY entries with no plaintext projection yet, ordered by
    /// `created_at` ascending, optionally after a cursor timestamp.
    async fn list_unindexed(
        &self,
        limit: i64,
        after: Option<DateTime<Utc>>,
    ) -> DbResult<Vec<StoredEntry>>;

    /// Entries whose plaintext projection exists but whose vector upsert
    /// has not succeeded (`indexed_at IS NULL`).
    async fn find_pending_vector_indexing(&self, limit: i64) -> DbResult<Vec<StoredEntry>>;

    // ==================== Eviction Operations ====================

    /// `(conversation, client, epoch)` tuples below the latest epoch whose
    /// newest entry is older than the cutoff.
    async fn find_evictable_epochs(&self, cutoff: DateTime<Utc>) -> DbResult<Vec<EvictableEpoch>>;

    /// Count entries belonging to evictable epochs.
    async fn count_evictable_epoch_entries(&self, cutoff: DateTime<Utc>) -> DbResult<i64>;

    /// Entry IDs belonging to the given epoch tuples (for per-entry
    /// vector-cleanup tasks).
    async fn list_entry_ids_for_epochs(&self, epochs: &[EvictableEpoch]) -> DbResult<Vec<Uuid>>;

    /// Hard-delete entries belonging to the given epoch tuples.
    async fn delete_for_epochs(&self, epochs: &[EvictableEpoch]) -> DbResult<u64>;
}
