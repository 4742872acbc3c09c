use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{db::error::DbResult, models::ConversationGroup};

#[async_trait]
pub trait GroupRepo: Send + Sync {
    /// Create a new, empty conversation group.
    async fn create(&self, created_at: DateTime<Utc>) -> DbResult<ConversationGroup>;

    /// Get a group by ID, including soft-deleted groups.
    async fn find_by_id(&self, id: Uuid) -> DbResult<Option<ConversationGroup>>;

    /// Soft-delete a group and every non-deleted conversation in it.
    async fn soft_delete(&self, group_id: Uuid, at: DateTime<Utc>) -> DbResult<()>;

    /// Clear `deleted_at` on a group and its conversations.
    ///
    /// Returns `Conflict` if the group is not soft-deleted.
    async fn restore(&self, group_id: Uuid) -> DbResult<()>;

    // ==================== Eviction Operations ====================

    /// Count groups soft-deleted before the cutoff.
    async fn count_evictable(&self, cutoff: DateTime<Utc>) -> DbResult<i64>;

    /// List a batch of evictable group IDs. Advisory only: nothing is
    /// claimed, so use [`GroupRepo::evict_batch`] when multiple workers
    /// compete.
    async fn find_evictable_ids(&self, cutoff: DateTime<Utc>, limit: i64) -> DbResult<Vec<Uuid>>;

    /// Claim and hard-delete one batch of evictable groups, enqueueing a
    /// singleton `vector_store_delete` task per group, all in one
    /// transaction. Returns the evicted ids.
    ///
    /// The Postgres implementation selects with `FOR UPDATE SKIP LOCKED`
    /// and deletes before committing, so concurrent eviction workers
    /// never double-process a batch.
    async fn evict_batch(&self, cutoff: DateTime<Utc>, limit: i64) -> DbResult<Vec<Uuid>>;

    /// Hard-delete groups by ID. Conversations, entries, memberships and
    /// pending transfers go with them via cascade.
    async fn hard_delete(&self, ids: &[Uuid]) -> DbResult<u64>;
}
