use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::{db::error::DbResult, models::ConversationRecord};

/// Insert form for a conversation row. The title is already ciphertext and
/// timestamps have been assigned by the store.
#[derive(Debug, Clone)]
pub struct NewConversationRecord {
    pub id: Uuid,
    pub group_id: Uuid,
    pub owner_user_id: Uuid,
    pub title: Vec<u8>,
    pub metadata: Value,
    pub forked_at_conversation_id: Option<Uuid>,
    pub forked_at_entry_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait ConversationRepo: Send + Sync {
    /// Insert a conversation row.
    async fn create(&self, input: NewConversationRecord) -> DbResult<ConversationRecord>;

    /// Get a visible conversation: neither it nor its group is soft-deleted.
    async fn find_active(&self, id: Uuid) -> DbResult<Option<ConversationRecord>>;

    /// Get a conversation regardless of deletion state.
    async fn find_any(&self, id: Uuid) -> DbResult<Option<ConversationRecord>>;

    /// List conversations in a group, ordered by `created_at` ascending.
    async fn list_in_group(
        &self,
        group_id: Uuid,
        include_deleted: bool,
    ) -> DbResult<Vec<ConversationRecord>>;

    /// List every visible conversation in groups the user is a member of,
    /// ordered by `updated_at` descending then id descending.
    async fn list_for_user(&self, user_id: Uuid) -> DbResult<Vec<ConversationRecord>>;

    /// List visible conversations forked directly from the given parent.
    async fn list_forks(&self, parent_id: Uuid) -> DbResult<Vec<ConversationRecord>>;

    /// Bump `updated_at`. Called on HISTORY appends only.
    async fn touch_updated_at(&self, id: Uuid, at: DateTime<Utc>) -> DbResult<()>;

    /// Set `owner_user_id` on every conversation in a group (ownership
    /// transfer accept).
    async fn set_owner_for_group(&self, group_id: Uuid, owner_user_id: Uuid) -> DbResult<u64>;

    /// Stamp `vectorized_at`.
    async fn set_vectorized_at(&self, id: Uuid, at: DateTime<Utc>) -> DbResult<()>;
}
