use async_trait::async_trait;
use uuid::Uuid;

use crate::{db::error::DbResult, models::Membership};

#[async_trait]
pub trait MembershipRepo: Send + Sync {
    /// Insert or update a membership row.
    async fn upsert(&self, membership: &Membership) -> DbResult<()>;

    /// Look up a user's membership on a group.
    async fn find(&self, group_id: Uuid, user_id: Uuid) -> DbResult<Option<Membership>>;

    /// List all memberships on a group, ordered by `created_at` ascending.
    async fn list_by_group(&self, group_id: Uuid) -> DbResult<Vec<Membership>>;

    /// Remove a single membership. `NotFound` when it does not exist.
    async fn delete(&self, group_id: Uuid, user_id: Uuid) -> DbResult<()>;

    /// Hard-delete every membership on a group (conversation deletion).
    async fn delete_by_group(&self, group_id: Uuid) -> DbResult<u64>;
}
