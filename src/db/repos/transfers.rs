use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    db::error::DbResult,
    models::{OwnershipTransfer, TransferRole},
};

#[async_trait]
pub trait TransferRepo: Send + Sync {
    /// Insert a pending transfer.
    ///
    /// Returns `Conflict` when the group already has one pending (unique
    /// constraint on `group_id`).
    async fn create(&self, transfer: &OwnershipTransfer) -> DbResult<()>;

    async fn find_by_id(&self, id: Uuid) -> DbResult<Option<OwnershipTransfer>>;

    async fn find_by_group(&self, group_id: Uuid) -> DbResult<Option<OwnershipTransfer>>;

    /// List transfers where the user is the sender, the recipient, or
    /// either, ordered by `created_at` descending.
    async fn list_for_user(
        &self,
        user_id: Uuid,
        role: TransferRole,
    ) -> DbResult<Vec<OwnershipTransfer>>;

    /// Remove a transfer row. `NotFound` when it does not exist.
    async fn delete(&self, id: Uuid) -> DbResult<()>;

    /// Remove any pending transfer on a group.
    async fn delete_by_group(&self, group_id: Uuid) -> DbResult<u64>;
}
