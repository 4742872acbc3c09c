use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    db::error::DbResult,
    models::{NewTask, Task},
};

#[async_trait]
pub trait TaskRepo: Send + Sync {
    /// Enqueue a task. For singleton tasks (those carrying a `task_name`)
    /// an existing row with the same name wins and `None` is returned.
    async fn enqueue(&self, task: &NewTask) -> DbResult<Option<Task>>;

    /// Claim a batch of due tasks and push their `retry_at` past the lease
    /// window so other workers skip them. The Postgres implementation
    /// selects with `FOR UPDATE SKIP LOCKED`.
    async fn dequeue_batch(&self, limit: i64, lease: chrono::Duration) -> DbResult<Vec<Task>>;

    /// Delete a finished task.
    async fn complete(&self, id: Uuid) -> DbResult<()>;

    /// Record a failed attempt: bump `retry_count`, set `last_error`, and
    /// reschedule.
    async fn fail(&self, id: Uuid, error: &str, retry_at: DateTime<Utc>) -> DbResult<()>;

    /// Total queued tasks.
    async fn count(&self) -> DbResult<i64>;
}
