use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Task type for deleting a hard-deleted group's vectors.
pub const TASK_VECTOR_STORE_DELETE: &str = "vector_store_delete";
/// Task type for deleting a single evicted entry's vectors.
pub const TASK_VECTOR_STORE_DELETE_ENTRY: &str = "vector_store_delete_entry";
/// Singleton task type for retrying failed embedding upserts.
pub const TASK_RETRY_VECTOR_INDEX: &str = "retry_vector_index";

/// A background work item consumed by external async workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    /// Unique name for singleton tasks; enqueueing an existing name is a no-op.
    pub task_name: Option<String>,
    pub task_type: String,
    pub task_body: Value,
    pub created_at: DateTime<Utc>,
    pub retry_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub retry_count: i32,
}

/// Input for enqueueing a task.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub task_name: Option<String>,
    pub task_type: String,
    pub task_body: Value,
}

impl NewTask {
    pub fn new(task_type: &str, task_body: Value) -> Self {
        Self {
            task_name: None,
            task_type: task_type.to_string(),
            task_body,
        }
    }

    /// A singleton task: at most one row with this name exists at a time.
    pub fn singleton(task_name: &str, task_type: &str, task_body: Value) -> Self {
        Self {
            task_name: Some(task_name.to_string()),
            task_type: task_type.to_string(),
            task_body,
        }
    }
}
