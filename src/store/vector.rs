use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::Entry;

#[derive(Debug, Error)]
#[error("Vector index error: {0}")]
pub struct VectorIndexError(pub String);

/// Seam to an external embedding + vector-store backend.
///
/// Upsert failures are swallowed by the indexing path: the plaintext
/// projection is still persisted and a singleton retry task is enqueued.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Embed the plaintext projection and upsert it under the entry's id.
    async fn upsert_entry(
        &self,
        entry: &Entry,
        indexed_content: &str,
    ) -> Result<(), VectorIndexError>;

    /// Remove every vector belonging to a conversation group.
    async fn delete_group(&self, group_id: Uuid) -> Result<(), VectorIndexError>;
}
