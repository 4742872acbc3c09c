//! Eviction worker.
//!
//! Periodically hard-deletes conversation groups whose soft-deletion
//! predates the retention window, and prunes superseded memory epochs
//! that have gone equally stale. Vector-store cleanup is handed off to
//! external workers via tasks enqueued before each delete.

use std::sync::Arc;

use chrono::Utc;

use crate::{config::RetentionConfig, store::ConversationStore};

/// Results from a single eviction run.
#[derive(Debug, Default)]
pub struct EvictionRunResult {
    /// Number of conversation groups hard-deleted.
    pub groups_deleted: u64,
    /// Number of superseded memory-epoch entries deleted.
    pub epoch_entries_deleted: u64,
}

impl EvictionRunResult {
    pub fn total(&self) -> u64 {
        self.groups_deleted + self.epoch_entries_deleted
    }

    pub fn has_deletions(&self) -> bool {
        self.total() > 0
    }
}

/// Starts the eviction worker as a background task.
///
/// The worker runs in a loop at the configured interval until the task is
/// cancelled. Batches that fail are logged and retried on the next tick.
pub async fn start_eviction_worker(store: Arc<ConversationStore>, config: RetentionConfig) {
    if !config.enabled {
        tracing::info!("Eviction worker disabled by configuration");
        return;
    }

    tracing::info!(
        retention_days = config.retention_days,
        interval_secs = config.interval_secs,
        batch_size = config.batch_size,
        "Starting eviction worker"
    );

    let interval = config.interval();

    loop {
        match run_eviction(&store, &config).await {
            Ok(result) => {
                if result.has_deletions() {
                    tracing::info!(
                        groups = result.groups_deleted,
                        epoch_entries = result.epoch_entries_deleted,
                        "Eviction run complete"
                    );
                } else {
                    tracing::debug!("Eviction run complete, nothing to delete");
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Error running eviction");
            }
        }

        tokio::time::sleep(interval).await;
    }
}

/// Run a single eviction pass over groups and stale epochs.
pub async fn run_eviction(
    store: &Arc<ConversationStore>,
    config: &RetentionConfig,
) -> Result<EvictionRunResult, Box<dyn std::error::Error + Send + Sync>> {
    let mut result = EvictionRunResult::default();
    let cutoff = Utc::now() - config.retention();

    result.groups_deleted = evict_groups(store, config).await?;

    match store.find_evictable_epochs(cutoff).await {
        Ok(epochs) if !epochs.is_empty() => {
            let deleted = store.delete_entries_for_epochs(&epochs).await?;
            tracing::debug!(
                epochs = epochs.len(),
                entries = deleted,
                cutoff = %cutoff,
                "Evicted superseded memory epochs"
            );
            result.epoch_entries_deleted = deleted;
        }
        Ok(_) => {}
        Err(e) => {
            tracing::error!(error = %e, "Epoch eviction pass failed");
        }
    }

    Ok(result)
}

/// Hard-delete evictable groups in batches, pausing between batches.
async fn evict_groups(
    store: &Arc<ConversationStore>,
    config: &RetentionConfig,
) -> Result<u64, Box<dyn std::error::Error + Send + Sync>> {
    let cutoff = Utc::now() - config.retention();

    let evictable = store.count_evictable_groups(cutoff).await?;
    if evictable == 0 {
        return Ok(0);
    }

    tracing::info!(
        evictable,
        cutoff = %cutoff,
        "Evicting soft-deleted conversation groups"
    );

    let mut total_deleted = 0u64;
    loop {
        // Each batch is claimed and deleted in one transaction, so
        // concurrent workers never double-process a group.
        let ids = store
            .evict_group_batch(cutoff, config.batch_size as i64)
            .await?;
        if ids.is_empty() {
            break;
        }

        total_deleted += ids.len() as u64;
        tokio::time::sleep(config.batch_delay()).await;
    }

    Ok(total_deleted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eviction_run_result_total() {
        let result = EvictionRunResult {
            groups_deleted: 3,
            epoch_entries_deleted: 7,
        };
        assert_eq!(result.total(), 10);
        assert!(result.has_deletions());
    }

    #[test]
    fn test_eviction_run_result_default() {
        let result = EvictionRunResult::default();
        assert_eq!(result.total(), 0);
        assert!(!result.has_deletions());
    }
}
