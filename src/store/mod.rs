//! The conversation store: access control, fork-aware reads, epoch-based
//! memory sync, create-on-append, and the eviction/indexing hooks.

mod access;
pub mod ancestry;
mod conversations;
mod entries;
mod error;
mod indexing;
pub mod sync;
mod vector;

use std::sync::{Arc, Mutex};

pub use access::{Caller, CallerKind};
use chrono::{DateTime, Utc};
pub use conversations::*;
pub use entries::*;
pub use error::{StoreError, StoreResult};
pub use indexing::*;
use serde_json::Value;
pub use vector::{VectorIndex, VectorIndexError};

use crate::{
    cache::EpochCache,
    crypto::CipherHandle,
    db::DbPool,
    models::{Conversation, ConversationRecord, Entry, StoredEntry},
};

/// Upper bound on fork-chain depth walked per request. Chains are
/// unbounded by design; the cap defends against cyclic corruption.
const MAX_ANCESTRY_DEPTH: usize = 256;

/// Hands out strictly increasing millisecond timestamps so that entry
/// ordering by `(created_at, id)` is total within one process. Ties
/// across processes break on id.
struct MonotonicClock {
    last_millis: Mutex<i64>,
}

impl MonotonicClock {
    fn new() -> Self {
        Self {
            last_millis: Mutex::new(0),
        }
    }

    fn next(&self) -> DateTime<Utc> {
        let now = Utc::now().timestamp_millis();
        let mut last = self.last_millis.lock().unwrap_or_else(|e| e.into_inner());
        let assigned = now.max(*last + 1);
        *last = assigned;
        DateTime::from_timestamp_millis(assigned).unwrap_or_else(Utc::now)
    }
}

/// Business-logic layer over the persistence driver, the memory-entries
/// cache, and the encryption boundary.
pub struct ConversationStore {
    db: Arc<DbPool>,
    cipher: CipherHandle,
    epoch_cache: Option<EpochCache>,
    vector_index: Option<Arc<dyn VectorIndex>>,
    clock: MonotonicClock,
}

impl ConversationStore {
    pub fn new(
        db: Arc<DbPool>,
        cipher: CipherHandle,
        epoch_cache: Option<EpochCache>,
        vector_index: Option<Arc<dyn VectorIndex>>,
    ) -> Self {
        Self {
            db,
            cipher,
            epoch_cache,
            vector_index,
            clock: MonotonicClock::new(),
        }
    }

    pub fn db(&self) -> &Arc<DbPool> {
        &self.db
    }

    /// Next server-assigned entry timestamp.
    pub(super) fn now(&self) -> DateTime<Utc> {
        self.clock.next()
    }

    // ==================== Encryption helpers ====================

    pub(super) fn encrypt_title(&self, title: &str) -> StoreResult<Vec<u8>> {
        Ok(self.cipher.encrypt(title.as_bytes())?)
    }

    pub(super) fn decrypt_title(&self, ciphertext: &[u8]) -> StoreResult<String> {
        let bytes = self.cipher.decrypt(ciphertext)?;
        String::from_utf8(bytes)
            .map_err(|_| StoreError::invalid("title", "stored title is not valid UTF-8"))
    }

    pub(super) fn encrypt_content(&self, blocks: &[Value]) -> StoreResult<Vec<u8>> {
        let plaintext = serde_json::to_vec(blocks)
            .map_err(|e| StoreError::invalid("content", e.to_string()))?;
        Ok(self.cipher.encrypt(&plaintext)?)
    }

    pub(super) fn decrypt_content(&self, ciphertext: &[u8]) -> StoreResult<Vec<Value>> {
        let plaintext = self.cipher.decrypt(ciphertext)?;
        serde_json::from_slice(&plaintext)
            .map_err(|e| StoreError::invalid("content", e.to_string()))
    }

    pub(super) fn decrypt_entry(&self, stored: StoredEntry) -> StoreResult<Entry> {
        let content = self.decrypt_content(&stored.content)?;
        Ok(Entry {
            id: stored.id,
            conversation_id: stored.conversation_id,
            group_id: stored.group_id,
            user_id: stored.user_id,
            client_id: stored.client_id,
            channel: stored.channel,
            epoch: stored.epoch,
            content_type: stored.content_type,
            content,
            indexed_content: stored.indexed_content,
            indexed_at: stored.indexed_at,
            created_at: stored.created_at,
        })
    }

    pub(super) fn decrypt_entries(&self, stored: Vec<StoredEntry>) -> StoreResult<Vec<Entry>> {
        stored
            .into_iter()
            .map(|entry| self.decrypt_entry(entry))
            .collect()
    }

    pub(super) fn decrypt_conversation(
        &self,
        record: ConversationRecord,
    ) -> StoreResult<Conversation> {
        Ok(Conversation {
            id: record.id,
            group_id: record.group_id,
            owner_user_id: record.owner_user_id,
            title: self.decrypt_title(&record.title)?,
            metadata: record.metadata,
            forked_at_conversation_id: record.forked_at_conversation_id,
            forked_at_entry_id: record.forked_at_entry_id,
            created_at: record.created_at,
            updated_at: record.updated_at,
            vectorized_at: record.vectorized_at,
        })
    }

    /// Build the root-to-target ancestry stack for a conversation. Each
    /// hop carries the fork point recorded by its child; the target hop
    /// carries `None`.
    pub(super) async fn ancestry_stack(
        &self,
        target: &ConversationRecord,
    ) -> StoreResult<Vec<ancestry::AncestryHop>> {
        let mut stack = vec![ancestry::AncestryHop {
            conversation_id: target.id,
            stop_entry_id: None,
        }];

        let mut fork_parent = target.forked_at_conversation_id;
        let mut stop = target.forked_at_entry_id;

        while let Some(parent_id) = fork_parent {
            if stack.len() >= MAX_ANCESTRY_DEPTH {
                return Err(StoreError::invalid(
                    "conversation",
                    format!("fork ancestry deeper than {} hops", MAX_ANCESTRY_DEPTH),
                ));
            }

            let parent = self
                .db
                .conversations()
                .find_any(parent_id)
                .await?
                .ok_or_else(|| StoreError::not_found("conversation", parent_id))?;

            stack.push(ancestry::AncestryHop {
                conversation_id: parent.id,
                stop_entry_id: stop,
            });

            fork_parent = parent.forked_at_conversation_id;
            stop = parent.forked_at_entry_id;
        }

        stack.reverse();
        Ok(stack)
    }
}

#[cfg(test)]
mod clock_tests {
    use super::MonotonicClock;

    #[test]
    fn test_timestamps_strictly_increase() {
        let clock = MonotonicClock::new();
        let mut prev = clock.next();
        for _ in 0..100 {
            let next = clock.next();
            assert!(next > prev);
            prev = next;
        }
    }
}
