use serde_json::{Value, json};
use uuid::Uuid;

use super::{
    Caller, ConversationStore,
    ancestry::{TimelineFilter, filter_timeline, paginate},
    error::{StoreError, StoreResult},
    sync::{SyncDecision, decide},
};
use crate::{
    db::DbError,
    models::{
        AccessLevel, Channel, ConversationRecord, Entry, EpochFilter, NewEntry, NewStoredEntry,
        PagedEntries, StoredEntry, SyncGuard, SyncResult, infer_title,
    },
};

const DEFAULT_ENTRY_LIMIT: usize = 100;

/// Bounded retries when a concurrent sync invalidates the decision this
/// one was based on; each retry re-reads and re-decides.
const MAX_SYNC_ATTEMPTS: usize = 3;

/// Query parameters for fork-aware entry reads.
#[derive(Debug, Clone, Default)]
pub struct EntryQuery {
    /// Resume after this entry id in the filtered timeline.
    pub after: Option<Uuid>,
    pub limit: Option<usize>,
    pub channel: Option<Channel>,
    pub epoch: Option<EpochFilter>,
    pub client_id: Option<String>,
    /// Admin view: the raw group scan instead of one fork's timeline.
    pub all_forks: bool,
}

impl ConversationStore {
    /// Append a user-authored HISTORY entry, creating the conversation on
    /// first use.
    pub async fn append_user_entry(
        &self,
        caller: Caller,
        conversation_id: Uuid,
        content: Vec<Value>,
    ) -> StoreResult<Entry> {
        let record = self
            .ensure_conversation_for_append(caller, conversation_id, &content)
            .await?;

        let row = NewStoredEntry {
            id: Uuid::new_v4(),
            conversation_id: record.id,
            group_id: record.group_id,
            user_id: Some(caller.user_id),
            client_id: None,
            channel: Channel::History,
            epoch: None,
            content_type: "application/json".to_string(),
            content: self.encrypt_content(&content)?,
            created_at: self.now(),
        };

        let mut inserted = self.db.entries().insert(std::slice::from_ref(&row)).await?;
        self.db
            .conversations()
            .touch_updated_at(record.id, row.created_at)
            .await?;

        self.decrypt_entry(inserted.remove(0))
    }

    /// Append a batch of agent entries (MEMORY or HISTORY), creating the
    /// conversation on first use.
    ///
    /// Memory entries without an explicit epoch all land on the current
    /// latest epoch for `(conversation, client)`, or 1 when none exists;
    /// the resolution happens inside the insert transaction.
    pub async fn append_agent_entries(
        &self,
        caller: Caller,
        conversation_id: Uuid,
        entries: Vec<NewEntry>,
        client_id: &str,
        epoch: Option<i64>,
    ) -> StoreResult<Vec<Entry>> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }
        if client_id.is_empty() {
            return Err(StoreError::invalid("client_id", "must not be empty"));
        }
        if let Some(epoch) = epoch
            && epoch < 1
        {
            return Err(StoreError::invalid("epoch", "must be >= 1"));
        }

        let record = self
            .ensure_conversation_for_append(caller, conversation_id, &entries[0].content)
            .await?;

        let mut history_rows = Vec::new();
        let mut memory_rows = Vec::new();
        let mut last_history_at = None;

        for entry in &entries {
            let row = NewStoredEntry {
                id: Uuid::new_v4(),
                conversation_id: record.id,
                group_id: record.group_id,
                user_id: Some(caller.user_id),
                client_id: Some(client_id.to_string()),
                channel: entry.channel,
                epoch: match entry.channel {
                    Channel::Memory => epoch,
                    Channel::History => None,
                },
                content_type: entry.content_type.clone(),
                content: self.encrypt_content(&entry.content)?,
                created_at: self.now(),
            };

            match entry.channel {
                Channel::History => {
                    last_history_at = Some(row.created_at);
                    history_rows.push(row);
                }
                Channel::Memory => memory_rows.push(row),
            }
        }

        let had_memory = !memory_rows.is_empty();
        let mut stored: Vec<StoredEntry> = Vec::with_capacity(entries.len());

        if !history_rows.is_empty() {
            stored.extend(self.db.entries().insert(&history_rows).await?);
        }
        if had_memory {
            if epoch.is_some() {
                stored.extend(self.db.entries().insert(&memory_rows).await?);
            } else {
                stored.extend(
                    self.db
                        .entries()
                        .insert_resolving_epoch(record.id, client_id, memory_rows)
                        .await?,
                );
            }
        }

        // The clock assigned strictly increasing timestamps in input
        // order; merge the two insert paths back into that order.
        stored.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));

        if let Some(at) = last_history_at {
            self.db.conversations().touch_updated_at(record.id, at).await?;
        }
        if had_memory && let Some(cache) = &self.epoch_cache {
            cache.remove(record.id, client_id).await;
        }

        self.decrypt_entries(stored)
    }

    /// Reconcile an agent's working memory against the current latest
    /// epoch: no-op on equality, append the tail on a strict prefix, and
    /// start a fresh epoch on divergence or content-type change.
    pub async fn sync_agent_entry(
        &self,
        caller: Caller,
        conversation_id: Uuid,
        entry: NewEntry,
        client_id: &str,
    ) -> StoreResult<SyncResult> {
        if entry.channel != Channel::Memory {
            return Err(StoreError::invalid(
                "channel",
                "sync entries must be on the memory channel",
            ));
        }
        if client_id.is_empty() {
            return Err(StoreError::invalid("client_id", "must not be empty"));
        }

        let record = self
            .ensure_conversation_for_append(caller, conversation_id, &entry.content)
            .await?;

        for _attempt in 0..MAX_SYNC_ATTEMPTS {
            let latest_stored = self
                .db
                .entries()
                .list_latest_epoch(record.id, client_id)
                .await?;
            let guard = SyncGuard {
                epoch: latest_stored.last().and_then(|e| e.epoch),
                last_entry_id: latest_stored.last().map(|e| e.id),
            };

            let latest = self.decrypt_entries(latest_stored.clone())?;

            let (epoch, epoch_incremented, content) =
                match decide(&latest, &entry.content_type, &entry.content) {
                    SyncDecision::NoOp => {
                        return Ok(SyncResult {
                            entry: None,
                            epoch: guard.epoch.unwrap_or(0),
                            epoch_incremented: false,
                            no_op: true,
                        });
                    }
                    SyncDecision::Extend { tail } => (guard.epoch.unwrap_or(1), false, tail),
                    SyncDecision::Diverge => {
                        (guard.epoch.map(|l| l + 1).unwrap_or(1), true, entry.content.clone())
                    }
                };

            let row = NewStoredEntry {
                id: Uuid::new_v4(),
                conversation_id: record.id,
                group_id: record.group_id,
                user_id: Some(caller.user_id),
                client_id: Some(client_id.to_string()),
                channel: Channel::Memory,
                epoch: Some(epoch),
                content_type: entry.content_type.clone(),
                content: self.encrypt_content(&content)?,
                created_at: self.now(),
            };

            match self.db.entries().insert_guarded(guard, row).await {
                Ok(stored) => {
                    // Write-through: the new full current-epoch list is
                    // known locally, no re-read needed.
                    if let Some(cache) = &self.epoch_cache {
                        let list: Vec<StoredEntry> = if epoch_incremented {
                            vec![stored.clone()]
                        } else {
                            let mut list = latest_stored;
                            list.push(stored.clone());
                            list
                        };
                        cache.put(record.id, client_id, &list).await;
                    }

                    return Ok(SyncResult {
                        entry: Some(self.decrypt_entry(stored)?),
                        epoch,
                        epoch_incremented,
                        no_op: false,
                    });
                }
                // Another sync landed first; re-read and re-decide.
                Err(DbError::Conflict(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(StoreError::Conflict(
            "memory sync retries exhausted under contention".to_string(),
        ))
    }

    /// Fork-aware entry read with channel/epoch/client filters and
    /// in-memory pagination.
    pub async fn get_entries(
        &self,
        caller: Caller,
        conversation_id: Uuid,
        query: EntryQuery,
    ) -> StoreResult<PagedEntries> {
        let record = self
            .require_conversation(caller, conversation_id, AccessLevel::Reader)
            .await?;

        let limit = query.limit.unwrap_or(DEFAULT_ENTRY_LIMIT);
        let filter = TimelineFilter {
            channel: query.channel,
            epoch: query.epoch,
            client_id: query.client_id.clone(),
        };

        // Current-epoch LATEST reads go through the cache.
        if let (Some(cache), Some(EpochFilter::Latest), Some(client), Some(Channel::Memory), false) = (
            self.epoch_cache.as_ref(),
            query.epoch,
            query.client_id.as_deref(),
            query.channel,
            query.all_forks,
        ) {
            if let Some(cached) = cache.get(record.id, client).await {
                let (page, has_more) = paginate(cached, query.after, limit);
                return Ok(PagedEntries {
                    items: self.decrypt_entries(page)?,
                    has_more,
                });
            }

            let filtered = self.scan_timeline(&record, &filter).await?;
            cache.put(record.id, client, &filtered).await;
            let (page, has_more) = paginate(filtered, query.after, limit);
            return Ok(PagedEntries {
                items: self.decrypt_entries(page)?,
                has_more,
            });
        }

        let filtered = if query.all_forks {
            let scan = self.db.entries().list_by_group(record.group_id).await?;
            filter_timeline(scan, None, &filter)
        } else {
            self.scan_timeline(&record, &filter).await?
        };

        let (page, has_more) = paginate(filtered, query.after, limit);
        Ok(PagedEntries {
            items: self.decrypt_entries(page)?,
            has_more,
        })
    }

    /// One ordered group scan filtered down to the conversation's
    /// fork-aware timeline.
    async fn scan_timeline(
        &self,
        record: &ConversationRecord,
        filter: &TimelineFilter,
    ) -> StoreResult<Vec<StoredEntry>> {
        let hops = self.ancestry_stack(record).await?;
        let scan = self.db.entries().list_by_group(record.group_id).await?;
        Ok(filter_timeline(scan, Some(&hops), filter))
    }

    /// Resolve the conversation for an append, creating it (with its
    /// group and an OWNER membership for the caller) when the id is
    /// unknown. The title is inferred from the first textual block.
    async fn ensure_conversation_for_append(
        &self,
        caller: Caller,
        conversation_id: Uuid,
        title_source: &[Value],
    ) -> StoreResult<ConversationRecord> {
        if let Some(record) = self.db.conversations().find_active(conversation_id).await? {
            self.require_group_access(caller, record.group_id, AccessLevel::Writer)
                .await?;
            return Ok(record);
        }

        // Soft-deleted conversations stay invisible; only genuinely
        // unknown ids auto-create.
        if self
            .db
            .conversations()
            .find_any(conversation_id)
            .await?
            .is_some()
        {
            return Err(StoreError::not_found("conversation", conversation_id));
        }

        let title = infer_title(title_source).unwrap_or_default();
        self.create_conversation_record_with_id(caller, conversation_id, &title, json!({}))
            .await
    }
}
