use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use super::{
    Caller, ConversationStore,
    error::{StoreError, StoreResult},
};
use crate::{
    db::repos::{Cursor, NewConversationRecord, cursor::truncate_to_millis},
    models::{
        AccessLevel, Conversation, CreateConversation, ForkConversation, ListMode, Membership,
        OwnershipTransfer, TransferRole,
    },
};

/// Query parameters for conversation listings.
#[derive(Debug, Clone, Default)]
pub struct ListConversations {
    /// Case-insensitive substring filter on decrypted titles.
    pub query: Option<String>,
    /// Opaque cursor from a previous page (`updated_at`-keyed).
    pub after: Option<String>,
    pub limit: Option<usize>,
    pub mode: ListMode,
}

const DEFAULT_LIST_LIMIT: usize = 50;

impl ConversationStore {
    /// Create a conversation, its group, and the caller's OWNER membership.
    pub async fn create_conversation(
        &self,
        caller: Caller,
        input: CreateConversation,
    ) -> StoreResult<Conversation> {
        input
            .validate()
            .map_err(|e| StoreError::invalid("conversation", e.to_string()))?;

        let title = input.title.unwrap_or_default();
        let metadata = input.metadata.unwrap_or_else(|| json!({}));
        let record = self
            .create_conversation_record_with_id(caller, Uuid::new_v4(), &title, metadata)
            .await?;
        self.decrypt_conversation(record)
    }

    /// Create a group, a conversation with the given id, and the caller's
    /// OWNER membership. Also the create-on-append path, which dictates
    /// the explicit conversation id.
    pub(super) async fn create_conversation_record_with_id(
        &self,
        caller: Caller,
        conversation_id: Uuid,
        title: &str,
        metadata: serde_json::Value,
    ) -> StoreResult<crate::models::ConversationRecord> {
        let now = truncate_to_millis(chrono::Utc::now());
        let group = self.db.groups().create(now).await?;

        let record = self
            .db
            .conversations()
            .create(NewConversationRecord {
                id: conversation_id,
                group_id: group.id,
                owner_user_id: caller.user_id,
                title: self.encrypt_title(title)?,
                metadata,
                forked_at_conversation_id: None,
                forked_at_entry_id: None,
                created_at: now,
            })
            .await?;

        self.db
            .memberships()
            .upsert(&Membership {
                group_id: group.id,
                user_id: caller.user_id,
                access_level: AccessLevel::Owner,
                created_at: now,
            })
            .await?;

        Ok(record)
    }

    /// Get a visible conversation the caller can read.
    pub async fn get_conversation(
        &self,
        caller: Caller,
        conversation_id: Uuid,
    ) -> StoreResult<Conversation> {
        let record = self
            .require_conversation(caller, conversation_id, AccessLevel::Reader)
            .await?;
        self.decrypt_conversation(record)
    }

    /// List conversations visible to the caller, most recently updated
    /// first.
    ///
    /// Titles are encrypted at rest, so the `query` filter and pagination
    /// run in memory after decryption.
    pub async fn list_conversations(
        &self,
        caller: Caller,
        params: ListConversations,
    ) -> StoreResult<Vec<Conversation>> {
        let records = self.db.conversations().list_for_user(caller.user_id).await?;

        let mut conversations = Vec::with_capacity(records.len());
        let mut seen_groups = std::collections::HashSet::new();
        for record in records {
            match params.mode {
                ListMode::All => {}
                ListMode::Roots => {
                    if record.forked_at_conversation_id.is_some() {
                        continue;
                    }
                }
                // The listing is updated_at-descending, so the first
                // conversation seen per group is the latest fork.
                ListMode::LatestFork => {
                    if !seen_groups.insert(record.group_id) {
                        continue;
                    }
                }
            }
            conversations.push(self.decrypt_conversation(record)?);
        }

        if let Some(query) = &params.query {
            let needle = query.to_lowercase();
            conversations.retain(|c| c.title.to_lowercase().contains(&needle));
        }

        if let Some(after) = &params.after {
            let cursor = Cursor::decode(after)
                .map_err(|e| StoreError::invalid("after", e.to_string()))?;
            // Descending order: the page resumes strictly below the
            // cursor's (updated_at, id) position.
            conversations.retain(|c| (c.updated_at, c.id) < (cursor.timestamp, cursor.id));
        }

        conversations.truncate(params.limit.unwrap_or(DEFAULT_LIST_LIMIT));
        Ok(conversations)
    }

    /// Delete a conversation's whole group: audit the memberships away,
    /// soft-delete the group and its conversations, and drop any pending
    /// ownership transfer.
    pub async fn delete_conversation(
        &self,
        caller: Caller,
        conversation_id: Uuid,
    ) -> StoreResult<()> {
        let record = self
            .require_conversation(caller, conversation_id, AccessLevel::Manager)
            .await?;

        let memberships = self.db.memberships().list_by_group(record.group_id).await?;
        for membership in &memberships {
            tracing::info!(
                group_id = %membership.group_id,
                user_id = %membership.user_id,
                access_level = membership.access_level.as_str(),
                removed_by = %caller.user_id,
                "membership_removed"
            );
        }

        self.db.memberships().delete_by_group(record.group_id).await?;
        self.db
            .groups()
            .soft_delete(record.group_id, truncate_to_millis(chrono::Utc::now()))
            .await?;
        self.db.transfers().delete_by_group(record.group_id).await?;

        Ok(())
    }

    /// Admin restore: clear `deleted_at` on a group and its conversations.
    /// Memberships are not restored. Callers gate this behind an admin
    /// role; the store only checks the group state.
    pub async fn restore_group(&self, group_id: Uuid) -> StoreResult<()> {
        self.db.groups().restore(group_id).await?;
        Ok(())
    }

    // ==================== Forks ====================

    /// Fork a conversation at an entry: the fork's timeline borrows
    /// history strictly before `entry_id`.
    ///
    /// The recorded fork point is the entry preceding `entry_id` in the
    /// source's fork-aware timeline, which may live in an ancestor; the
    /// fork then hangs off that ancestor directly.
    pub async fn fork_conversation_at_entry(
        &self,
        caller: Caller,
        source_conversation_id: Uuid,
        entry_id: Uuid,
        input: ForkConversation,
    ) -> StoreResult<Conversation> {
        input
            .validate()
            .map_err(|e| StoreError::invalid("conversation", e.to_string()))?;

        let source = self
            .require_conversation(caller, source_conversation_id, AccessLevel::Writer)
            .await?;

        let hops = self.ancestry_stack(&source).await?;
        let scan = self.db.entries().list_by_group(source.group_id).await?;
        let timeline = super::ancestry::filter_timeline(
            scan,
            Some(&hops),
            &super::ancestry::TimelineFilter::default(),
        );

        let position = timeline
            .iter()
            .position(|e| e.id == entry_id)
            .ok_or_else(|| StoreError::not_found("entry", entry_id))?;
        if position == 0 {
            return Err(StoreError::invalid(
                "entry",
                "cannot fork before the first entry of a conversation",
            ));
        }
        let fork_point = &timeline[position - 1];

        let now = truncate_to_millis(chrono::Utc::now());
        let title = match input.title {
            Some(title) => self.encrypt_title(&title)?,
            None => source.title.clone(),
        };

        let record = self
            .db
            .conversations()
            .create(NewConversationRecord {
                id: Uuid::new_v4(),
                group_id: source.group_id,
                owner_user_id: source.owner_user_id,
                title,
                metadata: source.metadata.clone(),
                forked_at_conversation_id: Some(fork_point.conversation_id),
                forked_at_entry_id: Some(fork_point.id),
                created_at: now,
            })
            .await?;

        self.decrypt_conversation(record)
    }

    /// List visible direct forks of a conversation.
    pub async fn list_forks(
        &self,
        caller: Caller,
        conversation_id: Uuid,
    ) -> StoreResult<Vec<Conversation>> {
        self.require_conversation(caller, conversation_id, AccessLevel::Reader)
            .await?;

        let records = self.db.conversations().list_forks(conversation_id).await?;
        records
            .into_iter()
            .map(|record| self.decrypt_conversation(record))
            .collect()
    }

    // ==================== Memberships ====================

    pub async fn list_memberships(
        &self,
        caller: Caller,
        conversation_id: Uuid,
    ) -> StoreResult<Vec<Membership>> {
        let record = self
            .require_conversation(caller, conversation_id, AccessLevel::Reader)
            .await?;
        Ok(self.db.memberships().list_by_group(record.group_id).await?)
    }

    /// Grant or update a user's access. Ownership moves only through
    /// transfers, never through share.
    pub async fn share(
        &self,
        caller: Caller,
        conversation_id: Uuid,
        user_id: Uuid,
        access_level: AccessLevel,
    ) -> StoreResult<Membership> {
        if access_level == AccessLevel::Owner {
            return Err(StoreError::invalid(
                "access_level",
                "ownership is granted through transfers",
            ));
        }

        let record = self
            .require_conversation(caller, conversation_id, AccessLevel::Manager)
            .await?;

        if let Some(existing) = self.db.memberships().find(record.group_id, user_id).await?
            && existing.access_level == AccessLevel::Owner
        {
            return Err(StoreError::Conflict(
                "cannot change the owner's membership".to_string(),
            ));
        }

        let membership = Membership {
            group_id: record.group_id,
            user_id,
            access_level,
            created_at: truncate_to_millis(chrono::Utc::now()),
        };
        self.db.memberships().upsert(&membership).await?;
        Ok(membership)
    }

    /// Alias for updating an existing membership's level.
    pub async fn update_membership(
        &self,
        caller: Caller,
        conversation_id: Uuid,
        user_id: Uuid,
        access_level: AccessLevel,
    ) -> StoreResult<Membership> {
        self.share(caller, conversation_id, user_id, access_level)
            .await
    }

    pub async fn delete_membership(
        &self,
        caller: Caller,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> StoreResult<()> {
        let record = self
            .require_conversation(caller, conversation_id, AccessLevel::Manager)
            .await?;

        let membership = self
            .db
            .memberships()
            .find(record.group_id, user_id)
            .await?
            .ok_or_else(|| StoreError::not_found("membership", user_id))?;

        if membership.access_level == AccessLevel::Owner {
            return Err(StoreError::Conflict(
                "cannot remove the owner's membership".to_string(),
            ));
        }

        self.db.memberships().delete(record.group_id, user_id).await?;
        Ok(())
    }

    // ==================== Ownership transfers ====================

    /// Offer group ownership to another user. At most one transfer may be
    /// pending per group.
    pub async fn create_transfer(
        &self,
        caller: Caller,
        conversation_id: Uuid,
        to_user_id: Uuid,
    ) -> StoreResult<OwnershipTransfer> {
        let record = self
            .require_conversation(caller, conversation_id, AccessLevel::Owner)
            .await?;

        if to_user_id == caller.user_id {
            return Err(StoreError::invalid(
                "to_user_id",
                "cannot transfer ownership to yourself",
            ));
        }

        let transfer = OwnershipTransfer {
            id: Uuid::new_v4(),
            group_id: record.group_id,
            from_user_id: caller.user_id,
            to_user_id,
            created_at: truncate_to_millis(chrono::Utc::now()),
        };
        self.db.transfers().create(&transfer).await?;
        Ok(transfer)
    }

    /// List pending transfers where the caller is sender, recipient, or
    /// either.
    pub async fn list_pending_transfers(
        &self,
        caller: Caller,
        role: TransferRole,
    ) -> StoreResult<Vec<OwnershipTransfer>> {
        Ok(self
            .db
            .transfers()
            .list_for_user(caller.user_id, role)
            .await?)
    }

    /// Fetch a transfer the caller participates in.
    pub async fn get_transfer(
        &self,
        caller: Caller,
        transfer_id: Uuid,
    ) -> StoreResult<OwnershipTransfer> {
        let transfer = self.find_participant_transfer(caller, transfer_id).await?;
        Ok(transfer)
    }

    /// Accept a transfer: the recipient becomes OWNER, the sender drops to
    /// MANAGER, and every conversation in the group changes owner.
    pub async fn accept_transfer(
        &self,
        caller: Caller,
        transfer_id: Uuid,
    ) -> StoreResult<()> {
        let transfer = self.find_participant_transfer(caller, transfer_id).await?;
        if transfer.to_user_id != caller.user_id {
            return Err(StoreError::AccessDenied(
                "only the recipient can accept a transfer".to_string(),
            ));
        }

        let now = truncate_to_millis(chrono::Utc::now());
        self.db
            .memberships()
            .upsert(&Membership {
                group_id: transfer.group_id,
                user_id: transfer.to_user_id,
                access_level: AccessLevel::Owner,
                created_at: now,
            })
            .await?;
        self.db
            .memberships()
            .upsert(&Membership {
                group_id: transfer.group_id,
                user_id: transfer.from_user_id,
                access_level: AccessLevel::Manager,
                created_at: now,
            })
            .await?;
        self.db
            .conversations()
            .set_owner_for_group(transfer.group_id, transfer.to_user_id)
            .await?;
        self.db.transfers().delete(transfer.id).await?;

        Ok(())
    }

    /// Cancel (sender) or decline (recipient) a pending transfer.
    pub async fn delete_transfer(&self, caller: Caller, transfer_id: Uuid) -> StoreResult<()> {
        let transfer = self.find_participant_transfer(caller, transfer_id).await?;
        self.db.transfers().delete(transfer.id).await?;
        Ok(())
    }

    async fn find_participant_transfer(
        &self,
        caller: Caller,
        transfer_id: Uuid,
    ) -> StoreResult<OwnershipTransfer> {
        let transfer = self
            .db
            .transfers()
            .find_by_id(transfer_id)
            .await?
            .ok_or_else(|| StoreError::not_found("transfer", transfer_id))?;

        if transfer.from_user_id != caller.user_id && transfer.to_user_id != caller.user_id {
            // Participants only; everyone else learns nothing.
            return Err(StoreError::not_found("transfer", transfer_id));
        }

        Ok(transfer)
    }
}
