use uuid::Uuid;

use super::{
    ConversationStore,
    error::{StoreError, StoreResult},
};
use crate::models::{AccessLevel, ConversationRecord};

/// The identity an operation runs as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub user_id: Uuid,
    pub kind: CallerKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallerKind {
    /// End user; must hold a membership of sufficient rank.
    User,
    /// API-key caller with a client bound to the service. Bypasses the
    /// membership check: writer-equivalent for writes, reader for reads.
    Agent,
}

impl Caller {
    pub fn user(user_id: Uuid) -> Self {
        Self {
            user_id,
            kind: CallerKind::User,
        }
    }

    pub fn agent(user_id: Uuid) -> Self {
        Self {
            user_id,
            kind: CallerKind::Agent,
        }
    }

    pub fn is_agent(&self) -> bool {
        self.kind == CallerKind::Agent
    }
}

impl ConversationStore {
    /// Check that the caller holds at least `required` on the group.
    ///
    /// The agent bypass covers writer-equivalent writes and reader
    /// reads only; MANAGER and OWNER operations always go through the
    /// membership check. A missing membership is `AccessDenied`; entity
    /// existence is the caller's responsibility to have established
    /// first (visibility is checked through `find_active` so non-members
    /// never learn whether a conversation exists).
    pub(super) async fn require_group_access(
        &self,
        caller: Caller,
        group_id: Uuid,
        required: AccessLevel,
    ) -> StoreResult<()> {
        if caller.is_agent() && required.rank() <= AccessLevel::Writer.rank() {
            return Ok(());
        }

        match self.db.memberships().find(group_id, caller.user_id).await? {
            Some(m) if m.access_level.rank() >= required.rank() => Ok(()),
            Some(m) => Err(StoreError::AccessDenied(format!(
                "requires {} access, caller has {}",
                required.as_str(),
                m.access_level.as_str()
            ))),
            None => Err(StoreError::AccessDenied(
                "caller is not a member of this conversation".to_string(),
            )),
        }
    }

    /// Resolve a visible conversation and check access in one step.
    ///
    /// Missing or soft-deleted conversations are `NotFound` regardless of
    /// membership, so existence is not revealed to non-members.
    pub(super) async fn require_conversation(
        &self,
        caller: Caller,
        conversation_id: Uuid,
        required: AccessLevel,
    ) -> StoreResult<ConversationRecord> {
        let conversation = self
            .db
            .conversations()
            .find_active(conversation_id)
            .await?
            .ok_or_else(|| StoreError::not_found("conversation", conversation_id))?;

        self.require_group_access(caller, conversation.group_id, required)
            .await?;

        Ok(conversation)
    }
}
