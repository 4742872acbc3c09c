use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use validator::Validate;

/// Root of a fork tree; the unit of membership and soft-deletion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationGroup {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Per-user access level on a conversation group.
///
/// Levels are ordered; comparisons go through [`AccessLevel::rank`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    Reader,
    Writer,
    Manager,
    Owner,
}

impl AccessLevel {
    /// Ordinal rank: owner 4 > manager 3 > writer 2 > reader 1.
    pub fn rank(&self) -> u8 {
        match self {
            AccessLevel::Owner => 4,
            AccessLevel::Manager => 3,
            AccessLevel::Writer => 2,
            AccessLevel::Reader => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::Owner => "owner",
            AccessLevel::Manager => "manager",
            AccessLevel::Writer => "writer",
            AccessLevel::Reader => "reader",
        }
    }
}

impl std::str::FromStr for AccessLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner" => Ok(AccessLevel::Owner),
            "manager" => Ok(AccessLevel::Manager),
            "writer" => Ok(AccessLevel::Writer),
            "reader" => Ok(AccessLevel::Reader),
            _ => Err(format!("Invalid access level: {}", s)),
        }
    }
}

/// A user's membership on a conversation group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Membership {
    pub group_id: Uuid,
    pub user_id: Uuid,
    pub access_level: AccessLevel,
    pub created_at: DateTime<Utc>,
}

/// A pending ownership transfer. At most one exists per group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnershipTransfer {
    pub id: Uuid,
    pub group_id: Uuid,
    pub from_user_id: Uuid,
    pub to_user_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Which side of a transfer the caller is listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferRole {
    Sender,
    Recipient,
    All,
}

/// A single timeline within a group, as persisted.
///
/// The title is ciphertext; the store decrypts it into [`Conversation`].
#[derive(Debug, Clone)]
pub struct ConversationRecord {
    pub id: Uuid,
    pub group_id: Uuid,
    pub owner_user_id: Uuid,
    pub title: Vec<u8>,
    pub metadata: Value,
    pub forked_at_conversation_id: Option<Uuid>,
    pub forked_at_entry_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub vectorized_at: Option<DateTime<Utc>>,
}

/// A conversation with its title decrypted, as returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub group_id: Uuid,
    pub owner_user_id: Uuid,
    pub title: String,
    pub metadata: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forked_at_conversation_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forked_at_entry_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vectorized_at: Option<DateTime<Utc>>,
}

/// Request to create a new conversation.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct CreateConversation {
    /// Title of the conversation. Absent titles are stored empty.
    #[validate(length(max = 255))]
    pub title: Option<String>,
    /// Opaque caller metadata, stored verbatim.
    pub metadata: Option<Value>,
}

/// Request to fork a conversation at an entry.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct ForkConversation {
    /// Title for the fork; defaults to the parent's title.
    #[validate(length(max = 255))]
    pub title: Option<String>,
}

/// Filter mode for conversation listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListMode {
    /// Every visible conversation.
    #[default]
    All,
    /// Only roots (conversations that are not forks).
    Roots,
    /// The most recently updated conversation per group.
    LatestFork,
}
