//! Shared fixtures for repository tests.

use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::{
    db::{
        DbPool,
        repos::{NewConversationRecord, cursor::truncate_to_millis},
    },
    models::{Channel, ConversationGroup, ConversationRecord, NewStoredEntry},
};

/// Millisecond-truncated "now", offset so consecutive calls stay ordered.
pub fn ts(offset_millis: i64) -> DateTime<Utc> {
    truncate_to_millis(Utc::now()) + chrono::Duration::milliseconds(offset_millis)
}

pub async fn seed_group(db: &DbPool) -> ConversationGroup {
    db.groups().create(ts(0)).await.expect("Failed to create group")
}

pub async fn seed_conversation(db: &DbPool, group_id: Uuid, owner: Uuid) -> ConversationRecord {
    db.conversations()
        .create(NewConversationRecord {
            id: Uuid::new_v4(),
            group_id,
            owner_user_id: owner,
            title: b"test".to_vec(),
            metadata: json!({}),
            forked_at_conversation_id: None,
            forked_at_entry_id: None,
            created_at: ts(0),
        })
        .await
        .expect("Failed to create conversation")
}

pub fn history_entry(
    conversation: &ConversationRecord,
    offset_millis: i64,
) -> NewStoredEntry {
    NewStoredEntry {
        id: Uuid::new_v4(),
        conversation_id: conversation.id,
        group_id: conversation.group_id,
        user_id: Some(conversation.owner_user_id),
        client_id: None,
        channel: Channel::History,
        epoch: None,
        content_type: "application/json".to_string(),
        content: br#"[{"type":"text","text":"hi"}]"#.to_vec(),
        created_at: ts(offset_millis),
    }
}

pub fn memory_entry(
    conversation: &ConversationRecord,
    client_id: &str,
    epoch: Option<i64>,
    offset_millis: i64,
) -> NewStoredEntry {
    NewStoredEntry {
        id: Uuid::new_v4(),
        conversation_id: conversation.id,
        group_id: conversation.group_id,
        user_id: Some(conversation.owner_user_id),
        client_id: Some(client_id.to_string()),
        channel: Channel::Memory,
        epoch,
        content_type: "application/json".to_string(),
        content: br#"[{"type":"text","text":"m"}]"#.to_vec(),
        created_at: ts(offset_millis),
    }
}
