use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Maximum length of a title inferred from entry content.
const INFERRED_TITLE_MAX: usize = 40;

/// Channel an entry is recorded on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// The visible conversation timeline.
    History,
    /// Agent working memory; every memory entry carries an epoch >= 1.
    Memory,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::History => "history",
            Channel::Memory => "memory",
        }
    }
}

impl std::str::FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "history" => Ok(Channel::History),
            "memory" => Ok(Channel::Memory),
            _ => Err(format!("Invalid channel: {}", s)),
        }
    }
}

/// Epoch selection for memory-channel reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpochFilter {
    /// Entries at the highest epoch observed in the filtered timeline.
    Latest,
    /// Every memory entry regardless of epoch.
    All,
    /// Entries at exactly this epoch.
    Epoch(i64),
}

/// An entry as persisted: content is an encrypted JSON array of blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEntry {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub group_id: Uuid,
    pub user_id: Option<Uuid>,
    pub client_id: Option<String>,
    pub channel: Channel,
    pub epoch: Option<i64>,
    pub content_type: String,
    pub content: Vec<u8>,
    pub indexed_content: Option<String>,
    pub indexed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// An entry with its content decrypted into opaque blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub group_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    pub channel: Channel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epoch: Option<i64>,
    pub content_type: String,
    /// Ordered list of opaque content blocks. The store never interprets
    /// these beyond locating the first `text` field for title inference.
    pub content: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indexed_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indexed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Input for a single agent-authored entry.
#[derive(Debug, Clone, Deserialize)]
pub struct NewEntry {
    pub channel: Channel,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    #[serde(default)]
    pub content: Vec<Value>,
}

fn default_content_type() -> String {
    "application/json".to_string()
}

/// Insert form handed to the persistence layer. Content is ciphertext and
/// `created_at` has already been assigned by the store's monotonic clock.
#[derive(Debug, Clone)]
pub struct NewStoredEntry {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub group_id: Uuid,
    pub user_id: Option<Uuid>,
    pub client_id: Option<String>,
    pub channel: Channel,
    pub epoch: Option<i64>,
    pub content_type: String,
    pub content: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

/// Outcome of a memory sync operation.
#[derive(Debug, Clone, Serialize)]
pub struct SyncResult {
    /// The appended entry, if the sync wrote one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry: Option<Entry>,
    /// The effective epoch after the sync.
    pub epoch: i64,
    /// True when the sync diverged into a fresh epoch.
    pub epoch_incremented: bool,
    /// True when nothing was written.
    pub no_op: bool,
}

/// Snapshot of the latest memory state a sync decision was based on.
/// A guarded append fails with `Conflict` when the stored state no longer
/// matches, so the caller can re-read and re-decide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncGuard {
    pub epoch: Option<i64>,
    pub last_entry_id: Option<Uuid>,
}

/// A `(conversation, client, epoch)` tuple eligible for epoch eviction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictableEpoch {
    pub conversation_id: Uuid,
    pub client_id: String,
    pub epoch: i64,
}

/// A page of entries from a fork-aware read.
#[derive(Debug, Clone, Serialize)]
pub struct PagedEntries {
    pub items: Vec<Entry>,
    pub has_more: bool,
}

/// Derive a conversation title from the first textual block of an entry's
/// content: whitespace-normalized and truncated to 40 characters on a word
/// boundary.
pub fn infer_title(blocks: &[Value]) -> Option<String> {
    let text = blocks
        .iter()
        .find_map(|block| block.get("text").and_then(Value::as_str))?;

    let mut title = String::new();
    for word in text.split_whitespace() {
        if title.is_empty() {
            // A single overlong word is cut at a character boundary.
            if word.chars().count() > INFERRED_TITLE_MAX {
                return Some(word.chars().take(INFERRED_TITLE_MAX).collect());
            }
            title.push_str(word);
        } else {
            if title.chars().count() + 1 + word.chars().count() > INFERRED_TITLE_MAX {
                break;
            }
            title.push(' ');
            title.push_str(word);
        }
    }

    if title.is_empty() { None } else { Some(title) }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_infer_title_simple() {
        let blocks = vec![json!({"type": "text", "text": "Hello world"})];
        assert_eq!(infer_title(&blocks).as_deref(), Some("Hello world"));
    }

    #[test]
    fn test_infer_title_skips_non_text_blocks() {
        let blocks = vec![
            json!({"type": "image", "url": "https://example.com/a.png"}),
            json!({"type": "text", "text": "Second block wins"}),
        ];
        assert_eq!(infer_title(&blocks).as_deref(), Some("Second block wins"));
    }

    #[test]
    fn test_infer_title_normalizes_whitespace() {
        let blocks = vec![json!({"text": "  a\n\tb   c  "})];
        assert_eq!(infer_title(&blocks).as_deref(), Some("a b c"));
    }

    #[test]
    fn test_infer_title_truncates_on_word_boundary() {
        let text = "one two three four five six seven eight nine ten";
        let blocks = vec![json!({"text": text})];
        let title = infer_title(&blocks).unwrap();
        assert!(title.chars().count() <= 40);
        assert_eq!(title, "one two three four five six seven eight");
    }

    #[test]
    fn test_infer_title_overlong_single_word() {
        let blocks = vec![json!({"text": "x".repeat(100)})];
        let title = infer_title(&blocks).unwrap();
        assert_eq!(title.chars().count(), 40);
    }

    #[test]
    fn test_infer_title_none_without_text() {
        let blocks = vec![json!({"type": "image"}), json!(42)];
        assert!(infer_title(&blocks).is_none());
        assert!(infer_title(&[]).is_none());
    }

    #[test]
    fn test_channel_round_trip() {
        assert_eq!("history".parse::<Channel>().unwrap(), Channel::History);
        assert_eq!("memory".parse::<Channel>().unwrap(), Channel::Memory);
        assert!("other".parse::<Channel>().is_err());
        assert_eq!(Channel::Memory.as_str(), "memory");
    }
}
