//! Opaque pagination cursors.
//!
//! Conversation listings paginate with a keyset cursor over
//! `(updated_at, id)`; unindexed-entry listings use a plain timestamp
//! cursor. Both encode as URL-safe base64 so they can travel in query
//! strings unescaped.
//!
//! Cursors encode timestamps as milliseconds. Entities that participate in
//! cursor pagination must store millisecond-truncated timestamps (see
//! [`truncate_to_millis`]) or the decoded cursor will not compare equal to
//! the stored value.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CursorError {
    #[error("invalid cursor format")]
    InvalidFormat,
    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("invalid timestamp in cursor")]
    InvalidTimestamp,
    #[error("invalid UUID in cursor")]
    InvalidUuid,
}

/// A keyset cursor over `(timestamp, id)`, unique even when multiple
/// records share a timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub timestamp: DateTime<Utc>,
    pub id: Uuid,
}

impl Cursor {
    pub fn new(timestamp: DateTime<Utc>, id: Uuid) -> Self {
        Self { timestamp, id }
    }

    /// Encode as URL-safe base64 of `{timestamp_millis}:{uuid}`.
    pub fn encode(&self) -> String {
        let raw = format!("{}:{}", self.timestamp.timestamp_millis(), self.id);
        URL_SAFE_NO_PAD.encode(raw.as_bytes())
    }

    pub fn decode(encoded: &str) -> Result<Self, CursorError> {
        let bytes = URL_SAFE_NO_PAD.decode(encoded)?;
        let raw = String::from_utf8(bytes).map_err(|_| CursorError::InvalidFormat)?;

        // UUIDs use hyphens, not colons, so ':' cleanly separates the parts.
        let (timestamp_str, uuid_str) = raw.split_once(':').ok_or(CursorError::InvalidFormat)?;

        let timestamp_millis: i64 = timestamp_str
            .parse()
            .map_err(|_| CursorError::InvalidTimestamp)?;

        let timestamp = DateTime::from_timestamp_millis(timestamp_millis)
            .ok_or(CursorError::InvalidTimestamp)?;

        let id = Uuid::parse_str(uuid_str).map_err(|_| CursorError::InvalidUuid)?;

        Ok(Self { timestamp, id })
    }
}

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.encode())
    }
}

impl Serialize for Cursor {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for Cursor {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Cursor::decode(&s).map_err(serde::de::Error::custom)
    }
}

/// A timestamp-only cursor for the unindexed-entries listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeCursor(pub DateTime<Utc>);

impl TimeCursor {
    pub fn encode(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0.timestamp_millis().to_string().as_bytes())
    }

    pub fn decode(encoded: &str) -> Result<Self, CursorError> {
        let bytes = URL_SAFE_NO_PAD.decode(encoded)?;
        let raw = String::from_utf8(bytes).map_err(|_| CursorError::InvalidFormat)?;
        let millis: i64 = raw.parse().map_err(|_| CursorError::InvalidTimestamp)?;
        let ts = DateTime::from_timestamp_millis(millis).ok_or(CursorError::InvalidTimestamp)?;
        Ok(Self(ts))
    }
}

/// Truncate a `DateTime` to millisecond precision so it round-trips through
/// cursors and through SQLite's text timestamp comparisons.
pub fn truncate_to_millis(dt: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(dt.timestamp_millis()).unwrap_or(dt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_encode_decode_roundtrip() {
        let now = Utc::now();
        let id = Uuid::new_v4();
        let cursor = Cursor::new(now, id);

        let encoded = cursor.encode();
        let decoded = Cursor::decode(&encoded).unwrap();

        // Compare milliseconds since encode uses millis precision
        assert_eq!(
            cursor.timestamp.timestamp_millis(),
            decoded.timestamp.timestamp_millis()
        );
        assert_eq!(cursor.id, decoded.id);
    }

    #[test]
    fn test_cursor_encode_is_url_safe() {
        let cursor = Cursor::new(Utc::now(), Uuid::new_v4());
        let encoded = cursor.encode();

        assert!(
            encoded
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[test]
    fn test_cursor_decode_invalid_base64() {
        let result = Cursor::decode("not valid base64!!!");
        assert!(matches!(result, Err(CursorError::Base64(_))));
    }

    #[test]
    fn test_cursor_decode_invalid_format() {
        let encoded = URL_SAFE_NO_PAD.encode(b"invalid_format");
        let result = Cursor::decode(&encoded);
        assert!(matches!(result, Err(CursorError::InvalidFormat)));
    }

    #[test]
    fn test_cursor_decode_invalid_uuid() {
        let encoded = URL_SAFE_NO_PAD.encode(b"1234567890:not-a-uuid");
        let result = Cursor::decode(&encoded);
        assert!(matches!(result, Err(CursorError::InvalidUuid)));
    }

    #[test]
    fn test_time_cursor_roundtrip() {
        let ts = truncate_to_millis(Utc::now());
        let cursor = TimeCursor(ts);
        let decoded = TimeCursor::decode(&cursor.encode()).unwrap();
        assert_eq!(decoded.0, ts);
    }

    #[test]
    fn test_truncate_to_millis_is_idempotent() {
        let truncated = truncate_to_millis(Utc::now());
        assert_eq!(truncate_to_millis(truncated), truncated);
    }
}
