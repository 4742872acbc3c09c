//! The memory sync decision table.
//!
//! A sync compares the incoming content list against the flattened
//! content of the entries at the current latest epoch and decides, in
//! order:
//!
//! 1. any latest entry has a different `content_type` -> diverge
//! 2. existing == incoming                            -> no-op
//! 3. existing is a strict prefix of incoming         -> extend with the tail
//! 4. anything else                                   -> diverge
//!
//! Content blocks are opaque JSON; equality is structural.

use serde_json::Value;

use crate::models::Entry;

/// Outcome of comparing incoming content against the latest epoch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncDecision {
    /// Nothing to write.
    NoOp,
    /// Append the tail at the current epoch.
    Extend { tail: Vec<Value> },
    /// Append the full incoming list at a fresh epoch.
    Diverge,
}

pub fn decide(latest: &[Entry], incoming_content_type: &str, incoming: &[Value]) -> SyncDecision {
    if latest
        .iter()
        .any(|entry| entry.content_type != incoming_content_type)
    {
        return SyncDecision::Diverge;
    }

    let existing: Vec<&Value> = latest.iter().flat_map(|entry| entry.content.iter()).collect();

    if existing.len() == incoming.len()
        && existing.iter().zip(incoming).all(|(a, b)| *a == b)
    {
        return SyncDecision::NoOp;
    }

    if existing.len() < incoming.len()
        && existing
            .iter()
            .zip(incoming)
            .all(|(a, b)| *a == b)
    {
        return SyncDecision::Extend {
            tail: incoming[existing.len()..].to_vec(),
        };
    }

    SyncDecision::Diverge
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rstest::rstest;
    use serde_json::json;
    use uuid::Uuid;

    use super::*;
    use crate::models::Channel;

    fn memory_entry(content_type: &str, content: Vec<Value>) -> Entry {
        Entry {
            id: Uuid::new_v4(),
            conversation_id: Uuid::new_v4(),
            group_id: Uuid::new_v4(),
            user_id: None,
            client_id: Some("k1".to_string()),
            channel: Channel::Memory,
            epoch: Some(1),
            content_type: content_type.to_string(),
            content,
            indexed_content: None,
            indexed_at: None,
            created_at: Utc::now(),
        }
    }

    fn text(s: &str) -> Value {
        json!({"type": "text", "text": s})
    }

    #[test]
    fn test_content_type_mismatch_diverges() {
        let latest = vec![memory_entry("text/markdown", vec![text("a")])];
        let decision = decide(&latest, "application/json", &[text("a")]);
        assert_eq!(decision, SyncDecision::Diverge);
    }

    #[test]
    fn test_equal_content_is_noop() {
        let latest = vec![memory_entry("application/json", vec![text("a"), text("b")])];
        let decision = decide(&latest, "application/json", &[text("a"), text("b")]);
        assert_eq!(decision, SyncDecision::NoOp);
    }

    #[test]
    fn test_equal_content_across_multiple_entries_is_noop() {
        let latest = vec![
            memory_entry("application/json", vec![text("a")]),
            memory_entry("application/json", vec![text("b")]),
        ];
        let decision = decide(&latest, "application/json", &[text("a"), text("b")]);
        assert_eq!(decision, SyncDecision::NoOp);
    }

    #[test]
    fn test_prefix_extends_with_tail() {
        let latest = vec![memory_entry("application/json", vec![text("a")])];
        let decision = decide(&latest, "application/json", &[text("a"), text("b")]);
        assert_eq!(
            decision,
            SyncDecision::Extend {
                tail: vec![text("b")]
            }
        );
    }

    #[test]
    fn test_prefix_spanning_entries_extends() {
        let latest = vec![
            memory_entry("application/json", vec![text("a")]),
            memory_entry("application/json", vec![text("b")]),
        ];
        let decision = decide(
            &latest,
            "application/json",
            &[text("a"), text("b"), text("c"), text("d")],
        );
        assert_eq!(
            decision,
            SyncDecision::Extend {
                tail: vec![text("c"), text("d")]
            }
        );
    }

    #[test]
    fn test_divergent_content_diverges() {
        let latest = vec![memory_entry("application/json", vec![text("a")])];
        let decision = decide(&latest, "application/json", &[text("x")]);
        assert_eq!(decision, SyncDecision::Diverge);
    }

    #[test]
    fn test_shrunk_content_diverges() {
        let latest = vec![memory_entry("application/json", vec![text("a"), text("b")])];
        let decision = decide(&latest, "application/json", &[text("a")]);
        assert_eq!(decision, SyncDecision::Diverge);
    }

    #[test]
    fn test_empty_existing_empty_incoming_is_noop() {
        let decision = decide(&[], "application/json", &[]);
        assert_eq!(decision, SyncDecision::NoOp);
    }

    #[test]
    fn test_empty_existing_extends_with_everything() {
        let decision = decide(&[], "application/json", &[text("a")]);
        assert_eq!(
            decision,
            SyncDecision::Extend {
                tail: vec![text("a")]
            }
        );
    }

    #[test]
    fn test_clear_memory_diverges() {
        // Non-empty latest, empty incoming: not equal, not a prefix.
        let latest = vec![memory_entry("application/json", vec![text("a")])];
        let decision = decide(&latest, "application/json", &[]);
        assert_eq!(decision, SyncDecision::Diverge);
    }

    #[test]
    fn test_equality_is_structural() {
        let latest = vec![memory_entry(
            "application/json",
            vec![json!({"x": 1, "y": 2})],
        )];
        // Key order differs; canonical JSON equality must still hold.
        let decision = decide(&latest, "application/json", &[json!({"y": 2, "x": 1})]);
        assert_eq!(decision, SyncDecision::NoOp);
    }

    // The full decision grid over (content type, content relation).
    #[rstest]
    #[case("same", "equal", SyncDecision::NoOp)]
    #[case("same", "prefix", SyncDecision::Extend { tail: vec![text("b")] })]
    #[case("same", "divergent", SyncDecision::Diverge)]
    #[case("different", "equal", SyncDecision::Diverge)]
    #[case("different", "prefix", SyncDecision::Diverge)]
    #[case("different", "divergent", SyncDecision::Diverge)]
    fn test_decision_grid(
        #[case] content_type: &str,
        #[case] relation: &str,
        #[case] expected: SyncDecision,
    ) {
        let latest = vec![memory_entry("text/markdown", vec![text("a")])];
        let incoming_type = match content_type {
            "same" => "text/markdown",
            _ => "application/json",
        };
        let incoming = match relation {
            "equal" => vec![text("a")],
            "prefix" => vec![text("a"), text("b")],
            _ => vec![text("z")],
        };

        assert_eq!(decide(&latest, incoming_type, &incoming), expected);
    }
}
