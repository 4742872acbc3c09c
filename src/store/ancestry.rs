//! Fork-aware timeline reconstruction.
//!
//! A conversation's timeline is its ancestors' entries, each ancestor
//! truncated at the fork point its child recorded, followed by the
//! conversation's own entries. The whole group is fetched as one ordered
//! scan and walked with a cursor over the ancestry stack; filters never
//! affect cursor advancement, which keys on entry ids alone.

use uuid::Uuid;

use crate::models::{Channel, EpochFilter, StoredEntry};

/// One hop in the root-to-target ancestry stack. `stop_entry_id` is the
/// fork point recorded by this ancestor's child; the target itself
/// carries `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AncestryHop {
    pub conversation_id: Uuid,
    pub stop_entry_id: Option<Uuid>,
}

/// Filters applied to a timeline walk.
#[derive(Debug, Clone, Default)]
pub struct TimelineFilter {
    pub channel: Option<Channel>,
    pub epoch: Option<EpochFilter>,
    pub client_id: Option<String>,
}

impl TimelineFilter {
    /// Whether a memory entry belongs to the filtered client. History
    /// entries are never excluded by the client filter.
    fn client_matches(&self, entry: &StoredEntry) -> bool {
        if entry.channel != Channel::Memory {
            return true;
        }
        match &self.client_id {
            Some(client) => entry.client_id.as_deref() == Some(client.as_str()),
            None => true,
        }
    }
}

/// Filter a `(created_at, id)`-ordered group scan down to one
/// conversation's timeline.
///
/// `hops` is the root-to-target ancestry stack; `None` disables ancestry
/// filtering entirely and returns the raw scan (the `all_forks` admin
/// view), with the channel/epoch/client filters still applied.
///
/// Under `EpochFilter::Latest`, observing a higher epoch discards every
/// previously accumulated memory entry: ancestors may carry epochs that a
/// later sync superseded further down the timeline.
pub fn filter_timeline(
    entries: Vec<StoredEntry>,
    hops: Option<&[AncestryHop]>,
    filter: &TimelineFilter,
) -> Vec<StoredEntry> {
    let mut out: Vec<StoredEntry> = Vec::new();
    let mut hop_index = 0usize;
    let mut latest_epoch: Option<i64> = None;

    for entry in entries {
        if let Some(hops) = hops {
            let Some(hop) = hops.get(hop_index) else {
                break;
            };
            if entry.conversation_id != hop.conversation_id {
                continue;
            }

            // Fork-point tracking uses id equality only; channel and
            // epoch filters must not stall the cursor.
            let at_stop = hop.stop_entry_id == Some(entry.id);

            include_entry(&mut out, entry, filter, &mut latest_epoch);

            if at_stop {
                hop_index += 1;
            }
        } else {
            include_entry(&mut out, entry, filter, &mut latest_epoch);
        }
    }

    out
}

fn include_entry(
    out: &mut Vec<StoredEntry>,
    entry: StoredEntry,
    filter: &TimelineFilter,
    latest_epoch: &mut Option<i64>,
) {
    if let Some(channel) = filter.channel
        && entry.channel != channel
    {
        return;
    }
    if !filter.client_matches(&entry) {
        return;
    }

    if entry.channel == Channel::Memory {
        match filter.epoch {
            Some(EpochFilter::Epoch(n)) => {
                if entry.epoch != Some(n) {
                    return;
                }
            }
            Some(EpochFilter::Latest) => {
                let epoch = entry.epoch.unwrap_or(0);
                match *latest_epoch {
                    Some(current) if epoch < current => return,
                    Some(current) if epoch > current => {
                        // A fresher epoch supersedes everything gathered
                        // so far on the memory channel.
                        out.retain(|e| e.channel != Channel::Memory);
                        *latest_epoch = Some(epoch);
                    }
                    None => *latest_epoch = Some(epoch),
                    _ => {}
                }
            }
            Some(EpochFilter::All) | None => {}
        }
    }

    out.push(entry);
}

/// Apply `after` + `limit` pagination to a filtered timeline.
///
/// `after` ids that are not present in the filtered list (evicted, or on
/// another fork) yield an empty page.
pub fn paginate(
    entries: Vec<StoredEntry>,
    after: Option<Uuid>,
    limit: usize,
) -> (Vec<StoredEntry>, bool) {
    let start = match after {
        Some(after_id) => match entries.iter().position(|e| e.id == after_id) {
            Some(idx) => idx + 1,
            None => return (Vec::new(), false),
        },
        None => 0,
    };

    let remaining = entries.len().saturating_sub(start);
    let has_more = remaining > limit;
    let page = entries.into_iter().skip(start).take(limit).collect();
    (page, has_more)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn entry(conversation: Uuid, seq: i64, channel: Channel, epoch: Option<i64>) -> StoredEntry {
        StoredEntry {
            id: Uuid::new_v4(),
            conversation_id: conversation,
            group_id: Uuid::nil(),
            user_id: None,
            client_id: Some("k1".to_string()),
            channel,
            epoch,
            content_type: "application/json".to_string(),
            content: Vec::new(),
            indexed_content: None,
            indexed_at: None,
            created_at: Utc.timestamp_millis_opt(seq).unwrap(),
        }
    }

    fn history(conversation: Uuid, seq: i64) -> StoredEntry {
        entry(conversation, seq, Channel::History, None)
    }

    fn memory(conversation: Uuid, seq: i64, epoch: i64) -> StoredEntry {
        entry(conversation, seq, Channel::Memory, Some(epoch))
    }

    fn ids(entries: &[StoredEntry]) -> Vec<Uuid> {
        entries.iter().map(|e| e.id).collect()
    }

    #[test]
    fn test_single_conversation_passes_through() {
        let conv = Uuid::new_v4();
        let timeline = vec![history(conv, 1), history(conv, 2)];
        let expected = ids(&timeline);

        let hops = [AncestryHop {
            conversation_id: conv,
            stop_entry_id: None,
        }];
        let out = filter_timeline(timeline, Some(&hops), &TimelineFilter::default());
        assert_eq!(ids(&out), expected);
    }

    #[test]
    fn test_fork_truncates_parent_at_stop() {
        let parent = Uuid::new_v4();
        let child = Uuid::new_v4();

        let p1 = history(parent, 1);
        let p2 = history(parent, 2);
        let p3 = history(parent, 3);
        let c1 = history(child, 4);

        let hops = [
            AncestryHop {
                conversation_id: parent,
                stop_entry_id: Some(p2.id),
            },
            AncestryHop {
                conversation_id: child,
                stop_entry_id: None,
            },
        ];

        let out = filter_timeline(
            vec![p1.clone(), p2.clone(), p3, c1.clone()],
            Some(&hops),
            &TimelineFilter::default(),
        );
        assert_eq!(ids(&out), vec![p1.id, p2.id, c1.id]);
    }

    #[test]
    fn test_entries_interleaved_across_forks_are_attributed() {
        let parent = Uuid::new_v4();
        let child = Uuid::new_v4();

        let p1 = history(parent, 1);
        // The parent kept going after the fork point; those entries are
        // not part of the child's timeline even though they sort earlier
        // than the child's own entries.
        let p2 = history(parent, 2);
        let c1 = history(child, 3);

        let hops = [
            AncestryHop {
                conversation_id: parent,
                stop_entry_id: Some(p1.id),
            },
            AncestryHop {
                conversation_id: child,
                stop_entry_id: None,
            },
        ];

        let out = filter_timeline(
            vec![p1.clone(), p2, c1.clone()],
            Some(&hops),
            &TimelineFilter::default(),
        );
        assert_eq!(ids(&out), vec![p1.id, c1.id]);
    }

    #[test]
    fn test_channel_filter_does_not_stall_cursor() {
        let parent = Uuid::new_v4();
        let child = Uuid::new_v4();

        // The fork point is a memory entry; a history-only read must still
        // advance past it into the child's entries.
        let p1 = memory(parent, 1, 1);
        let c1 = history(child, 2);

        let hops = [
            AncestryHop {
                conversation_id: parent,
                stop_entry_id: Some(p1.id),
            },
            AncestryHop {
                conversation_id: child,
                stop_entry_id: None,
            },
        ];

        let filter = TimelineFilter {
            channel: Some(Channel::History),
            ..Default::default()
        };
        let out = filter_timeline(vec![p1, c1.clone()], Some(&hops), &filter);
        assert_eq!(ids(&out), vec![c1.id]);
    }

    #[test]
    fn test_latest_epoch_restarts_accumulation() {
        let conv = Uuid::new_v4();
        let stale1 = memory(conv, 1, 1);
        let stale2 = memory(conv, 2, 1);
        let fresh = memory(conv, 3, 2);

        let hops = [AncestryHop {
            conversation_id: conv,
            stop_entry_id: None,
        }];
        let filter = TimelineFilter {
            channel: Some(Channel::Memory),
            epoch: Some(EpochFilter::Latest),
            client_id: Some("k1".to_string()),
        };

        let out = filter_timeline(vec![stale1, stale2, fresh.clone()], Some(&hops), &filter);
        assert_eq!(ids(&out), vec![fresh.id]);
    }

    #[test]
    fn test_latest_epoch_spans_fork_boundary() {
        let parent = Uuid::new_v4();
        let child = Uuid::new_v4();

        // The ancestor carries epoch 3; the child later superseded it.
        let p_mem = memory(parent, 1, 3);
        let p_stop = history(parent, 2);
        let c_mem = memory(child, 3, 4);

        let hops = [
            AncestryHop {
                conversation_id: parent,
                stop_entry_id: Some(p_stop.id),
            },
            AncestryHop {
                conversation_id: child,
                stop_entry_id: None,
            },
        ];
        let filter = TimelineFilter {
            channel: Some(Channel::Memory),
            epoch: Some(EpochFilter::Latest),
            client_id: Some("k1".to_string()),
        };

        let out = filter_timeline(
            vec![p_mem, p_stop, c_mem.clone()],
            Some(&hops),
            &filter,
        );
        assert_eq!(ids(&out), vec![c_mem.id]);
    }

    #[test]
    fn test_latest_keeps_stale_ancestor_when_not_superseded() {
        let parent = Uuid::new_v4();
        let child = Uuid::new_v4();

        let p_mem = memory(parent, 1, 2);
        let p_stop = history(parent, 2);

        let hops = [
            AncestryHop {
                conversation_id: parent,
                stop_entry_id: Some(p_stop.id),
            },
            AncestryHop {
                conversation_id: child,
                stop_entry_id: None,
            },
        ];
        let filter = TimelineFilter {
            channel: Some(Channel::Memory),
            epoch: Some(EpochFilter::Latest),
            client_id: Some("k1".to_string()),
        };

        let out = filter_timeline(vec![p_mem.clone(), p_stop], Some(&hops), &filter);
        assert_eq!(ids(&out), vec![p_mem.id]);
    }

    #[test]
    fn test_epoch_n_filter() {
        let conv = Uuid::new_v4();
        let e1 = memory(conv, 1, 1);
        let e2 = memory(conv, 2, 2);

        let hops = [AncestryHop {
            conversation_id: conv,
            stop_entry_id: None,
        }];
        let filter = TimelineFilter {
            channel: Some(Channel::Memory),
            epoch: Some(EpochFilter::Epoch(1)),
            client_id: Some("k1".to_string()),
        };

        let out = filter_timeline(vec![e1.clone(), e2], Some(&hops), &filter);
        assert_eq!(ids(&out), vec![e1.id]);
    }

    #[test]
    fn test_client_filter_excludes_other_clients() {
        let conv = Uuid::new_v4();
        let mine = memory(conv, 1, 1);
        let mut theirs = memory(conv, 2, 1);
        theirs.client_id = Some("k2".to_string());

        let hops = [AncestryHop {
            conversation_id: conv,
            stop_entry_id: None,
        }];
        let filter = TimelineFilter {
            channel: Some(Channel::Memory),
            epoch: Some(EpochFilter::All),
            client_id: Some("k1".to_string()),
        };

        let out = filter_timeline(vec![mine.clone(), theirs], Some(&hops), &filter);
        assert_eq!(ids(&out), vec![mine.id]);
    }

    #[test]
    fn test_no_hops_returns_raw_scan() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let timeline = vec![history(a, 1), history(b, 2)];
        let expected = ids(&timeline);

        let out = filter_timeline(timeline, None, &TimelineFilter::default());
        assert_eq!(ids(&out), expected);
    }

    #[test]
    fn test_paginate_after_and_limit() {
        let conv = Uuid::new_v4();
        let entries: Vec<_> = (0..5).map(|i| history(conv, i)).collect();
        let after = entries[1].id;
        let expected = vec![entries[2].id, entries[3].id];

        let (page, has_more) = paginate(entries, Some(after), 2);
        assert_eq!(ids(&page), expected);
        assert!(has_more);
    }

    #[test]
    fn test_paginate_unknown_after_is_empty() {
        let conv = Uuid::new_v4();
        let entries: Vec<_> = (0..3).map(|i| history(conv, i)).collect();

        let (page, has_more) = paginate(entries, Some(Uuid::new_v4()), 2);
        assert!(page.is_empty());
        assert!(!has_more);
    }

    #[test]
    fn test_paginate_last_page() {
        let conv = Uuid::new_v4();
        let entries: Vec<_> = (0..3).map(|i| history(conv, i)).collect();

        let (page, has_more) = paginate(entries, None, 10);
        assert_eq!(page.len(), 3);
        assert!(!has_more);
    }
}
