use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;
use tokio::sync::Notify;
use uuid::Uuid;

/// Recording lifecycle. `ABSENT` is the lack of a registry entry.
pub const STATE_OPEN: u8 = 0;
pub const STATE_CLOSED: u8 = 1;
pub const STATE_DELETED: u8 = 2;

/// Per-conversation in-flight recording state: the single point of
/// coordination between the recorder, replays, and cancellation.
///
/// The byte offset is published with Release ordering after the file has
/// been flushed, so a reader that observes the new offset (Acquire) is
/// guaranteed to find the bytes on disk.
pub struct InflightEntry {
    pub conversation_id: Uuid,
    pub file_path: PathBuf,
    pub file_name: String,
    state: AtomicU8,
    char_offset: AtomicU64,
    byte_offset: AtomicU64,
    final_char_offset: AtomicU64,
    readers: AtomicU32,
    writers: AtomicU32,
    cancel_requested: AtomicBool,
    /// Signalled on byte-offset advance and on state transitions.
    data: Notify,
    /// Signalled when cancellation is requested.
    cancel: Notify,
}

impl InflightEntry {
    pub fn new(conversation_id: Uuid, file_path: PathBuf, file_name: String) -> Self {
        Self {
            conversation_id,
            file_path,
            file_name,
            state: AtomicU8::new(STATE_OPEN),
            char_offset: AtomicU64::new(0),
            byte_offset: AtomicU64::new(0),
            final_char_offset: AtomicU64::new(0),
            readers: AtomicU32::new(0),
            writers: AtomicU32::new(1),
            cancel_requested: AtomicBool::new(false),
            data: Notify::new(),
            cancel: Notify::new(),
        }
    }

    pub fn state(&self) -> u8 {
        self.state.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.state() != STATE_OPEN
    }

    /// Publish a flushed write. Char offset first; the byte offset store
    /// is the release that makes the write visible.
    pub fn publish(&self, char_delta: u64, byte_delta: u64) {
        self.char_offset.fetch_add(char_delta, Ordering::Relaxed);
        self.byte_offset.fetch_add(byte_delta, Ordering::Release);
        self.data.notify_waiters();
    }

    pub fn byte_offset(&self) -> u64 {
        self.byte_offset.load(Ordering::Acquire)
    }

    pub fn char_offset(&self) -> u64 {
        self.char_offset.load(Ordering::Relaxed)
    }

    /// The frozen character offset; meaningful once closed.
    pub fn final_char_offset(&self) -> u64 {
        self.final_char_offset.load(Ordering::Acquire)
    }

    /// OPEN -> CLOSED, freezing the final offset. Idempotent.
    pub fn close(&self) {
        if self
            .state
            .compare_exchange(
                STATE_OPEN,
                STATE_CLOSED,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            self.final_char_offset
                .store(self.char_offset(), Ordering::Release);
        }
        self.data.notify_waiters();
        // Cancel watchers also end when the recording closes.
        self.cancel.notify_waiters();
    }

    /// Close and orphan: the writer is gone (superseded by a newer
    /// recorder); readers drain what was written.
    pub fn force_close(&self) {
        self.close();
        self.writers.store(0, Ordering::Release);
    }

    pub fn writer_done(&self) {
        let _ = self
            .writers
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |w| {
                w.checked_sub(1)
            });
        self.data.notify_waiters();
    }

    pub fn add_reader(&self) {
        self.readers.fetch_add(1, Ordering::AcqRel);
    }

    pub fn remove_reader(&self) {
        let _ = self
            .readers
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |r| {
                r.checked_sub(1)
            });
        self.data.notify_waiters();
    }

    /// Closed with no remaining readers or writers: the temp file can go.
    pub fn is_cleanable(&self) -> bool {
        self.state() == STATE_CLOSED
            && self.readers.load(Ordering::Acquire) == 0
            && self.writers.load(Ordering::Acquire) == 0
    }

    pub fn mark_deleted(&self) {
        self.state.store(STATE_DELETED, Ordering::Release);
        self.data.notify_waiters();
    }

    pub fn request_cancel(&self) {
        self.cancel_requested.store(true, Ordering::Release);
        self.cancel.notify_waiters();
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::Acquire)
    }

    /// Bounded wait for new bytes or a state change. Callers re-check
    /// their condition afterwards; a wakeup between the check and the
    /// wait only costs one tick.
    pub async fn wait_for_change(&self, timeout: Duration) {
        let _ = tokio::time::timeout(timeout, self.data.notified()).await;
    }

    /// Bounded wait for a cancellation signal.
    pub async fn wait_for_cancel(&self, timeout: Duration) {
        let _ = tokio::time::timeout(timeout, self.cancel.notified()).await;
    }
}

/// Process-wide map of in-progress recordings, created at backend start
/// and drained at shutdown. Entry refcounts drive temp-file cleanup.
#[derive(Default)]
pub struct InflightRegistry {
    entries: DashMap<Uuid, Arc<InflightEntry>>,
}

impl InflightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a new recording, superseding any previous entry for the
    /// key: the old entry is force-closed so its readers drain to the
    /// frozen final offset and its file becomes cleanable.
    pub async fn register(&self, entry: Arc<InflightEntry>) {
        let previous = self.entries.insert(entry.conversation_id, entry);
        if let Some(previous) = previous {
            tracing::debug!(
                conversation_id = %previous.conversation_id,
                "Superseding open recording"
            );
            previous.force_close();
            self.cleanup_entry(&previous).await;
        }
    }

    pub fn get(&self, conversation_id: Uuid) -> Option<Arc<InflightEntry>> {
        self.entries.get(&conversation_id).map(|e| Arc::clone(&e))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Delete the temp file and drop the entry if nothing uses it anymore.
    pub async fn cleanup_if_possible(&self, conversation_id: Uuid) -> bool {
        match self.get(conversation_id) {
            Some(entry) => self.cleanup_entry(&entry).await,
            None => false,
        }
    }

    async fn cleanup_entry(&self, entry: &Arc<InflightEntry>) -> bool {
        if !entry.is_cleanable() {
            return false;
        }

        entry.mark_deleted();
        // Only remove the mapping if it still points at this entry; a
        // newer recording may have taken the key.
        self.entries
            .remove_if(&entry.conversation_id, |_, current| {
                Arc::ptr_eq(current, entry)
            });

        if let Err(e) = tokio::fs::remove_file(&entry.file_path).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(
                path = %entry.file_path.display(),
                error = %e,
                "Failed to delete recording spool file"
            );
            return false;
        }
        true
    }

    /// Sweep every closed, unreferenced entry. Run periodically.
    pub async fn cleanup_closed_entries(&self) -> usize {
        let candidates: Vec<Arc<InflightEntry>> = self
            .entries
            .iter()
            .filter(|e| e.is_cleanable())
            .map(|e| Arc::clone(&e))
            .collect();

        let mut cleaned = 0;
        for entry in candidates {
            if self.cleanup_entry(&entry).await {
                cleaned += 1;
            }
        }
        cleaned
    }

    /// Close every open recording (shutdown path).
    pub async fn drain(&self) {
        let all: Vec<Arc<InflightEntry>> = self
            .entries
            .iter()
            .map(|e| Arc::clone(&e))
            .collect();
        for entry in all {
            entry.force_close();
            self.cleanup_entry(&entry).await;
        }
    }
}
