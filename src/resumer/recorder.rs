use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tokio::{
    fs::File,
    io::{AsyncWriteExt, BufWriter},
    sync::Mutex,
    task::JoinHandle,
};
use uuid::Uuid;

use super::{
    error::ResumerResult,
    locator::LocatorStore,
    registry::{InflightEntry, InflightRegistry},
};

/// The write side of a resumable response stream.
///
/// Tokens append to a per-recording spool file; each write is flushed
/// before its offsets are published, so concurrent replays never observe
/// an offset ahead of the bytes. Producers may fan in from many tasks;
/// the writer lock serializes them.
pub struct Recorder {
    conversation_id: Uuid,
    entry: Arc<InflightEntry>,
    registry: Arc<InflightRegistry>,
    locators: Option<Arc<dyn LocatorStore>>,
    writer: Mutex<Option<BufWriter<File>>>,
    completed: AtomicBool,
    refresh_task: Option<JoinHandle<()>>,
}

impl Recorder {
    pub(super) fn new(
        conversation_id: Uuid,
        entry: Arc<InflightEntry>,
        registry: Arc<InflightRegistry>,
        locators: Option<Arc<dyn LocatorStore>>,
        file: File,
        refresh_task: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            conversation_id,
            entry,
            registry,
            locators,
            writer: Mutex::new(Some(BufWriter::new(file))),
            completed: AtomicBool::new(false),
            refresh_task,
        }
    }

    pub fn conversation_id(&self) -> Uuid {
        self.conversation_id
    }

    /// Append one token. Empty tokens and writes after completion are
    /// absorbed silently.
    pub async fn record(&self, token: &str) -> ResumerResult<()> {
        if token.is_empty() || self.completed.load(Ordering::Acquire) {
            return Ok(());
        }

        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Ok(());
        };

        writer.write_all(token.as_bytes()).await?;
        writer.flush().await?;

        // Flushed; now the bytes may become visible.
        self.entry
            .publish(token.chars().count() as u64, token.len() as u64);
        Ok(())
    }

    /// Whether the downstream asked this recording to stop. Producers
    /// observe this (or `ResponseResumer::cancel_stream`) and wind down,
    /// then still call [`Recorder::complete`].
    pub fn cancel_requested(&self) -> bool {
        self.entry.cancel_requested()
    }

    /// Finish the recording: freeze the final offset, drop the locator,
    /// and release the file once the last reader drains. Idempotent.
    pub async fn complete(&self) -> ResumerResult<()> {
        if self.completed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        if let Some(mut writer) = self.writer.lock().await.take() {
            writer.flush().await?;
            writer.shutdown().await?;
        }

        if let Some(task) = &self.refresh_task {
            task.abort();
        }

        self.entry.close();
        self.entry.writer_done();

        if let Some(locators) = &self.locators
            && let Err(e) = locators.remove(self.conversation_id).await
        {
            tracing::warn!(
                conversation_id = %self.conversation_id,
                error = %e,
                "Failed to remove response locator"
            );
        }

        self.registry.cleanup_if_possible(self.conversation_id).await;
        Ok(())
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if let Some(task) = &self.refresh_task {
            task.abort();
        }
        if !self.completed.load(Ordering::Acquire) {
            tracing::warn!(
                conversation_id = %self.conversation_id,
                "Recorder dropped without complete(); recording stays open until superseded or swept"
            );
        }
    }
}
