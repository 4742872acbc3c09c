//! The response resumer: a distributed single-writer, many-reader tail of
//! model output tokens.
//!
//! A recorder spools tokens to a per-node temp file and advertises itself
//! in a shared locator registry so any node can redirect a replay to the
//! node that owns the recording. Replays tail the spool byte-accurately
//! and survive client disconnects; cancellation propagates back to the
//! recording node the same way.

mod address;
mod error;
mod locator;
mod recorder;
mod registry;
mod replay;
#[cfg(test)]
mod tests;

use std::{path::Path, pin::Pin, sync::Arc, time::Duration};

pub use address::NodeAddress;
pub use error::{ResumerError, ResumerResult};
use futures_util::{Stream, stream};
pub use locator::{CacheLocatorStore, Locator, LocatorStore};
pub use recorder::Recorder;
use registry::{InflightEntry, InflightRegistry};
pub use replay::TokenStream;
use tokio::fs;
use uuid::Uuid;

use crate::{cache::Cache, config::ResumerConfig};

/// Spool file naming: `response-resume-<random>.tokens`.
const SPOOL_PREFIX: &str = "response-resume-";
const SPOOL_SUFFIX: &str = ".tokens";

/// Fixed back-off while waiting for the locator store at startup.
const STARTUP_BACKOFF: Duration = Duration::from_secs(1);
const STARTUP_DEADLINE: Duration = Duration::from_secs(30);

/// Signal emitted by [`ResponseResumer::cancel_stream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelEvent {
    Cancel,
}

pub struct ResponseResumer {
    config: ResumerConfig,
    locators: Option<Arc<dyn LocatorStore>>,
    registry: Arc<InflightRegistry>,
    node_address: NodeAddress,
}

impl ResponseResumer {
    /// Build the resumer, probe the locator store (with fixed back-off up
    /// to a startup deadline), and sweep stale spool files.
    ///
    /// `locator_cache` is the shared cache backend; `None` (or
    /// `enabled = false`) yields a local-only resumer that records and
    /// replays on this node but cannot redirect.
    pub async fn new(
        config: ResumerConfig,
        locator_cache: Option<Arc<dyn Cache>>,
    ) -> ResumerResult<Self> {
        let node_address = match &config.advertised_address {
            Some(raw) => NodeAddress::parse(raw)?,
            None => NodeAddress::local_fallback(),
        };
        if !node_address.is_redirectable() {
            tracing::warn!(
                address = %node_address,
                "Advertised port is 0; replays on other nodes cannot be redirected here"
            );
        }

        let locators: Option<Arc<dyn LocatorStore>> = match (config.enabled, locator_cache) {
            (Some(false), _) => None,
            (_, Some(cache)) => Some(Arc::new(CacheLocatorStore::new(cache))),
            (Some(true), None) => {
                tracing::warn!(
                    "Resumer enabled without a shared cache; running local-only (no redirects)"
                );
                None
            }
            (None, None) => None,
        };

        if let Some(store) = &locators {
            Self::await_locator_store(store.as_ref()).await?;
        }

        let temp_dir = config.temp_dir();
        fs::create_dir_all(&temp_dir).await?;
        sweep_stale_files(&temp_dir, config.temp_file_retention()).await;

        Ok(Self {
            config,
            locators,
            registry: Arc::new(InflightRegistry::new()),
            node_address,
        })
    }

    /// Probe the locator store until it answers or the startup deadline
    /// passes.
    async fn await_locator_store(store: &dyn LocatorStore) -> ResumerResult<()> {
        let deadline = tokio::time::Instant::now() + STARTUP_DEADLINE;
        let probe = Uuid::nil();
        loop {
            match store.get(probe).await {
                Ok(_) => return Ok(()),
                Err(e) if tokio::time::Instant::now() + STARTUP_BACKOFF < deadline => {
                    tracing::warn!(error = %e, "Locator store not reachable yet; retrying");
                    tokio::time::sleep(STARTUP_BACKOFF).await;
                }
                Err(e) => {
                    return Err(ResumerError::Transient(format!(
                        "locator store unavailable at startup: {e}"
                    )));
                }
            }
        }
    }

    /// Whether the shared locator registry is in play.
    pub fn enabled(&self) -> bool {
        self.locators.is_some()
    }

    /// Start recording a response for a conversation.
    ///
    /// A second recorder on the same conversation supersedes the first:
    /// the previous entry is closed (its readers drain to the frozen
    /// final offset) and the locator repoints to the new spool file.
    pub async fn recorder(
        &self,
        conversation_id: Uuid,
        advertised: Option<NodeAddress>,
    ) -> ResumerResult<Recorder> {
        let address = advertised.unwrap_or_else(|| self.node_address.clone());
        if !address.is_redirectable() {
            tracing::warn!(
                conversation_id = %conversation_id,
                address = %address,
                "Recording with a non-redirectable address"
            );
        }

        let file_name = format!("{}{}{}", SPOOL_PREFIX, Uuid::new_v4().simple(), SPOOL_SUFFIX);
        let file_path = self.config.temp_dir().join(&file_name);
        let file = fs::File::create(&file_path).await?;

        let entry = Arc::new(InflightEntry::new(
            conversation_id,
            file_path,
            file_name.clone(),
        ));
        self.registry.register(Arc::clone(&entry)).await;

        let refresh_task = if let Some(locators) = &self.locators {
            let locator = Locator::new(&address, file_name);
            let ttl = self.config.locator_ttl();

            // Losing this upsert to a concurrent recorder elsewhere is
            // fine; the last writer's locator wins and mismatched reads
            // see a redirect.
            if let Err(e) = locators.put(conversation_id, &locator, ttl).await {
                tracing::warn!(
                    conversation_id = %conversation_id,
                    error = %e,
                    "Locator publish failed; recording continues local-only"
                );
            }

            let store = Arc::clone(locators);
            let refresh = self.config.locator_refresh();
            let task = tokio::spawn(async move {
                let mut ticker = tokio::time::interval(refresh);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                // The initial publish already happened.
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if let Err(e) = store.put(conversation_id, &locator, ttl).await {
                        tracing::warn!(
                            conversation_id = %conversation_id,
                            error = %e,
                            "Locator refresh failed; retrying next tick"
                        );
                    }
                }
            });
            Some(task)
        } else {
            None
        };

        Ok(Recorder::new(
            conversation_id,
            entry,
            Arc::clone(&self.registry),
            self.locators.clone(),
            file,
            refresh_task,
        ))
    }

    /// Tail a recording from a character offset (default 0).
    ///
    /// No locator means no recording: an empty stream. A locator owned by
    /// a different node than `caller` fails with [`ResumerError::Redirect`]
    /// before any bytes are emitted.
    pub async fn replay(
        &self,
        conversation_id: Uuid,
        caller: Option<&NodeAddress>,
        resume_position: Option<u64>,
    ) -> ResumerResult<TokenStream> {
        if let Some(locators) = &self.locators {
            match locators.get(conversation_id).await {
                Ok(None) => return Ok(Box::pin(stream::empty())),
                Ok(Some(locator)) => {
                    if let Some(caller) = caller {
                        let target = locator.address();
                        if !caller.matches(&target) {
                            return Err(ResumerError::Redirect(target));
                        }
                    }
                }
                Err(e) => {
                    // Degrade to local lookup; remote redirect is lost but
                    // a local recording still replays.
                    tracing::warn!(
                        conversation_id = %conversation_id,
                        error = %e,
                        "Locator lookup failed; falling back to local replay"
                    );
                }
            }
        }

        let Some(entry) = self.registry.get(conversation_id) else {
            return Ok(Box::pin(stream::empty()));
        };

        Ok(replay::replay_stream(
            entry,
            Arc::clone(&self.registry),
            resume_position.unwrap_or(0),
        ))
    }

    /// Ask the recording's producer to stop. Redirects like `replay` when
    /// the recording lives elsewhere.
    pub async fn request_cancel(
        &self,
        conversation_id: Uuid,
        caller: Option<&NodeAddress>,
    ) -> ResumerResult<()> {
        if let Some(locators) = &self.locators
            && let Ok(Some(locator)) = locators.get(conversation_id).await
            && let Some(caller) = caller
        {
            let target = locator.address();
            if !caller.matches(&target) {
                return Err(ResumerError::Redirect(target));
            }
        }

        if let Some(entry) = self.registry.get(conversation_id) {
            entry.request_cancel();
        }
        Ok(())
    }

    /// A single-emission stream that yields [`CancelEvent::Cancel`] when
    /// (or as soon as) cancellation is requested, then completes. Ends
    /// without emitting if the recording closes uncancelled. Empty when
    /// this node hosts no recording for the conversation.
    pub fn cancel_stream(
        &self,
        conversation_id: Uuid,
    ) -> Pin<Box<dyn Stream<Item = CancelEvent> + Send>> {
        let Some(entry) = self.registry.get(conversation_id) else {
            return Box::pin(stream::empty());
        };

        Box::pin(stream::unfold(Some(entry), |state| async move {
            let entry = state?;
            loop {
                if entry.cancel_requested() {
                    return Some((CancelEvent::Cancel, None));
                }
                if entry.is_closed() {
                    return None;
                }
                entry.wait_for_cancel(Duration::from_secs(1)).await;
            }
        }))
    }

    /// Whether a recording is currently advertised for the conversation.
    pub async fn has_response_in_progress(&self, conversation_id: Uuid) -> bool {
        if let Some(locators) = &self.locators {
            match locators.check(&[conversation_id]).await {
                Ok(results) => return results.first().copied().unwrap_or(false),
                Err(e) => {
                    tracing::warn!(error = %e, "Locator check failed");
                    return false;
                }
            }
        }
        self.registry
            .get(conversation_id)
            .is_some_and(|entry| !entry.is_closed())
    }

    /// Bulk existence check, in input order.
    pub async fn check(&self, conversation_ids: &[Uuid]) -> Vec<(Uuid, bool)> {
        let results = match &self.locators {
            Some(locators) => match locators.check(conversation_ids).await {
                Ok(results) => results,
                Err(e) => {
                    tracing::warn!(error = %e, "Locator bulk check failed");
                    vec![false; conversation_ids.len()]
                }
            },
            None => conversation_ids
                .iter()
                .map(|id| {
                    self.registry
                        .get(*id)
                        .is_some_and(|entry| !entry.is_closed())
                })
                .collect(),
        };

        conversation_ids.iter().copied().zip(results).collect()
    }

    /// Periodic maintenance: reclaim closed, unreferenced recordings.
    /// Runs until cancelled; spawn it on the service's task tracker.
    pub async fn run_sweeper(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.locator_refresh());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let cleaned = self.registry.cleanup_closed_entries().await;
            if cleaned > 0 {
                tracing::debug!(cleaned, "Swept closed recordings");
            }
        }
    }

    /// Close and reclaim every open recording (shutdown).
    pub async fn shutdown(&self) {
        self.registry.drain().await;
    }
}

/// Delete leftover spool files from previous runs that are older than the
/// retention window.
async fn sweep_stale_files(dir: &Path, retention: Duration) {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "Cannot scan spool directory");
            return;
        }
    };

    while let Ok(Some(dir_entry)) = entries.next_entry().await {
        let name = dir_entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with(SPOOL_PREFIX) || !name.ends_with(SPOOL_SUFFIX) {
            continue;
        }

        let stale = match dir_entry.metadata().await.and_then(|m| m.modified()) {
            Ok(modified) => modified
                .elapsed()
                .map(|age| age > retention)
                .unwrap_or(false),
            Err(_) => false,
        };

        if stale {
            let path = dir_entry.path();
            match fs::remove_file(&path).await {
                Ok(()) => tracing::info!(path = %path.display(), "Deleted stale spool file"),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to delete stale spool file");
                }
            }
        }
    }
}
