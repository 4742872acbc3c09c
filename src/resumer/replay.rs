use std::{io::SeekFrom, pin::Pin, sync::Arc, time::Duration};

use futures_util::{Stream, stream};
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt},
};

use super::{
    error::{ResumerError, ResumerResult},
    registry::{InflightEntry, InflightRegistry},
};

/// A lazy, cancellable sequence of response chunks. Chunk boundaries
/// carry no meaning; the concatenation equals the recorded tokens.
pub type TokenStream = Pin<Box<dyn Stream<Item = ResumerResult<String>> + Send>>;

/// Readers park at most this long before re-checking offsets, so a
/// dropped subscriber releases its resources within one tick.
const WAIT_TICK: Duration = Duration::from_secs(1);

/// RAII reader registration; dropping a replay mid-stream decrements the
/// refcount and lets the registry reclaim a drained recording.
struct ReaderGuard {
    entry: Arc<InflightEntry>,
    registry: Arc<InflightRegistry>,
}

impl Drop for ReaderGuard {
    fn drop(&mut self) {
        self.entry.remove_reader();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let registry = Arc::clone(&self.registry);
            let conversation_id = self.entry.conversation_id;
            handle.spawn(async move {
                registry.cleanup_if_possible(conversation_id).await;
            });
        }
    }
}

struct ReplayState {
    entry: Arc<InflightEntry>,
    _guard: ReaderGuard,
    file: Option<File>,
    resume_chars: u64,
    read_bytes: u64,
    done: bool,
}

/// Tail a recording from a character offset as a stream of UTF-8 chunks.
///
/// The published byte offset always lands on a token boundary, so every
/// drained delta is complete UTF-8.
pub(super) fn replay_stream(
    entry: Arc<InflightEntry>,
    registry: Arc<InflightRegistry>,
    resume_chars: u64,
) -> TokenStream {
    entry.add_reader();
    let state = ReplayState {
        _guard: ReaderGuard {
            entry: Arc::clone(&entry),
            registry,
        },
        entry,
        file: None,
        resume_chars,
        read_bytes: 0,
        done: false,
    };

    Box::pin(stream::unfold(state, |mut st| async move {
        if st.done {
            return None;
        }

        // Lazy open on first poll.
        if st.file.is_none() {
            match open_at_char(&st.entry, st.resume_chars).await {
                Ok((file, read_bytes)) => {
                    st.file = Some(file);
                    st.read_bytes = read_bytes;
                }
                Err(e) => {
                    st.done = true;
                    return Some((Err(e), st));
                }
            }
        }

        loop {
            let published = st.entry.byte_offset();
            if published > st.read_bytes {
                let len = (published - st.read_bytes) as usize;
                let mut buf = vec![0u8; len];
                let Some(file) = st.file.as_mut() else {
                    return None;
                };
                if let Err(e) = file.read_exact(&mut buf).await {
                    st.done = true;
                    return Some((Err(e.into()), st));
                }

                let chunk = match String::from_utf8(buf) {
                    Ok(chunk) => chunk,
                    Err(_) => {
                        st.done = true;
                        return Some((
                            Err(ResumerError::Transient(
                                "recording contains invalid UTF-8".to_string(),
                            )),
                            st,
                        ));
                    }
                };

                st.read_bytes = published;
                return Some((Ok(chunk), st));
            }

            if st.entry.is_closed() && st.read_bytes >= st.entry.byte_offset() {
                return None;
            }

            st.entry.wait_for_change(WAIT_TICK).await;
        }
    }))
}

/// Open the spool file positioned at the byte corresponding to a
/// character offset. Offsets beyond the published prefix clamp to its
/// end.
async fn open_at_char(entry: &InflightEntry, resume_chars: u64) -> ResumerResult<(File, u64)> {
    let mut file = File::open(&entry.file_path).await?;
    if resume_chars == 0 {
        return Ok((file, 0));
    }

    let published = entry.byte_offset();
    let mut prefix = vec![0u8; published as usize];
    file.read_exact(&mut prefix).await?;
    let text = String::from_utf8(prefix)
        .map_err(|_| ResumerError::Transient("recording contains invalid UTF-8".to_string()))?;

    let byte_offset = text
        .char_indices()
        .nth(resume_chars as usize)
        .map(|(idx, _)| idx as u64)
        .unwrap_or(published);

    file.seek(SeekFrom::Start(byte_offset)).await?;
    Ok((file, byte_offset))
}
