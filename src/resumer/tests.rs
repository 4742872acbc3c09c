//! Resumer tests: recording, tailing, redirect, and cancellation over a
//! shared in-process locator store standing in for Redis.

use std::{sync::Arc, time::Duration};

use futures_util::StreamExt;
use tempfile::TempDir;
use uuid::Uuid;

use super::*;
use crate::{
    cache::{Cache, MemoryCache},
    config::ResumerConfig,
};

fn config_for(temp: &TempDir, advertised: &str) -> ResumerConfig {
    ResumerConfig {
        enabled: None,
        locator_ttl_secs: 30,
        locator_refresh_secs: 10,
        temp_dir: Some(temp.path().to_path_buf()),
        temp_file_retention_secs: 3600,
        advertised_address: Some(advertised.to_string()),
    }
}

async fn node(
    temp: &TempDir,
    shared: &Arc<dyn Cache>,
    advertised: &str,
) -> Arc<ResponseResumer> {
    Arc::new(
        ResponseResumer::new(config_for(temp, advertised), Some(Arc::clone(shared)))
            .await
            .expect("Failed to build resumer"),
    )
}

fn shared_cache() -> Arc<dyn Cache> {
    Arc::new(MemoryCache::default())
}

async fn collect(stream: TokenStream) -> String {
    stream
        .map(|chunk| chunk.expect("replay chunk"))
        .collect::<Vec<_>>()
        .await
        .concat()
}

#[tokio::test]
async fn test_replay_equals_record() {
    let temp = TempDir::new().unwrap();
    let cache = shared_cache();
    let resumer = node(&temp, &cache, "node-x:9090").await;
    let id = Uuid::new_v4();
    let caller = NodeAddress::new("node-x", 9090);

    let recorder = resumer.recorder(id, None).await.unwrap();

    // Subscribe while the recording is still open.
    let stream = resumer.replay(id, Some(&caller), None).await.unwrap();
    let tail = tokio::spawn(collect(stream));

    for token in ["Hel", "lo", " world"] {
        recorder.record(token).await.unwrap();
    }
    recorder.complete().await.unwrap();

    assert_eq!(tail.await.unwrap(), "Hello world");
}

#[tokio::test]
async fn test_late_subscriber_sees_full_stream() {
    let temp = TempDir::new().unwrap();
    let cache = shared_cache();
    let resumer = node(&temp, &cache, "node-x:9090").await;
    let id = Uuid::new_v4();
    let caller = NodeAddress::new("node-x", 9090);

    let recorder = resumer.recorder(id, None).await.unwrap();
    recorder.record("already").await.unwrap();
    recorder.record(" written").await.unwrap();

    // A reader arriving mid-recording still starts from offset 0.
    let stream = resumer.replay(id, Some(&caller), None).await.unwrap();
    let tail = tokio::spawn(collect(stream));

    recorder.record(", plus more").await.unwrap();
    recorder.complete().await.unwrap();

    assert_eq!(tail.await.unwrap(), "already written, plus more");
}

#[tokio::test]
async fn test_resume_position_is_a_character_offset() {
    let temp = TempDir::new().unwrap();
    let cache = shared_cache();
    let resumer = node(&temp, &cache, "node-x:9090").await;
    let id = Uuid::new_v4();
    let caller = NodeAddress::new("node-x", 9090);

    let recorder = resumer.recorder(id, None).await.unwrap();
    // Multibyte content: char offsets and byte offsets diverge.
    recorder.record("héllo").await.unwrap();
    recorder.record(" wörld").await.unwrap();

    let stream = resumer.replay(id, Some(&caller), Some(2)).await.unwrap();
    let tail = tokio::spawn(collect(stream));
    recorder.complete().await.unwrap();

    assert_eq!(tail.await.unwrap(), "llo wörld");
}

#[tokio::test]
async fn test_replay_without_recording_is_empty() {
    let temp = TempDir::new().unwrap();
    let cache = shared_cache();
    let resumer = node(&temp, &cache, "node-x:9090").await;

    let stream = resumer.replay(Uuid::new_v4(), None, None).await.unwrap();
    assert_eq!(collect(stream).await, "");
}

#[tokio::test]
async fn test_replay_on_wrong_node_redirects() {
    let temp_x = TempDir::new().unwrap();
    let temp_y = TempDir::new().unwrap();
    let cache = shared_cache();
    let node_x = node(&temp_x, &cache, "node-x:9090").await;
    let node_y = node(&temp_y, &cache, "node-y:9090").await;
    let id = Uuid::new_v4();

    let recorder = node_x.recorder(id, None).await.unwrap();
    recorder.record("secret").await.unwrap();

    // A replay reaching node Y gets pointed back at node X, byte-free.
    let caller_y = NodeAddress::new("node-y", 9090);
    let result = node_y.replay(id, Some(&caller_y), None).await;
    match result {
        Err(ResumerError::Redirect(target)) => {
            assert!(target.matches(&NodeAddress::new("node-x", 9090)));
        }
        other => panic!("expected redirect, got {:?}", other.map(|_| "stream")),
    }

    // Host comparison is case-insensitive.
    let caller_x = NodeAddress::new("NODE-X", 9090);
    assert!(node_x.replay(id, Some(&caller_x), None).await.is_ok());

    recorder.complete().await.unwrap();
}

#[tokio::test]
async fn test_cancellation_fans_out_once() {
    let temp_x = TempDir::new().unwrap();
    let temp_y = TempDir::new().unwrap();
    let cache = shared_cache();
    let node_x = node(&temp_x, &cache, "node-x:9090").await;
    let node_y = node(&temp_y, &cache, "node-y:9090").await;
    let id = Uuid::new_v4();

    let recorder = node_x.recorder(id, None).await.unwrap();
    assert!(!recorder.cancel_requested());

    let cancels = node_x.cancel_stream(id);
    let watcher = tokio::spawn(cancels.collect::<Vec<_>>());

    // Cancelling through the wrong node redirects to the right one.
    let caller_y = NodeAddress::new("node-y", 9090);
    let result = node_y.request_cancel(id, Some(&caller_y)).await;
    assert!(matches!(result, Err(ResumerError::Redirect(_))));
    assert!(!recorder.cancel_requested());

    let caller_x = NodeAddress::new("node-x", 9090);
    node_x.request_cancel(id, Some(&caller_x)).await.unwrap();

    assert_eq!(watcher.await.unwrap(), vec![CancelEvent::Cancel]);
    assert!(recorder.cancel_requested());

    // An already-set flag emits immediately.
    let immediate = node_x.cancel_stream(id).collect::<Vec<_>>().await;
    assert_eq!(immediate, vec![CancelEvent::Cancel]);

    recorder.complete().await.unwrap();
}

#[tokio::test]
async fn test_cancel_stream_ends_when_recording_completes() {
    let temp = TempDir::new().unwrap();
    let cache = shared_cache();
    let resumer = node(&temp, &cache, "node-x:9090").await;
    let id = Uuid::new_v4();

    let recorder = resumer.recorder(id, None).await.unwrap();
    let watcher = tokio::spawn(resumer.cancel_stream(id).collect::<Vec<_>>());

    recorder.complete().await.unwrap();
    assert!(watcher.await.unwrap().is_empty());
}

#[tokio::test]
async fn test_record_after_complete_is_absorbed() {
    let temp = TempDir::new().unwrap();
    let cache = shared_cache();
    let resumer = node(&temp, &cache, "node-x:9090").await;
    let id = Uuid::new_v4();
    let caller = NodeAddress::new("node-x", 9090);

    let recorder = resumer.recorder(id, None).await.unwrap();
    recorder.record("kept").await.unwrap();

    let stream = resumer.replay(id, Some(&caller), None).await.unwrap();
    let tail = tokio::spawn(collect(stream));

    recorder.complete().await.unwrap();
    recorder.record("dropped").await.unwrap();
    recorder.complete().await.unwrap();

    assert_eq!(tail.await.unwrap(), "kept");
}

#[tokio::test]
async fn test_second_recorder_supersedes_first() {
    let temp = TempDir::new().unwrap();
    let cache = shared_cache();
    let resumer = node(&temp, &cache, "node-x:9090").await;
    let id = Uuid::new_v4();
    let caller = NodeAddress::new("node-x", 9090);

    let first = resumer.recorder(id, None).await.unwrap();
    first.record("first attempt").await.unwrap();

    // Failover: a new recorder takes over the conversation.
    let second = resumer.recorder(id, None).await.unwrap();
    second.record("second attempt").await.unwrap();

    let stream = resumer.replay(id, Some(&caller), None).await.unwrap();
    let tail = tokio::spawn(collect(stream));
    second.complete().await.unwrap();

    // The locator points at the new spool file.
    assert_eq!(tail.await.unwrap(), "second attempt");
}

#[tokio::test]
async fn test_presence_checks() {
    let temp = TempDir::new().unwrap();
    let cache = shared_cache();
    let resumer = node(&temp, &cache, "node-x:9090").await;
    let id = Uuid::new_v4();
    let other = Uuid::new_v4();

    assert!(!resumer.has_response_in_progress(id).await);

    let recorder = resumer.recorder(id, None).await.unwrap();
    assert!(resumer.has_response_in_progress(id).await);
    assert_eq!(
        resumer.check(&[id, other]).await,
        vec![(id, true), (other, false)]
    );

    recorder.complete().await.unwrap();
    assert!(!resumer.has_response_in_progress(id).await);
}

#[tokio::test]
async fn test_local_only_without_locator_store() {
    let temp = TempDir::new().unwrap();
    let resumer = Arc::new(
        ResponseResumer::new(config_for(&temp, "node-x:9090"), None)
            .await
            .unwrap(),
    );
    assert!(!resumer.enabled());

    let id = Uuid::new_v4();
    let recorder = resumer.recorder(id, None).await.unwrap();

    let stream = resumer.replay(id, None, None).await.unwrap();
    let tail = tokio::spawn(collect(stream));

    recorder.record("local").await.unwrap();
    recorder.complete().await.unwrap();
    assert_eq!(tail.await.unwrap(), "local");
}

#[tokio::test]
async fn test_spool_file_removed_after_drain() {
    let temp = TempDir::new().unwrap();
    let cache = shared_cache();
    let resumer = node(&temp, &cache, "node-x:9090").await;
    let id = Uuid::new_v4();
    let caller = NodeAddress::new("node-x", 9090);

    let recorder = resumer.recorder(id, None).await.unwrap();
    recorder.record("data").await.unwrap();

    let stream = resumer.replay(id, Some(&caller), None).await.unwrap();
    let tail = tokio::spawn(collect(stream));
    recorder.complete().await.unwrap();
    tail.await.unwrap();

    // The reader guard spawns the final cleanup; give it a moment.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let spools: Vec<_> = std::fs::read_dir(temp.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.file_name()
                .to_string_lossy()
                .starts_with("response-resume-")
        })
        .collect();
    assert!(spools.is_empty(), "spool file should be reclaimed");
}

#[tokio::test]
async fn test_startup_sweeps_stale_spool_files() {
    let temp = TempDir::new().unwrap();
    let stale = temp.path().join("response-resume-stale.tokens");
    let unrelated = temp.path().join("keep.txt");
    std::fs::write(&stale, b"leftover").unwrap();
    std::fs::write(&unrelated, b"other").unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut config = config_for(&temp, "node-x:9090");
    config.temp_file_retention_secs = 0;
    let _resumer = ResponseResumer::new(config, None).await.unwrap();

    assert!(!stale.exists(), "stale spool file should be deleted");
    assert!(unrelated.exists(), "unrelated files are untouched");
}
