use std::time::Duration;

use common::random_str;
use etcd_repository::{
    event::{WatchEvent, WatchEventChan},
    repository::Repository,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

mod common;

async fn next_event(rx: &mut WatchEventChan) -> WatchEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for watch event")
        .expect("watch channel closed")
}

#[tokio::test]
async fn watch_delivers_current_value_before_live_changes() {
    let repo = common::get_repository().await;
    let key = random_str(10);

    repo.put(&key, b"v1".to_vec()).await.expect("failed to put");

    let mut events = repo
        .watch(&key, CancellationToken::new())
        .await
        .expect("failed to watch");

    repo.put(&key, b"v2".to_vec()).await.expect("failed to put");

    match next_event(&mut events).await {
        WatchEvent::Modify { value, .. } => assert_eq!(value, b"v1"),
        other => panic!("expected the current value first, got {other:?}"),
    }
    match next_event(&mut events).await {
        WatchEvent::Modify { value, .. } => assert_eq!(value, b"v2"),
        other => panic!("expected the live change second, got {other:?}"),
    }
}

#[tokio::test]
async fn watch_on_absent_key_starts_with_live_changes() {
    let repo = common::get_repository().await;
    let key = random_str(10);

    let mut events = repo
        .watch(&key, CancellationToken::new())
        .await
        .expect("failed to watch");

    repo.put(&key, b"first".to_vec())
        .await
        .expect("failed to put");

    match next_event(&mut events).await {
        WatchEvent::Modify { value, .. } => assert_eq!(value, b"first"),
        other => panic!("expected the live put, got {other:?}"),
    }
}

#[tokio::test]
async fn watch_reports_deletes() {
    let repo = common::get_repository().await;
    let key = random_str(10);

    repo.put(&key, b"doomed".to_vec())
        .await
        .expect("failed to put");

    let mut events = repo
        .watch(&key, CancellationToken::new())
        .await
        .expect("failed to watch");

    repo.delete(&key).await.expect("failed to delete");

    match next_event(&mut events).await {
        WatchEvent::Modify { value, .. } => assert_eq!(value, b"doomed"),
        other => panic!("expected the current value first, got {other:?}"),
    }
    match next_event(&mut events).await {
        WatchEvent::Delete { key: deleted, .. } => assert_eq!(deleted, key.as_bytes()),
        other => panic!("expected a delete event, got {other:?}"),
    }
}

#[tokio::test]
async fn watch_synthesizes_empty_values() {
    let repo = common::get_repository().await;
    let key = random_str(10);

    repo.put(&key, Vec::new()).await.expect("failed to put");

    let mut events = repo
        .watch(&key, CancellationToken::new())
        .await
        .expect("failed to watch");

    match next_event(&mut events).await {
        WatchEvent::Modify { value, .. } => assert!(value.is_empty()),
        other => panic!("expected an empty-value modify, got {other:?}"),
    }
}

#[tokio::test]
async fn watch_prefix_synthesizes_one_event_per_live_key() {
    let repo = common::get_repository().await;
    let prefix = format!("{}/", random_str(10));

    repo.put(&format!("{prefix}a"), b"alpha".to_vec())
        .await
        .expect("failed to put");
    repo.put(&format!("{prefix}b"), b"beta".to_vec())
        .await
        .expect("failed to put");

    let mut events = repo
        .watch_prefix(&prefix, CancellationToken::new())
        .await
        .expect("failed to watch prefix");

    let mut snapshot = Vec::new();
    for _ in 0..2 {
        match next_event(&mut events).await {
            WatchEvent::Modify { key, value, .. } => snapshot.push((key, value)),
            other => panic!("expected a synthesized modify, got {other:?}"),
        }
    }
    snapshot.sort();
    assert_eq!(
        snapshot,
        vec![
            (format!("{prefix}a").into_bytes(), b"alpha".to_vec()),
            (format!("{prefix}b").into_bytes(), b"beta".to_vec()),
        ]
    );

    repo.put(&format!("{prefix}c"), b"gamma".to_vec())
        .await
        .expect("failed to put");
    match next_event(&mut events).await {
        WatchEvent::Modify { key, .. } => assert_eq!(key, format!("{prefix}c").into_bytes()),
        other => panic!("expected the live change after the snapshot, got {other:?}"),
    }
}

#[tokio::test]
async fn canceling_a_watch_closes_the_channel() {
    let repo = common::get_repository().await;
    let key = random_str(10);

    let cancel = CancellationToken::new();
    let mut events = repo
        .watch(&key, cancel.clone())
        .await
        .expect("failed to watch");

    cancel.cancel();

    let end = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("channel did not close after cancellation");
    assert!(end.is_none());
}

#[tokio::test]
async fn closing_the_repository_stops_watches() {
    let repo = common::get_repository().await;
    let key = random_str(10);

    let mut events = repo
        .watch(&key, CancellationToken::new())
        .await
        .expect("failed to watch");

    repo.close().await.expect("failed to close");

    let end = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("channel did not close after repository close");
    assert!(end.is_none());
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct NodeInfo {
    address: String,
    weight: i64,
}

#[tokio::test]
async fn watch_payloads_decode_as_json() {
    let repo = common::get_repository().await;
    let key = random_str(10);

    let node = NodeInfo {
        address: "10.0.0.7:8080".to_string(),
        weight: 3,
    };
    repo.put(&key, serde_json::to_vec(&node).expect("failed to encode"))
        .await
        .expect("failed to put");

    let mut events = repo
        .watch(&key, CancellationToken::new())
        .await
        .expect("failed to watch");

    let event = next_event(&mut events).await;
    let decoded = event
        .json_value::<NodeInfo>()
        .expect("event has no payload")
        .expect("failed to decode payload");
    assert_eq!(decoded, node);
}
