use std::time::Duration;

use etcd_repository::{
    config::RepositoryConfig,
    event::WatchEvent,
    repository::{EtcdRepository, Repository},
};
use tokio_util::sync::CancellationToken;

///
/// A tiny service registry: one task watches `services/` while the main
/// task registers itself under a heartbeat, then stops heartbeating and
/// waits for the registration to expire.
///
#[tokio::main]
async fn main() {
    let repo = EtcdRepository::connect(RepositoryConfig::new(["http://localhost:2379"]))
        .await
        .expect("failed to connect to etcd");

    let watch_cancel = CancellationToken::new();
    let mut events = repo
        .watch_prefix("services/", watch_cancel.clone())
        .await
        .expect("failed to watch prefix");

    let watcher = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                WatchEvent::Modify { key, value, .. } => {
                    println!(
                        "up: {} = {}",
                        String::from_utf8_lossy(&key),
                        String::from_utf8_lossy(&value)
                    );
                }
                WatchEvent::Delete { key, .. } => {
                    println!("down: {}", String::from_utf8_lossy(&key));
                }
                WatchEvent::Error(e) => {
                    println!("watch terminated: {e}");
                    break;
                }
            }
        }
    });

    let heartbeat_cancel = CancellationToken::new();
    let closed = repo
        .heartbeat(
            "services/api-1",
            b"10.0.0.7:8080".to_vec(),
            Duration::from_secs(3),
            heartbeat_cancel.clone(),
        )
        .await
        .expect("failed to heartbeat");

    println!("registered services/api-1, heartbeating for 10 seconds...");
    tokio::time::sleep(Duration::from_secs(10)).await;

    println!("stopping the heartbeat, the registration will expire on its own");
    heartbeat_cancel.cancel();
    closed.recv().await;

    tokio::time::sleep(Duration::from_secs(4)).await;
    match repo.get("services/api-1").await {
        Ok(_) => println!("registration still present"),
        Err(e) => println!("registration gone: {e}"),
    }

    watch_cancel.cancel();
    let _ = watcher.await;
}
