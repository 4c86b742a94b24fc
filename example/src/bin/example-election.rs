use std::time::Duration;

use etcd_repository::{
    config::RepositoryConfig,
    heartbeat::PutIfAbsent,
    repository::{EtcdRepository, Repository},
};
use tokio_util::sync::CancellationToken;

///
/// Three contenders race for `election/leader`; exactly one wins and keeps
/// the key alive until its heartbeat is canceled.
///
#[tokio::main]
async fn main() {
    let repo = EtcdRepository::connect(RepositoryConfig::new(["http://localhost:2379"]))
        .await
        .expect("failed to connect to etcd");

    let cancel = CancellationToken::new();
    let contenders = (0..3)
        .map(|i| {
            let repo = repo.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let name = format!("node-{i}");
                let outcome = repo
                    .put_if_absent(
                        "election/leader",
                        name.clone().into_bytes(),
                        Duration::from_secs(3),
                        cancel,
                    )
                    .await
                    .expect("election failed");
                match outcome {
                    PutIfAbsent::Acquired(closed) => {
                        println!("{name} is the leader");
                        closed.recv().await;
                        println!("{name} stopped leading");
                    }
                    PutIfAbsent::AlreadyExists => {
                        let leader = repo
                            .get("election/leader")
                            .await
                            .expect("failed to read the leader key");
                        println!("{name} follows {}", String::from_utf8_lossy(&leader));
                    }
                }
            })
        })
        .collect::<Vec<_>>();

    tokio::time::sleep(Duration::from_secs(2)).await;
    println!("canceling the leader's heartbeat");
    cancel.cancel();
    for contender in contenders {
        let _ = contender.await;
    }

    tokio::time::sleep(Duration::from_secs(4)).await;
    match repo.get("election/leader").await {
        Ok(value) => println!(
            "leader key still held by {}",
            String::from_utf8_lossy(&value)
        ),
        Err(e) => println!("leader key released: {e}"),
    }
}
