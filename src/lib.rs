///
/// Repository connection settings, validated up-front.
pub mod config;

///
/// Normalized change notifications delivered by watch channels.
pub mod event;

///
/// TTL-based liveness: leases, heartbeats and create-once semantics.
pub mod heartbeat;

///
/// The store-agnostic repository contract and its etcd implementation.
pub mod repository;

///
/// Classification of transient etcd errors.
pub mod retry;

///
/// Watch pipeline: snapshot synthesis and change-stream relaying.
pub mod watcher;

///
/// Alias for etcd revision
pub type Revision = i64;
