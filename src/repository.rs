use {
    crate::{
        config::{ConfigError, RepositoryConfig},
        event::WatchEventChan,
        heartbeat::{Closed, Heartbeat, HeartbeatError, PutIfAbsent},
        watcher::{self, WatchError},
    },
    async_trait::async_trait,
    etcd_client::{Compare, CompareOp, Txn, TxnOp},
    std::{
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
        time::Duration,
    },
    tokio_util::sync::CancellationToken,
    tracing::debug,
};

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("key {0:?} not found")]
    NotFound(String),
    #[error("key {0:?} has an empty value")]
    EmptyValue(String),
    #[error("repository is closed")]
    Closed,
    #[error(transparent)]
    Etcd(#[from] etcd_client::Error),
}

///
/// Uniform contract over a strongly consistent, watchable key-value store.
///
/// The contract composes three store primitives into higher-level
/// guarantees: a revisioned change stream (watches never miss the state
/// present at subscription time), a renewable lease (a key lives exactly as
/// long as its owner keeps heartbeating), and a single-key conditional
/// transaction (create-once and compare-and-delete races have exactly one
/// winner). Background work communicates completion and failure only
/// through channel closure, never through shared state.
///
#[async_trait]
pub trait Repository: Send + Sync {
    /// Reads the value at `key`. A missing key and a present key with a
    /// zero-length value are both user-visible errors; neither is retried.
    async fn get(&self, key: &str) -> Result<Vec<u8>, RepositoryError>;

    /// Writes `key = value`. Single-key, linearizable, no implicit retry.
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), RepositoryError>;

    /// Deletes `key`. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), RepositoryError>;

    /// Shuts the repository down. To be called at most once: every
    /// operation afterwards fails with a closed error and all background
    /// watch and keepalive tasks stop on their next iteration.
    async fn close(&self) -> Result<(), RepositoryError>;

    /// Attaches `key = value` to a fresh lease with the given ttl,
    /// overwriting any current value, and keeps the lease alive in the
    /// background. The returned signal resolves when the keepalive task
    /// stops for any reason; the store then deletes the key once the ttl
    /// elapses. A lease-grant or put failure is returned synchronously and
    /// no task starts.
    async fn heartbeat(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
        cancel: CancellationToken,
    ) -> Result<Closed, HeartbeatError>;

    /// Creates `key = value` under a fresh lease only if the key is absent,
    /// as one transaction. Exactly one of any number of racing callers
    /// acquires the key and gets a running keepalive; the others observe
    /// [`PutIfAbsent::AlreadyExists`] with no error and own nothing.
    async fn put_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
        cancel: CancellationToken,
    ) -> Result<PutIfAbsent, HeartbeatError>;

    /// Watches a single key. If the key exists at subscription time its
    /// current value arrives first as a synthesized modify event; later
    /// events follow in revision order.
    async fn watch(
        &self,
        key: &str,
        cancel: CancellationToken,
    ) -> Result<WatchEventChan, WatchError>;

    /// Watches every key under `prefix`, with one synthesized modify event
    /// per live entry before any live change.
    async fn watch_prefix(
        &self,
        prefix: &str,
        cancel: CancellationToken,
    ) -> Result<WatchEventChan, WatchError>;

    /// Deletes `key` only if its current value equals `expected`, as one
    /// transaction. A failed comparison is `Ok(false)`, not an error.
    async fn delete_with_value(&self, key: &str, expected: &[u8])
        -> Result<bool, RepositoryError>;
}

///
/// [`Repository`] backed by etcd.
///
/// Cheap to clone; clones share the underlying connection and the close
/// state. The connection is used read-only by every operation except
/// [`close`](Repository::close).
///
#[derive(Clone)]
pub struct EtcdRepository {
    etcd: etcd_client::Client,
    shutdown: CancellationToken,
    closed: Arc<AtomicBool>,
}

impl EtcdRepository {
    ///
    /// Validates the configuration and connects to etcd.
    ///
    pub async fn connect(config: RepositoryConfig) -> Result<Self, RepositoryError> {
        config.validate()?;
        let etcd = etcd_client::Client::connect(&config.endpoints, config.connect_options()).await?;
        Ok(Self {
            etcd,
            shutdown: CancellationToken::new(),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    fn ensure_open(&self) -> Result<(), RepositoryError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RepositoryError::Closed);
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Repository for EtcdRepository {
    async fn get(&self, key: &str) -> Result<Vec<u8>, RepositoryError> {
        self.ensure_open()?;
        let resp = self.etcd.kv_client().get(key, None).await?;
        let Some(kv) = resp.kvs().first() else {
            return Err(RepositoryError::NotFound(key.to_string()));
        };
        if kv.value().is_empty() {
            return Err(RepositoryError::EmptyValue(key.to_string()));
        }
        Ok(kv.value().to_vec())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), RepositoryError> {
        self.ensure_open()?;
        self.etcd.kv_client().put(key, value, None).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), RepositoryError> {
        self.ensure_open()?;
        self.etcd.kv_client().delete(key, None).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), RepositoryError> {
        self.ensure_open()?;
        self.closed.store(true, Ordering::Release);
        self.shutdown.cancel();
        debug!("repository closed");
        Ok(())
    }

    async fn heartbeat(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
        cancel: CancellationToken,
    ) -> Result<Closed, HeartbeatError> {
        if self.is_closed() {
            return Err(HeartbeatError::Closed);
        }
        let mut heartbeat = Heartbeat::new(self.etcd.clone(), key.to_string(), value, ttl)?;
        heartbeat.grant_and_put().await?;
        Ok(heartbeat.spawn_keep_alive(cancel, self.shutdown.clone()))
    }

    async fn put_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
        cancel: CancellationToken,
    ) -> Result<PutIfAbsent, HeartbeatError> {
        if self.is_closed() {
            return Err(HeartbeatError::Closed);
        }
        let mut heartbeat = Heartbeat::new(self.etcd.clone(), key.to_string(), value, ttl)?;
        if heartbeat.grant_and_put_if_absent().await? {
            Ok(PutIfAbsent::Acquired(
                heartbeat.spawn_keep_alive(cancel, self.shutdown.clone()),
            ))
        } else {
            // The fresh lease has no keys attached; it expires on its own.
            Ok(PutIfAbsent::AlreadyExists)
        }
    }

    async fn watch(
        &self,
        key: &str,
        cancel: CancellationToken,
    ) -> Result<WatchEventChan, WatchError> {
        if self.is_closed() {
            return Err(WatchError::Closed);
        }
        watcher::spawn_watch(
            self.etcd.clone(),
            key.to_string(),
            false,
            cancel,
            self.shutdown.clone(),
        )
        .await
    }

    async fn watch_prefix(
        &self,
        prefix: &str,
        cancel: CancellationToken,
    ) -> Result<WatchEventChan, WatchError> {
        if self.is_closed() {
            return Err(WatchError::Closed);
        }
        watcher::spawn_watch(
            self.etcd.clone(),
            prefix.to_string(),
            true,
            cancel,
            self.shutdown.clone(),
        )
        .await
    }

    async fn delete_with_value(
        &self,
        key: &str,
        expected: &[u8],
    ) -> Result<bool, RepositoryError> {
        self.ensure_open()?;
        let txn = Txn::new()
            .when(vec![Compare::value(key, CompareOp::Equal, expected)])
            .and_then(vec![TxnOp::delete(key, None)]);
        let resp = self.etcd.kv_client().txn(txn).await?;
        Ok(resp.succeeded())
    }
}
