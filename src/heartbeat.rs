use {
    crate::retry::is_transient,
    etcd_client::{
        Compare, CompareOp, LeaseKeepAliveStream, LeaseKeeper, PutOptions, Txn, TxnOp,
    },
    futures::StreamExt,
    retry::delay::Exponential,
    std::time::Duration,
    tokio::{
        sync::oneshot,
        time::{sleep_until, Instant},
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, warn},
};

/// etcd rejects sub-second leases and the renewal loop needs room for at
/// least one retry inside the ttl.
pub const MIN_TTL: Duration = Duration::from_secs(2);

///
/// Resolves once the background keepalive task has permanently stopped,
/// whether through cancellation, lease expiry or an unrecoverable transport
/// failure. Carries no payload; callers that need the key's fate should
/// watch the key itself.
///
#[derive(Debug)]
pub struct Closed {
    inner: oneshot::Receiver<()>,
}

impl Closed {
    pub async fn recv(self) {
        // The task never sends; dropping its sender half is the signal.
        let _ = self.inner.await;
    }
}

///
/// Outcome of [`Repository::put_if_absent`](crate::repository::Repository::put_if_absent).
///
#[derive(Debug)]
pub enum PutIfAbsent {
    /// This caller created the key. The lease is being kept alive in the
    /// background and the signal resolves when that stops.
    Acquired(Closed),
    /// Another writer already holds the key. The caller owns nothing; the
    /// lease granted for the attempt has no attached keys and simply
    /// expires.
    AlreadyExists,
}

impl PutIfAbsent {
    /// Convenience for callers that only care whether they won the race.
    pub fn into_acquired(self) -> Option<Closed> {
        match self {
            PutIfAbsent::Acquired(closed) => Some(closed),
            PutIfAbsent::AlreadyExists => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HeartbeatError {
    #[error("lease ttl must be at least {} seconds", MIN_TTL.as_secs())]
    InvalidTtl,
    #[error("repository is closed")]
    Closed,
    #[error(transparent)]
    Etcd(#[from] etcd_client::Error),
}

///
/// One lease and the key attached to it. The lease is owned exclusively by
/// this value; after [`spawn_keep_alive`](Self::spawn_keep_alive) the
/// renewal task is the sole owner and never outlives its first terminal
/// transition.
///
pub(crate) struct Heartbeat {
    etcd: etcd_client::Client,
    key: String,
    value: Vec<u8>,
    ttl: Duration,
    lease_id: i64,
}

impl Heartbeat {
    pub(crate) fn new(
        etcd: etcd_client::Client,
        key: String,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<Self, HeartbeatError> {
        if ttl < MIN_TTL {
            return Err(HeartbeatError::InvalidTtl);
        }
        Ok(Self {
            etcd,
            key,
            value,
            ttl,
            lease_id: 0,
        })
    }

    async fn grant_lease(&mut self) -> Result<(), HeartbeatError> {
        let lease = self
            .etcd
            .lease_client()
            .grant(self.ttl.as_secs() as i64, None)
            .await?;
        self.lease_id = lease.id();
        Ok(())
    }

    ///
    /// Grants the lease and attaches the key to it, overwriting whatever
    /// value is currently stored.
    ///
    pub(crate) async fn grant_and_put(&mut self) -> Result<(), HeartbeatError> {
        self.grant_lease().await?;
        let options = PutOptions::new().with_lease(self.lease_id);
        self.etcd
            .kv_client()
            .put(self.key.as_str(), self.value.clone(), Some(options))
            .await?;
        Ok(())
    }

    ///
    /// Grants the lease and runs the create-once transaction: the put
    /// applies only while the key has no create revision, so exactly one of
    /// any number of racing callers succeeds.
    ///
    pub(crate) async fn grant_and_put_if_absent(&mut self) -> Result<bool, HeartbeatError> {
        self.grant_lease().await?;
        let put = TxnOp::put(
            self.key.as_str(),
            self.value.clone(),
            Some(PutOptions::new().with_lease(self.lease_id)),
        );
        let txn = Txn::new()
            .when(vec![Compare::create_revision(
                self.key.as_str(),
                CompareOp::Equal,
                0,
            )])
            .and_then(vec![put]);
        let resp = self.etcd.kv_client().txn(txn).await?;
        Ok(resp.succeeded())
    }

    ///
    /// Starts the background renewal task. The returned signal resolves
    /// when the task exits: caller cancellation, repository shutdown, lease
    /// expiry, or a renewal stream that could not be replaced in time.
    ///
    pub(crate) fn spawn_keep_alive(
        self,
        cancel: CancellationToken,
        shutdown: CancellationToken,
    ) -> Closed {
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            // Dropping the sender on exit is what closes the signal.
            let _tx = tx;
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = self.keep_alive(cancel) => {}
            }
        });
        Closed { inner: rx }
    }

    ///
    /// Renews the lease at half the ttl until a terminal transition.
    /// Transient failures re-establish the renewal stream; the retry budget
    /// is whatever remains of the ttl since the last confirmed renewal,
    /// because past that point the store has already reclaimed the keys.
    ///
    async fn keep_alive(self, cancel: CancellationToken) {
        let lease_id = self.lease_id;
        let renewal_interval = self.ttl / 2;
        let mut lease_deadline = Instant::now() + self.ttl;
        'stream: loop {
            let Some((mut keeper, mut responses)) =
                self.open_renewal_stream(&cancel, lease_deadline).await
            else {
                break 'stream;
            };
            let mut next_renewal = Instant::now() + renewal_interval;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("keepalive for lease {lease_id} canceled");
                        break 'stream;
                    }
                    _ = sleep_until(next_renewal) => {}
                }
                if let Err(e) = keeper.keep_alive().await {
                    warn!("renewal request for lease {lease_id} failed: {e:?}");
                    continue 'stream;
                }
                match responses.next().await {
                    Some(Ok(resp)) => {
                        if resp.ttl() == 0 {
                            warn!("lease {lease_id} expired or was revoked");
                            break 'stream;
                        }
                        lease_deadline = Instant::now() + Duration::from_secs(resp.ttl() as u64);
                        next_renewal += renewal_interval;
                    }
                    Some(Err(e)) => {
                        warn!("renewal stream for lease {lease_id} errored: {e:?}");
                        continue 'stream;
                    }
                    None => {
                        warn!("renewal stream for lease {lease_id} ended");
                        continue 'stream;
                    }
                }
            }
        }
        debug!("keepalive for lease {lease_id} stopped");
    }

    ///
    /// Opens (or re-opens) the renewal stream, backing off on transient
    /// errors while the lease can still be alive. Returns `None` once the
    /// task should transition to lost: canceled, budget exhausted, or a
    /// non-transient failure.
    ///
    async fn open_renewal_stream(
        &self,
        cancel: &CancellationToken,
        budget: Instant,
    ) -> Option<(LeaseKeeper, LeaseKeepAliveStream)> {
        let mut delays = Exponential::from_millis_with_factor(100, 2.0);
        loop {
            if cancel.is_cancelled() {
                return None;
            }
            match self.etcd.lease_client().keep_alive(self.lease_id).await {
                Ok(pair) => return Some(pair),
                Err(e) if is_transient(&e) => {
                    let Some(delay) = delays.next() else {
                        return None;
                    };
                    if Instant::now() + delay >= budget {
                        error!(
                            "renewal stream for lease {} not recovered within the lease ttl",
                            self.lease_id
                        );
                        return None;
                    }
                    warn!(
                        "failed to open renewal stream for lease {}: {e:?}",
                        self.lease_id
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return None,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    error!(
                        "failed to open renewal stream for lease {}: {e:?}",
                        self.lease_id
                    );
                    return None;
                }
            }
        }
    }
}
