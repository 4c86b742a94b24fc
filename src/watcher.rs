use {
    crate::event::{WatchEvent, WatchEventChan, WatchStreamError},
    etcd_client::{GetOptions, WatchOptions, WatchStream, Watcher},
    tokio::sync::mpsc,
    tokio_stream::StreamExt,
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, warn},
};

///
/// Failed to establish a watch. No channel is handed out and no background
/// task is left running.
///
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("watch canceled during setup")]
    Canceled,
    #[error("repository is closed")]
    Closed,
    #[error(transparent)]
    Etcd(#[from] etcd_client::Error),
}

///
/// Establishes a watch on `key` (or on every key under it, with `prefix`)
/// and spawns the relay task feeding the returned channel.
///
/// The current state is read first, capturing the store revision, and one
/// `Modify` event per live entry is staged on the channel before the raw
/// change stream is consumed. The stream itself starts strictly after the
/// snapshot revision, so nothing is missed and nothing is delivered twice.
///
/// The channel capacity covers the whole synthesized snapshot, for both
/// point and prefix watches, so setup never blocks on a reader that has not
/// started draining yet. Live events are backpressured one at a time.
///
pub(crate) async fn spawn_watch(
    etcd: etcd_client::Client,
    key: String,
    prefix: bool,
    cancel: CancellationToken,
    shutdown: CancellationToken,
) -> Result<WatchEventChan, WatchError> {
    // Prefix scans may be served from any member; point reads stay
    // linearizable, matching get().
    let get_options = prefix.then(|| GetOptions::new().with_prefix().with_serializable());
    let resp = etcd.kv_client().get(key.as_str(), get_options).await?;
    let revision = resp.header().map(|header| header.revision()).unwrap_or(0);

    let mut watch_options = WatchOptions::new().with_start_revision(revision + 1);
    if prefix {
        watch_options = watch_options.with_prefix().with_prev_key();
    }
    let (watcher, stream) = etcd
        .watch_client()
        .watch(key.as_str(), Some(watch_options))
        .await?;

    let (tx, rx) = mpsc::channel(resp.kvs().len().max(1));
    for kv in resp.kvs() {
        // Empty values are synthesized too: a watch reports what is stored,
        // it does not apply get()'s empty-is-absent policy.
        let event = WatchEvent::Modify {
            key: kv.key().to_vec(),
            value: kv.value().to_vec(),
            revision: kv.mod_revision(),
        };
        if !notify(&tx, event, &cancel).await {
            return Err(WatchError::Canceled);
        }
    }

    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown.cancelled() => {}
            _ = relay(stream, watcher, tx, cancel) => {}
        }
    });
    Ok(rx)
}

///
/// Consumes the raw change stream and forwards normalized events until the
/// stream ends, the caller cancels, or the receiver goes away. A stream that
/// errors or closes on the server side produces exactly one terminal
/// [`WatchEvent::Error`]; the channel closes when this task drops `tx`.
///
async fn relay(
    mut stream: WatchStream,
    mut watcher: Watcher,
    tx: mpsc::Sender<WatchEvent>,
    cancel: CancellationToken,
) {
    'relay: loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break 'relay,
            message = stream.next() => message,
        };
        match message {
            Some(Ok(resp)) => {
                if resp.canceled() {
                    warn!("watch {} canceled by the server", watcher.watch_id());
                    let event = WatchEvent::Error(WatchStreamError::CanceledByServer);
                    let _ = notify(&tx, event, &cancel).await;
                    break 'relay;
                }
                for raw in resp.events() {
                    let Some(event) = WatchEvent::from_raw(raw) else {
                        continue;
                    };
                    if !notify(&tx, event, &cancel).await {
                        break 'relay;
                    }
                }
            }
            Some(Err(e)) => {
                error!("watch stream error: {e:?}");
                let _ = notify(&tx, WatchEvent::Error(e.into()), &cancel).await;
                break 'relay;
            }
            None => {
                debug!("watch stream ended");
                let _ = notify(&tx, WatchEvent::Error(WatchStreamError::Closed), &cancel).await;
                break 'relay;
            }
        }
    }
    let _ = watcher.cancel().await;
}

///
/// Sends one event, racing the cancellation token. Returns false when the
/// send did not complete, because the watch was canceled or the receiver
/// was dropped.
///
async fn notify(tx: &mpsc::Sender<WatchEvent>, event: WatchEvent, cancel: &CancellationToken) -> bool {
    tokio::select! {
        result = tx.send(event) => result.is_ok(),
        _ = cancel.cancelled() => false,
    }
}
