use {crate::Revision, serde::de::DeserializeOwned, tokio::sync::mpsc};

///
/// Receiving half of a watch channel.
///
/// The producing task drops its sender exactly once, after optionally
/// delivering a terminal [`WatchEvent::Error`]. Once the channel yields
/// `None` no task is left running for that watch.
///
pub type WatchEventChan = mpsc::Receiver<WatchEvent>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Modify,
    Delete,
}

impl From<etcd_client::EventType> for EventType {
    fn from(kind: etcd_client::EventType) -> Self {
        match kind {
            etcd_client::EventType::Delete => EventType::Delete,
            // Every mutation other than a delete is a modify.
            etcd_client::EventType::Put => EventType::Modify,
        }
    }
}

///
/// A normalized change notification.
///
/// Watches deliver the value present at subscription time as a leading
/// `Modify` event, then live changes in revision order. An empty value is a
/// legal payload here, unlike `get` which treats it as absence.
///
#[derive(Debug)]
pub enum WatchEvent {
    Modify {
        key: Vec<u8>,
        value: Vec<u8>,
        revision: Revision,
    },
    Delete {
        key: Vec<u8>,
        value: Vec<u8>,
        revision: Revision,
    },
    /// Terminal: the underlying stream failed or was closed by the server.
    /// Nothing follows this event and the channel closes.
    Error(WatchStreamError),
}

#[derive(Debug, thiserror::Error)]
pub enum WatchStreamError {
    #[error("watch stream error: {0}")]
    Etcd(#[from] etcd_client::Error),
    #[error("watch canceled by the server")]
    CanceledByServer,
    #[error("watch stream closed")]
    Closed,
}

impl WatchEvent {
    pub fn event_type(&self) -> Option<EventType> {
        match self {
            WatchEvent::Modify { .. } => Some(EventType::Modify),
            WatchEvent::Delete { .. } => Some(EventType::Delete),
            WatchEvent::Error(_) => None,
        }
    }

    pub fn key(&self) -> Option<&[u8]> {
        match self {
            WatchEvent::Modify { key, .. } | WatchEvent::Delete { key, .. } => Some(key),
            WatchEvent::Error(_) => None,
        }
    }

    pub fn value(&self) -> Option<&[u8]> {
        match self {
            WatchEvent::Modify { value, .. } | WatchEvent::Delete { value, .. } => Some(value),
            WatchEvent::Error(_) => None,
        }
    }

    ///
    /// Decodes the event payload as JSON, for callers that store structured
    /// values under watched keys.
    ///
    pub fn json_value<T>(&self) -> Option<Result<T, serde_json::Error>>
    where
        T: DeserializeOwned,
    {
        self.value().map(serde_json::from_slice)
    }

    pub(crate) fn from_raw(event: &etcd_client::Event) -> Option<Self> {
        let kv = event.kv()?;
        let key = kv.key().to_vec();
        let value = kv.value().to_vec();
        let revision = kv.mod_revision();
        let event = match EventType::from(event.event_type()) {
            EventType::Modify => WatchEvent::Modify {
                key,
                value,
                revision,
            },
            EventType::Delete => WatchEvent::Delete {
                key,
                value,
                revision,
            },
        };
        Some(event)
    }
}
