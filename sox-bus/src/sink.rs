use std::{
    collections::HashMap,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard},
    task::{Context, Poll},
};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_stream::wrappers::ReceiverStream;

use crate::error::BusError;

/// Chunks a listener may have queued before it starts skipping.
pub const LISTENER_QUEUE: usize = 64;
/// Chunks a pacer may be ahead of its broadcast sink.
pub const SINK_QUEUE: usize = 4;

pub type ListenerId = uuid::Uuid;

/// Live listener channels, keyed by id. Cheap to clone.
#[derive(Clone, Default)]
pub struct ListenerRegistry {
    inner: Arc<Mutex<HashMap<ListenerId, mpsc::Sender<Bytes>>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<ListenerId, mpsc::Sender<Bytes>>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn register(&self) -> Listener {
        self.register_with_capacity(LISTENER_QUEUE)
    }

    pub fn register_with_capacity(&self, capacity: usize) -> Listener {
        let id = uuid::Uuid::new_v4();
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.slots().insert(id, tx);
        log::debug!("listener {} registered", id);
        Listener {
            id,
            rx: ReceiverStream::new(rx),
            registry: self.clone(),
        }
    }

    /// Removes `id`. Returns `true` only for the call that removed it.
    pub fn unregister(&self, id: &ListenerId) -> bool {
        let removed = self.slots().remove(id).is_some();
        if removed {
            log::debug!("listener {} unregistered", id);
        }
        removed
    }

    pub fn contains(&self, id: &ListenerId) -> bool {
        self.slots().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots().is_empty()
    }

    pub fn ids(&self) -> Vec<ListenerId> {
        self.slots().keys().copied().collect()
    }

    /// Offers `chunk` to every listener without waiting on any of them.
    /// Closed listeners are pruned instead of written to; a listener with a
    /// full queue misses this chunk. Returns the number of deliveries.
    pub fn broadcast(&self, chunk: &Bytes) -> usize {
        let mut delivered = 0;
        self.slots().retain(|id, tx| {
            if tx.is_closed() {
                log::debug!("listener {} closed, pruned", id);
                return false;
            }
            match tx.try_send(chunk.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    log::trace!("listener {} lagging, chunk skipped", id);
                    true
                }
                Err(TrySendError::Closed(_)) => {
                    log::debug!("listener {} closed, pruned", id);
                    false
                }
            }
        });
        delivered
    }

    #[cfg(test)]
    pub(crate) fn insert_sender(&self, id: ListenerId, tx: mpsc::Sender<Bytes>) {
        self.slots().insert(id, tx);
    }
}

/// One connected client's side of the broadcast. Yields chunks broadcast
/// after registration and unregisters itself when dropped.
pub struct Listener {
    id: ListenerId,
    rx: ReceiverStream<Bytes>,
    registry: ListenerRegistry,
}

impl Listener {
    pub fn id(&self) -> ListenerId {
        self.id
    }
}

impl Stream for Listener {
    type Item = Bytes;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_next_unpin(cx)
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.registry.unregister(&self.id);
    }
}

/// Write half feeding a broadcast sink task.
#[derive(Clone)]
pub struct SinkWriter {
    tx: mpsc::Sender<Bytes>,
}

impl SinkWriter {
    /// A writer plus the raw receiving end, for stages that consume the
    /// chunks themselves.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub async fn send(&self, chunk: Bytes) -> Result<(), BusError> {
        self.tx.send(chunk).await.map_err(|_| BusError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Fan-out consumer: every chunk written to its [`SinkWriter`] is offered to
/// every registered listener. The task ends once all writers are dropped.
pub struct BroadcastSink;

impl BroadcastSink {
    pub fn spawn(registry: ListenerRegistry) -> SinkWriter {
        let (writer, rx) = SinkWriter::channel(SINK_QUEUE);
        tokio::spawn(async move {
            let mut chunks = ReceiverStream::new(rx);
            let mut total = 0u64;
            while let Some(chunk) = chunks.next().await {
                total += chunk.len() as u64;
                registry.broadcast(&chunk);
            }
            log::debug!("broadcast sink drained after {} bytes", total);
        });
        writer
    }
}
