//! Bounded, lossy publish/subscribe of filesystem change events.

use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll};

use futures::Stream;

use crate::path;

/// What happened to a path.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EventKind {
    Created,
    Modified,
    Deleted,
}

/// One observed change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEvent {
    pub path: String,
    pub kind: EventKind,
}

struct Subscriber {
    watched: String,
    sender: async_channel::Sender<FsEvent>,
}

/// Fan-out bus. Publishing never blocks: when a subscriber's buffer is
/// full the event is dropped for that subscriber with a warning.
pub struct EventBus {
    capacity: usize,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, subscribers: Mutex::new(Vec::new()) }
    }

    /// Subscribes to events at `watched` and inside its subtree.
    /// The path must already be normalized.
    pub fn watch(&self, watched: &str) -> EventStream {
        let (sender, receiver) = async_channel::bounded(self.capacity);
        self.subscribers
            .lock()
            .expect("event bus mutex poisoned")
            .push(Subscriber { watched: watched.to_string(), sender });
        EventStream { receiver }
    }

    pub fn publish(&self, event: FsEvent) {
        let mut subscribers = self.subscribers.lock().expect("event bus mutex poisoned");
        subscribers.retain(|subscriber| !subscriber.sender.is_closed());
        for subscriber in subscribers.iter() {
            if !path::is_within(&event.path, &subscriber.watched) {
                continue;
            }
            if let Err(async_channel::TrySendError::Full(dropped)) =
                subscriber.sender.try_send(event.clone())
            {
                tracing::warn!(
                    "event buffer full for watcher of {}, dropping {:?} {}",
                    subscriber.watched,
                    dropped.kind,
                    dropped.path,
                );
            }
        }
    }
}

/// Per-subscription stream of matching events.
///
/// Dropping the stream unsubscribes; the bus reaps closed
/// subscriptions on the next publish.
pub struct EventStream {
    receiver: async_channel::Receiver<FsEvent>,
}

impl EventStream {
    /// Next event, `None` once the stream is closed.
    pub async fn next_event(&mut self) -> Option<FsEvent> {
        self.receiver.recv().await.ok()
    }

    /// Non-blocking poll used by tests and draining loops.
    pub fn try_next_event(&mut self) -> Option<FsEvent> {
        self.receiver.try_recv().ok()
    }
}

impl Stream for EventStream {
    type Item = FsEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        // SAFETY: `receiver` is the sole field of `EventStream`, which has no
        // `Drop` impl, so pinning `EventStream` structurally pins `receiver`.
        let this = unsafe { self.get_unchecked_mut() };
        unsafe { Pin::new_unchecked(&mut this.receiver) }.poll_next(cx)
    }
}
