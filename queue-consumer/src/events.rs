use tokio::sync::broadcast;

use crate::errors::{ConsumerError, DeleteEntryError};
use crate::message::{Message, MessageSummary};

/// The fixed set of events a [`crate::Consumer`] publishes.
///
/// This is the typed multi-subscriber observable surface called for in the
/// design notes: subscribers get a [`broadcast::Receiver`] and see every
/// event published after they subscribed. Publishing is fire-and-forget —
/// if nobody is listening, the event is simply dropped.
#[derive(Debug, Clone)]
pub enum ConsumerEvent {
    /// One per delivered message.
    Message(Message),
    /// Emitted once per poll that returned at least one message, strictly
    /// before the corresponding `Message` events.
    GotMessages(usize),
    /// A poll returned zero messages and in-flight was zero at that instant.
    QueueEmpty,
    /// In-flight reached the configured cap; polling is paused.
    MaxInFlight,
    /// An in-flight poll was cancelled by `stop(soft = false)`.
    Aborted,
    /// In-flight transitioned from above zero to zero after stop was
    /// requested.
    Drained,
    /// A transport error from the receive loop, a batcher flush, the
    /// resolver, or the timeout extender.
    Error(ConsumerError),
    /// A single entry failed within a delete batch flush.
    DelError(DeleteEntryError),
    /// A message was submitted to the delete batcher.
    DelQueued(MessageSummary),
    /// A message was confirmed deleted by the service.
    Deleted(MessageSummary),
    /// `handled_message` was called for this message (decrementing
    /// in-flight).
    Handled(MessageSummary),
    /// The timeout extender reached `no_extensions_after_secs` for this
    /// message and stopped renewing its visibility timeout.
    TimeoutReached(MessageSummary),
}

/// Thin wrapper around a [`broadcast::Sender`] that never panics or fails
/// a caller when there are no subscribers.
#[derive(Clone)]
pub struct EventEmitter {
    sender: broadcast::Sender<ConsumerEvent>,
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        EventEmitter { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConsumerEvent> {
        self.sender.subscribe()
    }

    /// Publishes an event to all current subscribers. Fire-and-forget: an
    /// absence of subscribers is not an error.
    pub fn emit(&self, event: ConsumerEvent) {
        let _ = self.sender.send(event);
    }
}
