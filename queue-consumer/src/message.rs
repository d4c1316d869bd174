use std::fmt;
use std::sync::{Arc, Weak};

use async_trait::async_trait;

use crate::errors::ConsumerError;
use crate::transport::{Attributes, RawMessage, SystemAttributes};

/// The operations a [`Message`] can invoke on its owning consumer.
///
/// `Message` holds only a [`Weak`] reference to this, the non-owning
/// back-relation called out in the data model: a message never keeps its
/// consumer alive, and calling a terminal operation after the consumer has
/// been dropped fails with [`ConsumerError::NotRunning`].
#[async_trait]
pub trait MessageOps: Send + Sync {
    async fn delete_message(&self, handle: MessageHandle) -> Result<(), ConsumerError>;
    async fn release_message(&self, handle: MessageHandle) -> Result<(), ConsumerError>;
    async fn change_message_visibility(
        &self,
        handle: MessageHandle,
        seconds: i32,
    ) -> Result<(), ConsumerError>;
}

/// The identifying pair needed to act on a received message: its locally
/// assigned id and the receipt handle the service issued for this
/// particular delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHandle {
    pub id: String,
    pub receipt_handle: String,
}

/// A non-owning handle back to the consumer that delivered a message.
#[derive(Clone)]
pub struct ConsumerHandle {
    inner: Weak<dyn MessageOps>,
}

impl ConsumerHandle {
    pub fn new(inner: Weak<dyn MessageOps>) -> Self {
        Self { inner }
    }

    fn upgrade(&self) -> Result<Arc<dyn MessageOps>, ConsumerError> {
        self.inner.upgrade().ok_or(ConsumerError::NotRunning)
    }
}

/// A message delivered by the consumer's receive loop.
///
/// Immutable once constructed; the terminal operations ([`Message::delete`],
/// [`Message::release`], [`Message::change_visibility`]) consume `&self` and
/// delegate to the owning consumer via the non-owning [`ConsumerHandle`].
#[derive(Clone)]
pub struct Message {
    pub id: String,
    pub receipt_handle: String,
    pub body: Option<String>,
    pub attributes: Attributes,
    pub system_attributes: SystemAttributes,
    pub approximate_receive_count: u32,
    consumer: ConsumerHandle,
}

impl Message {
    pub(crate) fn from_raw(raw: RawMessage, consumer: ConsumerHandle) -> Self {
        Message {
            id: raw.id,
            receipt_handle: raw.receipt_handle,
            body: raw.body,
            attributes: raw.attributes,
            system_attributes: raw.system_attributes,
            approximate_receive_count: raw.approximate_receive_count,
            consumer,
        }
    }

    pub fn handle(&self) -> MessageHandle {
        MessageHandle {
            id: self.id.clone(),
            receipt_handle: self.receipt_handle.clone(),
        }
    }

    /// Deletes this message, removing it from the queue permanently.
    pub async fn delete(&self) -> Result<(), ConsumerError> {
        self.consumer
            .upgrade()?
            .delete_message(self.handle())
            .await
    }

    /// Returns this message to the queue immediately by zeroing its
    /// visibility timeout, making it eligible for redelivery right away.
    pub async fn release(&self) -> Result<(), ConsumerError> {
        self.consumer
            .upgrade()?
            .release_message(self.handle())
            .await
    }

    /// Changes this message's visibility timeout.
    pub async fn change_visibility(&self, seconds: i32) -> Result<(), ConsumerError> {
        self.consumer
            .upgrade()?
            .change_message_visibility(self.handle(), seconds)
            .await
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.id)
            .field("receipt_handle", &self.receipt_handle)
            .field("body", &self.body)
            .field("attributes", &self.attributes)
            .field("system_attributes", &self.system_attributes)
            .field("approximate_receive_count", &self.approximate_receive_count)
            .finish()
    }
}

/// A lightweight summary of a message used in events where carrying the
/// full body and attribute set would be wasteful.
#[derive(Debug, Clone)]
pub struct MessageSummary {
    pub id: String,
    pub receipt_handle: String,
}

impl From<&Message> for MessageSummary {
    fn from(message: &Message) -> Self {
        MessageSummary {
            id: message.id.clone(),
            receipt_handle: message.receipt_handle.clone(),
        }
    }
}
