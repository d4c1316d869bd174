use std::collections::HashMap;

use async_trait::async_trait;

use crate::errors::TransportError;

/// A tagged attribute value, mirroring the three value kinds an
/// SQS-compatible service accepts for message attributes.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    String(String),
    Number(String),
    Binary(Vec<u8>),
}

impl AttributeValue {
    /// The unset/null encoding: a `String` attribute with empty text.
    pub fn unset() -> Self {
        AttributeValue::String(String::new())
    }
}

pub type Attributes = HashMap<String, AttributeValue>;
pub type SystemAttributes = HashMap<String, String>;

/// A single message as returned by the transport's `receive_message` call,
/// before it has been wrapped into a [`crate::message::Message`] with a
/// back-reference to the owning consumer.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub id: String,
    pub receipt_handle: String,
    pub body: Option<String>,
    pub attributes: Attributes,
    pub system_attributes: SystemAttributes,
    pub approximate_receive_count: u32,
}

#[derive(Debug, Clone, Default)]
pub struct ReceiveMessageRequest {
    pub queue_url: String,
    pub max_messages: u8,
    pub wait_seconds: u32,
    pub visibility_timeout_secs: Option<i32>,
    pub attribute_names: Vec<String>,
    pub message_attribute_names: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ReceiveMessageResponse {
    pub messages: Vec<RawMessage>,
}

#[derive(Debug, Clone)]
pub struct DeleteEntry {
    pub id: String,
    pub receipt_handle: String,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteMessageBatchRequest {
    pub queue_url: String,
    pub entries: Vec<DeleteEntry>,
}

#[derive(Debug, Clone)]
pub struct BatchResultEntry {
    pub id: String,
}

#[derive(Debug, Clone)]
pub struct BatchResultEntryError {
    pub id: String,
    pub code: String,
    pub message: String,
    pub sender_fault: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteMessageBatchResponse {
    pub successful: Vec<BatchResultEntry>,
    pub failed: Vec<BatchResultEntryError>,
}

#[derive(Debug, Clone)]
pub struct SendMessageRequest {
    pub queue_url: String,
    pub message_body: String,
    pub delay_seconds: Option<u32>,
    pub attributes: Attributes,
    pub message_group_id: Option<String>,
    pub message_deduplication_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SendMessageResponse {
    pub message_id: String,
    pub md5_of_message_body: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SendEntry {
    pub id: String,
    pub message_body: String,
    pub delay_seconds: Option<u32>,
    pub attributes: Attributes,
    pub message_group_id: Option<String>,
    pub message_deduplication_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SendMessageBatchRequest {
    pub queue_url: String,
    pub entries: Vec<SendEntry>,
}

#[derive(Debug, Clone)]
pub struct SendResultEntry {
    pub id: String,
    pub message_id: String,
    pub md5_of_message_body: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SendMessageBatchResponse {
    pub successful: Vec<SendResultEntry>,
    pub failed: Vec<BatchResultEntryError>,
}

#[derive(Debug, Clone)]
pub struct ChangeMessageVisibilityRequest {
    pub queue_url: String,
    pub receipt_handle: String,
    pub visibility_timeout_secs: i32,
}

#[derive(Debug, Clone, Default)]
pub struct CreateQueueRequest {
    pub queue_name: String,
    pub visibility_timeout_secs: Option<i32>,
    pub policy: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreateQueueResponse {
    pub queue_url: String,
}

#[derive(Debug, Clone, Default)]
pub struct GetQueueUrlRequest {
    pub queue_name: String,
    pub queue_owner_aws_account_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GetQueueUrlResponse {
    pub queue_url: String,
}

#[derive(Debug, Clone, Default)]
pub struct GetQueueAttributesRequest {
    pub queue_url: String,
    pub attribute_names: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct GetQueueAttributesResponse {
    pub attributes: HashMap<String, String>,
}

/// The abstract contract the consumer engine needs from a hosted
/// message-queue service. Everything below `receive_message` is a thin
/// pass-through; `receive_message` is long-poll shaped and is expected to
/// suspend for up to `wait_seconds`.
///
/// Cancellation of an in-flight `receive_message` call is realised by the
/// caller racing the returned future against a cancellation signal with
/// `tokio::select!` and dropping it, rather than through an explicit
/// `.cancel()` method — `Future`s are already cancel-safe-to-drop in this
/// sense, which is the idiomatic equivalent of the "promise-like with a
/// cancel handle" described for other languages.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn receive_message(
        &self,
        req: ReceiveMessageRequest,
    ) -> Result<ReceiveMessageResponse, TransportError>;

    async fn delete_message_batch(
        &self,
        req: DeleteMessageBatchRequest,
    ) -> Result<DeleteMessageBatchResponse, TransportError>;

    async fn send_message(
        &self,
        req: SendMessageRequest,
    ) -> Result<SendMessageResponse, TransportError>;

    async fn send_message_batch(
        &self,
        req: SendMessageBatchRequest,
    ) -> Result<SendMessageBatchResponse, TransportError>;

    async fn change_message_visibility(
        &self,
        req: ChangeMessageVisibilityRequest,
    ) -> Result<(), TransportError>;

    async fn create_queue(
        &self,
        req: CreateQueueRequest,
    ) -> Result<CreateQueueResponse, TransportError>;

    async fn delete_queue(&self, queue_url: &str) -> Result<(), TransportError>;

    async fn purge_queue(&self, queue_url: &str) -> Result<(), TransportError>;

    async fn get_queue_url(
        &self,
        req: GetQueueUrlRequest,
    ) -> Result<GetQueueUrlResponse, TransportError>;

    async fn get_queue_attributes(
        &self,
        req: GetQueueAttributesRequest,
    ) -> Result<GetQueueAttributesResponse, TransportError>;

    /// The scheme+host+port the transport is actually talking to, used by
    /// `QueueResolver` to rewrite a resolved queue URL's authority when
    /// `correct_queue_url` is set (e.g. a VPC endpoint or local emulator
    /// that reports a different internal host than the one the client
    /// dialled). Transports that never need host correction can leave
    /// this as `None`.
    fn endpoint_authority(&self) -> Option<String> {
        None
    }
}
