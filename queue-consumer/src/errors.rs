use std::fmt;

/// A failure returned by the underlying queue-service transport.
///
/// This covers network failures, non-2xx service responses and anything
/// else a [`crate::transport::Transport`] implementation cannot recover
/// from on its own. It is never fatal to the consumer: the receive loop
/// backs off and retries, and batchers reject only the entries in the
/// affected batch.
#[derive(Debug, Clone)]
pub struct TransportError {
    message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "queue transport error: {}", self.message)
    }
}

impl std::error::Error for TransportError {}

/// A single entry's failure within a `DeleteMessageBatch` response.
#[derive(Debug, Clone)]
pub struct DeleteEntryError {
    pub id: String,
    pub code: String,
    pub message: String,
    pub sender_fault: bool,
}

impl fmt::Display for DeleteEntryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failed to delete message {}: {} ({})",
            self.id, self.message, self.code
        )
    }
}

impl std::error::Error for DeleteEntryError {}

/// A single entry's failure within a `SendMessageBatch` response.
#[derive(Debug, Clone)]
pub struct SendEntryError {
    pub id: String,
    pub code: String,
    pub message: String,
    pub sender_fault: bool,
}

impl fmt::Display for SendEntryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failed to send message {}: {} ({})",
            self.id, self.message, self.code
        )
    }
}

impl std::error::Error for SendEntryError {}

/// Errors raised synchronously from invalid consumer configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Neither `queue_url` nor `queue_name` was supplied.
    MissingQueueIdentity,
    /// `create_queue` was called without a `queue_name`.
    MissingQueueName,
    /// A batch-size option was outside the service's `1..=10` range.
    InvalidBatchSize { option: &'static str, value: i64 },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingQueueIdentity => write!(
                f,
                "consumer configuration must set either queue_url or queue_name"
            ),
            ConfigError::MissingQueueName => {
                write!(f, "create_queue requires a queue_name to be configured")
            }
            ConfigError::InvalidBatchSize { option, value } => write!(
                f,
                "{option} must be between 1 and 10, got {value}"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

/// The top-level error type surfaced by consumer-facing operations.
#[derive(Debug, Clone)]
pub enum ConsumerError {
    Config(ConfigError),
    Transport(TransportError),
    Delete(DeleteEntryError),
    Send(SendEntryError),
    /// `delete_message` (or an equivalent operation) was called with
    /// something other than a message received from this consumer.
    InvalidArgument(String),
    /// A caller-initiated operation was attempted before the consumer
    /// resolved its queue URL, or after the owning consumer was dropped.
    NotRunning,
}

impl fmt::Display for ConsumerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsumerError::Config(err) => write!(f, "{err}"),
            ConsumerError::Transport(err) => write!(f, "{err}"),
            ConsumerError::Delete(err) => write!(f, "{err}"),
            ConsumerError::Send(err) => write!(f, "{err}"),
            ConsumerError::InvalidArgument(reason) => write!(f, "invalid argument: {reason}"),
            ConsumerError::NotRunning => {
                write!(f, "consumer is not running or has been dropped")
            }
        }
    }
}

impl std::error::Error for ConsumerError {}

impl From<ConfigError> for ConsumerError {
    fn from(err: ConfigError) -> Self {
        ConsumerError::Config(err)
    }
}

impl From<TransportError> for ConsumerError {
    fn from(err: TransportError) -> Self {
        ConsumerError::Transport(err)
    }
}

impl From<DeleteEntryError> for ConsumerError {
    fn from(err: DeleteEntryError) -> Self {
        ConsumerError::Delete(err)
    }
}

impl From<SendEntryError> for ConsumerError {
    fn from(err: SendEntryError) -> Self {
        ConsumerError::Send(err)
    }
}
