//! A managed long-poll consumer engine for an SQS-compatible hosted
//! message queue: bounded in-flight delivery, batched deletes and sends,
//! optional automatic visibility-timeout extension, and a typed event
//! stream, all driven against an abstract [`transport::Transport`] so the
//! engine itself never depends on a concrete wire client.

mod config;
mod consumer;
mod delete_batcher;
mod errors;
mod events;
mod inflight;
mod message;
mod receive_loop;
mod resolver;
mod send_batcher;
mod timeout_extender;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use config::{BodyProcessor, ConsumerConfig};
pub use consumer::Consumer;
pub use errors::{ConfigError, ConsumerError, DeleteEntryError, SendEntryError, TransportError};
pub use events::{ConsumerEvent, EventEmitter};
pub use message::{Message, MessageHandle, MessageOps, MessageSummary};
pub use send_batcher::SendOutcome;
