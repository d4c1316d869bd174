use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use queue_consumer_helpers::time::{Clock, DefaultClock};
use serde::Serialize;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::{ConsumerConfig, FinalisedConfig};
use crate::delete_batcher::DeleteBatcher;
use crate::errors::ConsumerError;
use crate::events::{ConsumerEvent, EventEmitter};
use crate::inflight::InflightCounter;
use crate::message::{ConsumerHandle, Message, MessageHandle, MessageOps, MessageSummary};
use crate::receive_loop;
use crate::resolver::QueueResolver;
use crate::send_batcher::{SendBatcher, SendOutcome};
use crate::timeout_extender::TimeoutExtender;
use crate::transport::{self, Attributes, ChangeMessageVisibilityRequest, Transport};

/// Shared state the receive loop, the batchers, and the application-facing
/// [`Consumer`] handle all operate on. This is the single logical owner
/// the concurrency model describes: callers mutate it only through short
/// critical sections (a `Mutex`-guarded field or an atomic), and the
/// receive loop is the sole task issuing poll calls.
pub(crate) struct Inner {
    pub transport: Arc<dyn Transport>,
    pub events: EventEmitter,
    pub config: FinalisedConfig,
    pub resolver: QueueResolver,
    pub inflight: InflightCounter,
    pub delete_batcher: Arc<DeleteBatcher>,
    pub send_batcher: Arc<SendBatcher>,
    pub timeout_extender: Option<Arc<TimeoutExtender>>,
    pub running: AtomicBool,
    pub stop_requested: AtomicBool,
    pub aborted_once: AtomicBool,
    pub cancel: Notify,
    pub stop_notify: Notify,
    self_weak: Weak<Inner>,
}

impl Inner {
    fn weak_ops(&self) -> Weak<dyn MessageOps> {
        self.self_weak.clone()
    }

    async fn handled_message(&self, handle: &MessageHandle) {
        if let Some(extender) = &self.timeout_extender {
            extender.untrack(&handle.receipt_handle);
        }
        let outcome = self.inflight.decrement();
        self.events.emit(ConsumerEvent::Handled(MessageSummary {
            id: handle.id.clone(),
            receipt_handle: handle.receipt_handle.clone(),
        }));
        if outcome.drained && self.stop_requested.load(Ordering::SeqCst) {
            self.events.emit(ConsumerEvent::Drained);
        }
    }
}

#[async_trait]
impl MessageOps for Inner {
    async fn delete_message(&self, handle: MessageHandle) -> Result<(), ConsumerError> {
        let queue_url = self.resolver.resolve(&*self.transport).await?;
        self.handled_message(&handle).await;
        let rx = self.delete_batcher.enqueue(
            queue_url,
            transport::DeleteEntry {
                id: handle.id.clone(),
                receipt_handle: handle.receipt_handle.clone(),
            },
            MessageSummary {
                id: handle.id,
                receipt_handle: handle.receipt_handle,
            },
        );
        rx.await.map_err(|_| ConsumerError::NotRunning)?
    }

    async fn release_message(&self, handle: MessageHandle) -> Result<(), ConsumerError> {
        self.handled_message(&handle).await;
        MessageOps::change_message_visibility(self, handle, 0).await
    }

    async fn change_message_visibility(
        &self,
        handle: MessageHandle,
        seconds: i32,
    ) -> Result<(), ConsumerError> {
        let queue_url = self.resolver.resolve(&*self.transport).await?;
        self.transport
            .change_message_visibility(ChangeMessageVisibilityRequest {
                queue_url,
                receipt_handle: handle.receipt_handle,
                visibility_timeout_secs: seconds,
            })
            .await
            .map_err(ConsumerError::from)
    }
}

/// The managed long-poll consumer. Cheap to clone (an `Arc` around shared
/// state); every clone observes the same receive loop, in-flight count,
/// and event stream.
#[derive(Clone)]
pub struct Consumer {
    inner: Arc<Inner>,
    loop_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Consumer {
    pub fn new(transport: Arc<dyn Transport>, config: ConsumerConfig) -> Result<Self, ConsumerError> {
        Self::with_clock(transport, config, Arc::new(DefaultClock::new()))
    }

    pub fn with_clock(
        transport: Arc<dyn Transport>,
        config: ConsumerConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConsumerError> {
        let finalised = config.finalise()?;
        let events = EventEmitter::new(256);

        let resolver = QueueResolver::new(
            finalised.queue_url.clone(),
            finalised.queue_name.clone(),
            finalised.account_number.clone(),
            finalised.correct_queue_url,
        );
        let delete_batcher = DeleteBatcher::new(
            transport.clone(),
            events.clone(),
            finalised.delete_batch_size,
            finalised.delete_wait_ms,
        );
        let send_batcher = SendBatcher::new(
            transport.clone(),
            finalised.send_batch_size,
            finalised.send_wait_ms,
        );
        let timeout_extender = if finalised.auto_extend_timeout {
            Some(TimeoutExtender::new(
                transport.clone(),
                events.clone(),
                clock,
                finalised.visibility_timeout_secs.unwrap_or(30),
                finalised.no_extensions_after_secs,
                finalised.advanced_call_ms,
            ))
        } else {
            None
        };
        let max_in_flight = finalised.max_in_flight as i64;
        let inflight = InflightCounter::new(max_in_flight);

        let inner = Arc::new_cyclic(|weak| Inner {
            transport,
            events,
            config: finalised,
            resolver,
            inflight,
            delete_batcher,
            send_batcher,
            timeout_extender,
            running: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            aborted_once: AtomicBool::new(false),
            cancel: Notify::new(),
            stop_notify: Notify::new(),
            self_weak: weak.clone(),
        });

        Ok(Consumer {
            inner,
            loop_handle: Arc::new(Mutex::new(None)),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConsumerEvent> {
        self.inner.events.subscribe()
    }

    pub fn in_flight(&self) -> i64 {
        self.inner.inflight.value()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Idempotent. Resolves the queue URL (failing fast if that fails) and
    /// starts the receive loop.
    pub async fn start(&self) -> Result<(), ConsumerError> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Err(err) = self.inner.resolver.resolve(&*self.inner.transport).await {
            self.inner.running.store(false, Ordering::SeqCst);
            return Err(err);
        }

        info!("starting consumer receive loop");
        let inner = self.inner.clone();
        let handle = tokio::spawn(receive_loop::run(inner));
        *self.loop_handle.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Requests a stop. If `soft` is false, cancels an in-flight poll.
    /// Waits up to `drain_deadline_ms` (or indefinitely, if `None`) for
    /// in-flight messages to finish, returning whether it actually
    /// drained. Idempotent and safe to call more than once concurrently.
    pub async fn stop(&self, soft: bool, drain_deadline_ms: Option<u64>) -> bool {
        self.inner.stop_requested.store(true, Ordering::SeqCst);
        self.inner.stop_notify.notify_waiters();

        if !soft && !self.inner.aborted_once.swap(true, Ordering::SeqCst) {
            self.inner.cancel.notify_one();
        }

        let deadline = drain_deadline_ms.map(|ms| Instant::now() + Duration::from_millis(ms));
        let drained = self.inner.inflight.wait_for_drain(deadline).await;

        let handle = self.loop_handle.lock().unwrap().take();
        if let (true, Some(handle)) = (drained, handle) {
            let _ = handle.await;
        }

        drained
    }

    fn encode_body<T: Serialize>(body: &T) -> Result<String, ConsumerError> {
        let json = serde_json::to_value(body)
            .map_err(|err| ConsumerError::InvalidArgument(err.to_string()))?;
        match json {
            serde_json::Value::String(text) => Ok(text),
            other => serde_json::to_string(&other)
                .map_err(|err| ConsumerError::InvalidArgument(err.to_string())),
        }
    }

    /// Sends a single message, enqueuing it via the send batcher (which
    /// flushes eagerly unless `send_batch_size` was raised above 1).
    /// Non-string bodies are JSON-encoded.
    pub async fn send_message<T: Serialize>(
        &self,
        body: T,
        delay_seconds: Option<u32>,
        attributes: Option<Attributes>,
    ) -> Result<SendOutcome, ConsumerError> {
        let queue_url = self.inner.resolver.resolve(&*self.inner.transport).await?;
        let message_body = Self::encode_body(&body)?;
        let rx = self.inner.send_batcher.enqueue(
            queue_url,
            transport::SendEntry {
                id: "0".to_string(),
                message_body,
                delay_seconds,
                attributes: attributes.unwrap_or_default(),
                message_group_id: None,
                message_deduplication_id: None,
            },
        );
        rx.await.map_err(|_| ConsumerError::NotRunning)?
    }

    /// Sends a batch of messages, splitting into chunks of at most 10 and
    /// dispatching chunks in parallel. Assigns ids `"0".."N-1"` and
    /// preserves input order in the returned results.
    pub async fn send_messages<T: Serialize>(
        &self,
        bodies: Vec<T>,
        delay_seconds: Option<u32>,
        attributes: Option<Attributes>,
    ) -> Result<Vec<Result<SendOutcome, ConsumerError>>, ConsumerError> {
        let queue_url = self.inner.resolver.resolve(&*self.inner.transport).await?;
        let mut entries = Vec::with_capacity(bodies.len());
        for (index, body) in bodies.into_iter().enumerate() {
            entries.push(transport::SendEntry {
                id: index.to_string(),
                message_body: Self::encode_body(&body)?,
                delay_seconds,
                attributes: attributes.clone().unwrap_or_default(),
                message_group_id: None,
                message_deduplication_id: None,
            });
        }
        Ok(self.inner.send_batcher.send_many(&queue_url, entries).await)
    }

    /// Requires a [`Message`] produced by this consumer; the type system
    /// rules out the "wrong kind of argument" failure a dynamically typed
    /// client would need to check at runtime.
    pub async fn delete_message(&self, message: &Message) -> Result<(), ConsumerError> {
        message.delete().await
    }

    pub async fn release_message(&self, message: &Message) -> Result<(), ConsumerError> {
        message.release().await
    }

    pub async fn change_message_visibility(
        &self,
        message: &Message,
        seconds: i32,
    ) -> Result<(), ConsumerError> {
        message.change_visibility(seconds).await
    }

    pub async fn create_queue(&self) -> Result<String, ConsumerError> {
        let queue_name = self
            .inner
            .config
            .queue_name
            .clone()
            .ok_or(crate::errors::ConfigError::MissingQueueName)?;
        let response = self
            .inner
            .transport
            .create_queue(transport::CreateQueueRequest {
                queue_name,
                visibility_timeout_secs: self.inner.config.visibility_timeout_secs,
                policy: self.inner.config.queue_policy.clone(),
            })
            .await?;
        Ok(response.queue_url)
    }

    pub async fn delete_queue(&self) -> Result<(), ConsumerError> {
        let queue_url = self.inner.resolver.resolve(&*self.inner.transport).await?;
        self.inner
            .transport
            .delete_queue(&queue_url)
            .await
            .map_err(ConsumerError::from)
    }

    pub async fn purge_queue(&self) -> Result<(), ConsumerError> {
        let queue_url = self.inner.resolver.resolve(&*self.inner.transport).await?;
        self.inner
            .transport
            .purge_queue(&queue_url)
            .await
            .map_err(ConsumerError::from)
    }

    pub async fn get_queue_url(&self) -> Result<String, ConsumerError> {
        self.inner.resolver.resolve(&*self.inner.transport).await
    }

    pub async fn get_queue_visibility_timeout(&self) -> Result<i32, ConsumerError> {
        let queue_url = self.inner.resolver.resolve(&*self.inner.transport).await?;
        let response = self
            .inner
            .transport
            .get_queue_attributes(transport::GetQueueAttributesRequest {
                queue_url,
                attribute_names: vec!["VisibilityTimeout".to_string()],
            })
            .await?;
        response
            .attributes
            .get("VisibilityTimeout")
            .and_then(|value| value.parse().ok())
            .ok_or_else(|| {
                ConsumerError::InvalidArgument(
                    "queue did not report a VisibilityTimeout attribute".to_string(),
                )
            })
    }
}

pub(crate) fn wrap_message(raw: transport::RawMessage, inner: &Arc<Inner>) -> Message {
    Message::from_raw(raw, ConsumerHandle::new(inner.weak_ops()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::StubTransport;
    use crate::transport::RawMessage;
    use pretty_assertions::assert_eq;

    fn raw_message(id: impl Into<String>) -> RawMessage {
        let id = id.into();
        RawMessage {
            receipt_handle: format!("rh-{id}"),
            body: Some(format!("body-{id}")),
            id,
            attributes: Default::default(),
            system_attributes: Default::default(),
            approximate_receive_count: 1,
        }
    }

    fn batch(ids: impl IntoIterator<Item = String>) -> transport::ReceiveMessageResponse {
        transport::ReceiveMessageResponse {
            messages: ids.into_iter().map(raw_message).collect(),
        }
    }

    #[test_log::test(tokio::test)]
    async fn delivers_ten_then_five_and_emits_max_in_flight_once_the_cap_is_reached() {
        let stub = StubTransport::new();
        stub.queue_receive_responses(vec![
            Ok(batch((0..10).map(|i| i.to_string()))),
            Ok(batch((10..15).map(|i| i.to_string()))),
        ]);

        let consumer = Consumer::new(
            stub.clone() as Arc<dyn Transport>,
            ConsumerConfig {
                queue_url: Some("https://stub.example.com/q".into()),
                max_in_flight: Some(15),
                receive_batch_size: Some(10),
                idle_poll_interval_ms: Some(50_000),
                ..Default::default()
            },
        )
        .unwrap();

        let mut events = consumer.subscribe();
        consumer.start().await.unwrap();

        let mut delivered = 0;
        let mut saw_max_in_flight = false;
        while delivered < 15 {
            match events.recv().await.unwrap() {
                ConsumerEvent::Message(_) => delivered += 1,
                ConsumerEvent::MaxInFlight => saw_max_in_flight = true,
                _ => {}
            }
        }

        assert_eq!(delivered, 15);
        assert!(saw_max_in_flight);
        consumer.stop(false, Some(50)).await;
    }

    #[test_log::test(tokio::test)]
    async fn soft_stop_on_an_already_idle_consumer_resolves_true_immediately() {
        let stub = StubTransport::new();
        let consumer = Consumer::new(
            stub.clone() as Arc<dyn Transport>,
            ConsumerConfig {
                queue_url: Some("https://stub.example.com/q".into()),
                idle_poll_interval_ms: Some(50_000),
                ..Default::default()
            },
        )
        .unwrap();

        consumer.start().await.unwrap();
        let drained = consumer.stop(true, Some(1_000)).await;
        assert!(drained);
    }

    #[test_log::test(tokio::test)]
    async fn hard_stop_cancels_an_in_flight_poll_and_emits_aborted() {
        let stub = StubTransport::new();
        stub.hang_receive();

        let consumer = Consumer::new(
            stub.clone() as Arc<dyn Transport>,
            ConsumerConfig {
                queue_url: Some("https://stub.example.com/q".into()),
                ..Default::default()
            },
        )
        .unwrap();

        let mut events = consumer.subscribe();
        consumer.start().await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        let drained = consumer.stop(false, Some(1_000)).await;
        assert!(drained);

        let mut saw_aborted = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, ConsumerEvent::Aborted) {
                saw_aborted = true;
            }
        }
        assert!(saw_aborted);
    }

    #[test_log::test(tokio::test)]
    async fn delete_message_decrements_in_flight_and_flushes_through_the_batcher() {
        let stub = StubTransport::new();
        stub.queue_receive_responses(vec![Ok(batch(["0".to_string()]))]);

        let consumer = Consumer::new(
            stub.clone() as Arc<dyn Transport>,
            ConsumerConfig {
                queue_url: Some("https://stub.example.com/q".into()),
                delete_batch_size: Some(1),
                idle_poll_interval_ms: Some(50_000),
                ..Default::default()
            },
        )
        .unwrap();

        let mut events = consumer.subscribe();
        consumer.start().await.unwrap();

        let message = loop {
            if let ConsumerEvent::Message(message) = events.recv().await.unwrap() {
                break message;
            }
        };

        assert_eq!(consumer.in_flight(), 1);
        message.delete().await.unwrap();
        assert_eq!(consumer.in_flight(), 0);
        assert_eq!(stub.delete_batch_calls(), 1);
    }
}
