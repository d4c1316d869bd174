use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument};

use crate::consumer::{wrap_message, Inner};
use crate::events::ConsumerEvent;
use crate::message::MessageSummary;
use crate::transport::ReceiveMessageRequest;

/// The dispatch engine described by the component design: computes an
/// effective batch size from available in-flight slots, long-polls,
/// decodes and emits messages, and backs off on empty polls or transport
/// errors. Runs as the single task that owns the `Inner`'s receive-side
/// state for the lifetime of the consumer.
#[instrument(skip(inner))]
pub(crate) async fn run(inner: Arc<Inner>) {
    'outer: loop {
        if inner.stop_requested.load(Ordering::SeqCst) {
            break;
        }

        let cap = inner.inflight.cap();
        let min_batch = inner.config.min_receive_batch_size as i64;

        let slots = if cap == 0 {
            i64::MAX
        } else {
            tokio::select! {
                _ = inner.stop_notify.notified() => continue 'outer,
                slots = inner.inflight.wait_for_slot(min_batch) => slots,
            }
        };

        if inner.stop_requested.load(Ordering::SeqCst) {
            break;
        }

        let effective = std::cmp::min(inner.config.receive_batch_size as i64, slots) as u8;

        let queue_url = match inner.resolver.resolve(&*inner.transport).await {
            Ok(url) => url,
            Err(err) => {
                inner.events.emit(ConsumerEvent::Error(err));
                sleep_or_stop(&inner, Duration::from_millis(inner.config.poll_retry_ms)).await;
                continue;
            }
        };

        let request = ReceiveMessageRequest {
            queue_url: queue_url.clone(),
            max_messages: effective,
            wait_seconds: inner.config.receive_wait_time_secs,
            visibility_timeout_secs: inner.config.visibility_timeout_secs,
            attribute_names: inner.config.receive_sqs_attributes.clone(),
            message_attribute_names: inner.config.receive_attributes.clone(),
        };

        debug!(max_messages = effective, "polling for messages");
        let poll = inner.transport.receive_message(request);
        tokio::pin!(poll);

        let outcome = tokio::select! {
            biased;
            _ = inner.cancel.notified() => None,
            result = &mut poll => Some(result),
        };

        let response = match outcome {
            None => {
                inner.events.emit(ConsumerEvent::Aborted);
                break;
            }
            Some(Ok(response)) => response,
            Some(Err(err)) => {
                inner.events.emit(ConsumerEvent::Error(err.into()));
                sleep_or_stop(&inner, Duration::from_millis(inner.config.poll_retry_ms)).await;
                continue;
            }
        };

        if response.messages.is_empty() {
            if inner.inflight.value() == 0 {
                inner.events.emit(ConsumerEvent::QueueEmpty);
            }
            sleep_or_stop(&inner, Duration::from_millis(inner.config.idle_poll_interval_ms)).await;
            continue;
        }

        inner
            .events
            .emit(ConsumerEvent::GotMessages(response.messages.len()));

        let mut cap_reached_any = false;
        for mut raw in response.messages {
            let increment = inner.inflight.increment();
            cap_reached_any = cap_reached_any || increment.cap_reached;

            match inner.config.body_processor.decode(raw.body).await {
                Ok(decoded) => raw.body = decoded,
                Err(err) => {
                    raw.body = None;
                    inner.events.emit(ConsumerEvent::Error(err));
                }
            }

            let receipt_handle = raw.receipt_handle.clone();
            let message = wrap_message(raw, &inner);

            if let Some(extender) = &inner.timeout_extender {
                extender.track(queue_url.clone(), receipt_handle, MessageSummary::from(&message));
            }

            inner.events.emit(ConsumerEvent::Message(message));
        }

        if cap_reached_any {
            inner.events.emit(ConsumerEvent::MaxInFlight);
        } else {
            sleep_or_stop(&inner, Duration::from_millis(inner.config.active_poll_interval_ms)).await;
        }
    }

    inner.running.store(false, Ordering::SeqCst);
}

async fn sleep_or_stop(inner: &Inner, duration: Duration) {
    if duration.is_zero() {
        return;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => {}
        _ = inner.stop_notify.notified() => {}
    }
}
