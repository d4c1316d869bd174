use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, instrument};

use crate::errors::{ConsumerError, DeleteEntryError, TransportError};
use crate::events::{ConsumerEvent, EventEmitter};
use crate::message::MessageSummary;
use crate::transport::{self, Transport};

const SERVICE_BATCH_CAP: usize = 10;

struct PendingDelete {
    queue_url: String,
    entry: transport::DeleteEntry,
    summary: MessageSummary,
    responder: oneshot::Sender<Result<(), ConsumerError>>,
}

struct State {
    pending: Vec<PendingDelete>,
    timer: Option<JoinHandle<()>>,
}

/// Accumulates receipt handles to delete, flushing when either
/// `batch_size` or `wait` is crossed. Mirrors [`crate::timeout_extender`]'s
/// pattern of an `Arc<Self>`-rooted background task arming its own timer.
pub(crate) struct DeleteBatcher {
    transport: Arc<dyn Transport>,
    events: EventEmitter,
    batch_size: usize,
    wait: Duration,
    state: Mutex<State>,
}

impl DeleteBatcher {
    pub fn new(transport: Arc<dyn Transport>, events: EventEmitter, batch_size: u8, wait_ms: u64) -> Arc<Self> {
        Arc::new(DeleteBatcher {
            transport,
            events,
            batch_size: batch_size.max(1) as usize,
            wait: Duration::from_millis(wait_ms),
            state: Mutex::new(State {
                pending: Vec::new(),
                timer: None,
            }),
        })
    }

    /// Queues a delete, returning a receiver resolved once the flush that
    /// includes this entry completes.
    pub fn enqueue(
        self: &Arc<Self>,
        queue_url: String,
        entry: transport::DeleteEntry,
        summary: MessageSummary,
    ) -> oneshot::Receiver<Result<(), ConsumerError>> {
        let (tx, rx) = oneshot::channel();
        self.events.emit(ConsumerEvent::DelQueued(summary.clone()));

        let mut flush_now = false;
        {
            let mut state = self.state.lock().unwrap();
            state.pending.push(PendingDelete {
                queue_url,
                entry,
                summary,
                responder: tx,
            });

            if state.pending.len() >= self.batch_size {
                if let Some(timer) = state.timer.take() {
                    timer.abort();
                }
                flush_now = true;
            } else if state.timer.is_none() {
                let me = self.clone();
                let wait = self.wait;
                state.timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(wait).await;
                    me.flush().await;
                }));
            }
        }

        if flush_now {
            let me = self.clone();
            tokio::spawn(async move { me.flush().await });
        }

        rx
    }

    /// Drains everything currently pending and flushes it in chunks of at
    /// most the service's batch cap, re-arming if more has accumulated by
    /// the time the network calls complete.
    #[instrument(skip(self))]
    pub async fn flush(self: Arc<Self>) {
        let batch = {
            let mut state = self.state.lock().unwrap();
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
            std::mem::take(&mut state.pending)
        };

        if batch.is_empty() {
            return;
        }

        let mut chunks: Vec<Vec<PendingDelete>> = Vec::new();
        let mut iter = batch.into_iter();
        loop {
            let chunk: Vec<PendingDelete> = iter.by_ref().take(SERVICE_BATCH_CAP).collect();
            if chunk.is_empty() {
                break;
            }
            chunks.push(chunk);
        }

        let flushes = chunks.into_iter().map(|chunk| self.flush_chunk(chunk));
        join_all(flushes).await;

        self.reschedule_if_needed();
    }

    async fn flush_chunk(&self, chunk: Vec<PendingDelete>) {
        let queue_url = chunk
            .first()
            .map(|p| p.queue_url.clone())
            .unwrap_or_default();
        let entries: Vec<transport::DeleteEntry> =
            chunk.iter().map(|p| p.entry.clone()).collect();

        debug!(count = entries.len(), "flushing delete batch");

        match self
            .transport
            .delete_message_batch(transport::DeleteMessageBatchRequest { queue_url, entries })
            .await
        {
            Ok(response) => self.resolve_chunk(chunk, response),
            Err(err) => {
                self.events.emit(ConsumerEvent::Error(err.clone().into()));
                for pending in chunk {
                    let _ = pending.responder.send(Err(err.clone().into()));
                }
            }
        }
    }

    fn resolve_chunk(
        &self,
        chunk: Vec<PendingDelete>,
        response: transport::DeleteMessageBatchResponse,
    ) {
        let mut by_id: std::collections::HashMap<String, PendingDelete> =
            chunk.into_iter().map(|p| (p.entry.id.clone(), p)).collect();

        for success in response.successful {
            if let Some(pending) = by_id.remove(&success.id) {
                self.events
                    .emit(ConsumerEvent::Deleted(pending.summary.clone()));
                let _ = pending.responder.send(Ok(()));
            }
        }

        for failure in response.failed {
            if let Some(pending) = by_id.remove(&failure.id) {
                let err = DeleteEntryError {
                    id: failure.id,
                    code: failure.code,
                    message: failure.message,
                    sender_fault: failure.sender_fault,
                };
                self.events.emit(ConsumerEvent::DelError(err.clone()));
                let _ = pending.responder.send(Err(err.into()));
            }
        }

        // Anything left over wasn't acknowledged either way by the
        // service; treat it as a transport-level inconsistency.
        for (_, pending) in by_id {
            let _ = pending.responder.send(Err(ConsumerError::Transport(
                TransportError::new("delete batch response did not cover this entry"),
            )));
        }
    }

    fn reschedule_if_needed(self: &Arc<Self>) {
        let mut state = self.state.lock().unwrap();
        if state.pending.is_empty() {
            return;
        }

        if state.pending.len() >= self.batch_size {
            drop(state);
            let me = self.clone();
            tokio::spawn(async move { me.flush().await });
        } else if state.timer.is_none() {
            let me = self.clone();
            let wait = self.wait;
            state.timer = Some(tokio::spawn(async move {
                tokio::time::sleep(wait).await;
                me.flush().await;
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::StubTransport;
    use pretty_assertions::assert_eq;
    use std::time::Duration as StdDuration;

    #[test_log::test(tokio::test)]
    async fn flushes_immediately_once_batch_size_is_reached() {
        let stub = StubTransport::new();
        let events = EventEmitter::new(16);
        let batcher = DeleteBatcher::new(stub.clone() as Arc<dyn Transport>, events, 2, 10_000);

        let rx1 = batcher.enqueue(
            "queue".into(),
            transport::DeleteEntry {
                id: "0".into(),
                receipt_handle: "rh-0".into(),
            },
            MessageSummary {
                id: "0".into(),
                receipt_handle: "rh-0".into(),
            },
        );
        let rx2 = batcher.enqueue(
            "queue".into(),
            transport::DeleteEntry {
                id: "1".into(),
                receipt_handle: "rh-1".into(),
            },
            MessageSummary {
                id: "1".into(),
                receipt_handle: "rh-1".into(),
            },
        );

        rx1.await.unwrap().unwrap();
        rx2.await.unwrap().unwrap();
        assert_eq!(stub.delete_batch_calls(), 1);
    }

    #[test_log::test(tokio::test)]
    async fn flushes_a_trailing_entry_after_the_timer_fires() {
        let stub = StubTransport::new();
        let events = EventEmitter::new(16);
        let batcher = DeleteBatcher::new(stub.clone() as Arc<dyn Transport>, events, 10, 20);

        let rx = batcher.enqueue(
            "queue".into(),
            transport::DeleteEntry {
                id: "0".into(),
                receipt_handle: "rh-0".into(),
            },
            MessageSummary {
                id: "0".into(),
                receipt_handle: "rh-0".into(),
            },
        );

        tokio::time::sleep(StdDuration::from_millis(60)).await;
        rx.await.unwrap().unwrap();
        assert_eq!(stub.delete_batch_calls(), 1);
    }

    #[test_log::test(tokio::test)]
    async fn fifteen_deletes_at_batch_size_ten_flush_in_exactly_two_calls() {
        let stub = StubTransport::new();
        let events = EventEmitter::new(16);
        let batcher = DeleteBatcher::new(stub.clone() as Arc<dyn Transport>, events, 10, 10);

        let mut receivers = Vec::new();
        for i in 0..15 {
            receivers.push(batcher.enqueue(
                "queue".into(),
                transport::DeleteEntry {
                    id: i.to_string(),
                    receipt_handle: format!("rh-{i}"),
                },
                MessageSummary {
                    id: i.to_string(),
                    receipt_handle: format!("rh-{i}"),
                },
            ));
        }

        for rx in receivers {
            rx.await.unwrap().unwrap();
        }
        assert_eq!(stub.delete_batch_calls(), 2);
    }

    #[test_log::test(tokio::test)]
    async fn five_deletes_at_batch_size_one_flush_in_five_calls() {
        let stub = StubTransport::new();
        let events = EventEmitter::new(16);
        let batcher = DeleteBatcher::new(stub.clone() as Arc<dyn Transport>, events, 1, 10_000);

        let mut receivers = Vec::new();
        for i in 0..5 {
            receivers.push(batcher.enqueue(
                "queue".into(),
                transport::DeleteEntry {
                    id: i.to_string(),
                    receipt_handle: format!("rh-{i}"),
                },
                MessageSummary {
                    id: i.to_string(),
                    receipt_handle: format!("rh-{i}"),
                },
            ));
        }

        for rx in receivers {
            rx.await.unwrap().unwrap();
        }
        assert_eq!(stub.delete_batch_calls(), 5);
    }
}
