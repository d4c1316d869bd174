use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::errors::{ConsumerError, SendEntryError, TransportError};
use crate::transport::{self, Transport};

const SERVICE_BATCH_CAP: usize = 10;

pub struct SendOutcome {
    pub message_id: String,
    pub md5_of_message_body: Option<String>,
}

struct PendingSend {
    queue_url: String,
    entry: transport::SendEntry,
    responder: oneshot::Sender<Result<SendOutcome, ConsumerError>>,
}

struct State {
    pending: Vec<PendingSend>,
    timer: Option<JoinHandle<()>>,
}

/// Batches individual `send_message` calls the same way [`crate::delete_batcher::DeleteBatcher`]
/// batches deletes, and separately exposes an explicit one-shot chunked
/// dispatch for callers that already hold a full list of messages to send.
pub(crate) struct SendBatcher {
    transport: Arc<dyn Transport>,
    batch_size: usize,
    wait: Duration,
    state: Mutex<State>,
}

impl SendBatcher {
    pub fn new(transport: Arc<dyn Transport>, batch_size: u8, wait_ms: u64) -> Arc<Self> {
        Arc::new(SendBatcher {
            transport,
            batch_size: batch_size.max(1) as usize,
            wait: Duration::from_millis(wait_ms),
            state: Mutex::new(State {
                pending: Vec::new(),
                timer: None,
            }),
        })
    }

    /// Queues a single message for batched sending, respecting
    /// `send_batch_size`/`send_wait_ms`. With the default `send_batch_size
    /// = 1` this flushes immediately, i.e. batching is effectively off
    /// unless the caller raises it.
    pub fn enqueue(
        self: &Arc<Self>,
        queue_url: String,
        entry: transport::SendEntry,
    ) -> oneshot::Receiver<Result<SendOutcome, ConsumerError>> {
        let (tx, rx) = oneshot::channel();

        let mut flush_now = false;
        {
            let mut state = self.state.lock().unwrap();
            state.pending.push(PendingSend {
                queue_url,
                entry,
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

    async fn flush(self: Arc<Self>) {
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

        if batch.len() == 1 {
            let pending = batch.into_iter().next().unwrap();
            let result = self
                .transport
                .send_message(transport::SendMessageRequest {
                    queue_url: pending.queue_url,
                    message_body: pending.entry.message_body,
                    delay_seconds: pending.entry.delay_seconds,
                    attributes: pending.entry.attributes,
                    message_group_id: pending.entry.message_group_id,
                    message_deduplication_id: pending.entry.message_deduplication_id,
                })
                .await
                .map(|response| SendOutcome {
                    message_id: response.message_id,
                    md5_of_message_body: response.md5_of_message_body,
                })
                .map_err(ConsumerError::from);
            let _ = pending.responder.send(result);
        } else {
            self.flush_chunk(batch).await;
        }

        self.reschedule_if_needed();
    }

    async fn flush_chunk(&self, chunk: Vec<PendingSend>) {
        let queue_url = chunk
            .first()
            .map(|p| p.queue_url.clone())
            .unwrap_or_default();
        let entries: Vec<transport::SendEntry> =
            chunk.iter().map(|p| p.entry.clone()).collect();

        debug!(count = entries.len(), "flushing send batch");

        match self
            .transport
            .send_message_batch(transport::SendMessageBatchRequest { queue_url, entries })
            .await
        {
            Ok(response) => self.resolve_chunk(chunk, response),
            Err(err) => {
                for pending in chunk {
                    let _ = pending.responder.send(Err(err.clone().into()));
                }
            }
        }
    }

    fn resolve_chunk(&self, chunk: Vec<PendingSend>, response: transport::SendMessageBatchResponse) {
        let mut by_id: HashMap<String, PendingSend> =
            chunk.into_iter().map(|p| (p.entry.id.clone(), p)).collect();

        for success in response.successful {
            if let Some(pending) = by_id.remove(&success.id) {
                let _ = pending.responder.send(Ok(SendOutcome {
                    message_id: success.message_id,
                    md5_of_message_body: success.md5_of_message_body,
                }));
            }
        }

        for failure in response.failed {
            if let Some(pending) = by_id.remove(&failure.id) {
                let err = SendEntryError {
                    id: failure.id,
                    code: failure.code,
                    message: failure.message,
                    sender_fault: failure.sender_fault,
                };
                let _ = pending.responder.send(Err(err.into()));
            }
        }

        for (_, pending) in by_id {
            let _ = pending.responder.send(Err(ConsumerError::Transport(
                TransportError::new("send batch response did not cover this entry"),
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

    /// Sends an explicit list of entries right away, chunked into groups
    /// of at most the service's batch cap and dispatched in parallel,
    /// preserving the caller's original ordering in the returned results.
    pub async fn send_many(
        &self,
        queue_url: &str,
        entries: Vec<transport::SendEntry>,
    ) -> Vec<Result<SendOutcome, ConsumerError>> {
        let total = entries.len();
        let mut chunks: Vec<Vec<transport::SendEntry>> = Vec::new();
        let mut iter = entries.into_iter();
        loop {
            let chunk: Vec<transport::SendEntry> = iter.by_ref().take(SERVICE_BATCH_CAP).collect();
            if chunk.is_empty() {
                break;
            }
            chunks.push(chunk);
        }

        let dispatches = chunks.into_iter().map(|chunk| async move {
            let ids: Vec<String> = chunk.iter().map(|e| e.id.clone()).collect();
            match self
                .transport
                .send_message_batch(transport::SendMessageBatchRequest {
                    queue_url: queue_url.to_string(),
                    entries: chunk,
                })
                .await
            {
                Ok(response) => {
                    let mut by_id: HashMap<String, Result<SendOutcome, ConsumerError>> =
                        HashMap::new();
                    for success in response.successful {
                        by_id.insert(
                            success.id.clone(),
                            Ok(SendOutcome {
                                message_id: success.message_id,
                                md5_of_message_body: success.md5_of_message_body,
                            }),
                        );
                    }
                    for failure in response.failed {
                        let err = SendEntryError {
                            id: failure.id.clone(),
                            code: failure.code,
                            message: failure.message,
                            sender_fault: failure.sender_fault,
                        };
                        by_id.insert(failure.id, Err(err.into()));
                    }
                    ids.into_iter()
                        .map(|id| {
                            by_id.remove(&id).unwrap_or_else(|| {
                                Err(ConsumerError::Transport(TransportError::new(
                                    "send batch response did not cover this entry",
                                )))
                            })
                        })
                        .collect::<Vec<_>>()
                }
                Err(err) => ids.into_iter().map(|_| Err(err.clone().into())).collect(),
            }
        });

        let mut results = Vec::with_capacity(total);
        for chunk_results in join_all(dispatches).await {
            results.extend(chunk_results);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::StubTransport;
    use pretty_assertions::assert_eq;

    fn entry(id: &str) -> transport::SendEntry {
        transport::SendEntry {
            id: id.to_string(),
            message_body: format!("body-{id}"),
            delay_seconds: None,
            attributes: Default::default(),
            message_group_id: None,
            message_deduplication_id: None,
        }
    }

    #[test_log::test(tokio::test)]
    async fn single_send_flushes_immediately_with_default_batch_size() {
        let stub = StubTransport::new();
        let batcher = SendBatcher::new(stub.clone() as Arc<dyn Transport>, 1, 0);

        let rx = batcher.enqueue("queue".into(), entry("0"));
        rx.await.unwrap().unwrap();
        assert_eq!(stub.send_single_calls(), 1);
        assert_eq!(stub.send_batch_calls(), 0);
    }

    #[test_log::test(tokio::test)]
    async fn send_many_chunks_at_ten_and_preserves_order() {
        let stub = StubTransport::new();
        let batcher = SendBatcher::new(stub.clone() as Arc<dyn Transport>, 1, 0);

        let entries: Vec<_> = (0..15).map(|i| entry(&i.to_string())).collect();
        let results = batcher.send_many("queue", entries).await;

        assert_eq!(results.len(), 15);
        for (i, result) in results.iter().enumerate() {
            let outcome = result.as_ref().unwrap();
            assert!(outcome.message_id.ends_with(&i.to_string()));
        }
        assert_eq!(stub.send_batch_calls(), 2);
    }

    #[test_log::test(tokio::test)]
    async fn send_many_reports_per_entry_failures() {
        let stub = StubTransport::new();
        stub.fail_send_ids(vec!["2".to_string(), "7".to_string()]);
        let batcher = SendBatcher::new(stub.clone() as Arc<dyn Transport>, 1, 0);

        let entries: Vec<_> = (0..10).map(|i| entry(&i.to_string())).collect();
        let results = batcher.send_many("queue", entries).await;

        let failures: Vec<usize> = results
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_err())
            .map(|(i, _)| i)
            .collect();
        assert_eq!(failures, vec![2, 7]);
    }
}
