use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::errors::TransportError;
use crate::transport::*;

#[derive(Default)]
struct Inner {
    receive_script: VecDeque<Result<ReceiveMessageResponse, TransportError>>,
    fail_send_ids: HashSet<String>,
    fail_delete_ids: HashSet<String>,
    queue_url: Option<String>,
    endpoint_authority: Option<String>,
    hang_receive: bool,
}

/// An in-memory [`Transport`] for exercising the engine without a network
/// call. Scripted responses are consumed in order; once exhausted,
/// `receive_message` returns an empty batch, as a real long poll does on
/// timeout.
pub(crate) struct StubTransport {
    inner: Mutex<Inner>,
    receive_calls: AtomicUsize,
    delete_batch_calls: AtomicUsize,
    send_single_calls: AtomicUsize,
    send_batch_calls: AtomicUsize,
    change_visibility_calls: AtomicUsize,
}

impl StubTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(StubTransport {
            inner: Mutex::new(Inner::default()),
            receive_calls: AtomicUsize::new(0),
            delete_batch_calls: AtomicUsize::new(0),
            send_single_calls: AtomicUsize::new(0),
            send_batch_calls: AtomicUsize::new(0),
            change_visibility_calls: AtomicUsize::new(0),
        })
    }

    pub fn queue_receive_responses(
        &self,
        responses: Vec<Result<ReceiveMessageResponse, TransportError>>,
    ) {
        self.inner.lock().unwrap().receive_script.extend(responses);
    }

    pub fn fail_send_ids(&self, ids: Vec<String>) {
        self.inner.lock().unwrap().fail_send_ids.extend(ids);
    }

    pub fn fail_delete_ids(&self, ids: Vec<String>) {
        self.inner.lock().unwrap().fail_delete_ids.extend(ids);
    }

    pub fn set_queue_url(&self, url: impl Into<String>) {
        self.inner.lock().unwrap().queue_url = Some(url.into());
    }

    pub fn set_endpoint_authority(&self, authority: impl Into<String>) {
        self.inner.lock().unwrap().endpoint_authority = Some(authority.into());
    }

    /// Makes every subsequent `receive_message` call hang until the
    /// caller drops/cancels the future, simulating an in-flight long poll.
    pub fn hang_receive(&self) {
        self.inner.lock().unwrap().hang_receive = true;
    }

    pub fn receive_calls(&self) -> usize {
        self.receive_calls.load(Ordering::SeqCst)
    }

    pub fn delete_batch_calls(&self) -> usize {
        self.delete_batch_calls.load(Ordering::SeqCst)
    }

    pub fn send_single_calls(&self) -> usize {
        self.send_single_calls.load(Ordering::SeqCst)
    }

    pub fn send_batch_calls(&self) -> usize {
        self.send_batch_calls.load(Ordering::SeqCst)
    }

    pub fn change_visibility_calls(&self) -> usize {
        self.change_visibility_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for StubTransport {
    async fn receive_message(
        &self,
        _req: ReceiveMessageRequest,
    ) -> Result<ReceiveMessageResponse, TransportError> {
        self.receive_calls.fetch_add(1, Ordering::SeqCst);

        if self.inner.lock().unwrap().hang_receive {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }

        let next = self.inner.lock().unwrap().receive_script.pop_front();
        match next {
            Some(result) => result,
            None => Ok(ReceiveMessageResponse { messages: Vec::new() }),
        }
    }

    async fn delete_message_batch(
        &self,
        req: DeleteMessageBatchRequest,
    ) -> Result<DeleteMessageBatchResponse, TransportError> {
        self.delete_batch_calls.fetch_add(1, Ordering::SeqCst);
        let fail_ids = self.inner.lock().unwrap().fail_delete_ids.clone();

        let mut response = DeleteMessageBatchResponse::default();
        for entry in req.entries {
            if fail_ids.contains(&entry.id) {
                response.failed.push(BatchResultEntryError {
                    id: entry.id,
                    code: "StubDeleteFailure".into(),
                    message: "stubbed delete failure".into(),
                    sender_fault: false,
                });
            } else {
                response.successful.push(BatchResultEntry { id: entry.id });
            }
        }
        Ok(response)
    }

    async fn send_message(
        &self,
        req: SendMessageRequest,
    ) -> Result<SendMessageResponse, TransportError> {
        self.send_single_calls.fetch_add(1, Ordering::SeqCst);
        Ok(SendMessageResponse {
            message_id: format!("msg-{}", req.message_body),
            md5_of_message_body: None,
        })
    }

    async fn send_message_batch(
        &self,
        req: SendMessageBatchRequest,
    ) -> Result<SendMessageBatchResponse, TransportError> {
        self.send_batch_calls.fetch_add(1, Ordering::SeqCst);
        let fail_ids = self.inner.lock().unwrap().fail_send_ids.clone();

        let mut response = SendMessageBatchResponse::default();
        for entry in req.entries {
            if fail_ids.contains(&entry.id) {
                response.failed.push(BatchResultEntryError {
                    id: entry.id,
                    code: "StubSendFailure".into(),
                    message: "stubbed send failure".into(),
                    sender_fault: false,
                });
            } else {
                response.successful.push(SendResultEntry {
                    id: entry.id.clone(),
                    message_id: format!("msg-{}", entry.id),
                    md5_of_message_body: None,
                });
            }
        }
        Ok(response)
    }

    async fn change_message_visibility(
        &self,
        _req: ChangeMessageVisibilityRequest,
    ) -> Result<(), TransportError> {
        self.change_visibility_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn create_queue(
        &self,
        req: CreateQueueRequest,
    ) -> Result<CreateQueueResponse, TransportError> {
        Ok(CreateQueueResponse {
            queue_url: format!("https://stub.example.com/000000000000/{}", req.queue_name),
        })
    }

    async fn delete_queue(&self, _queue_url: &str) -> Result<(), TransportError> {
        Ok(())
    }

    async fn purge_queue(&self, _queue_url: &str) -> Result<(), TransportError> {
        Ok(())
    }

    async fn get_queue_url(
        &self,
        req: GetQueueUrlRequest,
    ) -> Result<GetQueueUrlResponse, TransportError> {
        let configured = self.inner.lock().unwrap().queue_url.clone();
        let queue_url = configured.unwrap_or_else(|| {
            format!("https://stub.example.com/000000000000/{}", req.queue_name)
        });
        Ok(GetQueueUrlResponse { queue_url })
    }

    async fn get_queue_attributes(
        &self,
        _req: GetQueueAttributesRequest,
    ) -> Result<GetQueueAttributesResponse, TransportError> {
        Ok(GetQueueAttributesResponse::default())
    }

    fn endpoint_authority(&self) -> Option<String> {
        self.inner.lock().unwrap().endpoint_authority.clone()
    }
}
