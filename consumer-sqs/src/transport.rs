use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_sqs::types::{
    DeleteMessageBatchRequestEntry, MessageAttributeValue, MessageSystemAttributeName,
    QueueAttributeName, SendMessageBatchRequestEntry,
};
use aws_sdk_sqs::Client;
use tracing::instrument;

use queue_consumer::transport::*;
use queue_consumer::TransportError;

use crate::errors::to_transport_error;

/// Binds the engine's [`Transport`] trait to a live `aws_sdk_sqs::Client`.
/// Every method is a thin translation between the engine's wire-agnostic
/// request/response structs and the SDK's fluent builders; no batching,
/// retry or polling policy lives here, all of that is the engine's job.
pub struct SqsTransport {
    client: Client,
    endpoint_authority: Option<String>,
}

impl SqsTransport {
    pub fn new(client: Client) -> Self {
        SqsTransport {
            client,
            endpoint_authority: None,
        }
    }

    /// Records the authority (scheme+host+port) this client actually
    /// dials, so `QueueResolver` can rewrite a queue URL a VPC endpoint or
    /// LocalStack reports with its internal hostname.
    pub fn with_endpoint_authority(mut self, authority: impl Into<String>) -> Self {
        self.endpoint_authority = Some(authority.into());
        self
    }
}

fn encode_attributes(attributes: Attributes) -> HashMap<String, MessageAttributeValue> {
    attributes
        .into_iter()
        .map(|(name, value)| {
            let encoded = match value {
                AttributeValue::String(s) => MessageAttributeValue::builder()
                    .data_type("String")
                    .string_value(s)
                    .build()
                    .expect("data_type is always set"),
                AttributeValue::Number(n) => MessageAttributeValue::builder()
                    .data_type("Number")
                    .string_value(n)
                    .build()
                    .expect("data_type is always set"),
                AttributeValue::Binary(b) => MessageAttributeValue::builder()
                    .data_type("Binary")
                    .binary_value(b.into())
                    .build()
                    .expect("data_type is always set"),
            };
            (name, encoded)
        })
        .collect()
}

fn decode_attributes(attributes: Option<HashMap<String, MessageAttributeValue>>) -> Attributes {
    attributes
        .unwrap_or_default()
        .into_iter()
        .map(|(name, value)| {
            let data_type = value.data_type();
            let decoded = if data_type.starts_with("Number") {
                AttributeValue::Number(value.string_value().unwrap_or_default().to_string())
            } else if data_type.starts_with("Binary") {
                AttributeValue::Binary(
                    value
                        .binary_value()
                        .map(|blob| blob.clone().into_inner())
                        .unwrap_or_default(),
                )
            } else {
                AttributeValue::String(value.string_value().unwrap_or_default().to_string())
            };
            (name, decoded)
        })
        .collect()
}

fn decode_system_attributes(
    attributes: Option<HashMap<aws_sdk_sqs::types::MessageSystemAttributeName, String>>,
) -> SystemAttributes {
    attributes
        .unwrap_or_default()
        .into_iter()
        .map(|(name, value)| (name.as_str().to_string(), value))
        .collect()
}

#[async_trait]
impl Transport for SqsTransport {
    #[instrument(skip(self))]
    async fn receive_message(
        &self,
        req: ReceiveMessageRequest,
    ) -> Result<ReceiveMessageResponse, TransportError> {
        let attribute_names: Vec<MessageSystemAttributeName> = req
            .attribute_names
            .iter()
            .map(|name| MessageSystemAttributeName::from(name.as_str()))
            .collect();

        let output = self
            .client
            .receive_message()
            .queue_url(&req.queue_url)
            .max_number_of_messages(req.max_messages as i32)
            .wait_time_seconds(req.wait_seconds as i32)
            .set_visibility_timeout(req.visibility_timeout_secs)
            .set_message_system_attribute_names(Some(attribute_names))
            .set_message_attribute_names(Some(req.message_attribute_names))
            .send()
            .await
            .map_err(|err| to_transport_error("receive_message", err))?;

        let messages = output
            .messages
            .unwrap_or_default()
            .into_iter()
            .map(|msg| {
                let system_attributes = decode_system_attributes(msg.attributes);
                let approximate_receive_count = system_attributes
                    .get("ApproximateReceiveCount")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0);
                RawMessage {
                    id: msg.message_id.unwrap_or_default(),
                    receipt_handle: msg.receipt_handle.unwrap_or_default(),
                    body: msg.body,
                    attributes: decode_attributes(msg.message_attributes),
                    system_attributes,
                    approximate_receive_count,
                }
            })
            .collect();

        Ok(ReceiveMessageResponse { messages })
    }

    #[instrument(skip(self))]
    async fn delete_message_batch(
        &self,
        req: DeleteMessageBatchRequest,
    ) -> Result<DeleteMessageBatchResponse, TransportError> {
        let entries = req
            .entries
            .into_iter()
            .map(|entry| {
                DeleteMessageBatchRequestEntry::builder()
                    .id(entry.id)
                    .receipt_handle(entry.receipt_handle)
                    .build()
                    .expect("id and receipt_handle are always set")
            })
            .collect();

        let output = self
            .client
            .delete_message_batch()
            .queue_url(&req.queue_url)
            .set_entries(Some(entries))
            .send()
            .await
            .map_err(|err| to_transport_error("delete_message_batch", err))?;

        Ok(DeleteMessageBatchResponse {
            successful: output
                .successful
                .into_iter()
                .map(|entry| BatchResultEntry { id: entry.id })
                .collect(),
            failed: output
                .failed
                .into_iter()
                .map(|entry| BatchResultEntryError {
                    id: entry.id,
                    code: entry.code,
                    message: entry.message.unwrap_or_default(),
                    sender_fault: entry.sender_fault,
                })
                .collect(),
        })
    }

    #[instrument(skip(self))]
    async fn send_message(
        &self,
        req: SendMessageRequest,
    ) -> Result<SendMessageResponse, TransportError> {
        let output = self
            .client
            .send_message()
            .queue_url(&req.queue_url)
            .message_body(req.message_body)
            .set_delay_seconds(req.delay_seconds.map(|secs| secs as i32))
            .set_message_attributes(Some(encode_attributes(req.attributes)))
            .set_message_group_id(req.message_group_id)
            .set_message_deduplication_id(req.message_deduplication_id)
            .send()
            .await
            .map_err(|err| to_transport_error("send_message", err))?;

        Ok(SendMessageResponse {
            message_id: output.message_id.unwrap_or_default(),
            md5_of_message_body: output.md5_of_message_body,
        })
    }

    #[instrument(skip(self))]
    async fn send_message_batch(
        &self,
        req: SendMessageBatchRequest,
    ) -> Result<SendMessageBatchResponse, TransportError> {
        let entries = req
            .entries
            .into_iter()
            .map(|entry| {
                SendMessageBatchRequestEntry::builder()
                    .id(entry.id)
                    .message_body(entry.message_body)
                    .set_delay_seconds(entry.delay_seconds.map(|secs| secs as i32))
                    .set_message_attributes(Some(encode_attributes(entry.attributes)))
                    .set_message_group_id(entry.message_group_id)
                    .set_message_deduplication_id(entry.message_deduplication_id)
                    .build()
                    .expect("id and message_body are always set")
            })
            .collect();

        let output = self
            .client
            .send_message_batch()
            .queue_url(&req.queue_url)
            .set_entries(Some(entries))
            .send()
            .await
            .map_err(|err| to_transport_error("send_message_batch", err))?;

        Ok(SendMessageBatchResponse {
            successful: output
                .successful
                .into_iter()
                .map(|entry| SendResultEntry {
                    id: entry.id,
                    message_id: entry.message_id,
                    md5_of_message_body: Some(entry.md5_of_message_body),
                })
                .collect(),
            failed: output
                .failed
                .into_iter()
                .map(|entry| BatchResultEntryError {
                    id: entry.id,
                    code: entry.code,
                    message: entry.message.unwrap_or_default(),
                    sender_fault: entry.sender_fault,
                })
                .collect(),
        })
    }

    #[instrument(skip(self))]
    async fn change_message_visibility(
        &self,
        req: ChangeMessageVisibilityRequest,
    ) -> Result<(), TransportError> {
        self.client
            .change_message_visibility()
            .queue_url(&req.queue_url)
            .receipt_handle(&req.receipt_handle)
            .visibility_timeout(req.visibility_timeout_secs)
            .send()
            .await
            .map_err(|err| to_transport_error("change_message_visibility", err))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn create_queue(
        &self,
        req: CreateQueueRequest,
    ) -> Result<CreateQueueResponse, TransportError> {
        let mut attributes = HashMap::new();
        if let Some(timeout) = req.visibility_timeout_secs {
            attributes.insert(QueueAttributeName::VisibilityTimeout, timeout.to_string());
        }
        if let Some(policy) = req.policy {
            attributes.insert(QueueAttributeName::Policy, policy);
        }

        let output = self
            .client
            .create_queue()
            .queue_name(&req.queue_name)
            .set_attributes(if attributes.is_empty() { None } else { Some(attributes) })
            .send()
            .await
            .map_err(|err| to_transport_error("create_queue", err))?;

        Ok(CreateQueueResponse {
            queue_url: output.queue_url.unwrap_or_default(),
        })
    }

    #[instrument(skip(self))]
    async fn delete_queue(&self, queue_url: &str) -> Result<(), TransportError> {
        self.client
            .delete_queue()
            .queue_url(queue_url)
            .send()
            .await
            .map_err(|err| to_transport_error("delete_queue", err))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn purge_queue(&self, queue_url: &str) -> Result<(), TransportError> {
        self.client
            .purge_queue()
            .queue_url(queue_url)
            .send()
            .await
            .map_err(|err| to_transport_error("purge_queue", err))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_queue_url(
        &self,
        req: GetQueueUrlRequest,
    ) -> Result<GetQueueUrlResponse, TransportError> {
        let output = self
            .client
            .get_queue_url()
            .queue_name(&req.queue_name)
            .set_queue_owner_aws_account_id(req.queue_owner_aws_account_id)
            .send()
            .await
            .map_err(|err| to_transport_error("get_queue_url", err))?;

        Ok(GetQueueUrlResponse {
            queue_url: output.queue_url.unwrap_or_default(),
        })
    }

    #[instrument(skip(self))]
    async fn get_queue_attributes(
        &self,
        req: GetQueueAttributesRequest,
    ) -> Result<GetQueueAttributesResponse, TransportError> {
        let names: Vec<QueueAttributeName> = req
            .attribute_names
            .iter()
            .map(|name| QueueAttributeName::from(name.as_str()))
            .collect();

        let output = self
            .client
            .get_queue_attributes()
            .queue_url(&req.queue_url)
            .set_attribute_names(Some(names))
            .send()
            .await
            .map_err(|err| to_transport_error("get_queue_attributes", err))?;

        let attributes = output
            .attributes
            .unwrap_or_default()
            .into_iter()
            .map(|(name, value)| (name.as_str().to_string(), value))
            .collect();

        Ok(GetQueueAttributesResponse { attributes })
    }

    fn endpoint_authority(&self) -> Option<String> {
        self.endpoint_authority.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test_log::test]
    fn decode_attributes_tags_number_and_binary_by_data_type() {
        let mut raw = HashMap::new();
        raw.insert(
            "count".to_string(),
            MessageAttributeValue::builder()
                .data_type("Number")
                .string_value("3")
                .build()
                .unwrap(),
        );
        raw.insert(
            "blob".to_string(),
            MessageAttributeValue::builder()
                .data_type("Binary")
                .binary_value(vec![1, 2, 3].into())
                .build()
                .unwrap(),
        );
        raw.insert(
            "name".to_string(),
            MessageAttributeValue::builder()
                .data_type("String")
                .string_value("hello")
                .build()
                .unwrap(),
        );

        let decoded = decode_attributes(Some(raw));

        assert_eq!(decoded.get("count"), Some(&AttributeValue::Number("3".to_string())));
        assert_eq!(decoded.get("blob"), Some(&AttributeValue::Binary(vec![1, 2, 3])));
        assert_eq!(decoded.get("name"), Some(&AttributeValue::String("hello".to_string())));
    }

    #[test_log::test]
    fn decode_attributes_of_none_is_empty() {
        assert_eq!(decode_attributes(None), HashMap::new());
    }

    #[test_log::test]
    fn encode_attributes_round_trips_through_decode() {
        let mut attributes = Attributes::new();
        attributes.insert("count".to_string(), AttributeValue::Number("42".to_string()));
        attributes.insert("name".to_string(), AttributeValue::String("hello".to_string()));

        let encoded = encode_attributes(attributes);
        let decoded = decode_attributes(Some(encoded));

        assert_eq!(decoded.get("count"), Some(&AttributeValue::Number("42".to_string())));
        assert_eq!(decoded.get("name"), Some(&AttributeValue::String("hello".to_string())));
    }

    #[test_log::test]
    fn decode_system_attributes_keys_by_string_name() {
        let mut raw = HashMap::new();
        raw.insert(
            MessageSystemAttributeName::from("ApproximateReceiveCount"),
            "5".to_string(),
        );

        let decoded = decode_system_attributes(Some(raw));

        assert_eq!(decoded.get("ApproximateReceiveCount"), Some(&"5".to_string()));
    }
}
