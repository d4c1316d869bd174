use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::{ConfigError, ConsumerError};

const SERVICE_BATCH_CAP: u8 = 10;

/// Decodes a raw message body before it is handed to application code.
///
/// Pluggable pre/post-processors (SNS envelope unwrapping, large-payload
/// retrieval from blob storage, gzip decoding, custom parsers) implement
/// this seam; the core only knows that materialising a body may suspend
/// and may fail. The default is a pass-through.
#[async_trait]
pub trait BodyProcessor: Send + Sync {
    async fn decode(&self, raw: Option<String>) -> Result<Option<String>, ConsumerError>;
}

pub(crate) struct PassthroughBodyProcessor;

#[async_trait]
impl BodyProcessor for PassthroughBodyProcessor {
    async fn decode(&self, raw: Option<String>) -> Result<Option<String>, ConsumerError> {
        Ok(raw)
    }
}

/// User-supplied consumer configuration. Optional fields fall back to the
/// defaults documented on [`ConsumerConfig::finalise`].
#[derive(Clone)]
pub struct ConsumerConfig {
    pub queue_url: Option<String>,
    pub queue_name: Option<String>,
    pub account_number: Option<String>,
    pub correct_queue_url: bool,
    pub max_in_flight: Option<u32>,
    pub receive_batch_size: Option<u8>,
    pub min_receive_batch_size: Option<u8>,
    pub receive_wait_time_secs: Option<u32>,
    pub visibility_timeout_secs: Option<i32>,
    pub active_poll_interval_ms: Option<u64>,
    pub idle_poll_interval_ms: Option<u64>,
    pub poll_retry_ms: Option<u64>,
    pub delete_batch_size: Option<u8>,
    pub delete_wait_ms: Option<u64>,
    pub send_batch_size: Option<u8>,
    pub send_wait_ms: Option<u64>,
    pub auto_extend_timeout: bool,
    pub no_extensions_after_secs: Option<u64>,
    pub advanced_call_ms: Option<u64>,
    pub receive_attributes: Option<Vec<String>>,
    pub receive_sqs_attributes: Option<Vec<String>>,
    pub queue_policy: Option<String>,
    pub body_processor: Option<Arc<dyn BodyProcessor>>,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        ConsumerConfig {
            queue_url: None,
            queue_name: None,
            account_number: None,
            correct_queue_url: false,
            max_in_flight: None,
            receive_batch_size: None,
            min_receive_batch_size: None,
            receive_wait_time_secs: None,
            visibility_timeout_secs: None,
            active_poll_interval_ms: None,
            idle_poll_interval_ms: None,
            poll_retry_ms: None,
            delete_batch_size: None,
            delete_wait_ms: None,
            send_batch_size: None,
            send_wait_ms: None,
            auto_extend_timeout: false,
            no_extensions_after_secs: None,
            advanced_call_ms: None,
            receive_attributes: None,
            receive_sqs_attributes: None,
            queue_policy: None,
            body_processor: None,
        }
    }
}

/// `ConsumerConfig` with every option resolved to a concrete value and
/// validated against the service's constraints. Built once, at
/// [`crate::Consumer::new`] time, never touched again.
pub(crate) struct FinalisedConfig {
    pub queue_url: Option<String>,
    pub queue_name: Option<String>,
    pub account_number: Option<String>,
    pub correct_queue_url: bool,
    pub max_in_flight: u32,
    pub receive_batch_size: u8,
    pub min_receive_batch_size: u8,
    pub receive_wait_time_secs: u32,
    pub visibility_timeout_secs: Option<i32>,
    pub active_poll_interval_ms: u64,
    pub idle_poll_interval_ms: u64,
    pub poll_retry_ms: u64,
    pub delete_batch_size: u8,
    pub delete_wait_ms: u64,
    pub send_batch_size: u8,
    pub send_wait_ms: u64,
    pub auto_extend_timeout: bool,
    pub no_extensions_after_secs: u64,
    pub advanced_call_ms: u64,
    pub receive_attributes: Vec<String>,
    pub receive_sqs_attributes: Vec<String>,
    pub queue_policy: Option<String>,
    pub body_processor: Arc<dyn BodyProcessor>,
}

impl ConsumerConfig {
    /// Validates and fills in defaults, producing the config the engine
    /// actually runs on.
    ///
    /// Defaults: `max_in_flight = 100` (`0` means unbounded),
    /// `receive_batch_size = 10`, `min_receive_batch_size = 1`,
    /// `receive_wait_time_secs = 20`, `poll_retry_ms = 10_000`,
    /// `delete_batch_size = 10`, `delete_wait_ms = 2_000`,
    /// `send_batch_size = 1` (sends flush eagerly, i.e. batching is
    /// effectively disabled unless raised), `no_extensions_after_secs =
    /// 43_200`, `advanced_call_ms = 5_000`, attribute filters default to
    /// `["All"]`.
    pub(crate) fn finalise(self) -> Result<FinalisedConfig, ConfigError> {
        if self.queue_url.is_none() && self.queue_name.is_none() {
            return Err(ConfigError::MissingQueueIdentity);
        }

        let receive_batch_size = self.receive_batch_size.unwrap_or(10);
        check_batch_size("receive_batch_size", receive_batch_size)?;

        let delete_batch_size = self.delete_batch_size.unwrap_or(10);
        check_batch_size("delete_batch_size", delete_batch_size)?;

        let send_batch_size = self.send_batch_size.unwrap_or(1);
        check_batch_size("send_batch_size", send_batch_size)?;

        let min_receive_batch_size = self.min_receive_batch_size.unwrap_or(1).max(1);

        Ok(FinalisedConfig {
            queue_url: self.queue_url,
            queue_name: self.queue_name,
            account_number: self.account_number,
            correct_queue_url: self.correct_queue_url,
            max_in_flight: self.max_in_flight.unwrap_or(100),
            receive_batch_size,
            min_receive_batch_size,
            receive_wait_time_secs: self.receive_wait_time_secs.unwrap_or(20),
            visibility_timeout_secs: self.visibility_timeout_secs,
            active_poll_interval_ms: self.active_poll_interval_ms.unwrap_or(0),
            idle_poll_interval_ms: self.idle_poll_interval_ms.unwrap_or(0),
            poll_retry_ms: self.poll_retry_ms.unwrap_or(10_000),
            delete_batch_size,
            delete_wait_ms: self.delete_wait_ms.unwrap_or(2_000),
            send_batch_size,
            send_wait_ms: self.send_wait_ms.unwrap_or(0),
            auto_extend_timeout: self.auto_extend_timeout,
            no_extensions_after_secs: self.no_extensions_after_secs.unwrap_or(43_200),
            advanced_call_ms: self.advanced_call_ms.unwrap_or(5_000),
            receive_attributes: self
                .receive_attributes
                .unwrap_or_else(|| vec!["All".to_string()]),
            receive_sqs_attributes: self
                .receive_sqs_attributes
                .unwrap_or_else(|| vec!["All".to_string()]),
            queue_policy: self.queue_policy,
            body_processor: self
                .body_processor
                .unwrap_or_else(|| Arc::new(PassthroughBodyProcessor)),
        })
    }
}

fn check_batch_size(option: &'static str, value: u8) -> Result<(), ConfigError> {
    if value == 0 || value > SERVICE_BATCH_CAP {
        return Err(ConfigError::InvalidBatchSize {
            option,
            value: value as i64,
        });
    }
    Ok(())
}
