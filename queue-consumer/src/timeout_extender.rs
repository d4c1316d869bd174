use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use queue_consumer_helpers::time::Clock;
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument};

use crate::events::{ConsumerEvent, EventEmitter};
use crate::message::MessageSummary;
use crate::transport::{ChangeMessageVisibilityRequest, Transport};

struct Tracked {
    queue_url: String,
    receipt_handle: String,
    summary: MessageSummary,
    received_at: u64,
    timer: Option<JoinHandle<()>>,
    /// Consecutive `change_message_visibility` failures since the last
    /// successful renewal, used to grow the retry backoff.
    failure_count: u32,
}

/// Renews the visibility timeout of long-running in-flight messages,
/// stopping once `no_extensions_after_secs` has elapsed since delivery.
///
/// Mirrors [`crate::delete_batcher::DeleteBatcher`]'s `Arc<Self>`-rooted
/// background-task pattern: each tracked message owns its own renewal
/// timer rather than sharing one global tick.
pub(crate) struct TimeoutExtender {
    transport: Arc<dyn Transport>,
    events: EventEmitter,
    clock: Arc<dyn Clock>,
    visibility_timeout_secs: i32,
    no_extensions_after_secs: u64,
    advanced_call_ms: u64,
    tracked: Mutex<HashMap<String, Tracked>>,
}

impl TimeoutExtender {
    pub fn new(
        transport: Arc<dyn Transport>,
        events: EventEmitter,
        clock: Arc<dyn Clock>,
        visibility_timeout_secs: i32,
        no_extensions_after_secs: u64,
        advanced_call_ms: u64,
    ) -> Arc<Self> {
        Arc::new(TimeoutExtender {
            transport,
            events,
            clock,
            visibility_timeout_secs,
            no_extensions_after_secs,
            advanced_call_ms,
            tracked: Mutex::new(HashMap::new()),
        })
    }

    fn renewal_interval(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs.max(0) as u64)
            .saturating_sub(Duration::from_millis(self.advanced_call_ms))
    }

    /// Begins tracking a newly delivered message, arming its first renewal
    /// timer.
    pub fn track(self: &Arc<Self>, queue_url: String, receipt_handle: String, summary: MessageSummary) {
        let received_at = self.clock.now();
        let interval = self.renewal_interval();

        let me = self.clone();
        let key = receipt_handle.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            me.fire(&key).await;
        });

        self.tracked.lock().unwrap().insert(
            receipt_handle.clone(),
            Tracked {
                queue_url,
                receipt_handle,
                summary,
                received_at,
                timer: Some(timer),
                failure_count: 0,
            },
        );
    }

    /// Stops tracking a message, aborting its renewal timer. Called once
    /// the consumer has handled (deleted/released/declared handled) the
    /// corresponding message.
    pub fn untrack(&self, receipt_handle: &str) {
        if let Some(mut entry) = self.tracked.lock().unwrap().remove(receipt_handle) {
            if let Some(timer) = entry.timer.take() {
                timer.abort();
            }
        }
    }

    #[instrument(skip(self))]
    async fn fire(self: Arc<Self>, receipt_handle: &str) {
        let (queue_url, summary, received_at) = {
            let tracked = self.tracked.lock().unwrap();
            match tracked.get(receipt_handle) {
                Some(entry) => (
                    entry.queue_url.clone(),
                    entry.summary.clone(),
                    entry.received_at,
                ),
                None => return,
            }
        };

        let elapsed = self.clock.now().saturating_sub(received_at);
        if elapsed >= self.no_extensions_after_secs {
            debug!(receipt_handle, elapsed, "visibility extension ceiling reached");
            self.tracked.lock().unwrap().remove(receipt_handle);
            self.events.emit(ConsumerEvent::TimeoutReached(summary));
            return;
        }

        let result = self
            .transport
            .change_message_visibility(ChangeMessageVisibilityRequest {
                queue_url,
                receipt_handle: receipt_handle.to_string(),
                visibility_timeout_secs: self.visibility_timeout_secs,
            })
            .await;

        let remaining = Duration::from_secs(self.no_extensions_after_secs.saturating_sub(elapsed));

        let failure_count = {
            let mut tracked = self.tracked.lock().unwrap();
            match tracked.get_mut(receipt_handle) {
                Some(entry) => match &result {
                    Ok(()) => {
                        entry.failure_count = 0;
                        None
                    }
                    Err(_) => {
                        entry.failure_count += 1;
                        Some(entry.failure_count)
                    }
                },
                None => return,
            }
        };

        match result {
            Ok(()) => {
                self.rearm(receipt_handle, self.renewal_interval().min(remaining));
            }
            Err(err) => {
                error!(receipt_handle, %err, "failed to extend message visibility");
                self.events.emit(ConsumerEvent::Error(err.into()));
                let backoff = self.backoff_after(failure_count.unwrap_or(1)).min(remaining);
                self.rearm(receipt_handle, backoff);
            }
        }
    }

    /// Exponential backoff rooted at the renewal interval, doubling per
    /// consecutive failure and capped well below any realistic `remaining`
    /// window so the `.min(remaining)` at the call site is what actually
    /// bounds it.
    fn backoff_after(&self, failure_count: u32) -> Duration {
        let exponent = failure_count.saturating_sub(1).min(10);
        let multiplier = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.renewal_interval()
            .checked_mul(multiplier)
            .unwrap_or(Duration::MAX)
    }

    fn rearm(self: &Arc<Self>, receipt_handle: &str, after: Duration) {
        let mut tracked = self.tracked.lock().unwrap();
        if let Some(entry) = tracked.get_mut(receipt_handle) {
            let me = self.clone();
            let key = receipt_handle.to_string();
            entry.timer = Some(tokio::spawn(async move {
                tokio::time::sleep(after).await;
                me.fire(&key).await;
            }));
        }
    }

    #[cfg(test)]
    fn tracked_count(&self) -> usize {
        self.tracked.lock().unwrap().len()
    }
}
