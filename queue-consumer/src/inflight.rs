use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

use tokio::sync::Notify;

/// The outcome of incrementing the counter: the new value, and whether
/// this particular increment was the one that crossed from `cap - 1` to
/// `cap` (only meaningful when the cap is positive).
pub struct IncrementOutcome {
    pub value: i64,
    pub cap_reached: bool,
}

/// The outcome of decrementing the counter: the new value, and whether
/// this particular decrement was the one that crossed from above zero to
/// zero.
pub struct DecrementOutcome {
    pub value: i64,
    pub drained: bool,
}

/// Tracks the number of messages handed to application code but not yet
/// finalised (deleted, released, or otherwise declared handled).
///
/// Safe to share across tasks: increments happen from the receive loop,
/// decrements happen from whichever task calls a terminal message
/// operation. [`InflightCounter::wait_for_slot`] and
/// [`InflightCounter::wait_for_drain`] let callers block on a decrement
/// instead of busy-polling, using the enable-before-check pattern so a
/// decrement racing the check is never missed.
pub struct InflightCounter {
    count: AtomicI64,
    cap: i64,
    resume: Notify,
}

impl InflightCounter {
    /// `cap <= 0` means unbounded.
    pub fn new(cap: i64) -> Self {
        InflightCounter {
            count: AtomicI64::new(0),
            cap: cap.max(0),
            resume: Notify::new(),
        }
    }

    pub fn cap(&self) -> i64 {
        self.cap
    }

    pub fn value(&self) -> i64 {
        self.count.load(Ordering::SeqCst)
    }

    pub fn increment(&self) -> IncrementOutcome {
        let value = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        let cap_reached = self.cap > 0 && value == self.cap;
        IncrementOutcome { value, cap_reached }
    }

    pub fn decrement(&self) -> DecrementOutcome {
        let previous = self.count.fetch_sub(1, Ordering::SeqCst);
        let value = (previous - 1).max(0);
        let drained = previous > 0 && value == 0;
        self.resume.notify_waiters();
        DecrementOutcome { value, drained }
    }

    /// Blocks until at least `min_batch` slots are free (or returns
    /// immediately, with `i64::MAX`, if the counter is unbounded).
    pub async fn wait_for_slot(&self, min_batch: i64) -> i64 {
        loop {
            let notified = self.resume.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.cap == 0 {
                return i64::MAX;
            }
            let slots = self.cap - self.value();
            if slots > 0 && slots >= min_batch {
                return slots;
            }
            notified.await;
        }
    }

    /// Blocks until the counter reaches zero, or until `deadline` passes,
    /// whichever comes first. Returns whether it actually drained.
    pub async fn wait_for_drain(&self, deadline: Option<Instant>) -> bool {
        loop {
            let notified = self.resume.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.value() == 0 {
                return true;
            }

            match deadline {
                None => notified.await,
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return false;
                    }
                    if tokio::time::timeout(remaining, notified).await.is_err() {
                        return false;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test_log::test]
    fn increment_reports_cap_crossing_exactly_once_per_crossing() {
        let counter = InflightCounter::new(2);
        assert!(!counter.increment().cap_reached);
        assert!(counter.increment().cap_reached);
        assert_eq!(counter.value(), 2);
    }

    #[test_log::test]
    fn decrement_reports_drained_only_on_transition_to_zero() {
        let counter = InflightCounter::new(0);
        counter.increment();
        counter.increment();
        assert!(!counter.decrement().drained);
        assert!(counter.decrement().drained);
    }

    #[test_log::test]
    fn unbounded_counter_never_reports_cap_reached() {
        let counter = InflightCounter::new(0);
        for _ in 0..100 {
            assert!(!counter.increment().cap_reached);
        }
    }

    #[test_log::test(tokio::test)]
    async fn wait_for_slot_unblocks_once_a_decrement_frees_capacity() {
        let counter = InflightCounter::new(1);
        counter.increment();
        let waiter = async { counter.wait_for_slot(1).await };
        let decrementer = async {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            counter.decrement();
        };
        let (slots, _) = tokio::join!(waiter, decrementer);
        assert!(slots >= 1);
    }

    #[test_log::test(tokio::test)]
    async fn wait_for_drain_returns_true_immediately_when_already_zero() {
        let counter = InflightCounter::new(0);
        assert!(counter.wait_for_drain(None).await);
    }

    #[test_log::test(tokio::test)]
    async fn wait_for_drain_returns_false_past_the_deadline() {
        let counter = InflightCounter::new(0);
        counter.increment();
        let deadline = Instant::now() + std::time::Duration::from_millis(20);
        assert!(!counter.wait_for_drain(Some(deadline)).await);
    }
}
