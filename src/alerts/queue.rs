use log::warn;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::Notify;

use crate::scanner::rules::Signal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued alert to make room.
    #[default]
    DropOldest,
    /// Refuse the new alert.
    RejectNewest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    DroppedOldest,
    Rejected,
    Closed,
}

/// Bounded hand-off between the scanner workers and the alert sink. Pushing
/// never waits, so a stalled sink cannot hold up candle ingestion.
pub struct AlertQueue {
    inner: Mutex<VecDeque<Signal>>,
    capacity: usize,
    policy: OverflowPolicy,
    notify: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl AlertQueue {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            policy,
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn push(&self, signal: Signal) -> PushOutcome {
        if self.closed.load(Ordering::Acquire) {
            return PushOutcome::Closed;
        }
        let outcome = {
            let mut queue = self.inner.lock();
            if queue.len() < self.capacity {
                queue.push_back(signal);
                PushOutcome::Queued
            } else {
                match self.policy {
                    OverflowPolicy::DropOldest => {
                        if let Some(evicted) = queue.pop_front() {
                            warn!(
                                target: "sink",
                                "alert queue full, dropping {} {} {}",
                                evicted.symbol, evicted.timeframe, evicted.rule
                            );
                        }
                        queue.push_back(signal);
                        PushOutcome::DroppedOldest
                    }
                    OverflowPolicy::RejectNewest => {
                        warn!(
                            target: "sink",
                            "alert queue full, rejecting {} {} {}",
                            signal.symbol, signal.timeframe, signal.rule
                        );
                        PushOutcome::Rejected
                    }
                }
            }
        };
        if outcome != PushOutcome::Queued {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        if outcome != PushOutcome::Rejected {
            self.notify.notify_one();
        }
        outcome
    }

    /// Next alert, or `None` once the queue is closed and drained.
    pub async fn pop(&self) -> Option<Signal> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(signal) = self.inner.lock().pop_front() {
                return Some(signal);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }

    pub fn try_pop(&self) -> Option<Signal> {
        self.inner.lock().pop_front()
    }

    /// Stops accepting alerts and wakes the consumer.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Alerts lost to overflow so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::candle::Timeframe;
    use crate::scanner::rules::{RuleKind, SignalMetrics};
    use std::sync::Arc;
    use std::time::Duration;

    fn signal(symbol: &str) -> Signal {
        Signal {
            symbol: symbol.to_string(),
            timeframe: Timeframe::OneMinute,
            rule: RuleKind::PumpSpike,
            direction: RuleKind::PumpSpike.direction(),
            price: 1.0,
            volume: 1.0,
            quote_volume: None,
            typical_price: 1.0,
            timestamp: 0,
            strength: 1.0,
            metrics: SignalMetrics::default(),
            provisional: false,
        }
    }

    #[test]
    fn test_drop_oldest_keeps_newest() {
        let q = AlertQueue::new(2, OverflowPolicy::DropOldest);
        assert_eq!(q.push(signal("A")), PushOutcome::Queued);
        assert_eq!(q.push(signal("B")), PushOutcome::Queued);
        assert_eq!(q.push(signal("C")), PushOutcome::DroppedOldest);
        assert_eq!(q.len(), 2);
        assert_eq!(q.dropped(), 1);
        assert_eq!(q.try_pop().unwrap().symbol, "B");
        assert_eq!(q.try_pop().unwrap().symbol, "C");
    }

    #[test]
    fn test_reject_newest_keeps_oldest() {
        let q = AlertQueue::new(1, OverflowPolicy::RejectNewest);
        q.push(signal("A"));
        assert_eq!(q.push(signal("B")), PushOutcome::Rejected);
        assert_eq!(q.try_pop().unwrap().symbol, "A");
        assert!(q.is_empty());
    }

    #[test]
    fn test_closed_queue_refuses() {
        let q = AlertQueue::new(4, OverflowPolicy::DropOldest);
        q.close();
        assert_eq!(q.push(signal("A")), PushOutcome::Closed);
    }

    #[tokio::test]
    async fn test_pop_waits_for_push() {
        let q = Arc::new(AlertQueue::new(4, OverflowPolicy::DropOldest));
        let consumer = {
            let q = q.clone();
            tokio::spawn(async move { q.pop().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        q.push(signal("A"));
        let got = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.unwrap().symbol, "A");
    }

    #[tokio::test]
    async fn test_pop_drains_then_ends_after_close() {
        let q = AlertQueue::new(4, OverflowPolicy::DropOldest);
        q.push(signal("A"));
        q.close();
        assert_eq!(q.pop().await.unwrap().symbol, "A");
        assert!(q.pop().await.is_none());
    }
}
