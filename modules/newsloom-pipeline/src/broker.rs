//! In-memory push fan-out of pipeline events. Subscribers get bounded
//! channels; a slow subscriber drops events rather than stalling the
//! pipeline. Log events are retained in a 500-entry ring buffer.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use newsloom_common::{ProgressEvent, ProgressSink};
use serde::Serialize;
use tokio::sync::mpsc;

const RING_CAPACITY: usize = 500;
const SUBSCRIBER_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: ProgressEvent,
}

#[derive(Default)]
struct BrokerState {
    subscribers: Vec<mpsc::Sender<ProgressEvent>>,
    ring: VecDeque<LogRecord>,
    seq: u64,
}

#[derive(Default)]
pub struct ProgressBroker {
    state: Mutex<BrokerState>,
}

impl ProgressBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber. The receiver sees every event published after
    /// this call, minus anything dropped while its channel was full.
    pub fn subscribe(&self) -> mpsc::Receiver<ProgressEvent> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        self.state.lock().unwrap().subscribers.push(tx);
        rx
    }

    /// Ring-buffer readback for operator tooling, oldest first.
    pub fn logs(&self, limit: usize, offset: usize) -> Vec<LogRecord> {
        let state = self.state.lock().unwrap();
        state
            .ring
            .iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn log_count(&self) -> usize {
        self.state.lock().unwrap().ring.len()
    }
}

impl ProgressSink for ProgressBroker {
    fn publish(&self, event: ProgressEvent) {
        let mut state = self.state.lock().unwrap();

        if matches!(event, ProgressEvent::Log { .. }) {
            let seq = state.seq;
            state.seq += 1;
            state.ring.push_back(LogRecord {
                seq,
                timestamp: Utc::now(),
                event: event.clone(),
            });
            while state.ring.len() > RING_CAPACITY {
                state.ring.pop_front();
            }
        }

        // try_send keeps publish non-blocking; full channels lose the event.
        state
            .subscribers
            .retain(|tx| match tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => true,
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use newsloom_common::LogLevel;

    fn log(i: usize) -> ProgressEvent {
        ProgressEvent::log(LogLevel::Info, format!("message {i}"))
    }

    #[test]
    fn ring_keeps_last_500_logs() {
        let broker = ProgressBroker::new();
        for i in 0..600 {
            broker.publish(log(i));
        }
        assert_eq!(broker.log_count(), 500);
        let first = &broker.logs(1, 0)[0];
        assert_eq!(first.seq, 100, "oldest 100 entries evicted");
    }

    #[test]
    fn logs_pagination() {
        let broker = ProgressBroker::new();
        for i in 0..10 {
            broker.publish(log(i));
        }
        let page = broker.logs(3, 4);
        assert_eq!(page.len(), 3);
        assert_eq!(page[0].seq, 4);
    }

    #[test]
    fn non_log_events_skip_the_ring() {
        let broker = ProgressBroker::new();
        broker.publish(ProgressEvent::Progress {
            percent: 10,
            step: "scraping".to_string(),
            status: newsloom_common::PipelineStatus::Running,
        });
        assert_eq!(broker.log_count(), 0);
    }

    #[tokio::test]
    async fn subscribers_receive_events() {
        let broker = ProgressBroker::new();
        let mut rx = broker.subscribe();
        broker.publish(log(1));
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, ProgressEvent::Log { .. }));
    }

    #[tokio::test]
    async fn slow_subscriber_drops_events_without_blocking() {
        let broker = ProgressBroker::new();
        let _rx = broker.subscribe(); // never drained
        for i in 0..(SUBSCRIBER_CAPACITY + 50) {
            broker.publish(log(i)); // must not block
        }
        assert_eq!(broker.log_count(), SUBSCRIBER_CAPACITY + 50);
    }

    #[tokio::test]
    async fn closed_subscribers_are_pruned() {
        let broker = ProgressBroker::new();
        let rx = broker.subscribe();
        drop(rx);
        broker.publish(log(0));
        assert!(broker.state.lock().unwrap().subscribers.is_empty());
    }
}
