//! In-memory event bus with bounded per-operation history.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::{RwLock, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::{BatchSender, EventSource};
use crate::error::Result;
use crate::types::StreamEvent;

/// Broadcast buffer per operation; slow subscribers past this lag are skipped
/// forward, not disconnected.
const FANOUT_CAPACITY: usize = 256;

/// Default cap on retained history per operation.
const DEFAULT_HISTORY_CAPACITY: usize = 1000;

struct Topic {
    fanout: broadcast::Sender<Vec<StreamEvent>>,
    history: VecDeque<StreamEvent>,
}

impl Topic {
    fn new() -> Self {
        let (fanout, _) = broadcast::channel(FANOUT_CAPACITY);
        Self {
            fanout,
            history: VecDeque::new(),
        }
    }
}

/// Process-local [`EventSource`]: per-operation broadcast fan-out plus a
/// bounded history ring.
///
/// All subscribers of an operation receive every batch published after they
/// subscribed; history replay covers the window before that. One instance is
/// shared across every connection and operation.
pub struct MemoryEventBus {
    topics: RwLock<HashMap<String, Topic>>,
    history_capacity: usize,
}

impl MemoryEventBus {
    pub fn new() -> Self {
        Self::with_history_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    /// Bus retaining at most `capacity` events per operation.
    pub fn with_history_capacity(capacity: usize) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            history_capacity: capacity,
        }
    }

    /// Record a batch and fan it out to live subscribers.
    pub async fn publish(&self, operation_id: &str, events: Vec<StreamEvent>) {
        let mut topics = self.topics.write().await;
        let topic = topics
            .entry(operation_id.to_string())
            .or_insert_with(Topic::new);
        for event in &events {
            topic.history.push_back(event.clone());
        }
        while topic.history.len() > self.history_capacity {
            topic.history.pop_front();
        }
        // No receivers yet is fine; history still covers the batch.
        let _ = topic.fanout.send(events);
    }
}

impl Default for MemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventSource for MemoryEventBus {
    async fn history(&self, operation_id: &str, limit: usize) -> Result<Vec<StreamEvent>> {
        let topics = self.topics.read().await;
        Ok(topics
            .get(operation_id)
            .map(|topic| {
                // newest first; the session reorders chronologically
                topic.history.iter().rev().take(limit).cloned().collect()
            })
            .unwrap_or_default())
    }

    async fn subscribe(
        &self,
        operation_id: &str,
        from_event_id: &str,
        batches: BatchSender,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut fanout = {
            let mut topics = self.topics.write().await;
            topics
                .entry(operation_id.to_string())
                .or_insert_with(Topic::new)
                .fanout
                .subscribe()
        };

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                received = fanout.recv() => match received {
                    Ok(batch) => {
                        let batch: Vec<StreamEvent> = batch
                            .into_iter()
                            .filter(|event| event.id().as_str() > from_event_id)
                            .collect();
                        if batch.is_empty() {
                            continue;
                        }
                        if batches.send(batch).await.is_err() {
                            // subscriber went away
                            return Ok(());
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(operation_id, missed, "subscriber lagged behind fan-out");
                    }
                    Err(broadcast::error::RecvError::Closed) => return Ok(()),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn step(timestamp: i64) -> StreamEvent {
        StreamEvent::new("step_started").at(timestamp)
    }

    #[tokio::test]
    async fn history_is_bounded_and_newest_first() {
        let bus = MemoryEventBus::with_history_capacity(2);
        bus.publish("op-1", vec![step(1), step(2), step(3)]).await;

        let history = bus.history("op-1", 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].timestamp, Some(3));
        assert_eq!(history[1].timestamp, Some(2));
    }

    #[tokio::test]
    async fn history_for_an_unknown_operation_is_empty() {
        let bus = MemoryEventBus::new();
        assert!(bus.history("nope", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn subscribers_receive_batches_published_after_joining() {
        let bus = std::sync::Arc::new(MemoryEventBus::new());
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let subscription = tokio::spawn({
            let bus = bus.clone();
            let cancel = cancel.clone();
            async move { bus.subscribe("op-1", "0", tx, cancel).await }
        });

        tokio::task::yield_now().await;
        bus.publish("op-1", vec![step(10)]).await;

        let batch = rx.recv().await.expect("live batch");
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].timestamp, Some(10));

        cancel.cancel();
        subscription.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn events_at_or_below_the_offset_are_not_delivered() {
        let bus = std::sync::Arc::new(MemoryEventBus::new());
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        tokio::spawn({
            let bus = bus.clone();
            let cancel = cancel.clone();
            async move { bus.subscribe("op-1", "5", tx, cancel).await }
        });

        tokio::task::yield_now().await;
        bus.publish("op-1", vec![step(4), step(5), step(6)]).await;

        let batch = rx.recv().await.expect("filtered batch");
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].timestamp, Some(6));
        cancel.cancel();
    }

    #[tokio::test]
    async fn cancelling_one_subscriber_leaves_others_running() {
        let bus = std::sync::Arc::new(MemoryEventBus::new());
        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);
        let cancel_a = CancellationToken::new();
        let cancel_b = CancellationToken::new();

        let sub_a = tokio::spawn({
            let bus = bus.clone();
            let cancel = cancel_a.clone();
            async move { bus.subscribe("op-1", "0", tx_a, cancel).await }
        });
        tokio::spawn({
            let bus = bus.clone();
            let cancel = cancel_b.clone();
            async move { bus.subscribe("op-1", "0", tx_b, cancel).await }
        });

        tokio::task::yield_now().await;
        cancel_a.cancel();
        sub_a.await.unwrap().unwrap();

        bus.publish("op-1", vec![step(10)]).await;
        let batch = rx_b.recv().await.expect("surviving subscriber");
        assert_eq!(batch[0].timestamp, Some(10));
        assert!(rx_a.recv().await.is_none());
        cancel_b.cancel();
    }
}
