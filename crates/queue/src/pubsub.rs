//! Topic-addressed in-memory message bus with at-least-once delivery.
//!
//! Every published message is fanned out to all subscribers of the topic,
//! one independently-acknowledged copy per subscription. A copy that is
//! nacked, or not acked within the configured timeout, is rerouted to the
//! reserved `undeliverable` topic annotated with its source topic.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anchornet_common::{AppError, AppResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::message::{Message, Outcome};

/// The reserved topic nacked messages are rerouted to.
pub const UNDELIVERABLE_TOPIC: &str = "undeliverable";

/// Metadata key identifying the topic an undeliverable message came from.
pub const METADATA_SOURCE_TOPIC: &str = "source-topic";

/// A topic-addressed publisher/subscriber.
#[async_trait]
pub trait PubSub: Send + Sync {
    /// Subscribe to a topic. Each subscription receives its own copy of every
    /// message published to the topic after the subscription was created.
    async fn subscribe(&self, topic: &str) -> AppResult<mpsc::Receiver<Message>>;

    /// Publish messages to a topic. Fails with `Closed` after [`close`](Self::close).
    async fn publish(&self, topic: &str, messages: Vec<Message>) -> AppResult<()>;

    /// Close the bus; all subscriber streams end.
    async fn close(&self) -> AppResult<()>;
}

/// Configuration for the in-memory bus.
#[derive(Debug, Clone)]
pub struct MemPubSubConfig {
    /// How long a subscriber may hold a copy before it counts as nacked.
    pub ack_timeout: Duration,
    /// Per-subscription channel capacity; publishers block when a subscriber
    /// falls this far behind.
    pub buffer_size: usize,
}

impl Default for MemPubSubConfig {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_secs(30),
            buffer_size: 100,
        }
    }
}

struct Shared {
    name: String,
    config: MemPubSubConfig,
    subscribers: RwLock<HashMap<String, Vec<mpsc::Sender<Message>>>>,
    closed: AtomicBool,
}

/// In-memory [`PubSub`].
#[derive(Clone)]
pub struct MemPubSub {
    shared: Arc<Shared>,
}

impl MemPubSub {
    /// Create a named bus.
    #[must_use]
    pub fn new(name: impl Into<String>, config: MemPubSubConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                config,
                subscribers: RwLock::new(HashMap::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    fn senders_for(&self, topic: &str) -> Vec<mpsc::Sender<Message>> {
        self.shared
            .subscribers
            .read()
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    async fn route_to_undeliverable(shared: &Arc<Shared>, message: Message, source_topic: &str) {
        if shared.closed.load(Ordering::SeqCst) {
            return;
        }

        debug!(
            bus = %shared.name,
            topic = source_topic,
            message_id = %message.id,
            "Routing message to undeliverable topic"
        );

        let message = message.with_metadata(METADATA_SOURCE_TOPIC, source_topic);
        let senders = shared
            .subscribers
            .read()
            .get(UNDELIVERABLE_TOPIC)
            .cloned()
            .unwrap_or_default();

        if senders.is_empty() {
            warn!(
                bus = %shared.name,
                topic = source_topic,
                message_id = %message.id,
                "Undeliverable message dropped: no subscribers"
            );
            return;
        }

        for sender in senders {
            // Undeliverable copies are not ack-tracked; the sideband is
            // terminal as far as the fabric is concerned.
            let _ = sender.send(message.subscriber_copy()).await;
        }
    }
}

#[async_trait]
impl PubSub for MemPubSub {
    async fn subscribe(&self, topic: &str) -> AppResult<mpsc::Receiver<Message>> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(AppError::Closed(self.shared.name.clone()));
        }

        let (tx, rx) = mpsc::channel(self.shared.config.buffer_size);
        self.shared
            .subscribers
            .write()
            .entry(topic.to_string())
            .or_default()
            .push(tx);

        debug!(bus = %self.shared.name, topic, "Subscription created");

        Ok(rx)
    }

    async fn publish(&self, topic: &str, messages: Vec<Message>) -> AppResult<()> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(AppError::Closed(self.shared.name.clone()));
        }

        let senders = self.senders_for(topic);

        for message in messages {
            for sender in &senders {
                let copy = message.subscriber_copy();

                if sender.send(copy.clone()).await.is_err() {
                    continue;
                }

                if topic == UNDELIVERABLE_TOPIC {
                    continue;
                }

                let shared = Arc::clone(&self.shared);
                let source_topic = topic.to_string();
                let timeout = shared.config.ack_timeout;
                tokio::spawn(async move {
                    if copy.outcome(timeout).await == Outcome::Nacked {
                        Self::route_to_undeliverable(&shared, copy, &source_topic).await;
                    }
                });
            }
        }

        Ok(())
    }

    async fn close(&self) -> AppResult<()> {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.subscribers.write().clear();

        debug!(bus = %self.shared.name, "Bus closed");

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn bus() -> MemPubSub {
        MemPubSub::new(
            "test",
            MemPubSubConfig {
                ack_timeout: Duration::from_millis(50),
                buffer_size: 10,
            },
        )
    }

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let bus = bus();
        let mut rx = bus.subscribe("activities").await.unwrap();

        bus.publish("activities", vec![Message::new(b"a1".to_vec())])
            .await
            .unwrap();

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.payload, b"a1");
        msg.ack();
    }

    #[tokio::test]
    async fn test_fan_out_delivers_one_copy_per_subscription() {
        let bus = bus();
        let mut rx1 = bus.subscribe("activities").await.unwrap();
        let mut rx2 = bus.subscribe("activities").await.unwrap();

        bus.publish("activities", vec![Message::new(b"a1".to_vec())])
            .await
            .unwrap();

        let m1 = rx1.recv().await.unwrap();
        let m2 = rx2.recv().await.unwrap();
        assert_eq!(m1.id, m2.id);
        m1.ack();
        m2.ack();
    }

    #[tokio::test]
    async fn test_nacked_message_reaches_undeliverable() {
        let bus = bus();
        let mut rx = bus.subscribe("activities").await.unwrap();
        let mut undeliverable = bus.subscribe(UNDELIVERABLE_TOPIC).await.unwrap();

        bus.publish("activities", vec![Message::new(b"a1".to_vec())])
            .await
            .unwrap();

        rx.recv().await.unwrap().nack();

        let dead = undeliverable.recv().await.unwrap();
        assert_eq!(dead.payload, b"a1");
        assert_eq!(
            dead.metadata.get(METADATA_SOURCE_TOPIC).map(String::as_str),
            Some("activities")
        );
    }

    #[tokio::test]
    async fn test_ack_timeout_counts_as_nack() {
        let bus = bus();
        let mut rx = bus.subscribe("activities").await.unwrap();
        let mut undeliverable = bus.subscribe(UNDELIVERABLE_TOPIC).await.unwrap();

        bus.publish("activities", vec![Message::new(b"a1".to_vec())])
            .await
            .unwrap();

        // Receive but never settle; the timeout nacks the copy.
        let _held = rx.recv().await.unwrap();

        let dead = undeliverable.recv().await.unwrap();
        assert_eq!(dead.payload, b"a1");
    }

    #[tokio::test]
    async fn test_publish_after_close_fails() {
        let bus = bus();
        bus.close().await.unwrap();

        let err = bus
            .publish("activities", vec![Message::new(Vec::new())])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Closed(_)));

        assert!(matches!(
            bus.subscribe("activities").await,
            Err(AppError::Closed(_))
        ));
    }

    #[tokio::test]
    async fn test_close_ends_subscriber_streams() {
        let bus = bus();
        let mut rx = bus.subscribe("activities").await.unwrap();
        bus.close().await.unwrap();

        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_fifo_per_subscriber() {
        let bus = bus();
        let mut rx = bus.subscribe("activities").await.unwrap();

        bus.publish(
            "activities",
            vec![
                Message::new(b"1".to_vec()),
                Message::new(b"2".to_vec()),
                Message::new(b"3".to_vec()),
            ],
        )
        .await
        .unwrap();

        for expected in [b"1", b"2", b"3"] {
            let msg = rx.recv().await.unwrap();
            assert_eq!(msg.payload, expected);
            msg.ack();
        }
    }
}
