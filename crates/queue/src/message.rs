//! Messages carried by the pubsub fabric.
//!
//! Each delivered copy of a message carries its own acknowledgement state:
//! the first `ack`/`nack` wins, and the fabric treats a copy that is not
//! settled within its ack timeout as nacked.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use uuid::Uuid;

/// Terminal acknowledgement state of a delivered message copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The subscriber processed the message.
    Acked,
    /// The subscriber failed, or the ack timeout elapsed.
    Nacked,
}

#[derive(Debug, Default)]
struct AckState {
    outcome: Mutex<Option<Outcome>>,
    notify: Notify,
}

/// An opaque payload with metadata and acknowledgement handles.
#[derive(Debug, Clone)]
pub struct Message {
    /// Unique message ID.
    pub id: String,
    /// Opaque payload.
    pub payload: Vec<u8>,
    /// Annotations; the fabric adds the source topic when rerouting to the
    /// undeliverable topic.
    pub metadata: HashMap<String, String>,
    ack: Arc<AckState>,
}

impl Message {
    /// Create a message with a fresh ID.
    #[must_use]
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            payload,
            metadata: HashMap::new(),
            ack: Arc::new(AckState::default()),
        }
    }

    /// Attach a metadata annotation.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Acknowledge successful processing. A no-op once settled.
    pub fn ack(&self) {
        self.settle(Outcome::Acked);
    }

    /// Signal failed processing. A no-op once settled.
    pub fn nack(&self) {
        self.settle(Outcome::Nacked);
    }

    /// A copy for one subscriber: same ID, payload and metadata, independent
    /// acknowledgement state.
    #[must_use]
    pub fn subscriber_copy(&self) -> Self {
        Self {
            id: self.id.clone(),
            payload: self.payload.clone(),
            metadata: self.metadata.clone(),
            ack: Arc::new(AckState::default()),
        }
    }

    fn settle(&self, outcome: Outcome) {
        let mut state = self.ack.outcome.lock();
        if state.is_none() {
            *state = Some(outcome);
            self.ack.notify.notify_waiters();
        }
    }

    /// Wait until the copy is settled, treating a timeout as a nack.
    pub(crate) async fn outcome(&self, timeout: Duration) -> Outcome {
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        loop {
            let notified = self.ack.notify.notified();

            if let Some(outcome) = *self.ack.outcome.lock() {
                return outcome;
            }

            tokio::select! {
                () = notified => {}
                () = &mut deadline => return Outcome::Nacked,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ack_settles_outcome() {
        let msg = Message::new(b"payload".to_vec());
        msg.ack();
        assert_eq!(msg.outcome(Duration::from_millis(10)).await, Outcome::Acked);
    }

    #[tokio::test]
    async fn test_first_settle_wins() {
        let msg = Message::new(Vec::new());
        msg.nack();
        msg.ack();
        assert_eq!(
            msg.outcome(Duration::from_millis(10)).await,
            Outcome::Nacked
        );
    }

    #[tokio::test]
    async fn test_timeout_is_a_nack() {
        let msg = Message::new(Vec::new());
        assert_eq!(
            msg.outcome(Duration::from_millis(10)).await,
            Outcome::Nacked
        );
    }

    #[tokio::test]
    async fn test_subscriber_copies_settle_independently() {
        let msg = Message::new(b"x".to_vec());
        let copy1 = msg.subscriber_copy();
        let copy2 = msg.subscriber_copy();

        copy1.ack();
        copy2.nack();

        assert_eq!(
            copy1.outcome(Duration::from_millis(10)).await,
            Outcome::Acked
        );
        assert_eq!(
            copy2.outcome(Duration::from_millis(10)).await,
            Outcome::Nacked
        );
        assert_eq!(copy1.id, copy2.id);
    }

    #[tokio::test]
    async fn test_ack_wakes_waiter() {
        let msg = Message::new(Vec::new());
        let waiter = msg.clone();

        let handle =
            tokio::spawn(async move { waiter.outcome(Duration::from_secs(5)).await });

        tokio::task::yield_now().await;
        msg.ack();

        assert_eq!(handle.await.unwrap_or(Outcome::Nacked), Outcome::Acked);
    }
}
