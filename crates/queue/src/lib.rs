//! In-memory pubsub fabric and delivery retry policy for anchornet.

pub mod message;
pub mod pubsub;
pub mod retry;

pub use message::{Message, Outcome};
pub use pubsub::{
    METADATA_SOURCE_TOPIC, MemPubSub, MemPubSubConfig, PubSub, UNDELIVERABLE_TOPIC,
};
pub use retry::RetryConfig;
