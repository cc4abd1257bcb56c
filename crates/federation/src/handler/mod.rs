//! Per-kind activity handlers for the inbox dispatcher.
//!
//! Dispatch is a table keyed on the activity kind; each kind gets its own
//! processor. All processors are safe to invoke more than once for the same
//! activity, since dispatch is at-least-once.

mod accept;
mod announce;
mod create;
mod follow;
mod like;
mod offer;
mod reject;
mod undo;

pub use accept::AcceptProcessor;
pub use announce::AnnounceProcessor;
pub use create::CreateProcessor;
pub use follow::{AcceptAllFollowPolicy, FollowPolicy, FollowProcessor};
pub use like::LikeProcessor;
pub use offer::OfferProcessor;
pub use reject::RejectProcessor;
pub use undo::UndoProcessor;

use std::sync::Arc;
use std::time::Duration;

use anchornet_common::AppResult;
use anchornet_store::{Activity, ActivityKind, ActivityStore};
use async_trait::async_trait;
use tokio::sync::broadcast;
use url::Url;

use crate::outbox::Outbox;
use crate::transport::Transport;
use crate::witness::{CredentialWitness, WitnessProofHandler};

/// Handles one dispatched activity.
#[async_trait]
pub trait ActivityHandler: Send + Sync {
    /// Apply the activity's state transition. An error nacks the message.
    async fn handle(&self, activity: &Activity) -> AppResult<()>;
}

/// Configuration for the inbox activity handler.
#[derive(Clone)]
pub struct HandlerConfig {
    /// This service's IRI.
    pub service_iri: Url,
    /// Window applied when an Offer lacks an explicit `endTime`.
    pub max_witness_delay: Duration,
    /// Capacity of the local subscriber channel.
    pub buffer_size: usize,
}

/// The inbox-side activity handler: dispatches each activity kind to its
/// processor and lets local consumers observe handled activities.
pub struct InboxActivityHandler {
    config: HandlerConfig,
    store: Arc<dyn ActivityStore>,
    outbox: Arc<Outbox>,
    transport: Arc<dyn Transport>,
    follow_policy: Arc<dyn FollowPolicy>,
    proof_handler: Arc<WitnessProofHandler>,
    witness: Option<Arc<dyn CredentialWitness>>,
    subscribers: broadcast::Sender<Activity>,
}

impl InboxActivityHandler {
    /// Create the handler.
    #[must_use]
    pub fn new(
        config: HandlerConfig,
        store: Arc<dyn ActivityStore>,
        outbox: Arc<Outbox>,
        transport: Arc<dyn Transport>,
        follow_policy: Arc<dyn FollowPolicy>,
        proof_handler: Arc<WitnessProofHandler>,
        witness: Option<Arc<dyn CredentialWitness>>,
    ) -> Self {
        let (subscribers, _) = broadcast::channel(config.buffer_size.max(1));
        Self {
            config,
            store,
            outbox,
            transport,
            follow_policy,
            proof_handler,
            witness,
            subscribers,
        }
    }

    /// Receive activities as they are handled.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Activity> {
        self.subscribers.subscribe()
    }
}

#[async_trait]
impl ActivityHandler for InboxActivityHandler {
    async fn handle(&self, activity: &Activity) -> AppResult<()> {
        match activity.kind {
            ActivityKind::Create => {
                CreateProcessor::new(
                    self.config.service_iri.clone(),
                    Arc::clone(&self.store),
                    self.subscribers.clone(),
                )
                .process(activity)
                .await
            }
            ActivityKind::Follow => {
                FollowProcessor::new(
                    self.config.service_iri.clone(),
                    Arc::clone(&self.store),
                    Arc::clone(&self.outbox),
                    Arc::clone(&self.follow_policy),
                )
                .process(activity)
                .await
            }
            ActivityKind::Accept => {
                AcceptProcessor::new(self.config.service_iri.clone(), Arc::clone(&self.store))
                    .process(activity)
                    .await
            }
            ActivityKind::Reject => {
                RejectProcessor::new(self.config.service_iri.clone())
                    .process(activity)
                    .await
            }
            ActivityKind::Announce => {
                AnnounceProcessor::new(
                    self.config.service_iri.clone(),
                    Arc::clone(&self.store),
                    Arc::clone(&self.transport),
                )
                .process(activity)
                .await
            }
            ActivityKind::Like => {
                LikeProcessor::new(
                    Arc::clone(&self.store),
                    Arc::clone(&self.proof_handler),
                    self.config.max_witness_delay,
                )
                .process(activity)
                .await
            }
            ActivityKind::Offer => {
                OfferProcessor::new(
                    self.config.service_iri.clone(),
                    Arc::clone(&self.store),
                    Arc::clone(&self.outbox),
                    self.witness.clone(),
                    self.config.max_witness_delay,
                )
                .process(activity)
                .await
            }
            ActivityKind::Undo => {
                UndoProcessor::new(self.config.service_iri.clone(), Arc::clone(&self.store))
                    .process(activity)
                    .await
            }
        }
    }
}
