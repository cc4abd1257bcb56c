//! Outbox pipeline: accept posts, persist, resolve recipients, deliver with
//! retry, escalate exhausted deliveries to the undeliverable handler.
//!
//! Delivery rides the pubsub fabric: one message per recipient is published
//! to a partition topic chosen by recipient hash, so a single worker owns
//! each recipient and per-recipient FIFO holds. A failed delivery is nacked;
//! the fabric reroutes it to the undeliverable sideband, where the
//! redelivery subscriber re-publishes it with `attempt + 1` after a backoff,
//! or hands it to the undeliverable handler once the retry budget is spent.

use std::collections::HashSet;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;

use anchornet_common::{AppError, AppResult, Lifecycle, ServiceIris};
use anchornet_queue::{METADATA_SOURCE_TOPIC, Message, PubSub, RetryConfig, UNDELIVERABLE_TOPIC};
use anchornet_store::{
    Activity, ActivityKind, ActivityStore, Criteria, QueryOptions, ReferenceType, SortOrder,
    WitnessKind, WitnessProof, WitnessStore,
};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::transport::Transport;

/// Receives activities whose delivery retry budget is exhausted.
#[async_trait]
pub trait UndeliverableHandler: Send + Sync {
    /// Called once per `(activity, recipient)` pair that could not be
    /// delivered.
    async fn undeliverable(&self, activity: &Activity, recipient: &Url);
}

/// Default undeliverable handler: logs and drops.
pub struct LoggingUndeliverableHandler;

#[async_trait]
impl UndeliverableHandler for LoggingUndeliverableHandler {
    async fn undeliverable(&self, activity: &Activity, recipient: &Url) {
        warn!(
            activity_id = %activity.id,
            recipient = %recipient,
            "Delivery abandoned after exhausting retries"
        );
    }
}

/// Outbox configuration.
#[derive(Clone)]
pub struct OutboxConfig {
    /// Component name for logs and lifecycle errors.
    pub service_name: String,
    /// This service's IRI.
    pub service_iri: Url,
    /// Delivery worker count; also the partition count.
    pub workers: usize,
    /// Redelivery policy.
    pub retry: RetryConfig,
}

/// One queued delivery: an activity bound for one recipient.
#[derive(Debug, Serialize, Deserialize)]
struct DeliveryInstruction {
    activity_id: Url,
    recipient: Url,
    attempt: u32,
}

/// The outbox pipeline.
pub struct Outbox {
    lifecycle: Lifecycle,
    config: OutboxConfig,
    iris: ServiceIris,
    store: Arc<dyn ActivityStore>,
    pubsub: Arc<dyn PubSub>,
    transport: Arc<dyn Transport>,
    undeliverable: Arc<dyn UndeliverableHandler>,
    witness_store: Arc<dyn WitnessStore>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Outbox {
    /// Create an outbox over its own pubsub fabric instance.
    #[must_use]
    pub fn new(
        config: OutboxConfig,
        store: Arc<dyn ActivityStore>,
        pubsub: Arc<dyn PubSub>,
        transport: Arc<dyn Transport>,
        undeliverable: Arc<dyn UndeliverableHandler>,
        witness_store: Arc<dyn WitnessStore>,
    ) -> Arc<Self> {
        let iris = ServiceIris::new(config.service_iri.clone());
        Arc::new(Self {
            lifecycle: Lifecycle::new(config.service_name.clone()),
            config,
            iris,
            store,
            pubsub,
            transport,
            undeliverable,
            witness_store,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Start the delivery workers and the redelivery subscriber.
    pub async fn start(self: &Arc<Self>) -> AppResult<()> {
        self.lifecycle.starting()?;

        let mut tasks = Vec::new();

        for partition in 0..self.config.workers.max(1) {
            let rx = self.pubsub.subscribe(&partition_topic(partition)).await?;
            let outbox = Arc::clone(self);
            tasks.push(tokio::spawn(async move {
                outbox.delivery_worker(rx).await;
            }));
        }

        let rx = self.pubsub.subscribe(UNDELIVERABLE_TOPIC).await?;
        let outbox = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            outbox.redelivery_worker(rx).await;
        }));

        self.tasks.lock().extend(tasks);
        self.lifecycle.started()?;

        info!(service = %self.config.service_name, workers = self.config.workers, "Outbox started");

        Ok(())
    }

    /// Stop delivery: close the fabric, let in-flight deliveries finish.
    pub async fn stop(&self) -> AppResult<()> {
        self.lifecycle.stopping()?;

        if let Err(e) = self.pubsub.close().await {
            warn!(error = %e, "Closing outbox fabric");
        }

        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }

        self.lifecycle.stopped()?;

        info!(service = %self.config.service_name, "Outbox stopped");

        Ok(())
    }

    /// Post an activity: assign it a fresh IRI, persist it, append it to the
    /// service's Outbox index and hand it to asynchronous delivery.
    ///
    /// Returns the assigned IRI as soon as the activity is durable.
    pub async fn post(&self, mut activity: Activity) -> AppResult<Url> {
        self.lifecycle.check_started()?;

        activity.id = self.iris.new_activity_id()?;
        if activity.published.is_none() {
            activity.published = Some(Utc::now());
        }
        if activity.actor != self.config.service_iri {
            return Err(AppError::Invalid(format!(
                "activity actor [{}] is not this service",
                activity.actor
            )));
        }

        self.store.put_activity(&activity).await?;
        self.store
            .add_reference(ReferenceType::Outbox, &self.config.service_iri, &activity.id)
            .await?;

        let recipients = self.resolve_recipients(&activity).await?;

        if activity.kind == ActivityKind::Offer {
            self.seed_witnesses(&activity, &recipients).await?;
        }

        debug!(
            activity_id = %activity.id,
            kind = %activity.kind,
            recipients = recipients.len(),
            "Activity posted"
        );

        for recipient in recipients {
            let instruction = DeliveryInstruction {
                activity_id: activity.id.clone(),
                recipient,
                attempt: 0,
            };
            self.publish_instruction(&instruction).await?;
        }

        Ok(activity.id)
    }

    /// Expand `to`/`cc` into concrete recipient IRIs, resolving the service
    /// followers collection through its reference index, deduplicated.
    async fn resolve_recipients(&self, activity: &Activity) -> AppResult<Vec<Url>> {
        let followers_iri = self.iris.followers()?;
        let mut seen = HashSet::new();
        let mut recipients = Vec::new();

        for addressed in activity.to.iter().chain(activity.cc.iter()) {
            if addressed == &self.config.service_iri {
                continue;
            }

            if addressed == &followers_iri {
                let followers = self
                    .store
                    .query_references(
                        ReferenceType::Follower,
                        &Criteria::for_index(
                            ReferenceType::Follower,
                            self.config.service_iri.clone(),
                        ),
                        QueryOptions::all(SortOrder::Ascending),
                    )
                    .await?;

                for follower in followers {
                    if follower != self.config.service_iri
                        && seen.insert(follower.as_str().to_string())
                    {
                        recipients.push(follower);
                    }
                }
            } else if seen.insert(addressed.as_str().to_string()) {
                recipients.push(addressed.clone());
            }
        }

        Ok(recipients)
    }

    /// Record a pending witness entry per recipient of an Offer.
    async fn seed_witnesses(&self, activity: &Activity, recipients: &[Url]) -> AppResult<()> {
        let Some(vc_id) = activity.object_id() else {
            return Err(AppError::Invalid(
                "Offer carries no identifiable anchor credential".to_string(),
            ));
        };

        let pending: Vec<WitnessProof> = recipients
            .iter()
            .map(|witness| WitnessProof::pending(WitnessKind::Batch, witness.clone()))
            .collect();
        self.witness_store.put(vc_id.as_str(), pending).await?;

        for witness in recipients {
            self.store
                .add_reference(ReferenceType::Witness, &self.config.service_iri, witness)
                .await?;
        }

        Ok(())
    }

    async fn publish_instruction(&self, instruction: &DeliveryInstruction) -> AppResult<()> {
        let payload = serde_json::to_vec(instruction)
            .map_err(|e| AppError::Internal(format!("encoding delivery instruction: {e}")))?;
        let topic = partition_topic(self.partition_of(&instruction.recipient));

        self.pubsub
            .publish(&topic, vec![Message::new(payload)])
            .await
            .map_err(|e| match e {
                AppError::Closed(name) => AppError::ShuttingDown(name),
                other => other,
            })
    }

    fn partition_of(&self, recipient: &Url) -> usize {
        let mut hasher = DefaultHasher::new();
        recipient.as_str().hash(&mut hasher);
        (hasher.finish() as usize) % self.config.workers.max(1)
    }

    /// Drains one delivery partition: load, sign, POST, ack on 2xx.
    async fn delivery_worker(&self, mut rx: tokio::sync::mpsc::Receiver<Message>) {
        while let Some(message) = rx.recv().await {
            let instruction: DeliveryInstruction = match serde_json::from_slice(&message.payload)
            {
                Ok(i) => i,
                Err(e) => {
                    error!(error = %e, "Dropping malformed delivery instruction");
                    message.ack();
                    continue;
                }
            };

            match self.deliver(&instruction).await {
                Ok(()) => {
                    debug!(
                        activity_id = %instruction.activity_id,
                        recipient = %instruction.recipient,
                        attempt = instruction.attempt,
                        "Activity delivered"
                    );
                    message.ack();
                }
                Err(e) => {
                    warn!(
                        activity_id = %instruction.activity_id,
                        recipient = %instruction.recipient,
                        attempt = instruction.attempt,
                        error = %e,
                        "Delivery failed"
                    );
                    message.nack();
                }
            }
        }
    }

    async fn deliver(&self, instruction: &DeliveryInstruction) -> AppResult<()> {
        let activity = self.store.get_activity(&instruction.activity_id).await?;
        let body = serde_json::to_vec(&activity)
            .map_err(|e| AppError::Internal(format!("encoding activity: {e}")))?;
        let inbox = ServiceIris::inbox_of(&instruction.recipient)?;

        let response = self.transport.post(&inbox, &body).await?;
        if response.is_success() {
            Ok(())
        } else {
            Err(AppError::Transient(format!(
                "recipient [{inbox}] returned status {}",
                response.status
            )))
        }
    }

    /// Drains the undeliverable sideband: re-publish with backoff while the
    /// retry budget lasts, then escalate to the undeliverable handler.
    async fn redelivery_worker(self: &Arc<Self>, mut rx: tokio::sync::mpsc::Receiver<Message>) {
        while let Some(message) = rx.recv().await {
            let source = message
                .metadata
                .get(METADATA_SOURCE_TOPIC)
                .map_or("", String::as_str);
            if !source.starts_with(PARTITION_TOPIC_PREFIX) {
                warn!(source_topic = source, "Unexpected undeliverable message");
                continue;
            }

            let instruction: DeliveryInstruction = match serde_json::from_slice(&message.payload)
            {
                Ok(i) => i,
                Err(e) => {
                    error!(error = %e, "Dropping malformed undeliverable instruction");
                    continue;
                }
            };

            let attempts_made = instruction.attempt + 1;
            if self.config.retry.should_retry(attempts_made) {
                let delay = self.config.retry.backoff(instruction.attempt);
                debug!(
                    activity_id = %instruction.activity_id,
                    recipient = %instruction.recipient,
                    attempts_made,
                    delay_ms = delay.as_millis() as u64,
                    "Scheduling redelivery"
                );

                let outbox = Arc::clone(self);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let next = DeliveryInstruction {
                        attempt: attempts_made,
                        ..instruction
                    };
                    if let Err(e) = outbox.publish_instruction(&next).await {
                        debug!(error = %e, "Redelivery publish refused");
                    }
                });
            } else {
                match self.store.get_activity(&instruction.activity_id).await {
                    Ok(activity) => {
                        self.undeliverable
                            .undeliverable(&activity, &instruction.recipient)
                            .await;
                    }
                    Err(e) => {
                        error!(
                            activity_id = %instruction.activity_id,
                            error = %e,
                            "Undeliverable activity no longer in store"
                        );
                    }
                }
            }
        }
    }
}

const PARTITION_TOPIC_PREFIX: &str = "deliver-";

fn partition_topic(partition: usize) -> String {
    format!("{PARTITION_TOPIC_PREFIX}{partition}")
}
