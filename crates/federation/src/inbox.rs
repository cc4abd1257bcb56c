//! Inbox pipeline: authenticated intake, durable ingest, dispatch.
//!
//! The HTTP handler verifies the request signature, persists the activity,
//! appends it to the service Inbox index and publishes its ID on the
//! `activities` topic; the 200 response acknowledges durability only.
//! A dispatcher pool drains the topic and invokes the typed activity
//! handler with at-least-once semantics.

use std::sync::Arc;

use anchornet_common::{AppError, AppResult, Lifecycle};
use anchornet_queue::{Message, PubSub, UNDELIVERABLE_TOPIC};
use anchornet_store::{Activity, ActivityStore, ReferenceType};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::handler::ActivityHandler;
use crate::verifier::{InboundRequest, SignatureVerifier};

/// Topic the inbox publishes ingested activity IDs on.
pub const ACTIVITIES_TOPIC: &str = "activities";

/// Inbox configuration.
#[derive(Clone)]
pub struct InboxConfig {
    /// Component name for logs and lifecycle errors.
    pub service_name: String,
    /// This service's IRI.
    pub service_iri: Url,
    /// Request path of the inbox endpoint, as signed in `(request-target)`.
    pub inbox_path: String,
    /// Reject requests whose signer differs from the activity's actor.
    pub verify_actor_in_signature: bool,
    /// Dispatcher worker count.
    pub workers: usize,
}

/// The inbox pipeline.
pub struct Inbox {
    lifecycle: Lifecycle,
    config: InboxConfig,
    store: Arc<dyn ActivityStore>,
    pubsub: Arc<dyn PubSub>,
    handler: Arc<dyn ActivityHandler>,
    verifier: Arc<dyn SignatureVerifier>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Inbox {
    /// Create an inbox over its own pubsub fabric instance.
    #[must_use]
    pub fn new(
        config: InboxConfig,
        store: Arc<dyn ActivityStore>,
        pubsub: Arc<dyn PubSub>,
        handler: Arc<dyn ActivityHandler>,
        verifier: Arc<dyn SignatureVerifier>,
    ) -> Arc<Self> {
        Arc::new(Self {
            lifecycle: Lifecycle::new(config.service_name.clone()),
            config,
            store,
            pubsub,
            handler,
            verifier,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Start the dispatcher pool.
    pub async fn start(self: &Arc<Self>) -> AppResult<()> {
        self.lifecycle.starting()?;

        let mut tasks = Vec::new();
        for _ in 0..self.config.workers.max(1) {
            let rx = self.pubsub.subscribe(ACTIVITIES_TOPIC).await?;
            let inbox = Arc::clone(self);
            tasks.push(tokio::spawn(async move {
                inbox.dispatch_worker(rx).await;
            }));
        }

        let rx = self.pubsub.subscribe(UNDELIVERABLE_TOPIC).await?;
        tasks.push(tokio::spawn(async move {
            let mut rx = rx;
            while let Some(message) = rx.recv().await {
                warn!(
                    message_id = %message.id,
                    "Activity handling exhausted; message routed to undeliverable"
                );
            }
        }));

        self.tasks.lock().extend(tasks);
        self.lifecycle.started()?;

        info!(service = %self.config.service_name, workers = self.config.workers, "Inbox started");

        Ok(())
    }

    /// Stop intake, close subscriptions and drain in-flight dispatch.
    pub async fn stop(&self) -> AppResult<()> {
        self.lifecycle.stopping()?;

        if let Err(e) = self.pubsub.close().await {
            warn!(error = %e, "Closing inbox fabric");
        }

        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }

        self.lifecycle.stopped()?;

        info!(service = %self.config.service_name, "Inbox stopped");

        Ok(())
    }

    /// Process one inbound POST. The returned status is the HTTP response:
    /// 200 once the inbox entry is durable, 400 on a malformed body, 401
    /// when authentication fails, 5xx on transient faults.
    pub async fn handle_post(&self, request: InboundRequest) -> StatusCode {
        if let Err(e) = self.lifecycle.check_started() {
            return e.status_code();
        }

        let actor = match self.verifier.verify_request(&request).await {
            Ok(Some(actor)) => actor,
            Ok(None) => {
                info!(path = %request.path, "Inbox request not authenticated");
                return StatusCode::UNAUTHORIZED;
            }
            Err(e) => {
                warn!(error = %e, "Verifying inbox request signature");
                return e.status_code();
            }
        };

        let activity: Activity = match serde_json::from_slice(&request.body) {
            Ok(a) => a,
            Err(e) => {
                info!(error = %e, "Malformed inbox activity");
                return StatusCode::BAD_REQUEST;
            }
        };

        if self.config.verify_actor_in_signature && actor != activity.actor {
            info!(
                signer = %actor,
                actor = %activity.actor,
                "Request signer does not match activity actor"
            );
            return StatusCode::UNAUTHORIZED;
        }

        debug!(
            activity_id = %activity.id,
            kind = %activity.kind,
            actor = %activity.actor,
            "Activity received"
        );

        if let Err(e) = self.ingest(&activity).await {
            warn!(activity_id = %activity.id, error = %e, "Ingesting inbox activity");
            return e.status_code();
        }

        StatusCode::OK
    }

    /// Persist the activity, index it and enqueue it for dispatch.
    async fn ingest(&self, activity: &Activity) -> AppResult<()> {
        self.store.put_activity(activity).await?;
        self.store
            .add_reference(ReferenceType::Inbox, &self.config.service_iri, &activity.id)
            .await?;

        self.pubsub
            .publish(
                ACTIVITIES_TOPIC,
                vec![Message::new(activity.id.as_str().as_bytes().to_vec())],
            )
            .await
            .map_err(|e| match e {
                AppError::Closed(name) => AppError::ShuttingDown(name),
                other => other,
            })
    }

    /// Drains the activities topic and invokes the typed handler.
    async fn dispatch_worker(&self, mut rx: tokio::sync::mpsc::Receiver<Message>) {
        while let Some(message) = rx.recv().await {
            let id = match std::str::from_utf8(&message.payload)
                .map_err(|e| AppError::Invalid(e.to_string()))
                .and_then(|s| Url::parse(s).map_err(Into::into))
            {
                Ok(id) => id,
                Err(e) => {
                    warn!(error = %e, "Dropping malformed activity reference");
                    message.ack();
                    continue;
                }
            };

            let activity = match self.store.get_activity(&id).await {
                Ok(a) => a,
                Err(e) => {
                    warn!(activity_id = %id, error = %e, "Loading dispatched activity");
                    message.nack();
                    continue;
                }
            };

            match self.handler.handle(&activity).await {
                Ok(()) => {
                    debug!(activity_id = %id, kind = %activity.kind, "Activity handled");
                    message.ack();
                }
                Err(e) => {
                    warn!(
                        activity_id = %id,
                        kind = %activity.kind,
                        error = %e,
                        "Activity handler failed"
                    );
                    message.nack();
                }
            }
        }
    }
}

/// axum handler for `POST {service}/inbox`.
pub async fn inbox_http_handler(
    State(inbox): State<Arc<Inbox>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let request = InboundRequest::from_parts("POST", &inbox.config.inbox_path, &headers, &body);
    inbox.handle_post(request).await
}
