//! Wires the federation pipelines into one service.

use std::sync::Arc;
use std::time::Duration;

use anchornet_common::{AppConfig, AppResult, Lifecycle};
use anchornet_queue::{MemPubSub, MemPubSubConfig, RetryConfig};
use anchornet_store::{Activity, ActivityStore, AnchorCredentialStore, Credential, WitnessStore};
use axum::Router;
use axum::routing::{get, post};
use tokio::sync::{broadcast, mpsc};
use tracing::info;
use url::Url;

use crate::collections::{
    CollectionState, activity_resource, inbox_collection, liked_collection, likes_collection,
    outbox_collection, shares_collection,
};
use crate::handler::{FollowPolicy, HandlerConfig, InboxActivityHandler};
use crate::inbox::{Inbox, InboxConfig, inbox_http_handler};
use crate::outbox::{Outbox, OutboxConfig, UndeliverableHandler};
use crate::transport::Transport;
use crate::verifier::SignatureVerifier;
use crate::witness::{CredentialWitness, MonitoringService, WitnessPolicy, WitnessProofHandler};

/// Federation service configuration.
#[derive(Clone)]
pub struct ServiceConfig {
    /// Mount path of the service, e.g. `/services/anchor`.
    pub service_endpoint: String,
    /// This service's IRI.
    pub service_iri: Url,
    /// Reject requests whose signer differs from the activity actor.
    pub verify_actor_in_signature: bool,
    /// Collection page size.
    pub page_size: usize,
    /// Inbox dispatcher pool size.
    pub inbox_workers: usize,
    /// Outbox delivery pool size.
    pub delivery_workers: usize,
    /// Fabric ack timeout.
    pub ack_timeout: Duration,
    /// Default witness window length.
    pub max_witness_delay: Duration,
    /// Redelivery policy.
    pub retry: RetryConfig,
}

impl ServiceConfig {
    /// Derive the service configuration from the node configuration.
    pub fn from_app_config(config: &AppConfig) -> AppResult<Self> {
        let endpoint = format!("/{}", config.federation.service_endpoint.trim_matches('/'));
        let service_iri = Url::parse(&format!(
            "{}{endpoint}",
            config.server.url.trim_end_matches('/')
        ))?;

        Ok(Self {
            service_endpoint: endpoint,
            service_iri,
            verify_actor_in_signature: config.federation.verify_actor_in_signature,
            page_size: config.federation.page_size,
            inbox_workers: config.federation.inbox_workers,
            delivery_workers: config.federation.delivery_workers,
            ack_timeout: config.federation.ack_timeout(),
            max_witness_delay: config.federation.max_witness_delay(),
            retry: RetryConfig::from(&config.retry),
        })
    }
}

/// The external collaborators a service is wired to.
pub struct Collaborators {
    /// Signed HTTP transport.
    pub transport: Arc<dyn Transport>,
    /// Inbound signature verifier.
    pub verifier: Arc<dyn SignatureVerifier>,
    /// Ledger monitoring service.
    pub monitoring: Arc<dyn MonitoringService>,
    /// Witness record store.
    pub witness_store: Arc<dyn WitnessStore>,
    /// Anchor credential store.
    pub vc_store: Arc<dyn AnchorCredentialStore>,
    /// Witness quorum policy.
    pub witness_policy: Arc<dyn WitnessPolicy>,
    /// Proof producer, present when this node acts as a witness.
    pub witness: Option<Arc<dyn CredentialWitness>>,
    /// Follow acceptance policy.
    pub follow_policy: Arc<dyn FollowPolicy>,
    /// Receives activities whose delivery budget is exhausted.
    pub undeliverable: Arc<dyn UndeliverableHandler>,
    /// Downstream channel for fully witnessed credentials.
    pub vc_tx: mpsc::Sender<Credential>,
}

/// A federation node service: inbox, outbox and the activity handlers over
/// one activity store.
pub struct FederationService {
    lifecycle: Lifecycle,
    config: ServiceConfig,
    inbox: Arc<Inbox>,
    outbox: Arc<Outbox>,
    handler: Arc<InboxActivityHandler>,
    collections: CollectionState,
}

impl FederationService {
    /// Wire a service over the given store and collaborators.
    #[must_use]
    pub fn new(
        config: ServiceConfig,
        store: Arc<dyn ActivityStore>,
        collaborators: Collaborators,
    ) -> Arc<Self> {
        let fabric_config = MemPubSubConfig {
            ack_timeout: config.ack_timeout,
            ..MemPubSubConfig::default()
        };

        let outbox = Outbox::new(
            OutboxConfig {
                service_name: format!("{}/outbox", config.service_endpoint),
                service_iri: config.service_iri.clone(),
                workers: config.delivery_workers,
                retry: config.retry.clone(),
            },
            Arc::clone(&store),
            Arc::new(MemPubSub::new(
                format!("{}/outbox", config.service_endpoint),
                fabric_config.clone(),
            )),
            Arc::clone(&collaborators.transport),
            collaborators.undeliverable,
            Arc::clone(&collaborators.witness_store),
        );

        let proof_handler = Arc::new(WitnessProofHandler::new(
            collaborators.monitoring,
            collaborators.vc_store,
            collaborators.witness_store,
            collaborators.witness_policy,
            collaborators.vc_tx,
        ));

        let handler = Arc::new(InboxActivityHandler::new(
            HandlerConfig {
                service_iri: config.service_iri.clone(),
                max_witness_delay: config.max_witness_delay,
                buffer_size: 100,
            },
            Arc::clone(&store),
            Arc::clone(&outbox),
            Arc::clone(&collaborators.transport),
            collaborators.follow_policy,
            proof_handler,
            collaborators.witness,
        ));

        let inbox = Inbox::new(
            InboxConfig {
                service_name: format!("{}/inbox", config.service_endpoint),
                service_iri: config.service_iri.clone(),
                inbox_path: format!("{}/inbox", config.service_endpoint),
                verify_actor_in_signature: config.verify_actor_in_signature,
                workers: config.inbox_workers,
            },
            Arc::clone(&store),
            Arc::new(MemPubSub::new(
                format!("{}/inbox", config.service_endpoint),
                fabric_config,
            )),
            Arc::clone(&handler) as Arc<dyn crate::handler::ActivityHandler>,
            Arc::clone(&collaborators.verifier),
        );

        let collections = CollectionState {
            store,
            verifier: collaborators.verifier,
            service_iri: config.service_iri.clone(),
            page_size: config.page_size,
        };

        Arc::new(Self {
            lifecycle: Lifecycle::new(config.service_endpoint.clone()),
            config,
            inbox,
            outbox,
            handler,
            collections,
        })
    }

    /// Start the pipelines: delivery first, so handlers can reply as soon as
    /// dispatch begins.
    pub async fn start(&self) -> AppResult<()> {
        self.lifecycle.starting()?;
        self.outbox.start().await?;
        self.inbox.start().await?;
        self.lifecycle.started()?;

        info!(service = %self.config.service_iri, "Federation service started");

        Ok(())
    }

    /// Quiesce: close inbox subscriptions and drain dispatch, then stop the
    /// delivery workers.
    pub async fn stop(&self) -> AppResult<()> {
        self.lifecycle.stopping()?;
        self.inbox.stop().await?;
        self.outbox.stop().await?;
        self.lifecycle.stopped()?;

        info!(service = %self.config.service_iri, "Federation service stopped");

        Ok(())
    }

    /// The outbox, for posting local activities.
    #[must_use]
    pub fn outbox(&self) -> Arc<Outbox> {
        Arc::clone(&self.outbox)
    }

    /// The inbox, for registering with an HTTP server.
    #[must_use]
    pub fn inbox(&self) -> Arc<Inbox> {
        Arc::clone(&self.inbox)
    }

    /// This service's IRI.
    #[must_use]
    pub const fn service_iri(&self) -> &Url {
        &self.config.service_iri
    }

    /// Receive activities as the inbox handles them.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Activity> {
        self.handler.subscribe()
    }

    /// The HTTP surface: inbox POST, collection GETs, activity GET.
    #[must_use]
    pub fn router(&self) -> Router {
        let endpoint = &self.config.service_endpoint;

        Router::new()
            .route(
                &format!("{endpoint}/inbox"),
                post(inbox_http_handler).with_state(Arc::clone(&self.inbox)),
            )
            .route(
                &format!("{endpoint}/inbox"),
                get(inbox_collection).with_state(self.collections.clone()),
            )
            .route(
                &format!("{endpoint}/outbox"),
                get(outbox_collection).with_state(self.collections.clone()),
            )
            .route(
                &format!("{endpoint}/liked"),
                get(liked_collection).with_state(self.collections.clone()),
            )
            .route(
                &format!("{endpoint}/shares"),
                get(shares_collection).with_state(self.collections.clone()),
            )
            .route(
                &format!("{endpoint}/likes"),
                get(likes_collection).with_state(self.collections.clone()),
            )
            .route(
                &format!("{endpoint}/activities/{{id}}"),
                get(activity_resource).with_state(self.collections.clone()),
            )
    }
}
