//! Federation messaging core for anchornet.
//!
//! The inbox pipeline authenticates and ingests activities from peers, the
//! outbox pipeline delivers local activities with retry, per-kind handlers
//! apply the cross-peer state transitions, and the witness-proof coordinator
//! couples inbox events back into the anchor-credential lifecycle.

pub mod collections;
pub mod handler;
pub mod inbox;
pub mod outbox;
pub mod service;
pub mod transport;
pub mod verifier;
pub mod witness;

pub use collections::{
    CollectionQuery, CollectionState, OrderedCollection, OrderedCollectionPage,
};
pub use handler::{
    AcceptAllFollowPolicy, ActivityHandler, FollowPolicy, HandlerConfig, InboxActivityHandler,
};
pub use inbox::{ACTIVITIES_TOPIC, Inbox, InboxConfig, inbox_http_handler};
pub use outbox::{LoggingUndeliverableHandler, Outbox, OutboxConfig, UndeliverableHandler};
pub use service::{Collaborators, FederationService, ServiceConfig};
pub use transport::{ACTIVITY_CONTENT_TYPE, HttpTransport, Transport, TransportResponse};
pub use verifier::{HttpSignatureVerifier, InboundRequest, SignatureVerifier};
pub use witness::{
    CredentialWitness, LoggingMonitoringService, MinWitnessProofs, MonitoringService,
    ProofDocument, WitnessPolicy, WitnessProofHandler,
};
