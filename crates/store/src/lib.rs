//! Activity store, reference indexes and witness records for anchornet.
//!
//! The storage backend proper (a KV store in production) sits behind the
//! traits in this crate; the in-memory implementations back tests and
//! single-node deployments.

pub mod activity;
pub mod credential;
pub mod memory;
pub mod query;
pub mod store;
pub mod witness;

pub use activity::{Activity, ActivityKind, CONTEXT_ACTIVITY_STREAMS, ObjectProperty};
pub use credential::{
    ANCHOR_CREDENTIAL_TYPE, AnchorCredentialStore, Credential, MemoryAnchorCredentialStore,
    is_anchor_credential,
};
pub use memory::MemoryActivityStore;
pub use query::{Criteria, QueryOptions, ReferenceType, SortOrder, last_page_num, page_window};
pub use store::{ActivityCursor, ActivityStore, ReferenceCursor};
pub use witness::{MemoryWitnessStore, WitnessKind, WitnessProof, WitnessStore};
