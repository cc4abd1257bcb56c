//! Witness records for pending anchor credentials.
//!
//! A record is created when an Offer is dispatched to a witness and completed
//! when that witness responds with a proof. A record with no proof bytes is
//! pending.

use std::collections::HashMap;

use anchornet_common::{AppError, AppResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use url::Url;

/// What the witness attests to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WitnessKind {
    /// Witness over an operation batch.
    Batch,
    /// System-level witness.
    System,
}

/// One witness's record for an anchor credential.
#[derive(Debug, Clone)]
pub struct WitnessProof {
    /// Attestation kind.
    pub kind: WitnessKind,
    /// The witness service IRI.
    pub witness: Url,
    /// Raw proof bytes; empty until the witness responds.
    pub proof: Option<Vec<u8>>,
    /// When the record was created.
    pub added_at: DateTime<Utc>,
}

impl WitnessProof {
    /// A freshly seeded, pending record.
    #[must_use]
    pub fn pending(kind: WitnessKind, witness: Url) -> Self {
        Self {
            kind,
            witness,
            proof: None,
            added_at: Utc::now(),
        }
    }

    /// Whether the witness has not yet responded.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.proof.is_none()
    }
}

/// Stores witness records per anchor credential.
#[async_trait]
pub trait WitnessStore: Send + Sync {
    /// Seed records for a credential. Witnesses already recorded for the
    /// credential are left untouched.
    async fn put(&self, vc_id: &str, witnesses: Vec<WitnessProof>) -> AppResult<()>;

    /// All records for a credential; `NotFound` when none were seeded.
    async fn get(&self, vc_id: &str) -> AppResult<Vec<WitnessProof>>;

    /// Attach proof bytes to the `(vc_id, witness)` record, last writer wins.
    /// `NotFound` when no record exists for that witness.
    async fn add_proof(&self, vc_id: &str, witness: &Url, proof: Vec<u8>) -> AppResult<()>;
}

/// In-memory [`WitnessStore`].
#[derive(Default)]
pub struct MemoryWitnessStore {
    records: RwLock<HashMap<String, Vec<WitnessProof>>>,
}

impl MemoryWitnessStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WitnessStore for MemoryWitnessStore {
    async fn put(&self, vc_id: &str, witnesses: Vec<WitnessProof>) -> AppResult<()> {
        let mut records = self.records.write();
        let entry = records.entry(vc_id.to_string()).or_default();

        for witness in witnesses {
            if !entry.iter().any(|w| w.witness == witness.witness) {
                entry.push(witness);
            }
        }

        Ok(())
    }

    async fn get(&self, vc_id: &str) -> AppResult<Vec<WitnessProof>> {
        self.records
            .read()
            .get(vc_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("witnesses for credential [{vc_id}]")))
    }

    async fn add_proof(&self, vc_id: &str, witness: &Url, proof: Vec<u8>) -> AppResult<()> {
        let mut records = self.records.write();
        let entry = records
            .get_mut(vc_id)
            .ok_or_else(|| AppError::NotFound(format!("witnesses for credential [{vc_id}]")))?;

        let record = entry.iter_mut().find(|w| &w.witness == witness).ok_or_else(|| {
            AppError::NotFound(format!("witness [{witness}] for credential [{vc_id}]"))
        })?;

        record.proof = Some(proof);

        Ok(())
    }
}
