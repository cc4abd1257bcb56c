//! Witness-proof coordination for anchor credentials.
//!
//! Proofs arrive from remote witnesses through the inbox (a Like carrying a
//! linked-data proof in its `result`). The coordinator registers the
//! monitoring watch, persists the proof against `(vcID, witnessIRI)`, and
//! once the quorum policy is satisfied appends each collected proof to the
//! credential and releases it downstream exactly once.

use std::sync::Arc;

use anchornet_common::{AppError, AppResult};
use anchornet_store::{AnchorCredentialStore, Credential, WitnessProof, WitnessStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use url::Url;

/// External monitoring service that observes ledgers for credential
/// inclusion within the witness window.
#[async_trait]
pub trait MonitoringService: Send + Sync {
    /// Register a watch that expires at `end_time`.
    async fn watch(&self, vc_id: &str, end_time: DateTime<Utc>, proof: &[u8]) -> AppResult<()>;
}

/// Monitoring stub that only logs; deployments wire the real observer in.
pub struct LoggingMonitoringService;

#[async_trait]
impl MonitoringService for LoggingMonitoringService {
    async fn watch(&self, vc_id: &str, end_time: DateTime<Utc>, _proof: &[u8]) -> AppResult<()> {
        debug!(vc_id, end_time = %end_time, "Watch registered");
        Ok(())
    }
}

/// Produces a witness proof over an anchor credential. Implemented by the
/// external linked-data-proof signer when this node acts as a witness.
#[async_trait]
pub trait CredentialWitness: Send + Sync {
    /// Attest to the credential, returning the proof document.
    async fn witness(&self, credential: &Value) -> AppResult<Value>;
}

/// Decides when a credential has gathered enough witness proofs.
pub trait WitnessPolicy: Send + Sync {
    /// Whether the collected proofs satisfy the policy.
    fn ready(&self, credential: &Credential, proofs: &[WitnessProof]) -> bool;
}

/// Quorum by count: ready once `n` witnesses have responded.
pub struct MinWitnessProofs(pub usize);

impl WitnessPolicy for MinWitnessProofs {
    fn ready(&self, _credential: &Credential, proofs: &[WitnessProof]) -> bool {
        proofs.iter().filter(|p| !p.is_pending()).count() >= self.0
    }
}

/// A witness proof document: a linked-data proof under its own context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofDocument {
    /// JSON-LD context of the proof.
    #[serde(rename = "@context", default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    /// The linked-data proof itself.
    pub proof: Value,
}

/// Collects witness proofs per anchor credential and releases completed
/// credentials downstream.
pub struct WitnessProofHandler {
    monitoring: Arc<dyn MonitoringService>,
    vc_store: Arc<dyn AnchorCredentialStore>,
    witness_store: Arc<dyn WitnessStore>,
    policy: Arc<dyn WitnessPolicy>,
    vc_tx: mpsc::Sender<Credential>,
}

impl WitnessProofHandler {
    /// Create a coordinator publishing completed credentials on `vc_tx`.
    #[must_use]
    pub fn new(
        monitoring: Arc<dyn MonitoringService>,
        vc_store: Arc<dyn AnchorCredentialStore>,
        witness_store: Arc<dyn WitnessStore>,
        policy: Arc<dyn WitnessPolicy>,
        vc_tx: mpsc::Sender<Credential>,
    ) -> Self {
        Self {
            monitoring,
            vc_store,
            witness_store,
            policy,
            vc_tx,
        }
    }

    /// Ingest one witness's proof for a credential.
    ///
    /// Idempotent on `(vc_id, witness)`: a duplicate proof overwrites the
    /// earlier one without multiplying entries, and a credential that
    /// already satisfies the policy is left untouched.
    pub async fn handle_proof(
        &self,
        witness: &Url,
        vc_id: &str,
        _start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        proof: &[u8],
    ) -> AppResult<()> {
        debug!(vc_id, witness = %witness, "Received witness proof");

        self.monitoring.watch(vc_id, end_time, proof).await?;

        serde_json::from_slice::<ProofDocument>(proof)
            .map_err(|e| AppError::Invalid(format!("malformed witness proof: {e}")))?;

        let mut credential = self.vc_store.get(vc_id).await?;

        let recorded = self.witness_store.get(vc_id).await?;
        if self.policy.ready(&credential, &recorded) {
            debug!(vc_id, "Credential already witnessed, nothing to do");
            return Ok(());
        }

        self.witness_store
            .add_proof(vc_id, witness, proof.to_vec())
            .await?;

        let recorded = self.witness_store.get(vc_id).await?;
        if !self.policy.ready(&credential, &recorded) {
            debug!(
                vc_id,
                collected = recorded.iter().filter(|p| !p.is_pending()).count(),
                "Waiting for more witness proofs"
            );
            return Ok(());
        }

        for record in recorded.iter().filter(|p| !p.is_pending()) {
            let bytes = record.proof.as_deref().unwrap_or_default();
            match serde_json::from_slice::<ProofDocument>(bytes) {
                Ok(doc) => credential.proofs.push(doc.proof),
                Err(e) => {
                    warn!(vc_id, witness = %record.witness, error = %e, "Skipping unparseable stored proof");
                }
            }
        }

        self.vc_tx
            .send(credential)
            .await
            .map_err(|e| AppError::Internal(format!("publishing witnessed credential: {e}")))?;

        debug!(vc_id, "Witnessed credential released downstream");

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use anchornet_store::{
        MemoryAnchorCredentialStore, MemoryWitnessStore, WitnessKind,
    };
    use parking_lot::Mutex;
    use serde_json::json;

    struct RecordingMonitor {
        watches: Mutex<Vec<(String, DateTime<Utc>)>>,
    }

    #[async_trait]
    impl MonitoringService for RecordingMonitor {
        async fn watch(
            &self,
            vc_id: &str,
            end_time: DateTime<Utc>,
            _proof: &[u8],
        ) -> AppResult<()> {
            self.watches.lock().push((vc_id.to_string(), end_time));
            Ok(())
        }
    }

    fn witness(n: usize) -> Url {
        Url::parse(&format!("https://witness{n}.example/services/anchor")).unwrap()
    }

    fn proof_bytes(n: usize) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "@context": ["https://w3id.org/security/v1"],
            "proof": {
                "type": "Ed25519Signature2018",
                "proofPurpose": "assertionMethod",
                "domain": format!("https://witness{n}.example"),
            }
        }))
        .unwrap()
    }

    fn credential(vc_id: &str) -> Credential {
        serde_json::from_value(json!({
            "id": vc_id,
            "type": ["VerifiableCredential", "AnchorCredential"],
            "proof": {"type": "Ed25519Signature2018", "proofPurpose": "assertionMethod"},
        }))
        .unwrap()
    }

    struct Fixture {
        handler: WitnessProofHandler,
        witness_store: Arc<MemoryWitnessStore>,
        monitor: Arc<RecordingMonitor>,
        vc_rx: mpsc::Receiver<Credential>,
    }

    async fn fixture(vc_id: &str, witnesses: usize, quorum: usize) -> Fixture {
        let vc_store = Arc::new(MemoryAnchorCredentialStore::new());
        vc_store.put(credential(vc_id));

        let witness_store = Arc::new(MemoryWitnessStore::new());
        for n in 0..witnesses {
            witness_store
                .put(
                    vc_id,
                    vec![WitnessProof::pending(WitnessKind::Batch, witness(n))],
                )
                .await
                .unwrap();
        }

        let monitor = Arc::new(RecordingMonitor {
            watches: Mutex::new(Vec::new()),
        });
        let (vc_tx, vc_rx) = mpsc::channel(8);

        Fixture {
            handler: WitnessProofHandler::new(
                Arc::clone(&monitor) as Arc<dyn MonitoringService>,
                vc_store,
                Arc::clone(&witness_store) as Arc<dyn WitnessStore>,
                Arc::new(MinWitnessProofs(quorum)),
                vc_tx,
            ),
            witness_store,
            monitor,
            vc_rx,
        }
    }

    #[tokio::test]
    async fn test_single_proof_releases_credential() {
        let mut fx = fixture("vc1", 1, 1).await;
        let end = Utc::now() + chrono::Duration::minutes(5);

        fx.handler
            .handle_proof(&witness(0), "vc1", Utc::now(), end, &proof_bytes(0))
            .await
            .unwrap();

        let released = fx.vc_rx.recv().await.unwrap();
        // Issuer proof plus the witness proof, each exactly once.
        assert_eq!(released.proofs.len(), 2);
        assert_eq!(fx.monitor.watches.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_proof_is_collapsed() {
        let mut fx = fixture("vc1", 1, 1).await;
        let end = Utc::now() + chrono::Duration::minutes(5);

        fx.handler
            .handle_proof(&witness(0), "vc1", Utc::now(), end, &proof_bytes(0))
            .await
            .unwrap();
        fx.handler
            .handle_proof(&witness(0), "vc1", Utc::now(), end, &proof_bytes(0))
            .await
            .unwrap();

        // Released once, and the witness store still holds one record.
        assert!(fx.vc_rx.recv().await.is_some());
        assert!(fx.vc_rx.try_recv().is_err());
        assert_eq!(fx.witness_store.get("vc1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_quorum_waits_for_all_witnesses() {
        let mut fx = fixture("vc1", 2, 2).await;
        let end = Utc::now() + chrono::Duration::minutes(5);

        fx.handler
            .handle_proof(&witness(0), "vc1", Utc::now(), end, &proof_bytes(0))
            .await
            .unwrap();
        assert!(fx.vc_rx.try_recv().is_err());

        fx.handler
            .handle_proof(&witness(1), "vc1", Utc::now(), end, &proof_bytes(1))
            .await
            .unwrap();

        let released = fx.vc_rx.recv().await.unwrap();
        // Issuer proof plus one proof per witness.
        assert_eq!(released.proofs.len(), 3);
    }

    #[tokio::test]
    async fn test_malformed_proof_is_rejected() {
        let fx = fixture("vc1", 1, 1).await;
        let end = Utc::now() + chrono::Duration::minutes(5);

        let err = fx
            .handler
            .handle_proof(&witness(0), "vc1", Utc::now(), end, b"not-json")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_unknown_credential_fails() {
        let fx = fixture("vc1", 1, 1).await;
        let end = Utc::now() + chrono::Duration::minutes(5);

        let err = fx
            .handler
            .handle_proof(&witness(0), "vc-unknown", Utc::now(), end, &proof_bytes(0))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
