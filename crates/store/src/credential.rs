//! Anchor credentials and the store they are resolved from.

use std::collections::HashMap;

use anchornet_common::{AppError, AppResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::activity::one_or_many;

/// A verifiable credential anchoring a batch of DID operations.
///
/// Only the fields the federation core interprets are parsed; everything else
/// rides along in `additional` and is preserved on re-emit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    /// JSON-LD context.
    #[serde(rename = "@context", default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    /// Credential ID.
    pub id: String,
    /// Credential types.
    #[serde(
        rename = "type",
        default,
        deserialize_with = "one_or_many::deserialize",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub kinds: Vec<String>,
    /// Linked-data proofs: the issuer's assertion plus any witness proofs
    /// appended by the coordinator.
    #[serde(
        rename = "proof",
        default,
        deserialize_with = "one_or_many::deserialize",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub proofs: Vec<Value>,
    /// Uninterpreted fields.
    #[serde(flatten)]
    pub additional: Map<String, Value>,
}

/// Type tag identifying an anchor credential.
pub const ANCHOR_CREDENTIAL_TYPE: &str = "AnchorCredential";

impl Credential {
    /// Whether the credential carries the anchor-credential type.
    #[must_use]
    pub fn is_anchor_credential(&self) -> bool {
        self.kinds.iter().any(|k| k == ANCHOR_CREDENTIAL_TYPE)
    }
}

/// Whether a raw JSON object carries the anchor-credential type.
#[must_use]
pub fn is_anchor_credential(value: &Value) -> bool {
    match value.get("type") {
        Some(Value::String(s)) => s == ANCHOR_CREDENTIAL_TYPE,
        Some(Value::Array(kinds)) => kinds
            .iter()
            .any(|k| k.as_str() == Some(ANCHOR_CREDENTIAL_TYPE)),
        _ => false,
    }
}

/// Resolves anchor credentials by ID.
#[async_trait]
pub trait AnchorCredentialStore: Send + Sync {
    /// Fetch a credential; `NotFound` when absent.
    async fn get(&self, vc_id: &str) -> AppResult<Credential>;
}

/// In-memory [`AnchorCredentialStore`].
#[derive(Default)]
pub struct MemoryAnchorCredentialStore {
    credentials: RwLock<HashMap<String, Credential>>,
}

impl MemoryAnchorCredentialStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a credential under its ID.
    pub fn put(&self, credential: Credential) {
        self.credentials
            .write()
            .insert(credential.id.clone(), credential);
    }
}

#[async_trait]
impl AnchorCredentialStore for MemoryAnchorCredentialStore {
    async fn get(&self, vc_id: &str) -> AppResult<Credential> {
        self.credentials
            .read()
            .get(vc_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("anchor credential [{vc_id}]")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_credential_roundtrip_preserves_fields() {
        let input = json!({
            "@context": ["https://www.w3.org/2018/credentials/v1"],
            "id": "https://org1.example/vc/1",
            "type": ["VerifiableCredential", "AnchorCredential"],
            "credentialSubject": {"anchorString": "1.QmWvb"},
            "proof": {"type": "Ed25519Signature2018", "proofPurpose": "assertionMethod"},
        });

        let credential: Credential = serde_json::from_value(input.clone()).unwrap();
        assert!(credential.is_anchor_credential());
        assert_eq!(credential.proofs.len(), 1);

        let out = serde_json::to_value(&credential).unwrap();
        assert_eq!(out["credentialSubject"], input["credentialSubject"]);
    }

    #[test]
    fn test_is_anchor_credential_on_raw_json() {
        assert!(is_anchor_credential(&json!({"type": "AnchorCredential"})));
        assert!(is_anchor_credential(
            &json!({"type": ["VerifiableCredential", "AnchorCredential"]})
        ));
        assert!(!is_anchor_credential(&json!({"type": "Note"})));
        assert!(!is_anchor_credential(&json!({})));
    }

    #[tokio::test]
    async fn test_memory_store_get() {
        let store = MemoryAnchorCredentialStore::new();
        store.put(Credential {
            context: None,
            id: "vc1".to_string(),
            kinds: vec![ANCHOR_CREDENTIAL_TYPE.to_string()],
            proofs: Vec::new(),
            additional: Map::new(),
        });

        assert!(store.get("vc1").await.is_ok());
        assert!(matches!(
            store.get("vc2").await,
            Err(AppError::NotFound(_))
        ));
    }
}
