//! Inbound HTTP-signature verification.
//!
//! The verifier resolves the signer's public key by following the `keyId`
//! to the actor document and extracting `publicKey.publicKeyPem`, then
//! recomputes the signature base and compares. An `Err` is transient
//! (network or parse); `Ok(None)` is an authentication failure.

use std::collections::HashMap;
use std::sync::Arc;

use anchornet_common::{AppError, AppResult, HttpSignature, verify_digest, verify_signature};
use async_trait::async_trait;
use axum::http::HeaderMap;
use tracing::{debug, info};
use url::Url;

use crate::transport::Transport;

/// The pieces of an inbound request the verifier needs.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    /// HTTP method.
    pub method: String,
    /// Request path, as signed in `(request-target)`.
    pub path: String,
    /// Headers, lower-cased names.
    pub headers: HashMap<String, String>,
    /// Request body.
    pub body: Vec<u8>,
}

impl InboundRequest {
    /// Build from axum request parts.
    #[must_use]
    pub fn from_parts(method: &str, path: &str, headers: &HeaderMap, body: &[u8]) -> Self {
        let headers = headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_lowercase(), v.to_string()))
            })
            .collect();

        Self {
            method: method.to_string(),
            path: path.to_string(),
            headers,
            body: body.to_vec(),
        }
    }
}

/// Verifies the HTTP signature of an inbound request.
#[async_trait]
pub trait SignatureVerifier: Send + Sync {
    /// Returns the authenticated actor IRI, `None` when authentication
    /// fails, or a transient error.
    async fn verify_request(&self, request: &InboundRequest) -> AppResult<Option<Url>>;
}

/// [`SignatureVerifier`] that fetches the actor's published key over the
/// transport.
pub struct HttpSignatureVerifier {
    transport: Arc<dyn Transport>,
}

impl HttpSignatureVerifier {
    /// Create a verifier fetching keys over the given transport.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Resolve the actor IRI and public key PEM behind a `keyId`.
    async fn fetch_actor_key(&self, key_id: &str) -> AppResult<(Url, String)> {
        // keyId is typically `<actorIRI>#main-key`; the actor document lives
        // at the part before the fragment.
        let actor_iri = key_id.split('#').next().unwrap_or(key_id);
        let actor_url = Url::parse(actor_iri)
            .map_err(|e| AppError::Transient(format!("invalid keyId [{key_id}]: {e}")))?;

        let response = self.transport.get(&actor_url).await?;
        if !response.is_success() {
            return Err(AppError::Transient(format!(
                "fetching actor [{actor_url}] returned status {}",
                response.status
            )));
        }

        let doc: serde_json::Value = serde_json::from_slice(&response.body)
            .map_err(|e| AppError::Transient(format!("parsing actor [{actor_url}]: {e}")))?;

        let pem = doc
            .get("publicKey")
            .and_then(|pk| pk.get("publicKeyPem"))
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| {
                AppError::Transient(format!("actor [{actor_url}] has no publicKeyPem"))
            })?;

        Ok((actor_url, pem.to_string()))
    }
}

#[async_trait]
impl SignatureVerifier for HttpSignatureVerifier {
    async fn verify_request(&self, request: &InboundRequest) -> AppResult<Option<Url>> {
        let Some(header) = request.headers.get("signature") else {
            info!(path = %request.path, "Request carries no Signature header");
            return Ok(None);
        };

        let signature = match HttpSignature::parse(header) {
            Ok(sig) => sig,
            Err(e) => {
                info!(error = %e, "Malformed Signature header");
                return Ok(None);
            }
        };

        if let Some(digest) = request.headers.get("digest")
            && !verify_digest(&request.body, digest)
        {
            info!("Digest header does not match body");
            return Ok(None);
        }

        let (actor, pem) = self.fetch_actor_key(&signature.key_id).await?;

        let ok = match verify_signature(
            &signature,
            &pem,
            &request.method,
            &request.path,
            &request.headers,
        ) {
            Ok(ok) => ok,
            Err(e) => {
                info!(error = %e, "Signature verification failed on malformed input");
                return Ok(None);
            }
        };

        if ok {
            debug!(actor = %actor, "Request signature verified");
            Ok(Some(actor))
        } else {
            info!(key_id = %signature.key_id, "Invalid request signature");
            Ok(None)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::transport::TransportResponse;
    use anchornet_common::{RequestSigner, generate_rsa_keypair};
    use serde_json::json;

    struct ActorDocTransport {
        public_key_pem: String,
    }

    #[async_trait]
    impl Transport for ActorDocTransport {
        async fn post(&self, _url: &Url, _body: &[u8]) -> AppResult<TransportResponse> {
            Err(AppError::Transient("not routable".to_string()))
        }

        async fn get(&self, _url: &Url) -> AppResult<TransportResponse> {
            let doc = json!({
                "id": "https://org1.example/services/anchor",
                "type": "Service",
                "publicKey": {
                    "id": "https://org1.example/services/anchor#main-key",
                    "publicKeyPem": self.public_key_pem,
                }
            });
            Ok(TransportResponse {
                status: 200,
                body: serde_json::to_vec(&doc).unwrap(),
            })
        }
    }

    fn signed_request(signer: &RequestSigner, body: &[u8]) -> InboundRequest {
        let url = Url::parse("https://org2.example/services/anchor/inbox").unwrap();
        let headers: HashMap<String, String> = signer
            .sign("POST", &url, body)
            .unwrap()
            .into_iter()
            .map(|(k, v)| (k.to_lowercase(), v))
            .collect();

        InboundRequest {
            method: "POST".to_string(),
            path: "/services/anchor/inbox".to_string(),
            headers,
            body: body.to_vec(),
        }
    }

    #[tokio::test]
    async fn test_valid_signature_returns_actor() {
        let keypair = generate_rsa_keypair().unwrap();
        let signer = RequestSigner::new(
            &keypair.private_key_pem,
            "https://org1.example/services/anchor#main-key",
        )
        .unwrap();
        let verifier = HttpSignatureVerifier::new(Arc::new(ActorDocTransport {
            public_key_pem: keypair.public_key_pem,
        }));

        let request = signed_request(&signer, br#"{"type":"Create"}"#);
        let actor = verifier.verify_request(&request).await.unwrap();
        assert_eq!(
            actor.unwrap().as_str(),
            "https://org1.example/services/anchor"
        );
    }

    #[tokio::test]
    async fn test_tampered_body_is_rejected() {
        let keypair = generate_rsa_keypair().unwrap();
        let signer = RequestSigner::new(
            &keypair.private_key_pem,
            "https://org1.example/services/anchor#main-key",
        )
        .unwrap();
        let verifier = HttpSignatureVerifier::new(Arc::new(ActorDocTransport {
            public_key_pem: keypair.public_key_pem,
        }));

        let mut request = signed_request(&signer, br#"{"type":"Create"}"#);
        request.body = br#"{"type":"Undo"}"#.to_vec();

        assert!(verifier.verify_request(&request).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_signature_is_not_authenticated() {
        let keypair = generate_rsa_keypair().unwrap();
        let verifier = HttpSignatureVerifier::new(Arc::new(ActorDocTransport {
            public_key_pem: keypair.public_key_pem,
        }));

        let request = InboundRequest {
            method: "POST".to_string(),
            path: "/services/anchor/inbox".to_string(),
            headers: HashMap::new(),
            body: Vec::new(),
        };

        assert!(verifier.verify_request(&request).await.unwrap().is_none());
    }
}
