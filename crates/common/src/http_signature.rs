//! HTTP Signature primitives for federation requests.
//!
//! Implements draft-cavage-http-signatures over the canonical header set
//! `(request-target) host date digest`, the scheme every peer in the
//! federation signs with. The service key signs outbound requests; inbound
//! requests are verified against the actor's published key.

use std::collections::HashMap;

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::Utc;
use rsa::{
    RsaPrivateKey,
    pkcs1v15::{Signature, SigningKey, VerifyingKey},
    sha2::Sha256,
    signature::{SignatureEncoding, Signer, Verifier},
};
use sha2::Digest;
use url::Url;

use crate::{AppError, AppResult, crypto::parse_public_key};

/// Header names signed on every outbound request, in signing order.
pub const SIGNED_HEADERS: [&str; 4] = ["(request-target)", "host", "date", "digest"];

/// Parsed `Signature` header.
#[derive(Debug, Clone)]
pub struct HttpSignature {
    /// Key ID; the URL of the signing service's public-key document.
    pub key_id: String,
    /// Algorithm, typically `rsa-sha256`.
    pub algorithm: String,
    /// Headers included in the signature.
    pub headers: Vec<String>,
    /// The signature itself, base64 encoded.
    pub signature: String,
}

impl HttpSignature {
    /// Parse a `Signature` header value of the form
    /// `keyId="...",algorithm="...",headers="...",signature="..."`.
    pub fn parse(header: &str) -> AppResult<Self> {
        let mut key_id = None;
        let mut algorithm = None;
        let mut headers = None;
        let mut signature = None;

        for part in header.split(',') {
            let part = part.trim();
            if let Some((key, value)) = part.split_once('=') {
                let value = value.trim_matches('"');
                match key.trim() {
                    "keyId" => key_id = Some(value.to_string()),
                    "algorithm" => algorithm = Some(value.to_string()),
                    "headers" => headers = Some(value.to_string()),
                    "signature" => signature = Some(value.to_string()),
                    _ => {}
                }
            }
        }

        Ok(Self {
            key_id: key_id.ok_or_else(|| AppError::Invalid("Missing keyId".to_string()))?,
            algorithm: algorithm.unwrap_or_else(|| "rsa-sha256".to_string()),
            headers: headers
                .unwrap_or_else(|| "date".to_string())
                .split(' ')
                .map(ToString::to_string)
                .collect(),
            signature: signature
                .ok_or_else(|| AppError::Invalid("Missing signature".to_string()))?,
        })
    }
}

/// Signs outbound requests with the service's private key.
#[derive(Clone)]
pub struct RequestSigner {
    private_key: RsaPrivateKey,
    key_id: String,
}

impl RequestSigner {
    /// Create a signer from a PKCS#8 PEM private key and the key ID under
    /// which peers can resolve the matching public key.
    pub fn new(private_key_pem: &str, key_id: impl Into<String>) -> AppResult<Self> {
        Ok(Self {
            private_key: crate::crypto::parse_private_key(private_key_pem)?,
            key_id: key_id.into(),
        })
    }

    /// Sign a request, returning the full header set to attach:
    /// `Host`, `Date`, `Digest` and `Signature`.
    pub fn sign(&self, method: &str, url: &Url, body: &[u8]) -> AppResult<Vec<(String, String)>> {
        let host = url
            .host_str()
            .ok_or_else(|| AppError::Invalid(format!("no host in URL: {url}")))?
            .to_string();
        let date = http_date();
        let digest = body_digest(body);

        let mut headers = HashMap::new();
        headers.insert("host".to_string(), host.clone());
        headers.insert("date".to_string(), date.clone());
        headers.insert("digest".to_string(), digest.clone());

        let signing_string =
            build_signature_string(method, url.path(), &headers, &SIGNED_HEADERS)?;

        let signing_key = SigningKey::<Sha256>::new(self.private_key.clone());
        let signature = signing_key.sign(signing_string.as_bytes());
        let sig_base64 = BASE64.encode(signature.to_bytes());

        let signature_header = format!(
            r#"keyId="{}",algorithm="rsa-sha256",headers="{}",signature="{}""#,
            self.key_id,
            SIGNED_HEADERS.join(" "),
            sig_base64
        );

        Ok(vec![
            ("Host".to_string(), host),
            ("Date".to_string(), date),
            ("Digest".to_string(), digest),
            ("Signature".to_string(), signature_header),
        ])
    }
}

/// Build the string that is signed/verified from request components.
pub fn build_signature_string(
    method: &str,
    path: &str,
    headers: &HashMap<String, String>,
    signed_headers: &[&str],
) -> AppResult<String> {
    let mut parts = Vec::with_capacity(signed_headers.len());

    for name in signed_headers {
        let value = if *name == "(request-target)" {
            format!("{} {path}", method.to_lowercase())
        } else {
            headers
                .get(&name.to_lowercase())
                .cloned()
                .ok_or_else(|| AppError::Invalid(format!("Missing header: {name}")))?
        };

        parts.push(format!("{name}: {value}"));
    }

    Ok(parts.join("\n"))
}

/// Verify a parsed HTTP signature against a PEM public key.
///
/// Returns `Ok(false)` when the signature does not match; errors are
/// reserved for malformed input.
pub fn verify_signature(
    signature: &HttpSignature,
    public_key_pem: &str,
    method: &str,
    path: &str,
    headers: &HashMap<String, String>,
) -> AppResult<bool> {
    let signed: Vec<&str> = signature.headers.iter().map(String::as_str).collect();
    let signing_string = build_signature_string(method, path, headers, &signed)?;

    let sig_bytes = BASE64
        .decode(&signature.signature)
        .map_err(|e| AppError::Invalid(format!("Invalid signature encoding: {e}")))?;

    let public_key = parse_public_key(public_key_pem)?;
    let verifying_key = VerifyingKey::<Sha256>::new(public_key);
    let signature_obj = Signature::try_from(sig_bytes.as_slice())
        .map_err(|e| AppError::Invalid(format!("Invalid signature format: {e}")))?;

    Ok(verifying_key
        .verify(signing_string.as_bytes(), &signature_obj)
        .is_ok())
}

/// SHA-256 digest header value for a request body.
#[must_use]
pub fn body_digest(body: &[u8]) -> String {
    let hash = sha2::Sha256::digest(body);
    format!("SHA-256={}", BASE64.encode(hash))
}

/// Verify that a `Digest` header matches the body.
#[must_use]
pub fn verify_digest(body: &[u8], digest_header: &str) -> bool {
    body_digest(body) == digest_header
}

/// Current time formatted for the HTTP `Date` header.
#[must_use]
pub fn http_date() -> String {
    Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}
