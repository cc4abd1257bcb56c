//! Common utilities and shared types for anchornet.

pub mod config;
pub mod crypto;
pub mod error;
pub mod http_signature;
pub mod iri;
pub mod lifecycle;

pub use config::{AppConfig, FederationConfig, RetrySettings, ServerConfig};
pub use crypto::{RsaKeypair, generate_rsa_keypair, parse_private_key, parse_public_key};
pub use error::{AppError, AppResult};
pub use http_signature::{
    HttpSignature, RequestSigner, body_digest, build_signature_string, http_date,
    verify_digest, verify_signature,
};
pub use iri::ServiceIris;
pub use lifecycle::{Lifecycle, State};
