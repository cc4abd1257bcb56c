//! Node configuration.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

/// Node configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// HTTP server configuration.
    pub server: ServerConfig,
    /// Federation configuration.
    pub federation: FederationConfig,
    /// Delivery retry configuration.
    #[serde(default)]
    pub retry: RetrySettings,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind to.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Public URL of this node; the service IRI is derived from it.
    pub url: String,
}

/// Federation configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FederationConfig {
    /// Endpoint name of this service, e.g. `services/anchor`.
    pub service_endpoint: String,
    /// Reject inbound requests whose HTTP-signature signer differs from the
    /// `actor` inside the activity body.
    #[serde(default = "default_true")]
    pub verify_actor_in_signature: bool,
    /// Collection page size.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Number of inbox dispatcher workers.
    #[serde(default = "default_pool_size")]
    pub inbox_workers: usize,
    /// Number of outbox delivery workers; also the number of per-recipient
    /// delivery partitions.
    #[serde(default = "default_pool_size")]
    pub delivery_workers: usize,
    /// Seconds a subscriber may hold a message before it is treated as
    /// nacked.
    #[serde(default = "default_ack_timeout_secs")]
    pub ack_timeout_secs: u64,
    /// Maximum delay, in seconds, within which a witnessed anchor credential
    /// must be included into the ledger. Used when an Offer carries no
    /// explicit `endTime`.
    #[serde(default = "default_max_witness_delay_secs")]
    pub max_witness_delay_secs: u64,
}

/// Delivery retry configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    /// Maximum delivery attempts per recipient.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Initial backoff interval in milliseconds.
    #[serde(default = "default_initial_interval_ms")]
    pub initial_interval_ms: u64,
    /// Backoff multiplier.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Backoff ceiling in milliseconds.
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_interval_ms: default_initial_interval_ms(),
            multiplier: default_multiplier(),
            max_interval_ms: default_max_interval_ms(),
        }
    }
}

impl FederationConfig {
    /// Ack timeout as a [`Duration`].
    #[must_use]
    pub const fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.ack_timeout_secs)
    }

    /// Maximum witness delay as a [`Duration`].
    #[must_use]
    pub const fn max_witness_delay(&self) -> Duration {
        Duration::from_secs(self.max_witness_delay_secs)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    8077
}

const fn default_true() -> bool {
    true
}

const fn default_page_size() -> usize {
    50
}

const fn default_pool_size() -> usize {
    4
}

const fn default_ack_timeout_secs() -> u64 {
    30
}

const fn default_max_witness_delay_secs() -> u64 {
    600
}

const fn default_max_attempts() -> u32 {
    5
}

const fn default_initial_interval_ms() -> u64 {
    1_000
}

const fn default_multiplier() -> f64 {
    1.5
}

const fn default_max_interval_ms() -> u64 {
    60_000
}

impl AppConfig {
    /// Load configuration from files and environment variables.
    ///
    /// Configuration is loaded in the following order:
    /// 1. `config/default.toml`
    /// 2. `config/{environment}.toml` (based on `ANCHORNET_ENV`)
    /// 3. Environment variables with `ANCHORNET` prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        let env = std::env::var("ANCHORNET_ENV").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("ANCHORNET")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("ANCHORNET")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_defaults() {
        let retry = RetrySettings::default();
        assert_eq!(retry.max_attempts, 5);
        assert!(retry.multiplier > 1.0);
        assert!(retry.max_interval_ms >= retry.initial_interval_ms);
    }

    #[test]
    fn test_federation_defaults_deserialize() {
        let cfg: FederationConfig =
            serde_json::from_str(r#"{"service_endpoint": "services/anchor"}"#).unwrap();
        assert!(cfg.verify_actor_in_signature);
        assert_eq!(cfg.page_size, 50);
        assert_eq!(cfg.ack_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.max_witness_delay(), Duration::from_secs(600));
    }
}
