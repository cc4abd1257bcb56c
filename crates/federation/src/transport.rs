//! Signed HTTP transport for outbound federation requests.

use std::time::Duration;

use anchornet_common::{AppError, AppResult, RequestSigner};
use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;
use url::Url;

/// Media type for activity payloads.
pub const ACTIVITY_CONTENT_TYPE: &str = "application/activity+json";

/// Response to an outbound request.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl TransportResponse {
    /// Whether the status is 2xx.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Posts and fetches documents between federation peers. Implementations
/// sign every outbound request with the service key.
#[async_trait]
pub trait Transport: Send + Sync {
    /// POST a signed payload.
    async fn post(&self, url: &Url, body: &[u8]) -> AppResult<TransportResponse>;

    /// GET a signed request.
    async fn get(&self, url: &Url) -> AppResult<TransportResponse>;
}

/// [`Transport`] backed by `reqwest`, signing with the service key.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    signer: RequestSigner,
    user_agent: String,
}

impl HttpTransport {
    /// Create a transport signing with the given key.
    ///
    /// # Panics
    /// Panics if the HTTP client fails to build.
    #[must_use]
    #[allow(clippy::expect_used)] // Client build only fails with incompatible TLS settings
    pub fn new(signer: RequestSigner, user_agent: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .connect_timeout(Duration::from_secs(10))
                .build()
                .expect("Failed to create HTTP client"),
            signer,
            user_agent: user_agent.into(),
        }
    }

    async fn send(
        &self,
        method: &str,
        url: &Url,
        body: Option<&[u8]>,
    ) -> AppResult<TransportResponse> {
        let payload = body.unwrap_or_default();
        let headers = self.signer.sign(method, url, payload)?;

        debug!(method, url = %url, "Sending signed request");

        let mut request = match method {
            "POST" => self
                .client
                .post(url.clone())
                .header("Content-Type", ACTIVITY_CONTENT_TYPE)
                .body(payload.to_vec()),
            _ => self.client.get(url.clone()),
        };

        request = request
            .header("User-Agent", &self.user_agent)
            .header("Accept", "application/activity+json, application/ld+json");
        for (name, value) in headers {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AppError::Transient(format!("request to [{url}] failed: {e}")))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| AppError::Transient(format!("reading response from [{url}]: {e}")))?
            .to_vec();

        Ok(TransportResponse { status, body })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(&self, url: &Url, body: &[u8]) -> AppResult<TransportResponse> {
        self.send("POST", url, Some(body)).await
    }

    async fn get(&self, url: &Url) -> AppResult<TransportResponse> {
        self.send("GET", url, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_classification() {
        assert!(
            TransportResponse {
                status: 200,
                body: Vec::new()
            }
            .is_success()
        );
        assert!(
            TransportResponse {
                status: 202,
                body: Vec::new()
            }
            .is_success()
        );
        assert!(
            !TransportResponse {
                status: 500,
                body: Vec::new()
            }
            .is_success()
        );
        assert!(
            !TransportResponse {
                status: 401,
                body: Vec::new()
            }
            .is_success()
        );
    }
}
