//! HTTP transport seam. The dispatcher only ever sees [`Transport`], so tests
//! substitute [`RecordingTransport`] and assert the exact request body
//! without network I/O.

use std::time::Duration;

use async_trait::async_trait;
use forwarder_core::{ForwarderError, ForwarderResult};
use parking_lot::Mutex;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use tracing::debug;

/// Status and body of a completed HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Issues a single JSON POST.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport identifier used in logs (e.g. "http", "recording").
    fn name(&self) -> &str;

    /// POST `body` (already serialized JSON) to `url` with
    /// `Content-Type: application/json`.
    async fn post_json(&self, url: &str, body: Vec<u8>) -> ForwarderResult<TransportResponse>;
}

/// reqwest-backed transport. The client is reused for connection pooling.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> ForwarderResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("amplitude-forwarder/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ForwarderError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    async fn post_json(&self, url: &str, body: Vec<u8>) -> ForwarderResult<TransportResponse> {
        debug!(url, bytes = body.len(), "POST");

        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| ForwarderError::DispatchFailure(format!("request to {url} failed: {e}")))?;

        let status = response.status().as_u16();
        // A body that cannot be read does not change the outcome.
        let body = response.text().await.unwrap_or_default();

        Ok(TransportResponse { status, body })
    }
}

/// A request captured by [`RecordingTransport`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub url: String,
    pub body: serde_json::Value,
}

/// In-memory transport that captures requests for testing.
pub struct RecordingTransport {
    requests: Mutex<Vec<RecordedRequest>>,
    status: u16,
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingTransport {
    /// Records requests and answers every one with 200.
    pub fn new() -> Self {
        Self::with_status(200)
    }

    /// Records requests and answers every one with `status`.
    pub fn with_status(status: u16) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            status,
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn last(&self) -> Option<RecordedRequest> {
        self.requests.lock().last().cloned()
    }

    pub fn clear(&self) {
        self.requests.lock().clear();
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    fn name(&self) -> &str {
        "recording"
    }

    async fn post_json(&self, url: &str, body: Vec<u8>) -> ForwarderResult<TransportResponse> {
        let body = serde_json::from_slice(&body)?;
        self.requests.lock().push(RecordedRequest {
            url: url.to_string(),
            body,
        });
        Ok(TransportResponse {
            status: self.status,
            body: String::new(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_response_success_range() {
        let ok = TransportResponse { status: 200, body: String::new() };
        let accepted = TransportResponse { status: 204, body: String::new() };
        let bad = TransportResponse { status: 400, body: String::new() };
        let down = TransportResponse { status: 503, body: String::new() };
        assert!(ok.is_success());
        assert!(accepted.is_success());
        assert!(!bad.is_success());
        assert!(!down.is_success());
    }

    #[tokio::test]
    async fn test_recording_transport_captures() {
        let transport = RecordingTransport::new();
        let response = transport
            .post_json("https://example.com/ingest", br#"{"a":1}"#.to_vec())
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(transport.count(), 1);

        let request = transport.last().unwrap();
        assert_eq!(request.url, "https://example.com/ingest");
        assert_eq!(request.body["a"], 1);

        transport.clear();
        assert_eq!(transport.count(), 0);
    }

    #[tokio::test]
    async fn test_recording_transport_rejects_non_json() {
        let transport = RecordingTransport::new();
        let result = transport.post_json("https://example.com", b"not json".to_vec()).await;
        assert!(matches!(result, Err(ForwarderError::Serialization(_))));
    }

    #[test]
    fn test_http_transport_builds() {
        let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
        assert_eq!(transport.timeout(), Duration::from_secs(5));
        assert_eq!(transport.name(), "http");
    }
}
