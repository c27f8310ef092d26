//! Dispatcher: wraps one canonical record in the ingestion envelope, picks
//! the regional endpoint and posts it. Delivery is fire-and-forget: failures
//! are logged and counted, never retried, and never block the next event.

use std::sync::Arc;

use forwarder_core::config::AmplitudeConfig;
use forwarder_core::{
    CanonicalEventRecord, DispatchOptions, DispatchRequest, ForwarderError, ForwarderResult,
    Region,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::transport::{Transport, TransportResponse};

/// Ingestion endpoints per region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub default: String,
    pub eu: String,
}

impl Endpoints {
    pub fn select(&self, region: Region) -> &str {
        match region {
            Region::Default => &self.default,
            Region::Eu => &self.eu,
        }
    }
}

impl From<&AmplitudeConfig> for Endpoints {
    fn from(config: &AmplitudeConfig) -> Self {
        Self {
            default: config.endpoint.clone(),
            eu: config.eu_endpoint.clone(),
        }
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    api_key: String,
    min_id_length: Option<u32>,
    endpoints: Endpoints,
    transport: Arc<dyn Transport>,
}

impl Dispatcher {
    pub fn new(config: &AmplitudeConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            api_key: config.api_key.clone(),
            min_id_length: config.min_id_length,
            endpoints: Endpoints::from(config),
            transport,
        }
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Envelope for a single record. `options` is present only when a
    /// minimum id length is configured.
    pub fn build_request(&self, record: CanonicalEventRecord) -> DispatchRequest {
        DispatchRequest {
            api_key: self.api_key.clone(),
            options: self
                .min_id_length
                .map(|min_id_length| DispatchOptions { min_id_length }),
            events: vec![record],
        }
    }

    /// Send one record and wait for the response.
    pub async fn send(
        &self,
        record: CanonicalEventRecord,
        region: Region,
    ) -> ForwarderResult<TransportResponse> {
        let url = self.endpoints.select(region).to_string();
        let event_type = record.event_type().unwrap_or_default().to_string();
        let request = self.build_request(record);
        let body = serde_json::to_vec(&request)?;

        debug!(
            url = %url,
            region = region.as_str(),
            event_type = %event_type,
            transport = self.transport.name(),
            "Dispatching event"
        );

        let response = self.transport.post_json(&url, body).await?;
        if !response.is_success() {
            return Err(ForwarderError::DispatchFailure(format!(
                "{url} returned status {}: {}",
                response.status, response.body
            )));
        }

        info!(
            url = %url,
            status = response.status,
            event_type = %event_type,
            "Event delivered"
        );
        Ok(response)
    }

    /// Launch the send on the runtime and return immediately. The handle is
    /// only useful to tests; callers are free to drop it.
    pub fn dispatch(&self, record: CanonicalEventRecord, region: Region) -> JoinHandle<()> {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            match dispatcher.send(record, region).await {
                Ok(_) => {
                    metrics::counter!("dispatch.success").increment(1);
                }
                Err(e) => {
                    metrics::counter!("dispatch.failure").increment(1);
                    warn!(error = %e, region = region.as_str(), "Event dropped after failed dispatch");
                }
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::transport::RecordingTransport;
    use forwarder_core::types::fields;
    use serde_json::json;

    fn config(min_id_length: Option<u32>) -> AmplitudeConfig {
        AmplitudeConfig {
            api_key: "test-api-key".into(),
            min_id_length,
            ..Default::default()
        }
    }

    fn record() -> CanonicalEventRecord {
        let mut record = CanonicalEventRecord::new();
        record.insert(fields::EVENT_TYPE, "pageview");
        record.insert(fields::DEVICE_ID, "device-a");
        record.insert(fields::SESSION_ID, "1700000000000");
        record.insert(fields::EVENT_ID, 1);
        record
    }

    #[tokio::test]
    async fn test_request_without_options() {
        let transport = Arc::new(RecordingTransport::new());
        let dispatcher = Dispatcher::new(&config(None), transport.clone());

        dispatcher.send(record(), Region::Default).await.unwrap();

        let request = transport.last().unwrap();
        assert_eq!(request.url, "https://api2.amplitude.com/2/httpapi");
        assert_eq!(request.body["api_key"], "test-api-key");
        assert!(request.body.get("options").is_none());
        let events = request.body["events"].as_array().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["event_type"], "pageview");
    }

    #[tokio::test]
    async fn test_request_with_min_id_length() {
        let transport = Arc::new(RecordingTransport::new());
        let dispatcher = Dispatcher::new(&config(Some(3)), transport.clone());

        dispatcher.send(record(), Region::Default).await.unwrap();

        let request = transport.last().unwrap();
        assert_eq!(request.body["options"], json!({"min_id_length": 3}));
    }

    #[tokio::test]
    async fn test_region_selects_endpoint_only() {
        let transport = Arc::new(RecordingTransport::new());
        let dispatcher = Dispatcher::new(&config(None), transport.clone());

        dispatcher.send(record(), Region::Default).await.unwrap();
        dispatcher.send(record(), Region::Eu).await.unwrap();

        let requests = transport.requests();
        assert_eq!(requests[0].url, "https://api2.amplitude.com/2/httpapi");
        assert_eq!(requests[1].url, "https://api.eu.amplitude.com/2/httpapi");
        assert_eq!(requests[0].body, requests[1].body);
    }

    #[tokio::test]
    async fn test_non_success_status_is_dispatch_failure() {
        let transport = Arc::new(RecordingTransport::with_status(400));
        let dispatcher = Dispatcher::new(&config(None), transport.clone());

        let err = dispatcher.send(record(), Region::Default).await.unwrap_err();
        assert!(matches!(err, ForwarderError::DispatchFailure(_)));
        // No retry
        assert_eq!(transport.count(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_is_fire_and_forget() {
        let transport = Arc::new(RecordingTransport::with_status(503));
        let dispatcher = Dispatcher::new(&config(None), transport.clone());

        // A failing send completes without panicking and is attempted once
        dispatcher.dispatch(record(), Region::Eu).await.unwrap();
        assert_eq!(transport.count(), 1);
        assert_eq!(
            transport.last().unwrap().url,
            "https://api.eu.amplitude.com/2/httpapi"
        );
    }
}
