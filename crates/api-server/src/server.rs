//! API server: HTTP ingestion endpoint plus the Prometheus exporter.

use crate::rest::{self, AppState};
use axum::routing::{get, post};
use axum::Router;
use forwarder_core::config::AppConfig;
use forwarder_pipeline::Forwarder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Routes and middleware for the ingestion API.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Host event ingestion
        .route("/v1/events", post(rest::ingest_event))
        .route(
            "/v1/visitors/:visitor_id/session/end",
            post(rest::end_session),
        )
        // Operational endpoints
        .route("/health", get(rest::health_check))
        .route("/ready", get(rest::readiness))
        .route("/live", get(rest::liveness))
        // Middleware
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub struct ApiServer {
    config: AppConfig,
    forwarder: Arc<Forwarder>,
}

impl ApiServer {
    pub fn new(config: AppConfig, forwarder: Arc<Forwarder>) -> Self {
        Self { config, forwarder }
    }

    /// Start the HTTP REST server.
    pub async fn start_http(&self) -> anyhow::Result<()> {
        let app = router(AppState {
            forwarder: self.forwarder.clone(),
            node_id: self.config.node_id.clone(),
            start_time: Instant::now(),
        });

        let addr = SocketAddr::new(self.config.api.host.parse()?, self.config.api.http_port);

        info!(addr = %addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }

    /// Start the metrics server on a separate port.
    pub fn start_metrics(&self) -> anyhow::Result<()> {
        if !self.config.metrics.enabled {
            info!("Metrics exporter disabled");
            return Ok(());
        }

        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(SocketAddr::new(
                self.config.api.host.parse()?,
                self.config.metrics.port,
            ))
            .install()?;

        info!(port = self.config.metrics.port, "Metrics exporter started");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use forwarder_core::config::{AmplitudeConfig, AnonymousUserPolicy};
    use forwarder_dispatch::{Dispatcher, RecordingTransport};
    use forwarder_identity::{IdentityResolver, MemoryIdentityStore};
    use forwarder_pipeline::EventNormalizer;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app() -> (Router, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::new());
        let config = AmplitudeConfig {
            api_key: "test-key".into(),
            ..Default::default()
        };
        let forwarder = Forwarder::new(
            IdentityResolver::new(
                Arc::new(MemoryIdentityStore::default()),
                AnonymousUserPolicy::Unset,
            ),
            EventNormalizer::new(),
            Dispatcher::new(&config, transport.clone()),
        );
        let state = AppState {
            forwarder: Arc::new(forwarder),
            node_id: "node-test".into(),
            start_time: Instant::now(),
        };
        (router(state), transport)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_ingest_pageview() {
        let (app, _) = app();
        let response = app
            .clone()
            .oneshot(post_json(
                "/v1/events",
                json!({
                    "type": "pageview",
                    "context": {"visitor_id": "v-1", "url": "https://shop.example/"}
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(
            body_json(response).await,
            json!({"status": "accepted", "event_id": 1, "region": "default"})
        );

        let response = app
            .oneshot(post_json(
                "/v1/events",
                json!({
                    "type": "event",
                    "name": "Signup",
                    "payload": {"eu_data": true},
                    "context": {"visitor_id": "v-1", "url": "https://shop.example/"}
                }),
            ))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["event_id"], 2);
        assert_eq!(body["region"], "eu");
    }

    #[tokio::test]
    async fn test_invalid_event_is_unprocessable() {
        let (app, _) = app();
        let response = app
            .oneshot(post_json(
                "/v1/events",
                json!({
                    "type": "event",
                    "context": {"visitor_id": "v-1", "url": "https://shop.example/"}
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body_json(response).await["error"], "missing_required_field");
    }

    #[tokio::test]
    async fn test_empty_visitor_is_bad_request() {
        let (app, _) = app();
        let response = app
            .oneshot(post_json(
                "/v1/events",
                json!({
                    "type": "pageview",
                    "context": {"visitor_id": "", "url": "https://shop.example/"}
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_end_session() {
        let (app, _) = app();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/visitors/v-1/session/end")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_operational_endpoints() {
        let (app, _) = app();
        for uri in ["/health", "/ready", "/live"] {
            let response = app
                .clone()
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK, "{uri}");
        }

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["node_id"], "node-test");
        assert_eq!(body["store"], "memory");
    }
}
