//! REST handlers for host event ingestion and operational endpoints.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use forwarder_core::{ForwarderError, RawEvent, Region};
use forwarder_identity::{IdentityKey, IdentityStore};
use forwarder_pipeline::Forwarder;
use serde::Serialize;
use tracing::{error, warn};

/// Maximum visitor id length accepted at the API boundary.
const MAX_VISITOR_ID_LEN: usize = 256;

/// Visitor key used by the readiness probe to exercise the store.
const READINESS_PROBE_VISITOR: &str = "__readiness_probe";

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub forwarder: Arc<Forwarder>,
    pub node_id: String,
    pub start_time: Instant,
}

fn validate_visitor_id(visitor_id: &str) -> Result<(), &'static str> {
    if visitor_id.is_empty() {
        return Err("'visitor_id' must not be empty");
    }
    if visitor_id.len() > MAX_VISITOR_ID_LEN {
        return Err("'visitor_id' exceeds maximum length");
    }
    Ok(())
}

/// POST /v1/events: accept one host event.
pub async fn ingest_event(
    State(state): State<AppState>,
    Json(event): Json<RawEvent>,
) -> Result<(StatusCode, Json<AcceptedResponse>), ApiError> {
    if let Err(msg) = validate_visitor_id(&event.context.visitor_id) {
        warn!(error = msg, "Event validation failed");
        metrics::counter!("api.validation_errors").increment(1);
        return Err(ApiError::invalid(msg));
    }

    let outcome = state.forwarder.forward(event).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            status: "accepted",
            event_id: outcome.event_id(),
            region: outcome.region,
        }),
    ))
}

/// POST /v1/visitors/:visitor_id/session/end: close the visitor's session.
pub async fn end_session(
    State(state): State<AppState>,
    Path(visitor_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    validate_visitor_id(&visitor_id).map_err(ApiError::invalid)?;
    state.forwarder.end_session(&visitor_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /health: Health check endpoint.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        node_id: state.node_id.clone(),
        store: state.forwarder.resolver().store().backend(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// GET /ready: Readiness probe for Kubernetes.
/// Returns 200 only when the identity store answers.
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    let store = state.forwarder.resolver().store();
    match store
        .get(READINESS_PROBE_VISITOR, IdentityKey::DeviceId)
        .await
    {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            warn!(error = %e, backend = store.backend(), "Identity store not ready");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// GET /live: Liveness probe for Kubernetes.
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

#[derive(Serialize)]
pub struct AcceptedResponse {
    pub status: &'static str,
    pub event_id: Option<u64>,
    pub region: Region,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub store: &'static str,
    pub uptime_secs: u64,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Handler error carrying the HTTP status it maps to.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    error: &'static str,
    message: String,
}

impl ApiError {
    fn invalid(message: &'static str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: "invalid_event",
            message: message.to_string(),
        }
    }
}

impl From<ForwarderError> for ApiError {
    fn from(e: ForwarderError) -> Self {
        let status = match &e {
            ForwarderError::MissingRequiredField(_)
            | ForwarderError::MalformedEcommercePayload(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ForwarderError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
            ForwarderError::DispatchFailure(_) => StatusCode::BAD_GATEWAY,
            ForwarderError::Config(_)
            | ForwarderError::Serialization(_)
            | ForwarderError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!(error = %e, kind = e.kind(), "Event processing failed");
            metrics::counter!("api.errors").increment(1);
        }

        // Internal details stay in the logs.
        let message = if e.is_event_error() {
            e.to_string()
        } else {
            "Internal processing error".to_string()
        };

        Self {
            status,
            error: e.kind(),
            message,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.error.to_string(),
                message: self.message,
            }),
        )
            .into_response()
    }
}
