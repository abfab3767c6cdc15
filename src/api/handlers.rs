use crate::bridge::{Bridge, Envelope};
use axum::{
    Json,
    extract::{Query, State},
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Application state shared across handlers
#[derive(Clone)]
pub struct ApiState {
    pub bridge: Arc<Bridge>,
    pub request_timeout: Duration,
}

#[derive(Debug, Default, Deserialize)]
pub struct CallParams {
    /// Per-call override of the configured request timeout
    pub timeout_ms: Option<u64>,
}

pub(crate) async fn health_check(State(state): State<ApiState>) -> impl IntoResponse {
    let connected = state.bridge.is_healthy();
    Json(json!({
        "status": if connected { "ok" } else { "starting" },
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "outbound_connected": connected,
    }))
}

pub(crate) async fn server_info() -> impl IntoResponse {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "description": env!("CARGO_PKG_DESCRIPTION"),
        "authors": env!("CARGO_PKG_AUTHORS"),
    }))
}

pub(crate) async fn mcp_call(
    State(state): State<ApiState>,
    Query(params): Query<CallParams>,
    Json(payload): Json<Envelope>,
) -> impl IntoResponse {
    let timeout = params
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(state.request_timeout);

    match state.bridge.try_call(payload, timeout).await {
        Ok(response) => (axum::http::StatusCode::OK, Json(response)),
        Err(failure) => {
            debug!("Call failed: {}", failure);
            let body = failure.to_json(state.bridge.correlation_field());
            (failure.error.status_code(), Json(body))
        }
    }
}
