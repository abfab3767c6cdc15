use crate::api::handlers::ApiState;
use axum::{
    Router,
    routing::{get, post},
};

pub fn health_routes() -> Router<ApiState> {
    Router::new()
        .route("/health", get(super::handlers::health_check))
        .route("/info", get(super::handlers::server_info))
}

pub fn mcp_routes() -> Router<ApiState> {
    Router::new().route("/mcp", post(super::handlers::mcp_call))
}
