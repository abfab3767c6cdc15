use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Outbound stream not connected: {0}")]
    NotConnected(String),

    #[error("Outbound stream connection lost: {0}")]
    Transport(String),

    #[error("Timed out after {}ms waiting for response", .0.as_millis())]
    Timeout(Duration),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;

impl BridgeError {
    /// Short machine-readable tag placed in JSON error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeError::Config(_) => "config",
            BridgeError::NotConnected(_) => "not_connected",
            BridgeError::Transport(_) => "transport",
            BridgeError::Timeout(_) => "timeout",
            BridgeError::Json(_) => "json",
        }
    }

    /// Convert error to HTTP status code
    ///
    /// Timeouts answer 200: the body is still a well-formed error object
    /// carrying the correlation id.
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            BridgeError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            BridgeError::NotConnected(_) => StatusCode::INTERNAL_SERVER_ERROR,
            BridgeError::Transport(_) => StatusCode::INTERNAL_SERVER_ERROR,
            BridgeError::Timeout(_) => StatusCode::OK,
            BridgeError::Json(_) => StatusCode::BAD_REQUEST,
        }
    }

    pub(crate) fn transport(err: std::io::Error) -> Self {
        BridgeError::Transport(err.to_string())
    }
}
