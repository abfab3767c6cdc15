use axum::Router;
use mcp_pipe_bridge::{
    Bridge, Envelope,
    api::{build_router, handlers::ApiState},
    config::BridgeConfig,
};
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;

// ──────────────────────────────────────────────
// Stream pair fixtures
// ──────────────────────────────────────────────

/// A temporary outbound/inbound file pair standing in for the named pipes.
pub struct StreamPair {
    _dir: TempDir,
    pub outbound: PathBuf,
    pub inbound: PathBuf,
}

impl StreamPair {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let outbound = dir.path().join("mcp_in");
        let inbound = dir.path().join("mcp_out");
        std::fs::File::create(&outbound).unwrap();
        std::fs::File::create(&inbound).unwrap();
        Self {
            _dir: dir,
            outbound,
            inbound,
        }
    }

    pub fn config(&self) -> BridgeConfig {
        BridgeConfig {
            outbound_path: self.outbound.clone(),
            inbound_path: self.inbound.clone(),
            poll_interval_ms: 10,
            open_retry_ms: 10,
            ..BridgeConfig::default()
        }
    }
}

/// Start a bridge on `pair` and wait until both streams are attached.
pub async fn start_bridge(pair: &StreamPair) -> Arc<Bridge> {
    let bridge = Arc::new(Bridge::start(pair.config()).unwrap());
    tokio::time::timeout(Duration::from_secs(5), bridge.ready())
        .await
        .expect("bridge should attach to both streams");
    bridge
}

pub fn envelope(value: Value) -> Envelope {
    value.as_object().cloned().unwrap()
}

/// Append raw bytes to a stream, as the external process would.
pub fn append(path: &Path, bytes: &[u8]) {
    let mut file = std::fs::OpenOptions::new().append(true).open(path).unwrap();
    file.write_all(bytes).unwrap();
    file.flush().unwrap();
}

/// Create a named pipe at `path`. Returns false where `mkfifo` is unavailable.
#[cfg(unix)]
pub fn make_fifo(path: &Path) -> bool {
    std::process::Command::new("mkfifo")
        .arg(path)
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

// ──────────────────────────────────────────────
// Simulated external process
// ──────────────────────────────────────────────

/// Wait for `expected` request lines on the outbound stream, then answer
/// them all at once in a scrambled order using `answer`.
pub fn spawn_responder<F>(pair: &StreamPair, expected: usize, answer: F) -> JoinHandle<()>
where
    F: Fn(&Value) -> Value + Send + 'static,
{
    let outbound = pair.outbound.clone();
    let inbound = pair.inbound.clone();
    tokio::spawn(async move {
        let requests = loop {
            let contents = tokio::fs::read_to_string(&outbound).await.unwrap();
            let requests: Vec<Value> = contents
                .lines()
                .filter_map(|line| serde_json::from_str(line).ok())
                .collect();
            if requests.len() >= expected {
                break requests;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        };

        let mut payload = Vec::new();
        for index in scrambled(requests.len()) {
            serde_json::to_writer(&mut payload, &answer(&requests[index])).unwrap();
            payload.push(b'\n');
        }
        append(&inbound, &payload);
    })
}

/// A deterministic permutation of `0..len` that is far from send order.
fn scrambled(len: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..len).collect();
    order.sort_by_key(|i| (i * 7919) % len.max(1));
    order.reverse();
    order
}

// ──────────────────────────────────────────────
// HTTP helpers
// ──────────────────────────────────────────────

/// Build the HTTP app around `bridge` (no listener, uses tower::oneshot).
pub fn build_test_app(bridge: Arc<Bridge>, request_timeout: Duration) -> Router {
    build_router(ApiState {
        bridge,
        request_timeout,
    })
}

/// Helper to extract JSON from a response body.
pub async fn response_json(response: axum::http::Response<axum::body::Body>) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}
