//! Correlated request/response calls over a one-way line-delimited JSON
//! stream pair.
//!
//! Requests are appended to the outbound stream by [`OutboundWriter`];
//! responses are tailed from the inbound stream and parked in a
//! [`CorrelationBuffer`] until the caller waiting on their correlation id
//! claims them.

pub mod buffer;
pub mod envelope;
pub(crate) mod tailer;
pub mod writer;

pub use buffer::CorrelationBuffer;
pub use envelope::{CallFailure, Envelope, ensure_correlation_id, new_correlation_id};
pub use tailer::{ParseErrorHook, drop_malformed};
pub use writer::OutboundWriter;

use crate::config::{BridgeConfig, validate_bridge};
use crate::error::{BridgeError, Result};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tailer::LineTailer;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct BridgeBuilder {
    config: BridgeConfig,
    on_parse_error: ParseErrorHook,
}

impl BridgeBuilder {
    /// Replace the default drop-and-continue policy for malformed inbound lines
    pub fn on_parse_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str, &serde_json::Error) + Send + Sync + 'static,
    {
        self.on_parse_error = Arc::new(hook);
        self
    }

    /// Wire the components and spawn the tailer and writer tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self) -> Result<Bridge> {
        validate_bridge(&self.config).map_err(|e| BridgeError::Config(e.to_string()))?;

        let config = self.config;
        let cancel = CancellationToken::new();
        let buffer = Arc::new(CorrelationBuffer::new(
            config.correlation_field.clone(),
            config.retention.clone(),
        ));
        let writer = Arc::new(OutboundWriter::new(
            config.outbound_path.clone(),
            config.open_retry(),
        ));
        let (tailer_ready_tx, tailer_ready) = watch::channel(false);

        let tailer = LineTailer::new(
            config.inbound_path.clone(),
            config.poll_interval(),
            buffer.clone(),
            self.on_parse_error,
            tailer_ready_tx,
        );
        let tailer_task = tokio::spawn(tailer.run(cancel.child_token()));

        let connect_task = {
            let writer = writer.clone();
            let cancel = cancel.child_token();
            tokio::spawn(async move {
                if let Err(e) = writer.connect(&cancel).await {
                    debug!("Outbound connect abandoned: {}", e);
                }
            })
        };

        info!(
            "Bridge started: outbound={} inbound={} field={}",
            config.outbound_path.display(),
            config.inbound_path.display(),
            config.correlation_field
        );

        Ok(Bridge {
            config,
            buffer,
            writer,
            tailer_ready,
            cancel,
            tasks: Mutex::new(vec![tailer_task, connect_task]),
        })
    }
}

/// The bridge façade: one outbound writer, one inbound tailer, one buffer.
///
/// Instances are independent; several may run in one process against
/// different stream pairs.
pub struct Bridge {
    config: BridgeConfig,
    buffer: Arc<CorrelationBuffer>,
    writer: Arc<OutboundWriter>,
    tailer_ready: watch::Receiver<bool>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Bridge {
    pub fn builder(config: BridgeConfig) -> BridgeBuilder {
        BridgeBuilder {
            config,
            on_parse_error: drop_malformed(),
        }
    }

    /// Start a bridge with the default parse-error policy
    pub fn start(config: BridgeConfig) -> Result<Self> {
        Self::builder(config).start()
    }

    pub fn correlation_field(&self) -> &str {
        &self.config.correlation_field
    }

    /// Liveness: whether the outbound sink is open
    pub fn is_healthy(&self) -> bool {
        self.writer.is_connected()
    }

    /// Number of unclaimed responses currently buffered
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Wait until the tailer is positioned and the outbound sink is open
    pub async fn ready(&self) {
        let mut tailer_ready = self.tailer_ready.clone();
        let _ = tailer_ready.wait_for(|ready| *ready).await;
        self.writer.wait_connected().await;
    }

    /// Send `envelope` and wait up to `timeout` for its response.
    ///
    /// Always yields a JSON object carrying the correlation id: the matched
    /// response, or an error object describing the failure.
    pub async fn call(&self, envelope: Envelope, timeout: Duration) -> Value {
        match self.try_call(envelope, timeout).await {
            Ok(response) => response,
            Err(failure) => failure.to_json(self.correlation_field()),
        }
    }

    /// Like [`Bridge::call`] with the failure kept typed
    pub async fn try_call(
        &self,
        mut envelope: Envelope,
        timeout: Duration,
    ) -> std::result::Result<Value, CallFailure> {
        let id = ensure_correlation_id(&mut envelope, self.correlation_field());
        let deadline = Instant::now() + timeout;

        if let Err(e) = self.writer.send(&envelope).await {
            warn!("Send failed for {}: {}", id, e);
            return Err(CallFailure::new(id, e));
        }
        drop(envelope);

        debug!("Sent request {}, waiting up to {:?}", id, timeout);
        match self.wait_for_response(&id, deadline).await {
            Some(response) => Ok(response),
            None => {
                warn!("No response for {} within {:?}", id, timeout);
                Err(CallFailure::new(id, BridgeError::Timeout(timeout)))
            }
        }
    }

    async fn wait_for_response(&self, id: &Value, deadline: Instant) -> Option<Value> {
        loop {
            // Register before checking so an insert in between still wakes us
            let arrival = self.buffer.notified();
            tokio::pin!(arrival);
            arrival.as_mut().enable();

            if let Some(response) = self.buffer.take(id) {
                return Some(response);
            }

            if tokio::time::timeout_at(deadline, arrival).await.is_err() {
                return self.buffer.take(id);
            }
        }
    }

    /// Stop the background tasks and close the outbound sink
    pub async fn shutdown(&self) {
        info!("Shutting down bridge");
        self.cancel.cancel();

        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for task in tasks {
            if let Err(e) = task.await {
                error!("Bridge task failed during shutdown: {}", e);
            }
        }

        self.writer.close().await;
        let orphaned = self.buffer.len();
        if orphaned > 0 {
            info!("{} unclaimed responses discarded", orphaned);
        }
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct Pipes {
        _dir: TempDir,
        outbound: PathBuf,
        inbound: PathBuf,
    }

    fn pipes() -> Pipes {
        let dir = tempfile::tempdir().unwrap();
        let outbound = dir.path().join("mcp_in");
        let inbound = dir.path().join("mcp_out");
        std::fs::File::create(&outbound).unwrap();
        std::fs::File::create(&inbound).unwrap();
        Pipes {
            _dir: dir,
            outbound,
            inbound,
        }
    }

    fn config(pipes: &Pipes) -> BridgeConfig {
        BridgeConfig {
            outbound_path: pipes.outbound.clone(),
            inbound_path: pipes.inbound.clone(),
            poll_interval_ms: 10,
            open_retry_ms: 10,
            ..BridgeConfig::default()
        }
    }

    fn envelope(value: Value) -> Envelope {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_config() {
        let pipes = pipes();
        let mut config = config(&pipes);
        config.correlation_field = String::new();

        let result = Bridge::start(config);
        assert!(matches!(result, Err(BridgeError::Config(_))));
    }

    #[tokio::test]
    async fn test_call_returns_buffered_response() {
        let pipes = pipes();
        let bridge = Bridge::start(config(&pipes)).unwrap();
        bridge.ready().await;

        bridge
            .buffer
            .insert(json!({"correlation_id": "abc", "result": "pong"}));
        let response = bridge
            .call(
                envelope(json!({"correlation_id": "abc", "method": "ping"})),
                Duration::from_secs(1),
            )
            .await;

        assert_eq!(response, json!({"correlation_id": "abc", "result": "pong"}));
        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn test_missing_id_is_assigned_and_written() {
        let pipes = pipes();
        let bridge = Bridge::start(config(&pipes)).unwrap();
        bridge.ready().await;

        let failure = bridge
            .try_call(envelope(json!({"method": "ping"})), Duration::from_millis(20))
            .await
            .unwrap_err();
        let id = failure.correlation_id.as_str().unwrap().to_string();
        assert!(!id.is_empty());

        let written: Value =
            serde_json::from_str(std::fs::read_to_string(&pipes.outbound).unwrap().trim())
                .unwrap();
        assert_eq!(written["correlation_id"], id.as_str());
        assert_eq!(written["method"], "ping");
        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn test_timeout_returns_error_object() {
        let pipes = pipes();
        let bridge = Bridge::start(config(&pipes)).unwrap();
        bridge.ready().await;

        let started = std::time::Instant::now();
        let response = bridge
            .call(
                envelope(json!({"correlation_id": "slow"})),
                Duration::from_millis(100),
            )
            .await;
        let elapsed = started.elapsed();

        assert_eq!(response["correlation_id"], "slow");
        assert_eq!(response["error_kind"], "timeout");
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(400), "took {:?}", elapsed);
        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn test_waiter_is_woken_by_later_arrival() {
        let pipes = pipes();
        let bridge = Arc::new(Bridge::start(config(&pipes)).unwrap());
        bridge.ready().await;

        let producer = bridge.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            producer.buffer.insert(json!({"correlation_id": "later"}));
        });

        let response = bridge
            .try_call(
                envelope(json!({"correlation_id": "later"})),
                Duration::from_secs(2),
            )
            .await
            .unwrap();
        assert_eq!(response["correlation_id"], "later");
        assert_eq!(bridge.buffered(), 0);
    }

    #[tokio::test]
    async fn test_not_connected_before_outbound_exists() {
        let dir = tempfile::tempdir().unwrap();
        let config = BridgeConfig {
            outbound_path: dir.path().join("absent_in"),
            inbound_path: dir.path().join("absent_out"),
            poll_interval_ms: 10,
            open_retry_ms: 10,
            ..BridgeConfig::default()
        };
        let bridge = Bridge::start(config).unwrap();
        assert!(!bridge.is_healthy());

        let response = bridge
            .call(
                envelope(json!({"correlation_id": "early"})),
                Duration::from_secs(5),
            )
            .await;
        assert_eq!(response["correlation_id"], "early");
        assert_eq!(response["error_kind"], "not_connected");

        tokio::time::timeout(Duration::from_secs(1), bridge.shutdown())
            .await
            .expect("shutdown should not hang while streams are missing");
    }

    #[tokio::test]
    async fn test_shutdown_clears_health() {
        let pipes = pipes();
        let bridge = Bridge::start(config(&pipes)).unwrap();
        bridge.ready().await;
        assert!(bridge.is_healthy());

        bridge.shutdown().await;
        assert!(!bridge.is_healthy());
    }
}
