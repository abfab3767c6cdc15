use super::envelope::{Envelope, encode_line};
use crate::error::{BridgeError, Result};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type Sink = Box<dyn AsyncWrite + Send + Unpin>;

enum OpenAttempt {
    Opened(Sink),
    Missing,
    /// A FIFO with no reader attached yet
    NoReader,
    Failed(std::io::Error),
}

/// The single persistent sink onto the outbound stream.
///
/// Lines are written under an async mutex so concurrent senders never
/// interleave bytes, and every line is flushed before `send` returns.
pub struct OutboundWriter {
    path: PathBuf,
    retry_interval: Duration,
    sink: Mutex<Option<Sink>>,
    connected: watch::Sender<bool>,
}

impl OutboundWriter {
    pub fn new(path: impl Into<PathBuf>, retry_interval: Duration) -> Self {
        let (connected, _) = watch::channel(false);
        Self {
            path: path.into(),
            retry_interval,
            sink: Mutex::new(None),
            connected,
        }
    }

    /// Open the outbound stream, retrying until it is ready or `cancel` fires.
    ///
    /// The stream is opened for appending and never created: the consuming
    /// process owns it. A FIFO is opened non-blocking and retried until a
    /// reader attaches, so no open is ever left parked on the blocking pool.
    pub async fn connect(&self, cancel: &CancellationToken) -> Result<()> {
        let mut attempts: u64 = 0;
        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.try_open().await {
                OpenAttempt::Opened(sink) => {
                    *self.sink.lock().await = Some(sink);
                    self.connected.send_replace(true);
                    info!(
                        "Outbound stream connected: {} (after {} retries)",
                        self.path.display(),
                        attempts
                    );
                    return Ok(());
                }
                OpenAttempt::Missing if attempts == 0 => {
                    info!("Waiting for outbound stream {} to appear", self.path.display());
                }
                OpenAttempt::NoReader if attempts == 0 => {
                    info!("Waiting for a reader on outbound FIFO {}", self.path.display());
                }
                OpenAttempt::Missing | OpenAttempt::NoReader => {}
                OpenAttempt::Failed(e) => {
                    warn!(
                        "Failed to open outbound stream {}: {}. Retrying",
                        self.path.display(),
                        e
                    );
                }
            }

            attempts += 1;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.retry_interval) => {}
            }
        }

        Err(BridgeError::NotConnected(format!(
            "{}: cancelled before the stream opened",
            self.path.display()
        )))
    }

    async fn try_open(&self) -> OpenAttempt {
        let metadata = match tokio::fs::metadata(&self.path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return OpenAttempt::Missing,
            Err(e) => return OpenAttempt::Failed(e),
        };

        #[cfg(unix)]
        {
            use std::os::unix::fs::FileTypeExt;
            if metadata.file_type().is_fifo() {
                // Non-blocking open fails (ENXIO) until the other end is opened for reading
                return match tokio::net::unix::pipe::OpenOptions::new().open_sender(&self.path) {
                    Ok(sender) => OpenAttempt::Opened(Box::new(sender)),
                    Err(e) => {
                        debug!("Outbound FIFO {} not ready: {}", self.path.display(), e);
                        OpenAttempt::NoReader
                    }
                };
            }
        }
        #[cfg(not(unix))]
        let _ = metadata;

        let mut options = OpenOptions::new();
        options.append(true);
        match options.open(&self.path).await {
            Ok(file) => OpenAttempt::Opened(Box::new(file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => OpenAttempt::Missing,
            Err(e) => OpenAttempt::Failed(e),
        }
    }

    /// Write one envelope as a single flushed JSON line
    pub async fn send(&self, envelope: &Envelope) -> Result<()> {
        let line = encode_line(envelope)?;

        let mut sink = self.sink.lock().await;
        let Some(stream) = sink.as_mut() else {
            return Err(BridgeError::NotConnected(self.path.display().to_string()));
        };

        let written = async {
            stream.write_all(&line).await?;
            stream.flush().await
        }
        .await;

        if let Err(e) = written {
            error!("Write to outbound stream {} failed: {}", self.path.display(), e);
            *sink = None;
            self.connected.send_replace(false);
            return Err(BridgeError::transport(e));
        }

        debug!("Sent {} bytes to {}", line.len(), self.path.display());
        Ok(())
    }

    /// Whether the sink is open and has not failed
    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Wait until the sink is open
    pub async fn wait_connected(&self) {
        let mut rx = self.connected.subscribe();
        let _ = rx.wait_for(|connected| *connected).await;
    }

    /// Drop the sink. Subsequent sends report `NotConnected`.
    pub async fn close(&self) {
        let mut sink = self.sink.lock().await;
        if let Some(mut stream) = sink.take() {
            if let Err(e) = stream.shutdown().await {
                warn!("Close of {} failed: {}", self.path.display(), e);
            }
            info!("Outbound stream closed: {}", self.path.display());
        }
        self.connected.send_replace(false);
    }
}
