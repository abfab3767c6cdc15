use super::buffer::CorrelationBuffer;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Called with the offending line whenever an inbound line is not valid JSON
pub type ParseErrorHook = Arc<dyn Fn(&str, &serde_json::Error) + Send + Sync>;

/// Default policy for malformed inbound lines: log and keep tailing
pub fn drop_malformed() -> ParseErrorHook {
    Arc::new(|line, err| {
        debug!("Dropping malformed inbound line ({}): {:.120}", err, line);
    })
}

/// Split `bytes` into complete `\n`-terminated lines.
///
/// Returns the lines (without terminators) and the number of bytes they
/// span. A trailing partial line is left out of both.
pub(crate) fn split_complete_lines(bytes: &[u8]) -> (Vec<&[u8]>, usize) {
    let mut lines = Vec::new();
    let mut consumed = 0;
    while let Some(offset) = bytes[consumed..].iter().position(|b| *b == b'\n') {
        lines.push(&bytes[consumed..consumed + offset]);
        consumed += offset + 1;
    }
    (lines, consumed)
}

/// Follows the inbound stream from its end and feeds decoded values into
/// the correlation buffer.
pub(crate) struct LineTailer {
    path: PathBuf,
    poll_interval: Duration,
    buffer: Arc<CorrelationBuffer>,
    on_parse_error: ParseErrorHook,
    ready: watch::Sender<bool>,
    file: Option<File>,
    position: u64,
    chunk: Vec<u8>,
}

impl LineTailer {
    pub(crate) fn new(
        path: PathBuf,
        poll_interval: Duration,
        buffer: Arc<CorrelationBuffer>,
        on_parse_error: ParseErrorHook,
        ready: watch::Sender<bool>,
    ) -> Self {
        Self {
            path,
            poll_interval,
            buffer,
            on_parse_error,
            ready,
            file: None,
            position: 0,
            chunk: Vec::new(),
        }
    }

    /// Tail until `cancel` fires
    pub(crate) async fn run(mut self, cancel: CancellationToken) {
        if !self.attach(&cancel).await {
            return;
        }

        while !cancel.is_cancelled() {
            match self.poll_once().await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => warn!("Error tailing {}: {}", self.path.display(), e),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        debug!("Inbound tailer for {} stopped", self.path.display());
    }

    /// Wait for the stream to exist, then position at its current end
    async fn attach(&mut self, cancel: &CancellationToken) -> bool {
        let mut announced = false;
        loop {
            match Self::open_at_end(&self.path).await {
                Ok((file, end)) => {
                    self.file = Some(file);
                    self.position = end;
                    self.ready.send_replace(true);
                    info!(
                        "Tailing inbound stream {} from offset {}",
                        self.path.display(),
                        end
                    );
                    return true;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    if !announced {
                        info!("Waiting for inbound stream {} to appear", self.path.display());
                        announced = true;
                    }
                }
                Err(e) => warn!("Failed to open inbound stream {}: {}", self.path.display(), e),
            }

            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    async fn open_at_end(path: &Path) -> std::io::Result<(File, u64)> {
        let mut file = File::open(path).await?;
        let end = file.seek(SeekFrom::End(0)).await?;
        Ok((file, end))
    }

    /// Read whatever complete lines have been appended since the last call.
    ///
    /// Returns whether any bytes were consumed.
    async fn poll_once(&mut self) -> std::io::Result<bool> {
        let len = match tokio::fs::metadata(&self.path).await {
            Ok(metadata) => metadata.len(),
            // Mid-rotation: the old name is gone and the new one not yet created
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e),
        };

        if len < self.position || self.file.is_none() {
            if len < self.position {
                info!(
                    "Inbound stream {} shrank ({} < {}), reading from start",
                    self.path.display(),
                    len,
                    self.position
                );
            }
            self.file = Some(File::open(&self.path).await?);
            self.position = 0;
        }

        if len == self.position {
            return Ok(false);
        }

        let Some(file) = self.file.as_mut() else {
            return Ok(false);
        };
        file.seek(SeekFrom::Start(self.position)).await?;
        self.chunk.clear();
        file.take(len - self.position)
            .read_to_end(&mut self.chunk)
            .await?;

        let (lines, consumed) = split_complete_lines(&self.chunk);
        for line in lines {
            self.dispatch(line);
        }
        self.position += consumed as u64;

        Ok(consumed > 0)
    }

    fn dispatch(&self, line: &[u8]) {
        let line = line.trim_ascii();
        if line.is_empty() {
            return;
        }

        match serde_json::from_slice(line) {
            Ok(value) => self.buffer.insert(value),
            Err(e) => (self.on_parse_error)(&String::from_utf8_lossy(line), &e),
        }
    }
}
