use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// Wiring for one bridge instance: the stream pair plus timing knobs
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Stream requests are written to (read by the external process)
    pub outbound_path: PathBuf,
    /// Stream responses are tailed from (written by the external process)
    pub inbound_path: PathBuf,
    /// Name of the envelope field linking a response to its request
    pub correlation_field: String,
    pub request_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub open_retry_ms: u64,
    pub retention: RetentionConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            outbound_path: PathBuf::from("/tmp/mcp_in"),
            inbound_path: PathBuf::from("/tmp/mcp_out"),
            correlation_field: "correlation_id".to_string(),
            request_timeout_ms: 10_000,
            poll_interval_ms: 50,
            open_retry_ms: 100,
            retention: RetentionConfig::default(),
        }
    }
}

impl BridgeConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn open_retry(&self) -> Duration {
        Duration::from_millis(self.open_retry_ms)
    }
}

/// Bounds on unclaimed responses. Unset fields mean unbounded retention.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetentionConfig {
    pub max_age_secs: Option<u64>,
    pub max_entries: Option<usize>,
}

impl RetentionConfig {
    pub fn max_age(&self) -> Option<Duration> {
        self.max_age_secs.map(Duration::from_secs)
    }

    pub fn is_unbounded(&self) -> bool {
        self.max_age_secs.is_none() && self.max_entries.is_none()
    }
}
