pub mod types;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use std::path::Path;
pub use types::*;

/// Environment prefix for overrides, e.g. `PIPE_BRIDGE__BRIDGE__INBOUND_PATH`
pub const ENV_PREFIX: &str = "PIPE_BRIDGE";

/// Load configuration from an optional TOML file layered under environment overrides
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    let path = path.as_ref();

    let config = Config::builder()
        .add_source(File::from(path).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .with_context(|| format!("Failed to load config from: {}", path.display()))?;

    let app_config: AppConfig = config
        .try_deserialize()
        .context("Failed to deserialize configuration")?;

    validate_config(&app_config)?;

    Ok(app_config)
}

/// Validate the loaded configuration
pub fn validate_config(config: &AppConfig) -> Result<()> {
    validate_bridge(&config.bridge)?;

    // Validate log level
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.logging.level.as_str()) {
        anyhow::bail!(
            "Invalid log level '{}'. Valid levels: {}",
            config.logging.level,
            valid_levels.join(", ")
        );
    }

    // Validate log format
    let valid_formats = ["pretty", "json"];
    if !valid_formats.contains(&config.logging.format.as_str()) {
        anyhow::bail!(
            "Invalid log format '{}'. Valid formats: {}",
            config.logging.format,
            valid_formats.join(", ")
        );
    }

    Ok(())
}

pub(crate) fn validate_bridge(bridge: &BridgeConfig) -> Result<()> {
    if bridge.correlation_field.trim().is_empty() {
        anyhow::bail!("Correlation field name must not be empty");
    }

    if bridge.outbound_path == bridge.inbound_path {
        anyhow::bail!(
            "Outbound and inbound streams must differ (both are '{}')",
            bridge.outbound_path.display()
        );
    }

    for (name, value) in [
        ("request_timeout_ms", bridge.request_timeout_ms),
        ("poll_interval_ms", bridge.poll_interval_ms),
        ("open_retry_ms", bridge.open_retry_ms),
    ] {
        if value == 0 {
            anyhow::bail!("bridge.{} must be greater than zero", name);
        }
    }

    if bridge.retention.max_entries == Some(0) {
        anyhow::bail!("bridge.retention.max_entries must be greater than zero when set");
    }

    Ok(())
}
