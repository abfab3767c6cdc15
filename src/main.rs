use anyhow::{Context, Result};
use clap::Parser;
use mcp_pipe_bridge::{api, config};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "mcp-pipe-bridge")]
#[command(about = "HTTP request/response bridge over a JSON-lines stream pair", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file (optional; defaults apply when missing)
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Override log format (pretty, json)
    #[arg(long)]
    log_format: Option<String>,

    /// Override the stream requests are written to
    #[arg(long, env = "MCP_OUTBOUND")]
    outbound: Option<PathBuf>,

    /// Override the stream responses are tailed from
    #[arg(long, env = "MCP_INBOUND")]
    inbound: Option<PathBuf>,

    /// Override the HTTP port
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let mut config = config::load_config(&cli.config).with_context(|| {
        format!(
            "Failed to load configuration from: {}",
            cli.config.display()
        )
    })?;

    // Apply CLI overrides
    if let Some(log_level) = cli.log_level {
        config.logging.level = log_level;
    }
    if let Some(log_format) = cli.log_format {
        config.logging.format = log_format;
    }
    if let Some(outbound) = cli.outbound {
        config.bridge.outbound_path = outbound;
    }
    if let Some(inbound) = cli.inbound {
        config.bridge.inbound_path = inbound;
    }
    if let Some(port) = cli.port {
        config.http.port = port;
    }
    config::validate_config(&config).context("Invalid configuration after CLI overrides")?;

    init_logging(&config.logging)?;

    print_banner(&config);

    info!("Starting mcp-pipe-bridge...");
    api::start_server(config).await?;

    Ok(())
}

fn init_logging(config: &config::LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}

fn print_banner(config: &config::AppConfig) {
    let version = env!("CARGO_PKG_VERSION");
    let width = 59usize;
    let border = "═".repeat(width + 2);
    let line = |content: &str| {
        info!("║ {:width$} ║", content, width = width);
    };

    info!("╔{}╗", border);
    line("MCP-PIPE-BRIDGE");
    line(&format!("JSON-lines stream bridge v{}", version));
    info!("╚{}╝", border);
    info!("");
    info!("Bridge Configuration:");
    info!("  → Address: {}:{}", config.http.host, config.http.port);
    info!("  → Outbound: {}", config.bridge.outbound_path.display());
    info!("  → Inbound: {}", config.bridge.inbound_path.display());
    info!("  → Correlation field: {}", config.bridge.correlation_field);
    info!("  → Request timeout: {}ms", config.bridge.request_timeout_ms);
    if config.bridge.retention.is_unbounded() {
        info!("  → Retention: unbounded");
    } else {
        info!(
            "  → Retention: max_age_secs={:?} max_entries={:?}",
            config.bridge.retention.max_age_secs, config.bridge.retention.max_entries
        );
    }
    info!("  → Log Level: {}", config.logging.level);
    info!("");
}
