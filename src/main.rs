use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use switchyard_core::engine::{ServerInfo, StaticEngine};
use switchyard_server::{ReplyMode, ServerConfig};
use switchyard_telemetry::{LogFormat, TelemetryConfig};

/// JSON-RPC session router over legacy and unified HTTP event-stream bindings.
#[derive(Debug, Parser)]
#[command(name = "switchyard", version, about)]
struct Cli {
    #[arg(long, env = "SWITCHYARD_HOST", default_value = "127.0.0.1")]
    host: String,

    #[arg(long, env = "SWITCHYARD_PORT", default_value_t = 8787)]
    port: u16,

    #[arg(long, env = "SWITCHYARD_LEGACY_SSE_PATH", default_value = "/sse")]
    legacy_sse_path: String,

    #[arg(long, env = "SWITCHYARD_LEGACY_MESSAGE_PATH", default_value = "/messages")]
    legacy_message_path: String,

    #[arg(long, env = "SWITCHYARD_UNIFIED_PATH", default_value = "/mcp")]
    unified_path: String,

    #[arg(
        long,
        env = "SWITCHYARD_PROTOCOL_VERSION",
        default_value = switchyard_server::config::DEFAULT_PROTOCOL_VERSION
    )]
    protocol_version: String,

    /// Where replies on an existing unified session go: inline or stream.
    #[arg(long, env = "SWITCHYARD_REPLY_MODE", default_value_t = ReplyMode::Inline)]
    reply_mode: ReplyMode,

    #[arg(long, env = "SWITCHYARD_MAX_SEND_QUEUE", default_value_t = 256)]
    max_send_queue: usize,

    /// Seconds between keep-alive comments (0 disables).
    #[arg(long, env = "SWITCHYARD_KEEP_ALIVE_SECS", default_value_t = 15)]
    keep_alive_secs: u64,

    /// Seconds without inbound traffic before a session is closed (0 disables).
    #[arg(long, env = "SWITCHYARD_IDLE_TIMEOUT_SECS", default_value_t = 3600)]
    idle_timeout_secs: u64,

    #[arg(long, env = "SWITCHYARD_SWEEP_INTERVAL_SECS", default_value_t = 60)]
    sweep_interval_secs: u64,

    #[arg(long, env = "SWITCHYARD_LOG_LEVEL", default_value = "info")]
    log_level: tracing::Level,

    #[arg(long, env = "SWITCHYARD_LOG_FORMAT", default_value_t = LogFormat::Json)]
    log_format: LogFormat,
}

impl Cli {
    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.host.clone(),
            port: self.port,
            legacy_sse_path: self.legacy_sse_path.clone(),
            legacy_message_path: self.legacy_message_path.clone(),
            unified_path: self.unified_path.clone(),
            protocol_version: self.protocol_version.clone(),
            reply_mode: self.reply_mode,
            max_send_queue: self.max_send_queue,
            keep_alive_secs: self.keep_alive_secs,
            idle_timeout_secs: self.idle_timeout_secs,
            sweep_interval_secs: self.sweep_interval_secs,
        }
    }

    fn telemetry_config(&self) -> TelemetryConfig {
        TelemetryConfig {
            log_level: self.log_level,
            format: self.log_format,
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    switchyard_telemetry::init_telemetry(&cli.telemetry_config())
        .context("failed to initialize logging")?;

    tracing::info!("Starting Switchyard");

    // Built-in engine: advertises an empty tool set.
    let engine = StaticEngine::new(ServerInfo::new("switchyard", env!("CARGO_PKG_VERSION")))
        .with_capabilities(json!({"tools": {"listChanged": false}}))
        .with_method("tools/list", json!({"tools": []}));

    let handle = switchyard_server::start(cli.server_config(), Arc::new(engine))
        .await
        .context("failed to start server")?;

    tracing::info!(port = handle.port, "Switchyard ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    tracing::info!("Shutting down");
    handle.shutdown().await;
    Ok(())
}
