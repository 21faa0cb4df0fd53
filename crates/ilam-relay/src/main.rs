//! # ilam-relay
//!
//! Relay server binary: loads settings, starts logging and metrics, and
//! serves the relay until interrupted.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use ilam_server::config::ServerConfig;
use ilam_server::metrics::{install_recorder, metrics_router};
use ilam_server::server::RelayServer;
use ilam_settings::loader::{apply_env_overrides, parse_log_level, read_settings_file};
use ilam_settings::{LogFormat, RelaySettings, settings_path};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// WebSocket relay server.
#[derive(Parser, Debug)]
#[command(name = "ilam", version, about = "WebSocket relay server")]
struct Cli {
    /// Settings file (defaults to `~/.ilam/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address, `host:port`.
    #[arg(long)]
    addr: Option<String>,

    /// Required `Origin` for WebSocket upgrades.
    #[arg(long)]
    origin: Option<String>,

    /// PEM certificate chain. Enables TLS together with `--key`.
    #[arg(long)]
    cert: Option<PathBuf>,

    /// PEM private key.
    #[arg(long)]
    key: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

/// Settings file, then `ILAM_*` env, then command-line flags.
fn resolve_settings(cli: &Cli) -> Result<RelaySettings> {
    let path = cli.config.clone().unwrap_or_else(settings_path);
    let mut settings = read_settings_file(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    apply_env_overrides(&mut settings);
    apply_cli(&mut settings, cli)?;
    settings.validate().context("Invalid settings")?;
    Ok(settings)
}

fn apply_cli(settings: &mut RelaySettings, cli: &Cli) -> Result<()> {
    if let Some(ref addr) = cli.addr {
        settings.server.addr.clone_from(addr);
    }
    if let Some(ref origin) = cli.origin {
        settings.server.origin.clone_from(origin);
    }
    if let Some(ref cert) = cli.cert {
        settings.server.cert_path = Some(cert.clone());
    }
    if let Some(ref key) = cli.key {
        settings.server.key_path = Some(key.clone());
    }
    if let Some(ref level) = cli.log_level {
        let Some(level) = parse_log_level(level) else {
            bail!("unknown log level {level:?}");
        };
        settings.logging.level = level;
    }
    Ok(())
}

fn init_logging(settings: &RelaySettings) {
    let level = settings.logging.level.as_filter_str();
    match settings.logging.format {
        LogFormat::Compact => ilam_core::logging::init_subscriber(level),
        LogFormat::Json => ilam_core::logging::init_json_subscriber(level),
    }
}

/// Serve `/metrics` on its own listener until the relay shuts down.
async fn start_metrics(addr: &str, server: &RelayServer) -> Result<JoinHandle<()>> {
    let handle = install_recorder().context("Failed to install metrics recorder")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind metrics listener on {addr}"))?;
    let local = listener.local_addr()?;
    let token = server.shutdown().token();

    info!(addr = %local, "metrics listening");
    Ok(tokio::spawn(async move {
        let result = axum::serve(listener, metrics_router(handle))
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await;
        if let Err(error) = result {
            warn!(%error, "metrics server error");
        }
    }))
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut terminate =
            signal(SignalKind::terminate()).context("Failed to listen for SIGTERM")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.context("Failed to listen for ctrl-c")?,
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = resolve_settings(&cli)?;
    init_logging(&settings);

    let config = ServerConfig::from_settings(&settings.server);
    info!(
        version = ilam_core::constants::VERSION,
        addr = %config.addr,
        tls = config.tls_paths().is_some(),
        origin = %config.allow_origin(),
        max_connections = config.max_connections,
        heartbeat_interval_secs = config.heartbeat_interval_secs,
        idle_timeout_secs = config.idle_timeout_secs,
        "starting relay"
    );

    let server = Arc::new(RelayServer::new(config));
    let mut handles = Vec::new();
    if let Some(ref metrics_addr) = settings.server.metrics_addr {
        handles.push(start_metrics(metrics_addr, &server).await?);
    }

    let (addr, handle) = server.listen().await.context("Failed to start relay")?;
    handles.push(handle);
    info!(%addr, "relay ready");

    shutdown_signal().await?;
    info!(connections = server.registry().count(), "shutting down");
    let remaining = server
        .shutdown()
        .graceful_shutdown(server.registry(), handles, None)
        .await;

    info!(remaining, "shutdown complete");
    Ok(())
}
