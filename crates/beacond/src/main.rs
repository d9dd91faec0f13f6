//! # beacond
//!
//! Beacon server binary: loads settings, wires the broadcast core and starts
//! the HTTP/WebSocket server.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use beacon_core::logging::{LogFormat, init_subscriber};
use beacon_server::auth::TokenAuthenticator;
use beacon_server::config::{ServerConfig, WS_PATH};
use beacon_server::processing::ProcessorRegistry;
use beacon_server::server::BeaconServer;
use beacon_server::shutdown::SHUTDOWN_GRACE;
use beacon_server::visibility::VerifierRegistry;
use beacon_settings::{BeaconSettings, get_settings, init_settings, load_settings_from_path, settings_path};
use clap::Parser;
use tracing::{info, warn};

/// Beacon system-events server.
#[derive(Parser, Debug)]
#[command(name = "beacond", about = "Beacon system-events server")]
struct Cli {
    /// Settings file (defaults to `~/.beacon/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Log level or filter directive (overrides settings).
    #[arg(long)]
    log_level: Option<String>,

    /// Enable or disable ping/pong keepalive (overrides settings).
    #[arg(long)]
    keepalive: Option<bool>,
}

impl Cli {
    fn apply(&self, settings: &mut BeaconSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if let Some(enabled) = self.keepalive {
            settings.websocket.keepalive.enabled = enabled;
        }
    }
}

/// Settings file, then env vars, then command-line flags.
fn load(cli: &Cli) -> Result<BeaconSettings> {
    let path = cli.settings.clone().unwrap_or_else(settings_path);
    let mut settings = load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    cli.apply(&mut settings);
    settings.validate();
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load(&cli)?;

    init_subscriber(
        &settings.logging.level,
        LogFormat::from_name(&settings.logging.format),
    );
    if init_settings(settings).is_err() {
        warn!("settings were already initialized");
    }
    let settings = get_settings();

    let metrics_handle = beacon_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    let authenticator = TokenAuthenticator::from_settings(&settings.auth);
    if authenticator.is_empty() {
        warn!("no auth tokens configured, every websocket connection will be rejected");
    }

    let server = BeaconServer::new(
        ServerConfig::from(settings),
        Arc::new(authenticator),
        VerifierRegistry::with_defaults(),
        ProcessorRegistry::with_defaults(),
    )
    .with_metrics(metrics_handle);

    let (addr, handle) = server.listen().await.context("Failed to bind listener")?;
    info!(
        version = %settings.version,
        keepalive = server.keepalive().is_enabled(),
        emit = server.config().emit_token.is_some(),
        "Beacon listening on ws://{addr}{WS_PATH}"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    info!("Shutting down...");
    if server.shutdown().drain(handle, SHUTDOWN_GRACE).await {
        info!("Shutdown complete");
    }
    Ok(())
}
