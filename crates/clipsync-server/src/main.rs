//! clipsync server: entry point.
//!
//! The server is the hub every client connects to.  It owns the TCP listener,
//! answers discovery requests, watches the local clipboard, and relays every
//! clipboard change to all authenticated clients.
//!
//! # Usage
//!
//! ```text
//! clipsync-server [OPTIONS]
//!
//! Options:
//!   --config <FILE>        TOML config file
//!   --port <PORT>          TCP port (fallback ports are tried when taken)
//!   --password <PASSWORD>  Shared password [default: config default_password]
//!   --no-discovery         Do not answer UDP discovery requests
//! ```
//!
//! Every option can also be given through the environment
//! (`CLIPSYNC_CONFIG`, `CLIPSYNC_PORT`, `CLIPSYNC_PASSWORD`).
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ SyncConfig::load()        -- optional TOML file + CLI overrides
//!  └─ start services
//!       ├─ TransportServer      (TCP accept loop + per-connection tasks)
//!       ├─ DiscoveryService     (UDP responder, advertises the bound port)
//!       ├─ ClipboardWatcher     (polling task)
//!       └─ HubRelay::run        (until Ctrl-C)
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use clipsync_core::{
    ClipboardWatcher, DiscoveryRole, DiscoveryService, HistoryStore, PlatformClipboard, SyncConfig,
};
use clipsync_server::application::hub_relay::{ClipboardBroadcaster, HubRelay};
use clipsync_server::infrastructure::network::TransportServer;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// LAN clipboard sync hub.
#[derive(Debug, Parser)]
#[command(
    name = "clipsync-server",
    about = "Shares the clipboard with every clipsync client on the LAN",
    version
)]
struct Cli {
    /// TOML configuration file.  Every field is optional.
    #[arg(long, env = "CLIPSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// TCP port to listen on, overriding the config file.
    #[arg(long, env = "CLIPSYNC_PORT")]
    port: Option<u16>,

    /// Shared password.  Falls back to `default_password` from the config.
    #[arg(long, env = "CLIPSYNC_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Do not answer UDP discovery requests.
    #[arg(long)]
    no_discovery: bool,
}

impl Cli {
    /// Builds the validated configuration: defaults, then the config file,
    /// then CLI overrides.
    fn load_config(&self) -> anyhow::Result<SyncConfig> {
        let config = match &self.config {
            Some(path) => SyncConfig::load(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => SyncConfig::default(),
        };
        let config = match self.port {
            Some(port) => config.with_tcp_port(port).context("invalid --port")?,
            None => config,
        };
        Ok(config)
    }

    fn password(&self, config: &SyncConfig) -> String {
        self.password
            .clone()
            .unwrap_or_else(|| config.default_password.clone())
    }
}

// ── Clipboard backend ─────────────────────────────────────────────────────────

#[cfg(feature = "system-clipboard")]
fn open_clipboard() -> anyhow::Result<clipsync_core::SystemClipboard> {
    clipsync_core::SystemClipboard::new().context("failed to open the system clipboard")
}

#[cfg(not(feature = "system-clipboard"))]
fn open_clipboard() -> anyhow::Result<clipsync_core::MockClipboard> {
    warn!("built without the system-clipboard feature; using an in-memory clipboard");
    Ok(clipsync_core::MockClipboard::new())
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;

    // `RUST_LOG` wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    let password = cli.password(&config);
    if password == config.default_password {
        warn!("using the default password; set --password or CLIPSYNC_PASSWORD");
    }

    let clipboard = open_clipboard()?;
    run(Arc::new(config), password, clipboard, !cli.no_discovery).await
}

async fn run<C: PlatformClipboard>(
    config: Arc<SyncConfig>,
    password: String,
    clipboard: C,
    discovery_enabled: bool,
) -> anyhow::Result<()> {
    info!("clipsync server starting");

    // ── Transport ─────────────────────────────────────────────────────────────
    let server = Arc::new(TransportServer::new(Arc::clone(&config)));
    let server_events = server
        .start(password)
        .await
        .context("failed to start the transport server")?;
    let port = server
        .local_port()
        .await
        .context("transport server stopped during startup")?;

    // ── Discovery responder ───────────────────────────────────────────────────
    let discovery = DiscoveryService::new(Arc::clone(&config));
    if discovery_enabled {
        match discovery.start(DiscoveryRole::Server { tcp_port: port }).await {
            Ok(_events) => info!("answering discovery requests on UDP {}", config.udp_port),
            Err(e) => error!("discovery unavailable, clients must connect directly: {e}"),
        }
    }

    // ── Clipboard watcher + relay ─────────────────────────────────────────────
    let history = HistoryStore::shared(config.history_size);
    let watcher = ClipboardWatcher::new(Arc::clone(&config), clipboard, history);
    let local_changes = watcher.start().await;
    let relay = HubRelay::new(
        Arc::clone(&config),
        Arc::clone(&server) as Arc<dyn ClipboardBroadcaster>,
        watcher.clone(),
    );

    info!("clipsync server ready on TCP {port}.  Press Ctrl-C to exit.");

    tokio::select! {
        _ = relay.run(local_changes, server_events) => {
            warn!("relay loop ended unexpectedly");
        }
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => info!("shutdown signal received"),
                Err(e) => error!("failed to listen for Ctrl-C: {e}"),
            }
        }
    }

    watcher.stop().await;
    discovery.stop().await;
    server.stop().await;
    info!("clipsync server stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults_use_config_defaults() {
        // Arrange
        let cli = Cli::parse_from(["clipsync-server"]);

        // Act
        let config = cli.load_config().unwrap();

        // Assert
        assert_eq!(config.tcp_port, 8888);
        assert_eq!(cli.password(&config), config.default_password);
        assert!(!cli.no_discovery);
    }

    #[test]
    fn test_cli_port_and_password_override() {
        let cli = Cli::parse_from(["clipsync-server", "--port", "9100", "--password", "s3cret"]);
        let config = cli.load_config().unwrap();
        assert_eq!(config.tcp_port, 9100);
        assert_eq!(cli.password(&config), "s3cret");
    }

    #[test]
    fn test_cli_privileged_port_is_rejected() {
        let cli = Cli::parse_from(["clipsync-server", "--port", "80"]);
        assert!(cli.load_config().is_err());
    }

    #[test]
    fn test_cli_missing_config_file_is_an_error() {
        let cli = Cli::parse_from(["clipsync-server", "--config", "/nonexistent/clipsync.toml"]);
        let err = cli.load_config().unwrap_err();
        assert!(err.to_string().contains("failed to load config"));
    }
}
