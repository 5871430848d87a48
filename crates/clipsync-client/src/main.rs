//! clipsync client: entry point.
//!
//! Finds the hub (by UDP discovery unless `--host` is given), connects,
//! authenticates, and then keeps the local clipboard in sync until Ctrl-C or
//! until the connection is lost for good.
//!
//! # Usage
//!
//! ```text
//! clipsync-client [OPTIONS]
//!
//! Options:
//!   --config <FILE>        TOML config file
//!   --host <HOST>          Connect directly instead of using discovery
//!   --port <PORT>          Server TCP port used with --host [default: config tcp_port]
//!   --password <PASSWORD>  Shared password [default: config default_password]
//! ```
//!
//! Environment: `CLIPSYNC_CONFIG`, `CLIPSYNC_HOST`, `CLIPSYNC_PORT`,
//! `CLIPSYNC_PASSWORD`.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ resolve server        -- --host, or first DiscoveryEvent::ServerFound
//!  └─ TransportClient::connect()   -- bounded reconnect loop
//!  └─ ClipboardWatcher::start()    -- polling task
//!  └─ keepalive task               -- PING every ping_interval
//!  └─ PeerSync::run                -- until the client gives up or Ctrl-C
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use clipsync_client::application::peer_sync::{ClipboardSender, PeerSync};
use clipsync_client::infrastructure::network::{ConnectionTarget, TransportClient};
use clipsync_core::{
    ClipboardWatcher, DiscoveryEvent, DiscoveryRole, DiscoveryService, HistoryStore,
    PlatformClipboard, SyncConfig,
};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// LAN clipboard sync client.
#[derive(Debug, Parser)]
#[command(
    name = "clipsync-client",
    about = "Keeps this machine's clipboard in sync with a clipsync server",
    version
)]
struct Cli {
    /// TOML configuration file.  Every field is optional.
    #[arg(long, env = "CLIPSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Server host or IP.  Without it the server is found by UDP discovery.
    #[arg(long, env = "CLIPSYNC_HOST")]
    host: Option<String>,

    /// Server TCP port, used together with `--host`.
    #[arg(long, env = "CLIPSYNC_PORT")]
    port: Option<u16>,

    /// Shared password.  Falls back to `default_password` from the config.
    #[arg(long, env = "CLIPSYNC_PASSWORD", hide_env_values = true)]
    password: Option<String>,
}

impl Cli {
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

    /// The direct target, when `--host` was given.
    fn direct_target(&self, config: &SyncConfig) -> Option<ConnectionTarget> {
        self.host
            .as_ref()
            .map(|host| ConnectionTarget::new(host.clone(), config.tcp_port, self.password(config)))
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

    let config = Arc::new(config);
    let target = match cli.direct_target(&config) {
        Some(target) => target,
        None => {
            let password = cli.password(&config);
            tokio::select! {
                found = discover_server(&config, password) => found?,
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupted while searching for a server");
                    return Ok(());
                }
            }
        }
    };

    let clipboard = open_clipboard()?;
    run(config, target, clipboard).await
}

/// Broadcasts discovery requests until the first server answers.
async fn discover_server(
    config: &Arc<SyncConfig>,
    password: String,
) -> anyhow::Result<ConnectionTarget> {
    let discovery = DiscoveryService::new(Arc::clone(config));
    let mut events = discovery
        .start(DiscoveryRole::Client)
        .await
        .context("failed to start discovery")?;
    info!("searching for a clipsync server on UDP {}", config.udp_port);

    let found = events.recv().await;
    discovery.stop().await;
    match found {
        Some(DiscoveryEvent::ServerFound(server)) => {
            info!("found server {} at {}:{}", server.hostname, server.ip, server.port);
            Ok(ConnectionTarget::new(server.ip.to_string(), server.port, password))
        }
        None => anyhow::bail!("discovery stopped before any server answered"),
    }
}

async fn run<C: PlatformClipboard>(
    config: Arc<SyncConfig>,
    target: ConnectionTarget,
    clipboard: C,
) -> anyhow::Result<()> {
    info!("clipsync client starting");

    let client = Arc::new(TransportClient::new(Arc::clone(&config)));
    let client_events = client.connect(target).await;

    let history = HistoryStore::shared(config.history_size);
    let watcher = ClipboardWatcher::new(Arc::clone(&config), clipboard, history);
    let local_changes = watcher.start().await;

    // ── Keepalive ─────────────────────────────────────────────────────────────
    let keepalive = config.ping_interval().map(|period| {
        let client = Arc::clone(&client);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if client.is_connected().await {
                    if let Err(e) = client.send_ping().await {
                        warn!("keepalive ping failed: {e}");
                    }
                }
            }
        })
    });

    let sync = PeerSync::new(
        Arc::clone(&config),
        Arc::clone(&client) as Arc<dyn ClipboardSender>,
        watcher.clone(),
    );

    tokio::select! {
        _ = sync.run(local_changes, client_events) => {
            error!("connection to the server ended; exiting");
        }
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => info!("shutdown signal received"),
                Err(e) => error!("failed to listen for Ctrl-C: {e}"),
            }
        }
    }

    if let Some(handle) = keepalive {
        handle.abort();
    }
    watcher.stop().await;
    client.disconnect().await;
    info!("clipsync client stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
