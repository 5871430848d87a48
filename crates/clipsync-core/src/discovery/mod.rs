//! UDP broadcast discovery of clipsync servers.
//!
//! # How discovery works (for beginners)
//!
//! 1. A client binds the discovery port and broadcasts the request string
//!    `CLIPBOARD_SYNC_DISCOVERY` to its subnet broadcast address, right away
//!    and then every `broadcast_interval`.
//!
//! 2. A server listening on the same port answers with a unicast datagram
//!    back to the requester's source address:
//!    `CLIPBOARD_SYNC_SERVER:<server ip>:<tcp port>`.
//!
//! 3. The client parses the response and records the server.  The first
//!    response from a given `ip:port` produces a
//!    [`DiscoveryEvent::ServerFound`]; repeats only refresh `last_seen`.
//!
//! Discovery traffic is neither authenticated nor encrypted.  It only reveals
//! where a server listens; the TCP transport still requires the password.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;

pub mod address;
pub mod table;

pub use address::{broadcast_address, local_ipv4, select_broadcast_address, LocalInterface};
pub use table::{DiscoveredServer, DiscoveryTable};

/// Largest datagram the service reads.
const RECV_BUFFER_LEN: usize = 1024;

/// Error type for discovery service operations.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The UDP socket could not be bound.
    #[error("failed to bind discovery socket on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    /// Broadcast could not be enabled on the socket.
    #[error("failed to configure discovery socket: {0}")]
    Socket(#[source] std::io::Error),
}

/// Which half of the exchange this process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryRole {
    /// Answer requests, advertising `tcp_port`.
    Server { tcp_port: u16 },
    /// Broadcast requests and collect responses.
    Client,
}

/// Events produced by the discovery service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// A server key was seen for the first time.
    ServerFound(DiscoveredServer),
}

/// What an incoming datagram is, from this role's point of view.
#[derive(Debug, PartialEq, Eq)]
enum Datagram {
    Request,
    Response { ip: Ipv4Addr, port: u16 },
    Ignored,
}

fn classify(config: &SyncConfig, role: DiscoveryRole, text: &str) -> Datagram {
    let text = text.trim();
    match role {
        DiscoveryRole::Server { .. } if text == config.discovery_message => Datagram::Request,
        DiscoveryRole::Client => {
            match address::parse_response(&config.discovery_response_prefix, text) {
                Some((ip, port)) => Datagram::Response { ip, port },
                None => Datagram::Ignored,
            }
        }
        _ => Datagram::Ignored,
    }
}

/// The discovery service.
pub struct DiscoveryService {
    config: Arc<SyncConfig>,
    table: Arc<Mutex<DiscoveryTable>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl DiscoveryService {
    pub fn new(config: Arc<SyncConfig>) -> Self {
        Self {
            config,
            table: Arc::new(Mutex::new(DiscoveryTable::new())),
            task: Mutex::new(None),
        }
    }

    /// Binds `0.0.0.0:<udp_port>` and starts the service in `role`.
    ///
    /// The returned receiver yields [`DiscoveryEvent`]s; in the server role
    /// it never yields anything.  Starting again replaces the running task.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::BindFailed`] if the port is unavailable and
    /// [`DiscoveryError::Socket`] if broadcast cannot be enabled.
    pub async fn start(
        &self,
        role: DiscoveryRole,
    ) -> Result<mpsc::Receiver<DiscoveryEvent>, DiscoveryError> {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.config.udp_port));
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| DiscoveryError::BindFailed { addr, source })?;
        socket.set_broadcast(true).map_err(DiscoveryError::Socket)?;

        let (tx, rx) = mpsc::channel(32);
        let config = Arc::clone(&self.config);
        let table = Arc::clone(&self.table);
        let handle = tokio::spawn(discovery_loop(socket, role, config, table, tx));

        if let Some(previous) = self.task.lock().await.replace(handle) {
            previous.abort();
        }
        info!("discovery started on UDP {addr} as {role:?}");
        Ok(rx)
    }

    /// Stops the service, closes the socket and forgets every discovered
    /// server.  Safe to call more than once.
    pub async fn stop(&self) {
        if let Some(handle) = self.task.lock().await.take() {
            handle.abort();
            info!("discovery stopped");
        }
        self.table.lock().await.clear();
    }

    pub async fn is_running(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Servers found so far, most recently seen first.
    pub async fn discovered_servers(&self) -> Vec<DiscoveredServer> {
        self.table.lock().await.snapshot()
    }
}

async fn discovery_loop(
    socket: UdpSocket,
    role: DiscoveryRole,
    config: Arc<SyncConfig>,
    table: Arc<Mutex<DiscoveryTable>>,
    tx: mpsc::Sender<DiscoveryEvent>,
) {
    let broadcasting = role == DiscoveryRole::Client;
    let mut ticker = tokio::time::interval(config.broadcast_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut buf = vec![0u8; RECV_BUFFER_LEN];

    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => {
                let (len, src) = match received {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!("discovery recv error: {e}");
                        continue;
                    }
                };
                let text = String::from_utf8_lossy(&buf[..len]);
                match classify(&config, role, &text) {
                    Datagram::Request => {
                        if let DiscoveryRole::Server { tcp_port } = role {
                            respond(&socket, &config, tcp_port, src).await;
                        }
                    }
                    Datagram::Response { ip, port } => {
                        let server = DiscoveredServer {
                            ip,
                            port,
                            hostname: src.ip().to_string(),
                            last_seen: Utc::now(),
                        };
                        let is_new = table.lock().await.record(server.clone());
                        if is_new {
                            info!("discovered server {ip}:{port} (from {src})");
                            if tx.send(DiscoveryEvent::ServerFound(server)).await.is_err() {
                                debug!("discovery event receiver dropped");
                                break;
                            }
                        }
                    }
                    Datagram::Ignored => {
                        debug!("ignoring discovery datagram from {src}");
                    }
                }
            }
            _ = ticker.tick(), if broadcasting => {
                // Interfaces can come up or change address after start.
                let target = broadcast_target(config.udp_port);
                if let Err(e) = socket
                    .send_to(config.discovery_message.as_bytes(), target)
                    .await
                {
                    warn!("failed to broadcast discovery request to {target}: {e}");
                } else {
                    debug!("broadcast discovery request to {target}");
                }
            }
        }
    }
}

/// Where a discovery request goes right now.
fn broadcast_target(udp_port: u16) -> SocketAddrV4 {
    SocketAddrV4::new(
        select_broadcast_address(&address::local_ipv4_interfaces()),
        udp_port,
    )
}

/// Sends the response datagram to the requester.
async fn respond(socket: &UdpSocket, config: &SyncConfig, tcp_port: u16, dest: SocketAddr) {
    let ip = local_ipv4().unwrap_or(Ipv4Addr::LOCALHOST);
    let reply = address::format_response(&config.discovery_response_prefix, ip, tcp_port);
    match socket.send_to(reply.as_bytes(), dest).await {
        Ok(_) => debug!("answered discovery request from {dest}"),
        Err(e) => warn!("failed to answer discovery request from {dest}: {e}"),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
