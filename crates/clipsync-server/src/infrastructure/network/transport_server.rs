//! TransportServer: accepts peer connections, authenticates them, and routes
//! encrypted clipboard messages.
//!
//! # Connection lifecycle (for beginners)
//!
//! ```text
//! accept ──► Unauthenticated ──(AUTH with the right password)──► Authenticated
//!                 │                                                    │
//!                 └──(anything else)──► AUTH_FAIL + close        (close)──► Removed
//! ```
//!
//! - The first frame on a connection must be `AUTH` carrying the server's
//!   password.  A wrong password gets `AUTH_FAIL "Invalid password"`, any other
//!   message gets `AUTH_FAIL "Authentication required"`, and the connection is
//!   closed.  A frame that cannot even be decrypted is closed without a reply.
//! - Once authenticated, `PING` is answered with `PONG` right away and every
//!   other message is reported as [`ServerEvent::MessageReceived`].  Frames
//!   that fail to decrypt are logged and dropped.
//!
//! # Tasks per connection
//!
//! Each socket is split in two.  A reader task reassembles frames in arrival
//! order and drives the state machine.  A writer task drains a bounded queue
//! of encoded frames.  Broadcasting only pushes onto these queues, so one slow
//! peer never stalls the others; a full queue drops the frame for that peer.
//!
//! # Port fallback
//!
//! [`TransportServer::start`] tries `tcp_port` and then each fallback port,
//! awaiting every bind, and keeps the first listener that binds.  It returns
//! only once a listener is bound (or every port failed).

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use clipsync_core::protocol::messages::{AUTH_FAIL_INVALID_PASSWORD, AUTH_FAIL_REQUIRED};
use clipsync_core::{decode_frame, encode_frame, EncryptionContext, LineFramer, SyncConfig, SyncMessage};
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::application::hub_relay::ClipboardBroadcaster;

/// A connected peer is identified by its remote `address:port`.
pub type ClientId = SocketAddr;

/// Frames that may wait in one connection's outbound queue.
const OUTBOUND_QUEUE_LEN: usize = 64;

/// Capacity of the server event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

const READ_BUFFER_LEN: usize = 16 * 1024;

/// Error type for transport server operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Binding failed for a reason other than the port being taken.
    #[error("bind failed on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    /// The primary port and every fallback port are in use.
    #[error("all ports in use: {ports:?}")]
    PortsExhausted { ports: Vec<u16> },
    #[error("server is already running")]
    AlreadyRunning,
    #[error("server is not running")]
    NotRunning,
    /// No authenticated connection with this id.
    #[error("client not found: {0}")]
    ClientNotFound(ClientId),
    /// The client's outbound queue is full or closed.
    #[error("could not queue message for {0}")]
    QueueFull(ClientId),
    #[error("failed to encode frame: {0}")]
    Encode(#[from] clipsync_core::ProtocolError),
}

/// Events emitted by the transport server to the application layer.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// A connection completed authentication.
    ClientConnected { client_id: ClientId },
    /// An authenticated connection closed.
    ClientDisconnected { client_id: ClientId },
    /// An authenticated client sent a message other than `PING`.
    MessageReceived {
        client_id: ClientId,
        message: SyncMessage,
    },
}

/// Snapshot returned by [`TransportServer::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    pub running: bool,
    pub port: Option<u16>,
    pub client_count: usize,
}

/// What the state machine decided for one incoming frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    /// The connection is now authenticated; reply `AUTH_SUCCESS`.
    Authenticated,
    /// Close the connection, after sending `reply` if there is one.
    Reject { reply: Option<SyncMessage> },
    /// Send `reply` back on the same connection.
    Reply(SyncMessage),
    /// Hand the message to the application layer.
    Deliver(SyncMessage),
    /// Drop the frame.
    Ignore,
}

/// Runs one frame through the per-connection state machine.
///
/// Pure: no I/O, so every branch can be unit tested.
pub fn process_frame(
    ctx: &EncryptionContext,
    authenticated: bool,
    line: &str,
    password: &str,
) -> FrameOutcome {
    let message = match decode_frame(ctx, line, password) {
        Ok(message) => message,
        Err(e) if authenticated => {
            warn!("dropping undecryptable frame: {e}");
            return FrameOutcome::Ignore;
        }
        Err(e) => {
            debug!("undecryptable frame before authentication: {e}");
            return FrameOutcome::Reject { reply: None };
        }
    };

    if !authenticated {
        return match message {
            SyncMessage::Auth { password: given } if given == password => {
                FrameOutcome::Authenticated
            }
            SyncMessage::Auth { .. } => FrameOutcome::Reject {
                reply: Some(SyncMessage::auth_fail(AUTH_FAIL_INVALID_PASSWORD)),
            },
            _ => FrameOutcome::Reject {
                reply: Some(SyncMessage::auth_fail(AUTH_FAIL_REQUIRED)),
            },
        };
    }

    match message {
        SyncMessage::Ping => FrameOutcome::Reply(SyncMessage::Pong),
        other => FrameOutcome::Deliver(other),
    }
}

/// Server-side record of one connection.
struct ClientConnection {
    authenticated: bool,
    outbound: mpsc::Sender<String>,
    reader: Option<JoinHandle<()>>,
    writer: JoinHandle<()>,
}

impl ClientConnection {
    fn abort(self) {
        if let Some(reader) = self.reader {
            reader.abort();
        }
        self.writer.abort();
    }
}

type ClientTable = Arc<Mutex<HashMap<ClientId, ClientConnection>>>;

struct RunningServer {
    port: u16,
    password: Arc<str>,
    accept_task: JoinHandle<()>,
}

/// Everything a connection task needs, cloned into each task.
#[derive(Clone)]
struct ConnectionContext {
    config: Arc<SyncConfig>,
    ctx: EncryptionContext,
    password: Arc<str>,
    clients: ClientTable,
    events: mpsc::Sender<ServerEvent>,
}

/// The transport server.
pub struct TransportServer {
    config: Arc<SyncConfig>,
    ctx: EncryptionContext,
    clients: ClientTable,
    running: Mutex<Option<RunningServer>>,
}

impl TransportServer {
    pub fn new(config: Arc<SyncConfig>) -> Self {
        Self {
            config,
            ctx: EncryptionContext::new(),
            clients: Arc::new(Mutex::new(HashMap::new())),
            running: Mutex::new(None),
        }
    }

    /// Binds a listener (with port fallback) and starts accepting peers that
    /// know `password`.
    ///
    /// # Errors
    ///
    /// - [`TransportError::AlreadyRunning`] if called twice without `stop`.
    /// - [`TransportError::PortsExhausted`] if every configured port is taken.
    /// - [`TransportError::BindFailed`] for any other bind failure.
    pub async fn start(
        &self,
        password: impl Into<String>,
    ) -> Result<mpsc::Receiver<ServerEvent>, TransportError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(TransportError::AlreadyRunning);
        }

        let listener = bind_with_fallback(&self.config).await?;
        let port = listener
            .local_addr()
            .map(|a| a.port())
            .unwrap_or(self.config.tcp_port);

        let password: Arc<str> = Arc::from(password.into());
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let conn_ctx = ConnectionContext {
            config: Arc::clone(&self.config),
            ctx: self.ctx,
            password: Arc::clone(&password),
            clients: Arc::clone(&self.clients),
            events: events_tx,
        };
        let accept_task = tokio::spawn(accept_loop(listener, conn_ctx));

        *running = Some(RunningServer {
            port,
            password,
            accept_task,
        });
        info!("transport server listening on TCP {port} ({})", self.ctx.algorithm());
        Ok(events_rx)
    }

    /// Stops accepting and closes every connection.  Safe to call more than
    /// once.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };
        running.accept_task.abort();

        let connections: Vec<_> = self.clients.lock().await.drain().collect();
        let count = connections.len();
        for (_, conn) in connections {
            conn.abort();
        }
        info!("transport server stopped ({count} connection(s) closed)");
    }

    /// Sends `message` to every authenticated client.  Returns how many
    /// clients it was queued for.
    pub async fn broadcast(&self, message: &SyncMessage) -> usize {
        self.broadcast_filtered(message, None).await
    }

    /// Like [`TransportServer::broadcast`] but skips `except`.
    pub async fn broadcast_except(&self, except: ClientId, message: &SyncMessage) -> usize {
        self.broadcast_filtered(message, Some(except)).await
    }

    /// Sends `message` to one authenticated client.
    ///
    /// # Errors
    ///
    /// [`TransportError::NotRunning`], [`TransportError::ClientNotFound`] if
    /// there is no authenticated client with that id, or
    /// [`TransportError::QueueFull`].
    pub async fn send_to(&self, client_id: ClientId, message: &SyncMessage) -> Result<(), TransportError> {
        let password = self.password().await.ok_or(TransportError::NotRunning)?;
        let outbound = {
            let clients = self.clients.lock().await;
            match clients.get(&client_id) {
                Some(conn) if conn.authenticated => conn.outbound.clone(),
                _ => return Err(TransportError::ClientNotFound(client_id)),
            }
        };
        let frame = encode_frame(&self.ctx, message, &password)?;
        outbound
            .try_send(frame)
            .map_err(|_| TransportError::QueueFull(client_id))
    }

    /// Ids of all authenticated clients.
    pub async fn connected_clients(&self) -> Vec<ClientId> {
        self.clients
            .lock()
            .await
            .iter()
            .filter(|(_, conn)| conn.authenticated)
            .map(|(id, _)| *id)
            .collect()
    }

    pub async fn status(&self) -> ServerStatus {
        let port = self.local_port().await;
        ServerStatus {
            running: port.is_some(),
            port,
            client_count: self.connected_clients().await.len(),
        }
    }

    /// Port the listener actually bound, while running.
    pub async fn local_port(&self) -> Option<u16> {
        self.running.lock().await.as_ref().map(|r| r.port)
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    async fn password(&self) -> Option<Arc<str>> {
        self.running
            .lock()
            .await
            .as_ref()
            .map(|r| Arc::clone(&r.password))
    }

    async fn broadcast_filtered(&self, message: &SyncMessage, except: Option<ClientId>) -> usize {
        let Some(password) = self.password().await else {
            debug!("broadcast while stopped; dropping {}", message.kind());
            return 0;
        };

        // Snapshot the recipients so the table lock is not held while encrypting.
        let recipients: Vec<(ClientId, mpsc::Sender<String>)> = {
            let clients = self.clients.lock().await;
            clients
                .iter()
                .filter(|(id, conn)| conn.authenticated && Some(**id) != except)
                .map(|(id, conn)| (*id, conn.outbound.clone()))
                .collect()
        };

        let mut delivered = 0;
        for (client_id, outbound) in recipients {
            // Fresh IV per recipient.
            let frame = match encode_frame(&self.ctx, message, &password) {
                Ok(frame) => frame,
                Err(e) => {
                    error!("failed to encode {}: {e}", message.kind());
                    return delivered;
                }
            };
            match outbound.try_send(frame) {
                Ok(()) => delivered += 1,
                Err(e) => warn!("failed to queue {} for {client_id}: {e}", message.kind()),
            }
        }
        debug!("broadcast {} to {delivered} client(s)", message.kind());
        delivered
    }
}

#[async_trait]
impl ClipboardBroadcaster for TransportServer {
    async fn broadcast(&self, message: &SyncMessage) -> usize {
        TransportServer::broadcast(self, message).await
    }

    async fn broadcast_except(&self, except: ClientId, message: &SyncMessage) -> usize {
        TransportServer::broadcast_except(self, except, message).await
    }

    async fn client_count(&self) -> usize {
        self.connected_clients().await.len()
    }

    async fn is_running(&self) -> bool {
        TransportServer::is_running(self).await
    }
}

/// Tries `tcp_port`, then each fallback port, in order.
async fn bind_with_fallback(config: &SyncConfig) -> Result<TcpListener, TransportError> {
    let ports: Vec<u16> = std::iter::once(config.tcp_port)
        .chain(config.fallback_ports.iter().copied())
        .collect();

    for &port in &ports {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        match TcpListener::bind(addr).await {
            Ok(listener) => {
                if port != config.tcp_port {
                    info!("port {} in use; using fallback port {port}", config.tcp_port);
                }
                return Ok(listener);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                warn!("TCP port {port} is in use");
            }
            Err(source) => return Err(TransportError::BindFailed { addr, source }),
        }
    }
    Err(TransportError::PortsExhausted { ports })
}

async fn accept_loop(listener: TcpListener, conn_ctx: ConnectionContext) {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!("accept failed: {e}");
                continue;
            }
        };

        if !conn_ctx.config.is_trusted_device(&addr.ip().to_string()) {
            warn!("rejecting connection from untrusted device {addr}");
            drop(stream);
            continue;
        }

        debug!("accepted connection from {addr}");
        register_connection(stream, addr, conn_ctx.clone()).await;
    }
}

/// Spawns the reader and writer tasks for a new socket and records it.
async fn register_connection(stream: TcpStream, client_id: ClientId, conn_ctx: ConnectionContext) {
    let (read_half, write_half) = stream.into_split();
    let (out_tx, out_rx) = mpsc::channel(OUTBOUND_QUEUE_LEN);

    // Hold the table lock while spawning so the reader cannot remove the
    // entry before it exists.
    let clients = Arc::clone(&conn_ctx.clients);
    let mut table = clients.lock().await;
    let writer = tokio::spawn(writer_loop(write_half, out_rx, client_id));
    let reader = tokio::spawn(reader_loop(read_half, client_id, out_tx.clone(), conn_ctx));
    table.insert(
        client_id,
        ClientConnection {
            authenticated: false,
            outbound: out_tx,
            reader: Some(reader),
            writer,
        },
    );
}

async fn writer_loop(mut write_half: OwnedWriteHalf, mut queue: mpsc::Receiver<String>, client_id: ClientId) {
    while let Some(frame) = queue.recv().await {
        if let Err(e) = write_half.write_all(frame.as_bytes()).await {
            debug!("write to {client_id} failed: {e}");
            break;
        }
    }
    // Dropping the write half sends FIN once the queue is drained.
}

async fn reader_loop(
    mut read_half: OwnedReadHalf,
    client_id: ClientId,
    outbound: mpsc::Sender<String>,
    conn_ctx: ConnectionContext,
) {
    let mut framer = LineFramer::new(conn_ctx.config.max_frame_len);
    let mut buf = vec![0u8; READ_BUFFER_LEN];
    let mut authenticated = false;

    'read: loop {
        let n = match read_half.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!("read from {client_id} failed: {e}");
                break;
            }
        };

        let lines = match framer.push(&buf[..n]) {
            Ok(lines) => lines,
            Err(e) => {
                warn!("closing {client_id}: {e}");
                break;
            }
        };

        for line in lines {
            match process_frame(&conn_ctx.ctx, authenticated, &line, &conn_ctx.password) {
                FrameOutcome::Authenticated => {
                    authenticated = true;
                    if let Some(conn) = conn_ctx.clients.lock().await.get_mut(&client_id) {
                        conn.authenticated = true;
                    }
                    queue(&conn_ctx, &outbound, client_id, &SyncMessage::AuthSuccess);
                    info!("client {client_id} authenticated");
                    emit(&conn_ctx, ServerEvent::ClientConnected { client_id }).await;
                }
                FrameOutcome::Reject { reply } => {
                    if let Some(reply) = reply {
                        queue(&conn_ctx, &outbound, client_id, &reply);
                    }
                    warn!("authentication failed for {client_id}; closing");
                    break 'read;
                }
                FrameOutcome::Reply(reply) => {
                    queue(&conn_ctx, &outbound, client_id, &reply);
                }
                FrameOutcome::Deliver(message) => {
                    debug!("received {} from {client_id}", message.kind());
                    emit(&conn_ctx, ServerEvent::MessageReceived { client_id, message }).await;
                }
                FrameOutcome::Ignore => {}
            }
        }
    }

    // Removing the entry drops the last queue sender; the writer flushes any
    // pending reply (e.g. AUTH_FAIL) and then closes its half.
    drop(outbound);
    conn_ctx.clients.lock().await.remove(&client_id);
    if authenticated {
        info!("client {client_id} disconnected");
        emit(&conn_ctx, ServerEvent::ClientDisconnected { client_id }).await;
    } else {
        debug!("unauthenticated connection {client_id} closed");
    }
}

/// Reports `event` to the application layer.  Once the receiver is gone
/// the event is logged and discarded; the connection keeps running.
async fn emit(conn_ctx: &ConnectionContext, event: ServerEvent) {
    if let Err(mpsc::error::SendError(event)) = conn_ctx.events.send(event).await {
        debug!("server event receiver dropped; discarding {event:?}");
    }
}

/// Encodes and queues a direct reply on one connection.
fn queue(conn_ctx: &ConnectionContext, outbound: &mpsc::Sender<String>, client_id: ClientId, message: &SyncMessage) {
    match encode_frame(&conn_ctx.ctx, message, &conn_ctx.password) {
        Ok(frame) => {
            if let Err(e) = outbound.try_send(frame) {
                warn!("failed to queue {} for {client_id}: {e}", message.kind());
            }
        }
        Err(e) => error!("failed to encode {}: {e}", message.kind()),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
