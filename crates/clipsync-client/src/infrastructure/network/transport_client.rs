//! TransportClient: one authenticated connection to the hub.
//!
//! # Connection state machine (for beginners)
//!
//! ```text
//! Disconnected ──connect()──► Connecting ──socket open──► AwaitingAuth ──AUTH_SUCCESS──► Authenticated
//!      ▲                           │                       │       │                        │
//!      │                     connect failed             closed  AUTH_FAIL                 closed
//!      │                           │                       │       └─► AuthenticationFailed │
//!      │                           │                       │           (no retry)           │
//!      └──── retry after delay ◄───┴───────────────────────┴────────────────────────────────┘
//! ```
//!
//! - As soon as the socket opens the client sends `AUTH` with the password.
//! - [`TransportClient::is_connected`] is `true` only in `Authenticated`.
//! - Every failed attempt (refused connect, or a connection that later
//!   closed, before or after the handshake) increments
//!   `reconnect_attempts`; a successful handshake resets it.  When it
//!   reaches `max_reconnect_attempts` the client stops and reports
//!   [`ClientEvent::ReconnectExhausted`].
//! - An explicit `AUTH_FAIL` is reported as
//!   [`ClientEvent::AuthenticationFailed`] and is never retried: the
//!   password will not get better by itself.
//!
//! The host, port and password of the current target live in
//! [`ConnectionTarget`] and are re-read on every attempt.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use clipsync_core::{
    decode_frame, encode_frame, EncryptionContext, LineFramer, ProtocolError, SyncConfig,
    SyncMessage,
};
use serde::Serialize;
use thiserror::Error;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{tcp::OwnedWriteHalf, TcpStream},
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::application::peer_sync::ClipboardSender;

const EVENT_CHANNEL_CAPACITY: usize = 64;

const READ_BUFFER_LEN: usize = 16 * 1024;

/// Errors that can occur in the client network layer.
#[derive(Debug, Error)]
pub enum ClientNetworkError {
    /// No authenticated connection is available.
    #[error("not connected to a server")]
    NotConnected,
    /// The server answered the handshake with `AUTH_FAIL`.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    /// The TCP connection could not be opened.
    #[error("failed to connect to {server}: {source}")]
    ConnectFailed {
        server: String,
        #[source]
        source: std::io::Error,
    },
    /// An I/O error occurred on the established connection.
    #[error("connection I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A frame could not be encoded, or an inbound frame was too long.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Where to connect and with which password.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    pub host: String,
    pub port: u16,
    pub password: String,
}

impl ConnectionTarget {
    pub fn new(host: impl Into<String>, port: u16, password: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            password: password.into(),
        }
    }

    /// `host:port`, for logs and status.
    pub fn server(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Where the connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPhase {
    Disconnected,
    Connecting,
    AwaitingAuth,
    Authenticated,
}

/// Snapshot returned by [`TransportClient::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientStatus {
    /// The socket is open (handshake pending or done).
    pub connected: bool,
    pub authenticated: bool,
    /// `host:port` of the current target, if any.
    pub server: Option<String>,
    pub reconnect_attempts: u32,
}

/// Events emitted by the transport client to the application layer.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// The handshake succeeded.
    Connected { server: String },
    /// A socket that had been open closed.
    Disconnected,
    /// An authenticated message from the server.
    MessageReceived(SyncMessage),
    /// The server rejected us; the client will not retry.
    AuthenticationFailed { reason: String },
    /// `max_reconnect_attempts` failed attempts in a row; the client stopped.
    ReconnectExhausted { attempts: u32 },
}

/// How an open connection came to an end.
enum SessionEnd {
    Closed,
    ReceiverDropped,
}

struct ConnectionState {
    target: Option<ConnectionTarget>,
    phase: ConnectionPhase,
    reconnect_attempts: u32,
}

struct Shared {
    config: Arc<SyncConfig>,
    ctx: EncryptionContext,
    state: Mutex<ConnectionState>,
    writer: Mutex<Option<OwnedWriteHalf>>,
}

/// The transport client.
pub struct TransportClient {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TransportClient {
    /// Creates a new (not yet connected) client.
    pub fn new(config: Arc<SyncConfig>) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                ctx: EncryptionContext::new(),
                state: Mutex::new(ConnectionState {
                    target: None,
                    phase: ConnectionPhase::Disconnected,
                    reconnect_attempts: 0,
                }),
                writer: Mutex::new(None),
            }),
            task: Mutex::new(None),
        }
    }

    /// Starts connecting to `target` and returns the event channel.
    ///
    /// Any previous session is torn down first and the attempt counter is
    /// reset.  The channel closes when the client gives up or is
    /// disconnected.
    pub async fn connect(&self, target: ConnectionTarget) -> mpsc::Receiver<ClientEvent> {
        let mut task = self.task.lock().await;
        if let Some(previous) = task.take() {
            previous.abort();
            let _ = previous.await;
        }
        self.shared.close_socket().await;

        {
            let mut state = self.shared.state.lock().await;
            info!("connecting to {}", target.server());
            state.target = Some(target);
            state.phase = ConnectionPhase::Connecting;
            state.reconnect_attempts = 0;
        }

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        *task = Some(tokio::spawn(session_loop(Arc::clone(&self.shared), tx)));
        rx
    }

    /// Closes the connection and stops reconnecting.  Safe to call more than
    /// once.
    pub async fn disconnect(&self) {
        if let Some(handle) = self.task.lock().await.take() {
            handle.abort();
            let _ = handle.await;
        }
        self.shared.close_socket().await;
        self.shared.give_up().await;
        info!("disconnected");
    }

    /// Sends `message` to the server.
    ///
    /// # Errors
    ///
    /// [`ClientNetworkError::NotConnected`] unless authenticated, otherwise
    /// an I/O or encoding error.
    pub async fn send_message(&self, message: &SyncMessage) -> Result<(), ClientNetworkError> {
        let password = {
            let state = self.shared.state.lock().await;
            match (&state.target, state.phase) {
                (Some(target), ConnectionPhase::Authenticated) => target.password.clone(),
                _ => return Err(ClientNetworkError::NotConnected),
            }
        };
        self.shared.write_message(message, &password).await?;
        debug!("sent {}", message.kind());
        Ok(())
    }

    /// Keepalive.  The server answers with `PONG`, delivered as an ordinary
    /// [`ClientEvent::MessageReceived`].
    pub async fn send_ping(&self) -> Result<(), ClientNetworkError> {
        self.send_message(&SyncMessage::Ping).await
    }

    /// `true` only once the handshake has succeeded.
    pub async fn is_connected(&self) -> bool {
        self.phase().await == ConnectionPhase::Authenticated
    }

    pub async fn phase(&self) -> ConnectionPhase {
        self.shared.state.lock().await.phase
    }

    pub async fn reconnect_attempts(&self) -> u32 {
        self.shared.state.lock().await.reconnect_attempts
    }

    pub async fn status(&self) -> ClientStatus {
        let state = self.shared.state.lock().await;
        ClientStatus {
            connected: matches!(
                state.phase,
                ConnectionPhase::AwaitingAuth | ConnectionPhase::Authenticated
            ),
            authenticated: state.phase == ConnectionPhase::Authenticated,
            server: state.target.as_ref().map(ConnectionTarget::server),
            reconnect_attempts: state.reconnect_attempts,
        }
    }
}

impl Drop for TransportClient {
    fn drop(&mut self) {
        if let Some(handle) = self.task.get_mut().take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl ClipboardSender for TransportClient {
    async fn send_clipboard(&self, message: &SyncMessage) -> Result<(), String> {
        self.send_message(message).await.map_err(|e| e.to_string())
    }

    async fn is_connected(&self) -> bool {
        TransportClient::is_connected(self).await
    }
}

impl Shared {
    /// Marks the start of an attempt and returns the target to use.
    async fn begin_attempt(&self) -> Option<ConnectionTarget> {
        let mut state = self.state.lock().await;
        state.phase = ConnectionPhase::Connecting;
        state.target.clone()
    }

    async fn mark_authenticated(&self) {
        let mut state = self.state.lock().await;
        state.phase = ConnectionPhase::Authenticated;
        state.reconnect_attempts = 0;
    }

    /// Counts a failed attempt and returns the new total.
    async fn record_failure(&self) -> u32 {
        let mut state = self.state.lock().await;
        state.phase = ConnectionPhase::Disconnected;
        state.reconnect_attempts = state.reconnect_attempts.saturating_add(1);
        state.reconnect_attempts
    }

    /// Pins the counter at the maximum so nothing retries.
    async fn give_up(&self) {
        let mut state = self.state.lock().await;
        state.phase = ConnectionPhase::Disconnected;
        state.reconnect_attempts = self.config.max_reconnect_attempts;
    }

    async fn close_socket(&self) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        self.state.lock().await.phase = ConnectionPhase::Disconnected;
    }

    async fn write_message(&self, message: &SyncMessage, password: &str) -> Result<(), ClientNetworkError> {
        let frame = encode_frame(&self.ctx, message, password)?;
        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(ClientNetworkError::NotConnected)?;
        writer.write_all(frame.as_bytes()).await?;
        Ok(())
    }

    /// Drives one open socket: handshake, then forward messages until it
    /// closes.
    async fn run_connection(
        &self,
        stream: TcpStream,
        target: &ConnectionTarget,
        events: &mpsc::Sender<ClientEvent>,
    ) -> Result<SessionEnd, ClientNetworkError> {
        let (mut read_half, write_half) = stream.into_split();
        *self.writer.lock().await = Some(write_half);
        self.state.lock().await.phase = ConnectionPhase::AwaitingAuth;

        debug!("socket open to {}; sending AUTH", target.server());
        let auth = SyncMessage::Auth {
            password: target.password.clone(),
        };
        self.write_message(&auth, &target.password).await?;

        let mut framer = LineFramer::new(self.config.max_frame_len);
        let mut buf = vec![0u8; READ_BUFFER_LEN];
        let mut authenticated = false;

        loop {
            let n = read_half.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            for line in framer.push(&buf[..n])? {
                let message = match decode_frame(&self.ctx, &line, &target.password) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!("dropping undecryptable frame: {e}");
                        continue;
                    }
                };
                match message {
                    SyncMessage::AuthSuccess if !authenticated => {
                        authenticated = true;
                        self.mark_authenticated().await;
                        info!("authenticated with {}", target.server());
                        let connected = ClientEvent::Connected {
                            server: target.server(),
                        };
                        if events.send(connected).await.is_err() {
                            return Ok(SessionEnd::ReceiverDropped);
                        }
                    }
                    SyncMessage::AuthFail { error } => {
                        return Err(ClientNetworkError::AuthenticationFailed(error));
                    }
                    message if authenticated => {
                        debug!("received {}", message.kind());
                        if events.send(ClientEvent::MessageReceived(message)).await.is_err() {
                            return Ok(SessionEnd::ReceiverDropped);
                        }
                    }
                    other => debug!("ignoring {} before authentication", other.kind()),
                }
            }
        }

        if !authenticated {
            debug!("{} closed before answering AUTH", target.server());
        }
        Ok(SessionEnd::Closed)
    }
}

/// Connect, run, and retry until consecutive failed attempts add up to the
/// maximum.  Only `AUTH_FAIL` ends the loop early.
async fn session_loop(shared: Arc<Shared>, events: mpsc::Sender<ClientEvent>) {
    let max = shared.config.max_reconnect_attempts;

    loop {
        let Some(target) = shared.begin_attempt().await else {
            break;
        };

        match TcpStream::connect((target.host.as_str(), target.port)).await {
            Ok(stream) => {
                let result = shared.run_connection(stream, &target, &events).await;
                shared.close_socket().await;
                match result {
                    Ok(SessionEnd::ReceiverDropped) => {
                        debug!("client event receiver dropped; stopping");
                        return;
                    }
                    Ok(SessionEnd::Closed) => {
                        info!("connection to {} closed", target.server());
                        let _ = events.send(ClientEvent::Disconnected).await;
                    }
                    Err(ClientNetworkError::AuthenticationFailed(reason)) => {
                        warn!("authentication with {} failed: {reason}", target.server());
                        shared.give_up().await;
                        let _ = events
                            .send(ClientEvent::AuthenticationFailed { reason })
                            .await;
                        let _ = events.send(ClientEvent::Disconnected).await;
                        return;
                    }
                    Err(e) => {
                        warn!("connection to {} failed: {e}", target.server());
                        let _ = events.send(ClientEvent::Disconnected).await;
                    }
                }
            }
            Err(source) => {
                let e = ClientNetworkError::ConnectFailed {
                    server: target.server(),
                    source,
                };
                warn!("{e}");
            }
        }

        let attempts = shared.record_failure().await;
        if attempts >= max {
            warn!("giving up on {} after {attempts} failed attempt(s)", target.server());
            let _ = events.send(ClientEvent::ReconnectExhausted { attempts }).await;
            return;
        }
        let delay = shared.config.reconnect_delay();
        info!("reconnecting in {delay:?} (attempt {attempts}/{max})");
        tokio::time::sleep(delay).await;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
