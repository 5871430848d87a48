//! Integration tests for the transport server over real loopback sockets.
//!
//! Each test starts a [`TransportServer`] on an OS-assigned port and talks to
//! it with [`RawPeer`], a minimal hand-driven client that speaks the framed
//! protocol directly.  This exercises the authentication state machine,
//! broadcast fan-out and port fallback exactly as a remote peer sees them.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clipsync_core::{
    decode_frame, encode_frame, ClipboardWatcher, EncryptionContext, HistoryStore, LineFramer,
    MockClipboard, SyncConfig, SyncMessage,
};
use clipsync_server::application::hub_relay::{ClipboardBroadcaster, HubRelay};
use clipsync_server::infrastructure::network::{ServerEvent, TransportError, TransportServer};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

const PASSWORD: &str = "secret";
const STEP: Duration = Duration::from_secs(3);

// ── Helpers ───────────────────────────────────────────────────────────────────

/// A bare protocol peer: one socket, one framer, no retries.
struct RawPeer {
    stream: TcpStream,
    framer: LineFramer,
    ctx: EncryptionContext,
    key: String,
    pending: VecDeque<String>,
}

impl RawPeer {
    /// Connects and encrypts every frame with `key`.
    async fn connect(port: u16, key: &str) -> Self {
        let stream = TcpStream::connect(("127.0.0.1", port))
            .await
            .expect("connect to test server");
        Self {
            stream,
            framer: LineFramer::new(1 << 20),
            ctx: EncryptionContext::new(),
            key: key.to_string(),
            pending: VecDeque::new(),
        }
    }

    /// Connects and completes the handshake.
    async fn authenticated(port: u16) -> Self {
        let mut peer = Self::connect(port, PASSWORD).await;
        peer.send(&auth(PASSWORD)).await;
        assert_eq!(peer.recv().await, Some(SyncMessage::AuthSuccess));
        peer
    }

    fn local_addr(&self) -> SocketAddr {
        self.stream.local_addr().unwrap()
    }

    async fn send(&mut self, message: &SyncMessage) {
        let frame = encode_frame(&self.ctx, message, &self.key).unwrap();
        self.stream.write_all(frame.as_bytes()).await.unwrap();
    }

    /// Next message, or `None` once the server closed the connection.
    async fn recv(&mut self) -> Option<SyncMessage> {
        tokio::time::timeout(STEP, self.recv_inner())
            .await
            .expect("server did not answer in time")
    }

    async fn recv_inner(&mut self) -> Option<SyncMessage> {
        let mut buf = [0u8; 4096];
        loop {
            if let Some(line) = self.pending.pop_front() {
                return Some(decode_frame(&self.ctx, &line, &self.key).expect("server frame decodes"));
            }
            match self.stream.read(&mut buf).await {
                Ok(0) | Err(_) => return None,
                Ok(n) => self.pending.extend(self.framer.push(&buf[..n]).unwrap()),
            }
        }
    }

    /// `true` if nothing arrives within a short window.
    async fn stays_quiet(&mut self) -> bool {
        tokio::time::timeout(Duration::from_millis(200), self.recv_inner())
            .await
            .is_err()
    }
}

fn auth(password: &str) -> SyncMessage {
    SyncMessage::Auth {
        password: password.to_string(),
    }
}

fn text(content: &str) -> SyncMessage {
    SyncMessage::ClipboardText {
        content: content.to_string(),
        source: "test-peer".to_string(),
        timestamp: chrono::Utc::now(),
    }
}

/// Config with an OS-assigned TCP port and no fallback ports.
fn ephemeral_config() -> SyncConfig {
    SyncConfig {
        tcp_port: 0,
        fallback_ports: Vec::new(),
        resume_delay_ms: 20,
        ..SyncConfig::default()
    }
}

/// Finds a port that is free right now.
fn free_port() -> u16 {
    let socket = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    socket.local_addr().unwrap().port()
}

async fn start(config: SyncConfig) -> (Arc<TransportServer>, mpsc::Receiver<ServerEvent>, u16) {
    let server = Arc::new(TransportServer::new(Arc::new(config)));
    let events = server.start(PASSWORD).await.expect("server starts");
    let port = server.local_port().await.expect("bound port");
    (server, events, port)
}

async fn next_event(events: &mut mpsc::Receiver<ServerEvent>) -> ServerEvent {
    tokio::time::timeout(STEP, events.recv())
        .await
        .expect("no server event in time")
        .expect("event channel open")
}

// ── Authentication ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_correct_password_authenticates_and_delivers_messages() {
    // Arrange
    let (server, mut events, port) = start(ephemeral_config()).await;

    // Act
    let mut peer = RawPeer::authenticated(port).await;

    // Assert – connected event, keepalive answered, clipboard delivered
    assert_eq!(
        next_event(&mut events).await,
        ServerEvent::ClientConnected {
            client_id: peer.local_addr()
        }
    );

    peer.send(&SyncMessage::Ping).await;
    assert_eq!(peer.recv().await, Some(SyncMessage::Pong));

    let msg = text("hello hub");
    peer.send(&msg).await;
    assert_eq!(
        next_event(&mut events).await,
        ServerEvent::MessageReceived {
            client_id: peer.local_addr(),
            message: msg
        }
    );
    assert_eq!(server.connected_clients().await, vec![peer.local_addr()]);

    server.stop().await;
}

#[tokio::test]
async fn test_wrong_password_gets_auth_fail_and_is_closed() {
    // Arrange – right key, wrong password field
    let (server, _events, port) = start(ephemeral_config()).await;
    let mut peer = RawPeer::connect(port, PASSWORD).await;

    // Act
    peer.send(&auth("guess")).await;

    // Assert
    assert_eq!(peer.recv().await, Some(SyncMessage::auth_fail("Invalid password")));
    assert_eq!(peer.recv().await, None, "connection must be closed");
    assert!(server.connected_clients().await.is_empty());

    server.stop().await;
}

#[tokio::test]
async fn test_message_before_auth_is_rejected_and_closed() {
    let (server, _events, port) = start(ephemeral_config()).await;
    let mut peer = RawPeer::connect(port, PASSWORD).await;

    peer.send(&SyncMessage::Ping).await;

    assert_eq!(
        peer.recv().await,
        Some(SyncMessage::auth_fail("Authentication required"))
    );
    assert_eq!(peer.recv().await, None);

    server.stop().await;
}

#[tokio::test]
async fn test_frame_under_wrong_key_is_closed_without_reply() {
    let (server, _events, port) = start(ephemeral_config()).await;
    let mut peer = RawPeer::connect(port, "not-the-password").await;

    peer.send(&auth("not-the-password")).await;

    assert_eq!(peer.recv().await, None);
    server.stop().await;
}

#[tokio::test]
async fn test_disconnect_of_authenticated_client_is_reported() {
    // Arrange
    let (server, mut events, port) = start(ephemeral_config()).await;
    let peer = RawPeer::authenticated(port).await;
    let client_id = peer.local_addr();
    next_event(&mut events).await;

    // Act
    drop(peer);

    // Assert
    assert_eq!(
        next_event(&mut events).await,
        ServerEvent::ClientDisconnected { client_id }
    );
    assert_eq!(server.status().await.client_count, 0);

    server.stop().await;
}

#[tokio::test]
async fn test_connections_keep_working_after_event_receiver_is_dropped() {
    // Arrange – nobody listens for server events any more
    let (server, events, port) = start(ephemeral_config()).await;
    drop(events);

    // Act
    let mut peer = RawPeer::authenticated(port).await;
    peer.send(&text("unheard")).await;
    peer.send(&SyncMessage::Ping).await;

    // Assert
    assert_eq!(peer.recv().await, Some(SyncMessage::Pong));
    assert_eq!(server.connected_clients().await, vec![peer.local_addr()]);

    server.stop().await;
}

#[tokio::test]
async fn test_untrusted_device_is_closed_on_accept() {
    // Arrange – only a LAN address is trusted, the test connects from loopback
    let config = ephemeral_config().with_trusted_device("10.9.9.9");
    let (server, _events, port) = start(config).await;

    // Act
    let mut peer = RawPeer::connect(port, PASSWORD).await;

    // Assert – closed before any handshake
    assert_eq!(peer.recv().await, None);
    assert!(server.connected_clients().await.is_empty());
    server.stop().await;
}

// ── Broadcast ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_broadcast_reaches_only_authenticated_clients() {
    // Arrange
    let (server, _events, port) = start(ephemeral_config()).await;
    let mut member = RawPeer::authenticated(port).await;
    let mut stranger = RawPeer::connect(port, PASSWORD).await;

    // Act
    let sent = server.broadcast(&text("hello")).await;

    // Assert
    assert_eq!(sent, 1);
    assert!(matches!(
        member.recv().await,
        Some(SyncMessage::ClipboardText { content, .. }) if content == "hello"
    ));
    assert!(stranger.stays_quiet().await);

    server.stop().await;
}

#[tokio::test]
async fn test_broadcast_except_skips_the_sender() {
    let (server, _events, port) = start(ephemeral_config()).await;
    let mut a = RawPeer::authenticated(port).await;
    let mut b = RawPeer::authenticated(port).await;

    let sent = server.broadcast_except(a.local_addr(), &text("only b")).await;

    assert_eq!(sent, 1);
    assert!(matches!(b.recv().await, Some(SyncMessage::ClipboardText { .. })));
    assert!(a.stays_quiet().await);

    server.stop().await;
}

#[tokio::test]
async fn test_send_to_unknown_client_fails() {
    let (server, _events, _port) = start(ephemeral_config()).await;

    let result = server
        .send_to("127.0.0.1:1".parse().unwrap(), &SyncMessage::Ping)
        .await;

    assert!(matches!(result, Err(TransportError::ClientNotFound(_))));
    server.stop().await;
}

// ── Lifecycle ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_primary_port_taken_binds_first_free_fallback() {
    // Arrange
    let occupied = tokio::net::TcpListener::bind("0.0.0.0:0").await.unwrap();
    let taken = occupied.local_addr().unwrap().port();
    let fallback = free_port();
    let config = SyncConfig {
        tcp_port: taken,
        fallback_ports: vec![taken, fallback],
        ..SyncConfig::default()
    };

    // Act
    let (server, _events, port) = start(config).await;

    // Assert – bound before start returned
    assert_eq!(port, fallback);
    assert!(server.status().await.running);

    server.stop().await;
}

#[tokio::test]
async fn test_every_port_taken_is_ports_exhausted() {
    let occupied = tokio::net::TcpListener::bind("0.0.0.0:0").await.unwrap();
    let taken = occupied.local_addr().unwrap().port();
    let server = TransportServer::new(Arc::new(SyncConfig {
        tcp_port: taken,
        fallback_ports: Vec::new(),
        ..SyncConfig::default()
    }));

    let result = server.start(PASSWORD).await;

    assert!(matches!(result, Err(TransportError::PortsExhausted { ports }) if ports == vec![taken]));
    assert!(!server.is_running().await);
}

#[tokio::test]
async fn test_start_twice_is_already_running() {
    let (server, _events, _port) = start(ephemeral_config()).await;
    assert!(matches!(
        server.start(PASSWORD).await,
        Err(TransportError::AlreadyRunning)
    ));
    server.stop().await;
}

#[tokio::test]
async fn test_stop_closes_connections_and_is_idempotent() {
    // Arrange
    let (server, _events, port) = start(ephemeral_config()).await;
    let mut peer = RawPeer::authenticated(port).await;

    // Act
    server.stop().await;
    server.stop().await;

    // Assert
    assert_eq!(peer.recv().await, None);
    assert!(!server.is_running().await);
    assert!(server.connected_clients().await.is_empty());
    assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());
}

// ── Hub relay over real sockets ───────────────────────────────────────────────

#[tokio::test]
async fn test_hub_applies_and_relays_change_from_one_client_to_the_others() {
    // Arrange – server + relay with an in-memory clipboard
    let config = ephemeral_config();
    let (server, events, port) = start(config.clone()).await;
    let hub_clipboard = MockClipboard::new();
    let watcher = ClipboardWatcher::with_hostname(
        Arc::new(config.clone()),
        hub_clipboard.clone(),
        HistoryStore::shared(10),
        "hub",
    );
    let relay = HubRelay::new(
        Arc::new(config),
        Arc::clone(&server) as Arc<dyn ClipboardBroadcaster>,
        watcher,
    );
    let (_local_tx, local_rx) = mpsc::channel(1);
    tokio::spawn(async move { relay.run(local_rx, events).await });

    let mut a = RawPeer::authenticated(port).await;
    let mut b = RawPeer::authenticated(port).await;

    // Act
    a.send(&text("copied on a")).await;

    // Assert – b gets it, a does not get its own change back, hub applied it
    assert!(matches!(
        b.recv().await,
        Some(SyncMessage::ClipboardText { content, source, .. })
            if content == "copied on a" && source == "test-peer"
    ));
    assert!(a.stays_quiet().await);
    assert_eq!(hub_clipboard.text().as_deref(), Some("copied on a"));

    server.stop().await;
}
