//! HubRelayUseCase: the server-side coordinator.
//!
//! The server is the hub of a star: clients only talk to it, never to each
//! other.  For every clipboard value to reach every machine the hub must:
//!
//! 1. broadcast its own local changes to all clients, and
//! 2. apply a change received from client X locally, then relay it to every
//!    client except X.
//!
//! ```text
//!   client A ──clipboard_text──► hub ──► local clipboard + history
//!                                 │
//!                                 └────► client B, client C (not A)
//! ```
//!
//! # Architecture
//!
//! The use case depends on the [`ClipboardBroadcaster`] trait rather than on
//! the TCP server, so it can be unit tested with a recording fake.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use clipsync_core::{
    apply_inbound, outbound_message, ClipboardEntry, ClipboardWatcher, PlatformClipboard,
    SyncConfig, SyncMessage, SyncStatus,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::infrastructure::network::ServerEvent;

/// Fan-out side of the transport, as seen by the hub.
///
/// Infrastructure implements this with the TCP server; tests record calls.
#[async_trait]
pub trait ClipboardBroadcaster: Send + Sync {
    /// Queues `message` for every authenticated client; returns the count.
    async fn broadcast(&self, message: &SyncMessage) -> usize;

    /// Like `broadcast` but skips `except`.
    async fn broadcast_except(&self, except: SocketAddr, message: &SyncMessage) -> usize;

    /// Number of authenticated clients.
    async fn client_count(&self) -> usize;

    async fn is_running(&self) -> bool;
}

/// The hub coordinator.
pub struct HubRelay<C: PlatformClipboard> {
    config: Arc<SyncConfig>,
    broadcaster: Arc<dyn ClipboardBroadcaster>,
    watcher: ClipboardWatcher<C>,
}

impl<C: PlatformClipboard> HubRelay<C> {
    pub fn new(
        config: Arc<SyncConfig>,
        broadcaster: Arc<dyn ClipboardBroadcaster>,
        watcher: ClipboardWatcher<C>,
    ) -> Self {
        Self {
            config,
            broadcaster,
            watcher,
        }
    }

    /// Broadcasts a locally detected change.  Returns the number of clients
    /// it was queued for; oversized images are logged and dropped.
    pub async fn on_local_change(&self, entry: &ClipboardEntry) -> usize {
        match outbound_message(entry, self.config.max_file_size) {
            Ok(message) => {
                let sent = self.broadcaster.broadcast(&message).await;
                info!("sent local {} to {sent} client(s)", message.kind());
                sent
            }
            Err(e) => {
                warn!("not sending local change: {e}");
                0
            }
        }
    }

    /// Handles one transport event.  Returns the number of clients a received
    /// clipboard message was relayed to.
    pub async fn on_server_event(&self, event: ServerEvent) -> usize {
        match event {
            ServerEvent::ClientConnected { client_id } => {
                info!("client connected: {client_id} (status: {})", self.status().await);
                0
            }
            ServerEvent::ClientDisconnected { client_id } => {
                info!("client disconnected: {client_id} (status: {})", self.status().await);
                0
            }
            ServerEvent::MessageReceived { client_id, message } => {
                if !message.is_clipboard() {
                    debug!("ignoring {} from {client_id}", message.kind());
                    return 0;
                }
                if let Err(e) = apply_inbound(&message, &self.watcher).await {
                    warn!("failed to apply clipboard from {client_id}: {e}");
                }
                self.broadcaster.broadcast_except(client_id, &message).await
            }
        }
    }

    /// `Connected` with at least one authenticated client, `Waiting` while
    /// listening alone, `Disconnected` when the server is stopped.
    pub async fn status(&self) -> SyncStatus {
        if !self.broadcaster.is_running().await {
            SyncStatus::Disconnected
        } else if self.broadcaster.client_count().await == 0 {
            SyncStatus::Waiting
        } else {
            SyncStatus::Connected
        }
    }

    pub fn watcher(&self) -> &ClipboardWatcher<C> {
        &self.watcher
    }

    /// Drains both channels until they are closed.
    pub async fn run(
        &self,
        mut local_changes: mpsc::Receiver<ClipboardEntry>,
        mut server_events: mpsc::Receiver<ServerEvent>,
    ) {
        loop {
            tokio::select! {
                Some(entry) = local_changes.recv() => {
                    self.on_local_change(&entry).await;
                }
                Some(event) = server_events.recv() => {
                    self.on_server_event(event).await;
                }
                else => break,
            }
        }
        debug!("hub relay loop finished");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
