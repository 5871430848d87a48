//! PeerSyncUseCase: keeps this machine's clipboard in step with the hub.
//!
//! Two flows, both driven from [`PeerSync::run`]:
//!
//! - **Outbound**: the watcher reports a local change; if the transport is
//!   authenticated it is sent to the hub, otherwise it is dropped (the next
//!   change will be sent once connected).
//! - **Inbound**: a clipboard message relayed by the hub is written to the
//!   local clipboard with a guarded write and recorded in history, so it is
//!   not echoed back.
//!
//! [`PeerSync::status`] is `Connected` while authenticated, `Waiting` while
//! the transport is still connecting, handshaking or backing off, and
//! `Disconnected` once it has given up.
//!
//! The use case depends on the [`ClipboardSender`] trait; the TCP
//! `TransportClient` implements it and tests substitute a recorder.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use clipsync_core::{
    apply_inbound, outbound_message, ClipboardEntry, ClipboardWatcher, PlatformClipboard,
    SyncConfig, SyncMessage, SyncStatus,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::infrastructure::network::ClientEvent;

/// Outbound side of the transport, as seen by the use case.
#[async_trait]
pub trait ClipboardSender: Send + Sync {
    /// Sends one clipboard message to the hub.
    async fn send_clipboard(&self, message: &SyncMessage) -> Result<(), String>;

    /// `true` while an authenticated connection exists.
    async fn is_connected(&self) -> bool;
}

/// The client-side coordinator.
pub struct PeerSync<C: PlatformClipboard> {
    config: Arc<SyncConfig>,
    sender: Arc<dyn ClipboardSender>,
    watcher: ClipboardWatcher<C>,
    /// Cleared once the transport stops trying.
    session_live: AtomicBool,
}

impl<C: PlatformClipboard> PeerSync<C> {
    pub fn new(
        config: Arc<SyncConfig>,
        sender: Arc<dyn ClipboardSender>,
        watcher: ClipboardWatcher<C>,
    ) -> Self {
        Self {
            config,
            sender,
            watcher,
            session_live: AtomicBool::new(true),
        }
    }

    /// Sends a locally detected change.  Returns `true` if it went out.
    pub async fn on_local_change(&self, entry: &ClipboardEntry) -> bool {
        if !self.sender.is_connected().await {
            debug!("not connected; local change stays local");
            return false;
        }
        let message = match outbound_message(entry, self.config.max_file_size) {
            Ok(message) => message,
            Err(e) => {
                warn!("not sending local change: {e}");
                return false;
            }
        };
        match self.sender.send_clipboard(&message).await {
            Ok(()) => {
                info!("sent local {} to server", message.kind());
                true
            }
            Err(e) => {
                warn!("failed to send {}: {e}", message.kind());
                false
            }
        }
    }

    /// Handles one transport event.  Returns the history entry recorded for
    /// an applied clipboard message.
    pub async fn on_client_event(&self, event: ClientEvent) -> Option<ClipboardEntry> {
        match event {
            ClientEvent::Connected { server } => {
                self.session_live.store(true, Ordering::SeqCst);
                info!("syncing with {server}");
                None
            }
            ClientEvent::Disconnected => {
                info!("connection to server lost");
                None
            }
            ClientEvent::MessageReceived(message) if message.is_clipboard() => {
                match apply_inbound(&message, &self.watcher).await {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!("failed to apply received clipboard: {e}");
                        None
                    }
                }
            }
            ClientEvent::MessageReceived(message) => {
                debug!("ignoring {}", message.kind());
                None
            }
            ClientEvent::AuthenticationFailed { reason } => {
                self.session_live.store(false, Ordering::SeqCst);
                error!("server rejected authentication: {reason}");
                None
            }
            ClientEvent::ReconnectExhausted { attempts } => {
                self.session_live.store(false, Ordering::SeqCst);
                error!("gave up after {attempts} failed connection attempt(s)");
                None
            }
        }
    }

    pub async fn status(&self) -> SyncStatus {
        if self.sender.is_connected().await {
            SyncStatus::Connected
        } else if self.session_live.load(Ordering::SeqCst) {
            SyncStatus::Waiting
        } else {
            SyncStatus::Disconnected
        }
    }

    pub fn watcher(&self) -> &ClipboardWatcher<C> {
        &self.watcher
    }

    /// Runs until the transport's event channel closes, which happens once
    /// the client gives up or is disconnected.
    pub async fn run(
        &self,
        mut local_changes: mpsc::Receiver<ClipboardEntry>,
        mut client_events: mpsc::Receiver<ClientEvent>,
    ) {
        loop {
            tokio::select! {
                Some(entry) = local_changes.recv() => {
                    self.on_local_change(&entry).await;
                }
                event = client_events.recv() => match event {
                    Some(event) => {
                        self.on_client_event(event).await;
                    }
                    None => break,
                },
            }
        }
        self.session_live.store(false, Ordering::SeqCst);
        debug!("peer sync loop finished");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
