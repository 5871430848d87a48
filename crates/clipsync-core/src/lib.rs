//! # clipsync-core
//!
//! Shared library for clipsync containing the wire protocol, frame
//! encryption, clipboard change detection, history, and LAN discovery.
//!
//! This crate is used by both the server and client applications.
//!
//! # Architecture overview (for beginners)
//!
//! clipsync keeps the clipboard of several machines on one LAN in sync.  One
//! machine runs the server (the hub); the others run clients that find the
//! server by UDP broadcast, or are pointed at it directly.  When you copy
//! something on any machine, it shows up on the clipboard of every other.
//!
//! This crate (`clipsync-core`) is the shared foundation.  It defines:
//!
//! - **`config`** – Protocol constants and tunables, loaded once at startup.
//!
//! - **`crypto`** – Password-keyed AES-256-CBC encryption of each frame.
//!
//! - **`protocol`** – The JSON messages exchanged over TCP and the
//!   newline-delimited framing that carries them.
//!
//! - **`clipboard`** – A polling watcher that detects local clipboard changes
//!   and writes received values without echoing them back.
//!
//! - **`history`** – A small, deduplicated list of recent clipboard entries.
//!
//! - **`discovery`** – The UDP broadcast exchange that finds servers.
//!
//! - **`sync`** – Glue between clipboard entries and wire messages.

pub mod clipboard;
pub mod config;
pub mod crypto;
pub mod discovery;
pub mod history;
pub mod protocol;
pub mod sync;

// Re-export the most-used types at the crate root so callers can write
// `clipsync_core::SyncConfig` instead of `clipsync_core::config::SyncConfig`.
pub use clipboard::{
    ClipboardContent, ClipboardEntry, ClipboardError, ClipboardWatcher, EncodedImage, EntryKind,
    MockClipboard, PlatformClipboard,
};
#[cfg(feature = "system-clipboard")]
pub use clipboard::SystemClipboard;
pub use config::{ConfigError, SyncConfig};
pub use crypto::{CryptoError, EncryptionContext};
pub use discovery::{DiscoveredServer, DiscoveryEvent, DiscoveryRole, DiscoveryService};
pub use history::{HistoryStore, SharedHistory};
pub use protocol::{decode_frame, encode_frame, LineFramer, ProtocolError, SyncMessage};
pub use sync::{apply_inbound, outbound_message, SyncError, SyncStatus};
