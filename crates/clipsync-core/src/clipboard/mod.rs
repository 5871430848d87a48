//! Clipboard access, change detection, and received-image persistence.
//!
//! The engine never talks to the OS clipboard directly.  Everything goes
//! through the [`PlatformClipboard`] trait so the watcher can be tested with
//! [`mock::MockClipboard`] and run for real with [`system::SystemClipboard`].
//!
//! # Testability
//!
//! [`ClipboardWatcher::poll_once`] performs exactly one polling tick, so
//! tests can drive change detection without waiting on timers.

use std::path::PathBuf;

use thiserror::Error;

pub mod entry;
pub mod mock;
#[cfg(feature = "system-clipboard")]
pub mod system;
pub mod watcher;

pub use entry::{image_summary_text, ClipboardEntry, EntryKind, ImageInfo};
pub use mock::MockClipboard;
#[cfg(feature = "system-clipboard")]
pub use system::SystemClipboard;
pub use watcher::{local_hostname, write_image_file, ClipboardWatcher};

/// Format tag reported by the platform clipboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClipboardFormat {
    Text,
    Image,
}

/// A clipboard image as PNG bytes plus its pixel dimensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub width: u32,
    pub height: u32,
    pub png: Vec<u8>,
}

/// A value to place on the clipboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClipboardContent {
    Text(String),
    Image(EncodedImage),
}

impl ClipboardContent {
    pub fn kind(&self) -> EntryKind {
        match self {
            ClipboardContent::Text(_) => EntryKind::Text,
            ClipboardContent::Image(_) => EntryKind::Image,
        }
    }
}

/// Error type for clipboard operations.
#[derive(Debug, Error)]
pub enum ClipboardError {
    /// The platform clipboard could not be opened.
    #[error("clipboard unavailable: {0}")]
    Unavailable(String),

    /// Reading from the platform clipboard failed.
    #[error("failed to read clipboard: {0}")]
    Read(String),

    /// Writing to the platform clipboard failed.
    #[error("failed to write clipboard: {0}")]
    Write(String),

    /// Image bytes could not be decoded or encoded.
    #[error("invalid image data: {0}")]
    InvalidImage(String),

    /// A received image could not be written to disk.
    #[error("failed to save image to {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Port to the OS clipboard.
///
/// Methods take `&mut self` because most platform clipboards are
/// single-owner handles.  Implementations are called from async code while
/// a lock is held, so every call must return promptly.
pub trait PlatformClipboard: Send + 'static {
    /// Formats currently present on the clipboard.
    fn available_formats(&mut self) -> Vec<ClipboardFormat>;

    /// Current text, or `None` if the clipboard holds no text.
    fn read_text(&mut self) -> Result<Option<String>, ClipboardError>;

    fn write_text(&mut self, text: &str) -> Result<(), ClipboardError>;

    /// Current image as PNG, or `None` if the clipboard holds no image.
    fn read_image(&mut self) -> Result<Option<EncodedImage>, ClipboardError>;

    fn write_image(&mut self, image: &EncodedImage) -> Result<(), ClipboardError>;
}
