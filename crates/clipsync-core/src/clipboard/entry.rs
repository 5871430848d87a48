//! Clipboard entries: one observed or received clipboard value.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of content held by a [`ClipboardEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Text,
    Image,
}

/// Dimensions and encoding of an image entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub format: String,
    /// Decoded image size in bytes.
    pub size: usize,
}

/// A clipboard value together with where and when it came from.
///
/// Entries are immutable once created.  The history store replaces `id`
/// with a fresh one on insertion so ids stay unique per insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipboardEntry {
    pub id: Uuid,
    /// Text, base64 image payload, or an `[Image WxH]` summary.
    pub content: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    /// Hostname of the machine where the value was copied.
    pub source: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageInfo>,
    /// Where a received image was written on disk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
}

impl ClipboardEntry {
    /// A text entry stamped with the current time.
    pub fn text(content: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            content: content.into(),
            kind: EntryKind::Text,
            source: source.into(),
            timestamp: Utc::now(),
            image: None,
            file_path: None,
        }
    }

    /// An image entry carrying the full base64 payload.
    pub fn image(payload: impl Into<String>, info: ImageInfo, source: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            content: payload.into(),
            kind: EntryKind::Image,
            source: source.into(),
            timestamp: Utc::now(),
            image: Some(info),
            file_path: None,
        }
    }

    /// A metadata-only image entry, as kept in history instead of the payload.
    pub fn image_summary(width: u32, height: u32, source: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            content: image_summary_text(width, height),
            kind: EntryKind::Image,
            source: source.into(),
            timestamp: Utc::now(),
            image: None,
            file_path: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_file_path(mut self, path: PathBuf) -> Self {
        self.file_path = Some(path);
        self
    }

    /// `true` when `other` holds the same `(content, kind)` pair.
    pub fn same_content(&self, other: &ClipboardEntry) -> bool {
        self.kind == other.kind && self.content == other.content
    }
}

/// History label for an image: `[Image 640x480]`.
pub fn image_summary_text(width: u32, height: u32) -> String {
    format!("[Image {width}x{height}]")
}
