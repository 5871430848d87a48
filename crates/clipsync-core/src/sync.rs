//! Conversions between clipboard entries and wire messages, shared by the
//! server and client coordinators.
//!
//! - [`outbound_message`] turns a locally detected change into a
//!   `CLIPBOARD_TEXT` or `CLIPBOARD_IMAGE` message, enforcing the image size
//!   cap before anything is sent.
//! - [`apply_inbound`] writes a received clipboard message to the local
//!   clipboard (as a guarded write) and records it in history.
//! - [`SyncStatus`] is the one-word state both coordinators report.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::clipboard::entry::{ClipboardEntry, EntryKind};
use crate::clipboard::{ClipboardContent, ClipboardError, ClipboardWatcher, EncodedImage, PlatformClipboard};
use crate::protocol::messages::{ImagePayload, SyncMessage};

/// Overall sync state of a running coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Server: at least one authenticated client.  Client: authenticated.
    Connected,
    /// Running, but nobody to sync with yet.
    Waiting,
    /// Stopped, or the client gave up reconnecting.
    Disconnected,
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            SyncStatus::Connected => "connected",
            SyncStatus::Waiting => "waiting",
            SyncStatus::Disconnected => "disconnected",
        })
    }
}

/// Error type for the sync helpers.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An image is larger than `max_file_size` and will not be sent.
    #[error("payload of {size} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { size: usize, max: usize },

    /// An image entry without dimensions cannot be sent.
    #[error("image entry {0} has no image metadata")]
    MissingImageInfo(uuid::Uuid),

    /// Writing, decoding or saving the received value failed.
    #[error(transparent)]
    Clipboard(#[from] ClipboardError),
}

/// Builds the wire message for a locally detected change.
///
/// # Errors
///
/// [`SyncError::PayloadTooLarge`] for images above `max_file_size` bytes,
/// [`SyncError::MissingImageInfo`] for image entries without metadata.
pub fn outbound_message(entry: &ClipboardEntry, max_file_size: usize) -> Result<SyncMessage, SyncError> {
    match entry.kind {
        EntryKind::Text => Ok(SyncMessage::ClipboardText {
            content: entry.content.clone(),
            source: entry.source.clone(),
            timestamp: entry.timestamp,
        }),
        EntryKind::Image => {
            let info = entry
                .image
                .as_ref()
                .ok_or(SyncError::MissingImageInfo(entry.id))?;
            if info.size > max_file_size {
                return Err(SyncError::PayloadTooLarge {
                    size: info.size,
                    max: max_file_size,
                });
            }
            Ok(SyncMessage::ClipboardImage {
                image_data: ImagePayload {
                    content: entry.content.clone(),
                    width: info.width,
                    height: info.height,
                    format: info.format.clone(),
                    size: info.size,
                },
                source: entry.source.clone(),
                timestamp: entry.timestamp,
            })
        }
    }
}

/// Applies a received clipboard message locally.
///
/// Returns the entry recorded in history, or `None` for messages that carry
/// no clipboard content.
///
/// Text is written to the clipboard and recorded as is.  An image is first
/// saved under the temp folder, then written to the clipboard, and recorded
/// as an `[Image WxH]` summary pointing at the saved file.
///
/// # Errors
///
/// [`SyncError::Clipboard`] when decoding, saving or writing fails.  Nothing
/// is recorded in history in that case.
pub async fn apply_inbound<C: PlatformClipboard>(
    message: &SyncMessage,
    watcher: &ClipboardWatcher<C>,
) -> Result<Option<ClipboardEntry>, SyncError> {
    let entry = match message {
        SyncMessage::ClipboardText {
            content,
            source,
            timestamp,
        } => {
            watcher
                .write_clipboard(&ClipboardContent::Text(content.clone()))
                .await?;
            info!("applied text from {source} ({} chars)", content.chars().count());
            ClipboardEntry::text(content.clone(), source.clone()).with_timestamp(*timestamp)
        }
        SyncMessage::ClipboardImage {
            image_data,
            source,
            timestamp,
        } => {
            let png = BASE64
                .decode(image_data.content.as_bytes())
                .map_err(|e| ClipboardError::InvalidImage(e.to_string()))?;
            let path = watcher.save_image(image_data)?;
            watcher
                .write_clipboard(&ClipboardContent::Image(EncodedImage {
                    width: image_data.width,
                    height: image_data.height,
                    png,
                }))
                .await?;
            info!(
                "applied {}x{} image from {source}",
                image_data.width, image_data.height
            );
            ClipboardEntry::image_summary(image_data.width, image_data.height, source.clone())
                .with_timestamp(*timestamp)
                .with_file_path(path)
        }
        other => {
            debug!("no clipboard content in {} message", other.kind());
            return Ok(None);
        }
    };

    let mut entry = entry;
    entry.id = watcher.history().lock().await.add(entry.clone());
    Ok(Some(entry))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clipboard::entry::ImageInfo;
    use crate::clipboard::mock::MockClipboard;
    use crate::config::SyncConfig;
    use crate::history::HistoryStore;
    use chrono::Utc;
    use std::sync::Arc;

    fn image_entry(size: usize) -> ClipboardEntry {
        ClipboardEntry::image(
            BASE64.encode(vec![0u8; size]),
            ImageInfo {
                width: 10,
                height: 20,
                format: "png".into(),
                size,
            },
            "desk",
        )
    }

    fn watcher_in(dir: &std::path::Path, mock: &MockClipboard) -> ClipboardWatcher<MockClipboard> {
        let config = Arc::new(SyncConfig {
            resume_delay_ms: 10,
            temp_folder: dir.to_string_lossy().into_owned(),
            ..SyncConfig::default()
        });
        ClipboardWatcher::with_hostname(config, mock.clone(), HistoryStore::shared(10), "local")
    }

    #[test]
    fn test_outbound_text_copies_fields() {
        // Arrange
        let entry = ClipboardEntry::text("hello", "desk");

        // Act
        let msg = outbound_message(&entry, 1024).unwrap();

        // Assert
        assert_eq!(
            msg,
            SyncMessage::ClipboardText {
                content: "hello".into(),
                source: "desk".into(),
                timestamp: entry.timestamp,
            }
        );
    }

    #[test]
    fn test_outbound_image_at_limit_is_sent() {
        let msg = outbound_message(&image_entry(100), 100).unwrap();
        assert!(matches!(
            msg,
            SyncMessage::ClipboardImage { ref image_data, .. } if image_data.size == 100 && image_data.width == 10
        ));
    }

    #[test]
    fn test_outbound_image_over_limit_is_payload_too_large() {
        let result = outbound_message(&image_entry(101), 100);
        assert!(matches!(
            result,
            Err(SyncError::PayloadTooLarge { size: 101, max: 100 })
        ));
    }

    #[test]
    fn test_outbound_summary_image_without_info_is_rejected() {
        let entry = ClipboardEntry::image_summary(1, 1, "desk");
        assert!(matches!(
            outbound_message(&entry, 100),
            Err(SyncError::MissingImageInfo(_))
        ));
    }

    #[tokio::test]
    async fn test_apply_inbound_text_writes_clipboard_and_history() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let mock = MockClipboard::new();
        let watcher = watcher_in(dir.path(), &mock);
        let msg = SyncMessage::ClipboardText {
            content: "from peer".into(),
            source: "laptop".into(),
            timestamp: Utc::now(),
        };

        // Act
        let recorded = apply_inbound(&msg, &watcher).await.unwrap().unwrap();

        // Assert
        assert_eq!(mock.text().as_deref(), Some("from peer"));
        assert_eq!(recorded.source, "laptop");
        let history = watcher.history().lock().await;
        assert_eq!(history.get_latest().unwrap().content, "from peer");
        drop(history);
        tokio::time::sleep(std::time::Duration::from_millis(40)).await;
        assert!(
            watcher.poll_once().await.unwrap().is_none(),
            "the applied value is not reported as a local change"
        );
    }

    #[tokio::test]
    async fn test_apply_inbound_image_saves_file_and_records_summary() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let mock = MockClipboard::new();
        let watcher = watcher_in(dir.path(), &mock);
        let msg = SyncMessage::ClipboardImage {
            image_data: ImagePayload {
                content: BASE64.encode([9u8, 9, 9]),
                width: 3,
                height: 1,
                format: "png".into(),
                size: 3,
            },
            source: "laptop".into(),
            timestamp: Utc::now(),
        };

        // Act
        let recorded = apply_inbound(&msg, &watcher).await.unwrap().unwrap();

        // Assert
        assert_eq!(recorded.content, "[Image 3x1]");
        let path = recorded.file_path.expect("saved file path");
        assert!(path.starts_with(dir.path()));
        assert_eq!(std::fs::read(path).unwrap(), vec![9, 9, 9]);
        assert_eq!(mock.image().unwrap().png, vec![9, 9, 9]);
    }

    #[tokio::test]
    async fn test_apply_inbound_ignores_control_messages() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockClipboard::new();
        let watcher = watcher_in(dir.path(), &mock);

        let result = apply_inbound(&SyncMessage::Pong, &watcher).await.unwrap();

        assert!(result.is_none());
        assert!(mock.writes().is_empty());
    }

    #[tokio::test]
    async fn test_apply_inbound_write_failure_records_nothing() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let mock = MockClipboard::new();
        mock.fail_writes(true);
        let watcher = watcher_in(dir.path(), &mock);
        let msg = SyncMessage::ClipboardText {
            content: "x".into(),
            source: "laptop".into(),
            timestamp: Utc::now(),
        };

        // Act
        let result = apply_inbound(&msg, &watcher).await;

        // Assert
        assert!(matches!(result, Err(SyncError::Clipboard(ClipboardError::Write(_)))));
        assert!(watcher.history().lock().await.is_empty());
    }
}
