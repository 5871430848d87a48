//! All clipsync protocol message types.
//!
//! Before encryption every message is a JSON object whose `type` field names
//! the variant.  Example plaintexts:
//!
//! ```json
//! {"type":"auth","password":"secret"}
//! {"type":"auth_fail","error":"Invalid password"}
//! {"type":"clipboard_text","content":"hello","source":"desk-01","timestamp":"2024-05-01T10:00:00Z"}
//! {"type":"clipboard_image","imageData":{"content":"iVBOR...","width":2,"height":2,"format":"png","size":68},
//!  "source":"desk-01","timestamp":"2024-05-01T10:00:00Z"}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reply text sent with `AUTH_FAIL` when the password does not match.
pub const AUTH_FAIL_INVALID_PASSWORD: &str = "Invalid password";

/// Reply text sent with `AUTH_FAIL` when the first message is not `AUTH`.
pub const AUTH_FAIL_REQUIRED: &str = "Authentication required";

/// An image carried inside a `CLIPBOARD_IMAGE` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePayload {
    /// Base64-encoded image bytes.
    pub content: String,
    pub width: u32,
    pub height: u32,
    /// Encoding of the decoded bytes, e.g. `"png"`.
    pub format: String,
    /// Length of the decoded image in bytes.
    pub size: usize,
}

/// A message exchanged over the encrypted TCP transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncMessage {
    /// First message on every connection, sent by the client.
    Auth { password: String },
    /// Server accepted the password.
    AuthSuccess,
    /// Server rejected the connection; it will be closed.
    AuthFail { error: String },
    /// Keepalive request.  The server answers with [`SyncMessage::Pong`].
    Ping,
    /// Keepalive reply.
    Pong,
    /// Text copied on the `source` machine.
    ClipboardText {
        content: String,
        source: String,
        timestamp: DateTime<Utc>,
    },
    /// Image copied on the `source` machine.
    ClipboardImage {
        #[serde(rename = "imageData")]
        image_data: ImagePayload,
        source: String,
        timestamp: DateTime<Utc>,
    },
}

impl SyncMessage {
    /// Wire tag of this message, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncMessage::Auth { .. } => "auth",
            SyncMessage::AuthSuccess => "auth_success",
            SyncMessage::AuthFail { .. } => "auth_fail",
            SyncMessage::Ping => "ping",
            SyncMessage::Pong => "pong",
            SyncMessage::ClipboardText { .. } => "clipboard_text",
            SyncMessage::ClipboardImage { .. } => "clipboard_image",
        }
    }

    /// `true` for messages that carry clipboard content.
    pub fn is_clipboard(&self) -> bool {
        matches!(
            self,
            SyncMessage::ClipboardText { .. } | SyncMessage::ClipboardImage { .. }
        )
    }

    pub fn auth_fail(error: impl Into<String>) -> Self {
        SyncMessage::AuthFail {
            error: error.into(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
