//! Line framing and frame encryption for the TCP transport.
//!
//! Wire format:
//! ```text
//! hex(iv) ":" hex(ciphertext) "\n"
//! ```
//! One encrypted [`SyncMessage`] per line.  Because the encrypted text is
//! pure hex plus one colon, a newline can never appear inside a frame.
//!
//! # Partial reads (for beginners)
//!
//! TCP is a byte stream: one `read()` may return half a frame, or three
//! frames and the start of a fourth.  [`LineFramer`] keeps the incomplete
//! tail between reads and only hands out complete lines, in arrival order.

use thiserror::Error;

use crate::crypto::{CryptoError, EncryptionContext};
use crate::protocol::messages::SyncMessage;

/// Frame delimiter.
pub const FRAME_DELIMITER: u8 = b'\n';

/// Errors that can occur while framing, encrypting or decoding a message.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// An incomplete frame grew past the configured maximum length.
    #[error("frame exceeds {max} bytes without a line terminator")]
    FrameTooLong { max: usize },

    /// The frame could not be decrypted or its JSON did not parse.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encrypts `msg` under `password` and appends the line terminator.
///
/// # Errors
///
/// Returns [`ProtocolError::Crypto`] if JSON serialization fails.
pub fn encode_frame(
    ctx: &EncryptionContext,
    msg: &SyncMessage,
    password: &str,
) -> Result<String, ProtocolError> {
    let mut frame = ctx.encrypt_object(msg, password)?;
    frame.push(FRAME_DELIMITER as char);
    Ok(frame)
}

/// Decrypts one line (without its terminator) into a [`SyncMessage`].
///
/// # Errors
///
/// Returns [`ProtocolError::Crypto`] for malformed frames, wrong passwords,
/// and plaintexts that are not a known message.
pub fn decode_frame(
    ctx: &EncryptionContext,
    line: &str,
    password: &str,
) -> Result<SyncMessage, ProtocolError> {
    Ok(ctx.decrypt_object(line.trim(), password)?)
}

/// Per-connection reassembly buffer for newline-delimited frames.
#[derive(Debug)]
pub struct LineFramer {
    buffer: Vec<u8>,
    max_frame_len: usize,
}

impl LineFramer {
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_frame_len,
        }
    }

    /// Appends `bytes` and returns every line completed by them.
    ///
    /// Blank lines are skipped.  Bytes after the last terminator stay
    /// buffered for the next call.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::FrameTooLong`] when the unterminated tail is
    /// longer than `max_frame_len`.  The caller should drop the connection.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<String>, ProtocolError> {
        self.buffer.extend_from_slice(bytes);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(pos) = self.buffer[start..]
            .iter()
            .position(|&b| b == FRAME_DELIMITER)
        {
            let end = start + pos;
            let line = String::from_utf8_lossy(&self.buffer[start..end]);
            if !line.trim().is_empty() {
                lines.push(line.into_owned());
            }
            start = end + 1;
        }
        self.buffer.drain(..start);

        if self.buffer.len() > self.max_frame_len {
            let max = self.max_frame_len;
            self.buffer.clear();
            return Err(ProtocolError::FrameTooLong { max });
        }
        Ok(lines)
    }

    /// Number of buffered bytes not yet terminated.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_returns_complete_lines_in_order() {
        // Arrange
        let mut framer = LineFramer::new(1024);

        // Act
        let lines = framer.push(b"one\ntwo\nthr").unwrap();

        // Assert
        assert_eq!(lines, vec!["one".to_string(), "two".to_string()]);
        assert_eq!(framer.pending(), 3);
    }

    #[test]
    fn test_push_joins_frame_split_across_reads() {
        let mut framer = LineFramer::new(1024);
        assert!(framer.push(b"abc").unwrap().is_empty());
        assert!(framer.push(b":de").unwrap().is_empty());
        assert_eq!(framer.push(b"f\n").unwrap(), vec!["abc:def".to_string()]);
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn test_push_skips_blank_lines() {
        let mut framer = LineFramer::new(1024);
        let lines = framer.push(b"\n  \nx\n\n").unwrap();
        assert_eq!(lines, vec!["x".to_string()]);
    }

    #[test]
    fn test_push_rejects_oversized_unterminated_frame() {
        // Arrange
        let mut framer = LineFramer::new(8);

        // Act
        let result = framer.push(b"0123456789");

        // Assert
        assert!(matches!(result, Err(ProtocolError::FrameTooLong { max: 8 })));
        assert_eq!(framer.pending(), 0, "buffer is discarded after overflow");
    }

    #[test]
    fn test_push_accepts_long_frame_once_terminated() {
        // The limit applies to the unterminated tail only.
        let mut framer = LineFramer::new(8);
        let lines = framer.push(b"0123456789\n").unwrap();
        assert_eq!(lines.len(), 1);
    }

    #[test]
    fn test_encode_frame_is_single_terminated_line() {
        let ctx = EncryptionContext::new();
        let frame = encode_frame(&ctx, &SyncMessage::Ping, "pw").unwrap();
        assert!(frame.ends_with('\n'));
        assert_eq!(frame.matches('\n').count(), 1);
    }

    #[test]
    fn test_encode_then_decode_through_framer() {
        // Arrange
        let ctx = EncryptionContext::new();
        let msg = SyncMessage::Auth {
            password: "pw".into(),
        };
        let frame = encode_frame(&ctx, &msg, "pw").unwrap();
        let mut framer = LineFramer::new(1 << 20);

        // Act – deliver the frame one byte at a time
        let mut lines = Vec::new();
        for b in frame.as_bytes() {
            lines.extend(framer.push(std::slice::from_ref(b)).unwrap());
        }

        // Assert
        assert_eq!(lines.len(), 1);
        assert_eq!(decode_frame(&ctx, &lines[0], "pw").unwrap(), msg);
    }

    #[test]
    fn test_decode_frame_with_wrong_password_is_crypto_error() {
        let ctx = EncryptionContext::new();
        let frame = encode_frame(
            &ctx,
            &SyncMessage::auth_fail("a fairly long reason so the frame spans blocks"),
            "right",
        )
        .unwrap();
        let result = decode_frame(&ctx, frame.trim_end(), "wrong");
        assert!(matches!(
            result,
            Err(ProtocolError::Crypto(CryptoError::Decryption(_)))
        ));
    }
}
