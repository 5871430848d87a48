//! In-memory clipboard for unit and integration tests.
//!
//! Clones share state, so a test can keep one handle to inspect writes while
//! the watcher owns another.

use std::sync::{Arc, Mutex, MutexGuard};

use super::{ClipboardContent, ClipboardError, ClipboardFormat, EncodedImage, PlatformClipboard};

#[derive(Debug, Default)]
struct MockState {
    text: Option<String>,
    image: Option<EncodedImage>,
    writes: Vec<ClipboardContent>,
    fail_writes: bool,
}

/// A mock implementation of [`PlatformClipboard`].
#[derive(Debug, Clone, Default)]
pub struct MockClipboard {
    state: Arc<Mutex<MockState>>,
}

impl MockClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a mock that already holds `text`.
    pub fn with_text(text: impl Into<String>) -> Self {
        let mock = Self::new();
        mock.set_text(text);
        mock
    }

    /// Simulates the user copying `text`.
    pub fn set_text(&self, text: impl Into<String>) {
        let mut state = self.lock();
        state.text = Some(text.into());
        state.image = None;
    }

    /// Simulates the user copying an image.
    pub fn set_image(&self, image: EncodedImage) {
        let mut state = self.lock();
        state.image = Some(image);
        state.text = None;
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.text = None;
        state.image = None;
    }

    pub fn text(&self) -> Option<String> {
        self.lock().text.clone()
    }

    pub fn image(&self) -> Option<EncodedImage> {
        self.lock().image.clone()
    }

    /// Every value written through [`PlatformClipboard`], oldest first.
    pub fn writes(&self) -> Vec<ClipboardContent> {
        self.lock().writes.clone()
    }

    /// Makes subsequent writes fail with [`ClipboardError::Write`].
    pub fn fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // A panicking test must not poison the mock for the others.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl PlatformClipboard for MockClipboard {
    fn available_formats(&mut self) -> Vec<ClipboardFormat> {
        let state = self.lock();
        let mut formats = Vec::new();
        if state.image.is_some() {
            formats.push(ClipboardFormat::Image);
        }
        if state.text.is_some() {
            formats.push(ClipboardFormat::Text);
        }
        formats
    }

    fn read_text(&mut self) -> Result<Option<String>, ClipboardError> {
        Ok(self.lock().text.clone())
    }

    fn write_text(&mut self, text: &str) -> Result<(), ClipboardError> {
        let mut state = self.lock();
        if state.fail_writes {
            return Err(ClipboardError::Write("mock write failure".to_string()));
        }
        state.text = Some(text.to_string());
        state.image = None;
        state.writes.push(ClipboardContent::Text(text.to_string()));
        Ok(())
    }

    fn read_image(&mut self) -> Result<Option<EncodedImage>, ClipboardError> {
        Ok(self.lock().image.clone())
    }

    fn write_image(&mut self, image: &EncodedImage) -> Result<(), ClipboardError> {
        let mut state = self.lock();
        if state.fail_writes {
            return Err(ClipboardError::Write("mock write failure".to_string()));
        }
        state.image = Some(image.clone());
        state.text = None;
        state.writes.push(ClipboardContent::Image(image.clone()));
        Ok(())
    }
}
