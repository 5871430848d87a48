//! Clipboard polling and change detection.
//!
//! # How change detection works (for beginners)
//!
//! Most OS clipboards do not notify anyone when they change, so the watcher
//! polls: every `clipboard_poll_interval` it reads the clipboard and compares
//! the value with the last one it saw.
//!
//! - **Text** is compared directly with the last observed text.
//! - **Images** are compared by the SHA-256 hash of their PNG bytes.  Only
//!   the hash is kept, not the image.
//!
//! A detected change is sent on the channel returned by
//! [`ClipboardWatcher::start`] and recorded in the history store.
//!
//! # Guarded writes
//!
//! When a value arrives from a peer, the coordinator writes it with
//! [`ClipboardWatcher::write_clipboard`].  That call pauses detection, writes,
//! records the written value as "last observed", and resumes detection after
//! `resume_delay`.  Without the guard the next tick would see the peer's value
//! as a local change and send it straight back.

use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::entry::{ClipboardEntry, ImageInfo};
use super::{ClipboardContent, ClipboardError, ClipboardFormat, EncodedImage, PlatformClipboard};
use crate::config::SyncConfig;
use crate::history::SharedHistory;
use crate::protocol::messages::ImagePayload;

/// Format label for every image the watcher produces.
pub const IMAGE_FORMAT_PNG: &str = "png";

/// Capacity of the change-event channel.
const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Last values seen on the clipboard.
#[derive(Debug, Default)]
struct Observed {
    text: Option<String>,
    image_hash: Option<String>,
}

/// State shared between the watcher handle and its polling task.
struct Shared<C> {
    config: Arc<SyncConfig>,
    clipboard: Mutex<C>,
    history: SharedHistory,
    observed: Mutex<Observed>,
    enabled: AtomicBool,
    paused: Arc<AtomicBool>,
    hostname: String,
}

/// Polls a [`PlatformClipboard`] and reports changes.
///
/// Clones are handles to the same watcher.
pub struct ClipboardWatcher<C: PlatformClipboard> {
    shared: Arc<Shared<C>>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl<C: PlatformClipboard> Clone for ClipboardWatcher<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            task: Arc::clone(&self.task),
        }
    }
}

impl<C: PlatformClipboard> ClipboardWatcher<C> {
    /// Creates a watcher for `clipboard`.  Entries are tagged with the local
    /// hostname.
    pub fn new(config: Arc<SyncConfig>, clipboard: C, history: SharedHistory) -> Self {
        Self::with_hostname(config, clipboard, history, local_hostname())
    }

    /// Like [`ClipboardWatcher::new`] with an explicit source name.
    pub fn with_hostname(
        config: Arc<SyncConfig>,
        clipboard: C,
        history: SharedHistory,
        hostname: impl Into<String>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                clipboard: Mutex::new(clipboard),
                history,
                observed: Mutex::new(Observed::default()),
                enabled: AtomicBool::new(true),
                paused: Arc::new(AtomicBool::new(false)),
                hostname: hostname.into(),
            }),
            task: Arc::new(Mutex::new(None)),
        }
    }

    /// Starts polling and returns the channel of detected changes.
    ///
    /// The current clipboard content is read once first and treated as
    /// already seen, so it is not reported.  Calling `start` again replaces
    /// the previous polling task.
    pub async fn start(&self) -> mpsc::Receiver<ClipboardEntry> {
        self.prime().await;

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let shared = Arc::clone(&self.shared);
        let period = shared.config.clipboard_poll_interval();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; priming already covered it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match shared.poll_once().await {
                    Ok(Some(entry)) => {
                        if tx.send(entry).await.is_err() {
                            debug!("clipboard event receiver dropped; stopping watcher");
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => debug!("clipboard poll failed: {e}"),
                }
            }
        });

        if let Some(previous) = self.task.lock().await.replace(handle) {
            previous.abort();
        }
        info!("clipboard watcher started (every {:?})", period);
        rx
    }

    /// Stops polling.  Safe to call more than once.
    pub async fn stop(&self) {
        if let Some(handle) = self.task.lock().await.take() {
            handle.abort();
            info!("clipboard watcher stopped");
        }
    }

    /// Runs a single polling tick.
    ///
    /// Returns the detected entry, or `None` when nothing changed or
    /// detection is disabled or paused.  A detected entry is also added to
    /// the history store.
    ///
    /// # Errors
    ///
    /// Propagates platform read failures.
    pub async fn poll_once(&self) -> Result<Option<ClipboardEntry>, ClipboardError> {
        self.shared.poll_once().await
    }

    /// Writes a value received from a peer without reporting it as a change.
    ///
    /// Detection is paused for the write and resumes `resume_delay` later.
    /// If detection was already paused by the caller, it stays paused.
    ///
    /// # Errors
    ///
    /// Returns the platform write error.  The resume is still scheduled.
    pub async fn write_clipboard(&self, content: &ClipboardContent) -> Result<(), ClipboardError> {
        let was_paused = self.shared.paused.swap(true, Ordering::SeqCst);

        let result = self.shared.write_and_mark(content).await;

        if !was_paused {
            let paused = Arc::clone(&self.shared.paused);
            let delay = self.shared.config.resume_delay();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                paused.store(false, Ordering::SeqCst);
            });
        }

        if let Err(e) = &result {
            warn!("synchronized clipboard write failed: {e}");
        }
        result
    }

    /// Writes a received image under the system temp directory and returns
    /// the path of the new file.
    ///
    /// # Errors
    ///
    /// [`ClipboardError::InvalidImage`] if the payload is not base64,
    /// [`ClipboardError::Persistence`] if the file cannot be written.
    pub fn save_image(&self, image: &ImagePayload) -> Result<PathBuf, ClipboardError> {
        let dir = std::env::temp_dir().join(&self.shared.config.temp_folder);
        write_image_file(&dir, image)
    }

    pub fn enable(&self) {
        self.shared.enabled.store(true, Ordering::SeqCst);
    }

    pub fn disable(&self) {
        self.shared.enabled.store(false, Ordering::SeqCst);
    }

    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::SeqCst)
    }

    /// Source name stamped on local entries.
    pub fn hostname(&self) -> &str {
        &self.shared.hostname
    }

    pub fn history(&self) -> &SharedHistory {
        &self.shared.history
    }

    /// Records the current clipboard as already observed.
    async fn prime(&self) {
        let mut clipboard = self.shared.clipboard.lock().await;
        let mut observed = self.shared.observed.lock().await;
        match clipboard.read_text() {
            Ok(text) => observed.text = text,
            Err(e) => debug!("initial clipboard text read failed: {e}"),
        }
        match clipboard.read_image() {
            Ok(image) => observed.image_hash = image.map(|img| hash_png(&img.png)),
            Err(e) => debug!("initial clipboard image read failed: {e}"),
        }
    }
}

impl<C: PlatformClipboard> Shared<C> {
    async fn poll_once(&self) -> Result<Option<ClipboardEntry>, ClipboardError> {
        if !self.enabled.load(Ordering::SeqCst) || self.paused.load(Ordering::SeqCst) {
            return Ok(None);
        }

        let mut clipboard = self.clipboard.lock().await;
        let formats = clipboard.available_formats();

        if formats.contains(&ClipboardFormat::Image) {
            let Some(image) = clipboard.read_image()? else {
                return Ok(None);
            };
            drop(clipboard);
            return Ok(self.observe_image(image).await);
        }

        if formats.contains(&ClipboardFormat::Text) {
            let Some(text) = clipboard.read_text()? else {
                return Ok(None);
            };
            drop(clipboard);
            return Ok(self.observe_text(text).await);
        }

        Ok(None)
    }

    async fn observe_text(&self, text: String) -> Option<ClipboardEntry> {
        if text.is_empty() {
            return None;
        }
        {
            let mut observed = self.observed.lock().await;
            if observed.text.as_deref() == Some(text.as_str()) {
                return None;
            }
            observed.text = Some(text.clone());
        }

        let entry = ClipboardEntry::text(text, &self.hostname);
        self.history.lock().await.add(entry.clone());
        debug!("clipboard text changed ({} chars)", entry.content.chars().count());
        Some(entry)
    }

    async fn observe_image(&self, image: EncodedImage) -> Option<ClipboardEntry> {
        let hash = hash_png(&image.png);
        {
            let mut observed = self.observed.lock().await;
            if observed.image_hash.as_deref() == Some(hash.as_str()) {
                return None;
            }
            observed.image_hash = Some(hash);
        }

        let info = ImageInfo {
            width: image.width,
            height: image.height,
            format: IMAGE_FORMAT_PNG.to_string(),
            size: image.png.len(),
        };
        let entry = ClipboardEntry::image(BASE64.encode(&image.png), info, &self.hostname);
        self.history.lock().await.add(ClipboardEntry::image_summary(
            image.width,
            image.height,
            &self.hostname,
        ));
        debug!(
            "clipboard image changed ({}x{}, {} bytes)",
            image.width,
            image.height,
            image.png.len()
        );
        Some(entry)
    }

    async fn write_and_mark(&self, content: &ClipboardContent) -> Result<(), ClipboardError> {
        let mut clipboard = self.clipboard.lock().await;
        match content {
            ClipboardContent::Text(text) => {
                clipboard.write_text(text)?;
                self.observed.lock().await.text = Some(text.clone());
            }
            ClipboardContent::Image(image) => {
                clipboard.write_image(image)?;
                // Hash what a later poll will read back, which may be a
                // re-encoding of the bytes we were given.
                let hash = match clipboard.read_image() {
                    Ok(Some(read_back)) => hash_png(&read_back.png),
                    _ => hash_png(&image.png),
                };
                self.observed.lock().await.image_hash = Some(hash);
            }
        }
        Ok(())
    }
}

/// Lowercase hex SHA-256 of `png`.
fn hash_png(png: &[u8]) -> String {
    hex::encode(Sha256::digest(png))
}

/// Name of this machine, used as the `source` of local entries.
pub fn local_hostname() -> String {
    gethostname::gethostname().to_string_lossy().into_owned()
}

/// Decodes `image` and writes it to `dir/image_<millis>.<format>`, creating
/// `dir` if needed.
///
/// # Errors
///
/// [`ClipboardError::InvalidImage`] if the payload is not base64,
/// [`ClipboardError::Persistence`] if the directory or file cannot be written.
pub fn write_image_file(dir: &Path, image: &ImagePayload) -> Result<PathBuf, ClipboardError> {
    let bytes = BASE64
        .decode(image.content.as_bytes())
        .map_err(|e| ClipboardError::InvalidImage(e.to_string()))?;

    std::fs::create_dir_all(dir).map_err(|source| ClipboardError::Persistence {
        path: dir.to_path_buf(),
        source,
    })?;

    // The format comes off the wire; it must not steer the path.
    let extension = if !image.format.is_empty()
        && image.format.chars().all(|c| c.is_ascii_alphanumeric())
    {
        image.format.as_str()
    } else {
        IMAGE_FORMAT_PNG
    };
    let path = dir.join(format!(
        "image_{}.{extension}",
        Utc::now().timestamp_millis()
    ));
    std::fs::write(&path, &bytes).map_err(|source| ClipboardError::Persistence {
        path: path.clone(),
        source,
    })?;

    debug!("saved received image to {}", path.display());
    Ok(path)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
