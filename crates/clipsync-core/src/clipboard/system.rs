//! OS clipboard adapter backed by `arboard`.
//!
//! `arboard` exchanges images as raw RGBA pixels.  The engine works with PNG
//! bytes (hashing, size cap, wire payload), so this adapter converts in both
//! directions with the `image` crate.
//!
//! Fetching an image pulls the whole RGBA buffer, so the buffer fetched by
//! [`PlatformClipboard::available_formats`] is kept and handed to the
//! `read_image` call that follows it in the same poll.

use std::borrow::Cow;
use std::io::Cursor;

use image::{ImageFormat, RgbaImage};
use tracing::debug;

use super::{ClipboardError, ClipboardFormat, EncodedImage, PlatformClipboard};

/// The real system clipboard.
pub struct SystemClipboard {
    inner: arboard::Clipboard,
    /// Image fetched by the last format check and not yet read.
    probed_image: Option<arboard::ImageData<'static>>,
}

impl SystemClipboard {
    /// Opens the system clipboard.
    ///
    /// # Errors
    ///
    /// Returns [`ClipboardError::Unavailable`] when no clipboard is reachable,
    /// e.g. on a headless Linux box without a display server.
    pub fn new() -> Result<Self, ClipboardError> {
        let inner =
            arboard::Clipboard::new().map_err(|e| ClipboardError::Unavailable(e.to_string()))?;
        Ok(Self {
            inner,
            probed_image: None,
        })
    }
}

impl PlatformClipboard for SystemClipboard {
    fn available_formats(&mut self) -> Vec<ClipboardFormat> {
        let mut formats = Vec::new();
        self.probed_image = self.inner.get_image().ok();
        if self.probed_image.is_some() {
            formats.push(ClipboardFormat::Image);
        }
        if self.inner.get_text().is_ok() {
            formats.push(ClipboardFormat::Text);
        }
        formats
    }

    fn read_text(&mut self) -> Result<Option<String>, ClipboardError> {
        match self.inner.get_text() {
            Ok(text) => Ok(Some(text)),
            Err(arboard::Error::ContentNotAvailable) => Ok(None),
            Err(e) => Err(ClipboardError::Read(e.to_string())),
        }
    }

    fn write_text(&mut self, text: &str) -> Result<(), ClipboardError> {
        self.probed_image = None;
        self.inner
            .set_text(text)
            .map_err(|e| ClipboardError::Write(e.to_string()))
    }

    fn read_image(&mut self) -> Result<Option<EncodedImage>, ClipboardError> {
        let inner = &mut self.inner;
        let fetched = take_probed_or_fetch(&mut self.probed_image, || inner.get_image());
        let data = match fetched {
            Ok(data) => data,
            Err(arboard::Error::ContentNotAvailable) => return Ok(None),
            Err(e) => return Err(ClipboardError::Read(e.to_string())),
        };
        encode_image_data(data).map(Some)
    }

    fn write_image(&mut self, image: &EncodedImage) -> Result<(), ClipboardError> {
        self.probed_image = None;
        let rgba = png_to_rgba(&image.png)?;
        let (width, height) = rgba.dimensions();
        debug!("writing {width}x{height} image to system clipboard");
        self.inner
            .set_image(arboard::ImageData {
                width: width as usize,
                height: height as usize,
                bytes: Cow::Owned(rgba.into_raw()),
            })
            .map_err(|e| ClipboardError::Write(e.to_string()))
    }
}

/// Uses the buffer left by a format check, or fetches a fresh one.
fn take_probed_or_fetch<T, E>(
    probed: &mut Option<T>,
    fetch: impl FnOnce() -> Result<T, E>,
) -> Result<T, E> {
    match probed.take() {
        Some(value) => Ok(value),
        None => fetch(),
    }
}

/// Converts arboard's RGBA image into PNG bytes.
fn encode_image_data(data: arboard::ImageData<'_>) -> Result<EncodedImage, ClipboardError> {
    let width = u32::try_from(data.width)
        .map_err(|_| ClipboardError::InvalidImage("width out of range".to_string()))?;
    let height = u32::try_from(data.height)
        .map_err(|_| ClipboardError::InvalidImage("height out of range".to_string()))?;
    let png = rgba_to_png(width, height, data.bytes.into_owned())?;
    Ok(EncodedImage { width, height, png })
}

/// Encodes raw RGBA pixels as PNG.
///
/// # Errors
///
/// Returns [`ClipboardError::InvalidImage`] if the buffer length does not
/// match `width * height * 4` or encoding fails.
pub fn rgba_to_png(width: u32, height: u32, rgba: Vec<u8>) -> Result<Vec<u8>, ClipboardError> {
    let img = RgbaImage::from_raw(width, height, rgba).ok_or_else(|| {
        ClipboardError::InvalidImage(format!("RGBA buffer does not match {width}x{height}"))
    })?;
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png)
        .map_err(|e| ClipboardError::InvalidImage(e.to_string()))?;
    Ok(out.into_inner())
}

/// Decodes PNG bytes into RGBA pixels.
///
/// # Errors
///
/// Returns [`ClipboardError::InvalidImage`] if the bytes are not a PNG.
pub fn png_to_rgba(png: &[u8]) -> Result<RgbaImage, ClipboardError> {
    image::load_from_memory_with_format(png, ImageFormat::Png)
        .map(|img| img.to_rgba8())
        .map_err(|e| ClipboardError::InvalidImage(e.to_string()))
}
