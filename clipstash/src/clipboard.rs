//! Clipboard access
//!
//! `ClipboardReader` is the seam between the detector and the OS pasteboard;
//! tests drive the detector with scripted fakes. `SystemClipboard` is the
//! arboard-backed implementation used by the binary.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io::Cursor;

use arboard::Clipboard;
use image::error::{ParameterError, ParameterErrorKind};
use image::{ImageError, ImageFormat, RgbaImage};
use tracing::{debug, warn};

use crate::content_detection::looks_like_url;
use crate::interface::SourceApp;
use crate::models::Representations;

/// Synchronous, non-blocking view of the OS clipboard
pub trait ClipboardReader: Send + 'static {
    /// Counter that changes whenever the clipboard content changes
    fn change_count(&mut self) -> u64;

    /// True when the current content is flagged concealed or transient
    /// (password managers set these markers)
    fn has_sensitive_markers(&mut self) -> bool;

    /// Application that owns the current content, if known
    fn source_app(&mut self) -> SourceApp;

    /// Every representation currently offered
    fn read(&mut self) -> Representations;
}

/// arboard-backed reader.
///
/// arboard exposes no OS change counter, so one is derived: each call to
/// `change_count` samples the clipboard and bumps the counter when a hash
/// of its content moves. The snapshot taken at that point is what
/// `read` returns. Sensitive markers and the owning application are not
/// visible through arboard and are reported as absent.
pub struct SystemClipboard {
    counter: u64,
    last_hash: Option<u64>,
    pending: Option<Representations>,
}

impl SystemClipboard {
    /// Fails if no clipboard is reachable (for example, no display server)
    pub fn new() -> Result<Self, arboard::Error> {
        Clipboard::new()?;
        Ok(Self {
            counter: 0,
            last_hash: None,
            pending: None,
        })
    }
}

impl ClipboardReader for SystemClipboard {
    fn change_count(&mut self) -> u64 {
        // Connection is per sample so the reader holds no platform handle
        let mut clipboard = match Clipboard::new() {
            Ok(c) => c,
            Err(e) => {
                debug!(error = %e, "Clipboard unavailable");
                return self.counter;
            }
        };

        let text = clipboard.get_text().ok();
        let image = clipboard.get_image().ok();

        let hash = quick_hash(text.as_deref(), image.as_ref());
        if self.last_hash != Some(hash) {
            self.last_hash = Some(hash);
            self.counter = self.counter.wrapping_add(1);
            self.pending = Some(to_representations(text, image.as_ref()));
        }
        self.counter
    }

    fn has_sensitive_markers(&mut self) -> bool {
        false
    }

    fn source_app(&mut self) -> SourceApp {
        SourceApp::default()
    }

    fn read(&mut self) -> Representations {
        self.pending.take().unwrap_or_default()
    }
}

/// Change-detection hash over the full text, image dimensions and every pixel.
/// This is the only change signal, so a sampled hash would miss screenshots
/// that share their top rows.
fn quick_hash(text: Option<&str>, image: Option<&arboard::ImageData>) -> u64 {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    if let Some(image) = image {
        image.width.hash(&mut hasher);
        image.height.hash(&mut hasher);
        image.bytes.hash(&mut hasher);
    }
    hasher.finish()
}

fn to_representations(text: Option<String>, image: Option<&arboard::ImageData>) -> Representations {
    let mut reps = Representations::default();

    if let Some(text) = text {
        if looks_like_url(&text) {
            reps.url = Some(text.trim().to_string());
        }
        reps.plain_text = Some(text);
    }

    if let Some(image) = image {
        match encode_png(image) {
            Ok(png) => reps.image = Some(png),
            Err(e) => warn!(error = %e, "Failed to encode clipboard image"),
        }
    }

    reps
}

/// arboard hands out raw RGBA; store it as PNG
fn encode_png(image: &arboard::ImageData) -> Result<Vec<u8>, ImageError> {
    let rgba = RgbaImage::from_raw(image.width as u32, image.height as u32, image.bytes.to_vec())
        .ok_or_else(|| {
            ImageError::Parameter(ParameterError::from_kind(ParameterErrorKind::DimensionMismatch))
        })?;

    let mut png = Vec::new();
    rgba.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
    Ok(png)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;

    fn rgba(width: usize, height: usize, fill: u8) -> arboard::ImageData<'static> {
        arboard::ImageData {
            width,
            height,
            bytes: Cow::Owned(vec![fill; width * height * 4]),
        }
    }

    #[test]
    fn test_quick_hash_tracks_text_and_pixels() {
        let a = quick_hash(Some("hello"), None);
        assert_eq!(a, quick_hash(Some("hello"), None));
        assert_ne!(a, quick_hash(Some("hello!"), None));

        let img = rgba(2, 2, 10);
        assert_ne!(quick_hash(None, Some(&img)), quick_hash(None, Some(&rgba(2, 2, 11))));
        assert_ne!(quick_hash(None, Some(&img)), quick_hash(None, Some(&rgba(1, 4, 10))));
    }

    #[test]
    fn test_quick_hash_sees_changes_below_the_first_rows() {
        let (width, height) = (1920, 1080);
        let a = rgba(width, height, 0);
        let mut changed = vec![0u8; width * height * 4];
        // Identical first 500 rows, one pixel differs further down
        changed[(600 * width + 10) * 4] = 255;
        let b = arboard::ImageData {
            width,
            height,
            bytes: Cow::Owned(changed),
        };
        assert_ne!(quick_hash(None, Some(&a)), quick_hash(None, Some(&b)));
    }

    #[test]
    fn test_url_text_gets_url_representation() {
        let reps = to_representations(Some("https://example.com/a".into()), None);
        assert_eq!(reps.url(), Some("https://example.com/a"));
        assert_eq!(reps.text(), Some("https://example.com/a"));

        let reps = to_representations(Some("just words".into()), None);
        assert!(reps.url().is_none());
    }

    #[test]
    fn test_image_is_encoded_as_png() {
        let reps = to_representations(None, Some(&rgba(3, 2, 200)));
        let png = reps.image().unwrap();
        assert!(png.starts_with(&[0x89, b'P', b'N', b'G']));
        let decoded = image::load_from_memory(png).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (3, 2));
    }

    #[test]
    fn test_mismatched_image_buffer_is_rejected() {
        let bad = arboard::ImageData {
            width: 4,
            height: 4,
            bytes: Cow::Owned(vec![0; 3]),
        };
        assert!(encode_png(&bad).is_err());
        assert!(to_representations(None, Some(&bad)).image().is_none());
    }

    #[cfg(feature = "system-tests")]
    #[test]
    fn test_system_clipboard_roundtrip() {
        let mut reader = SystemClipboard::new().unwrap();
        let before = reader.change_count();
        Clipboard::new().unwrap().set_text("clipstash system test").unwrap();
        assert_ne!(reader.change_count(), before);
        assert_eq!(reader.read().text(), Some("clipstash system test"));
    }
}
