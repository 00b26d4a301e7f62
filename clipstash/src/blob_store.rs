//! File-based blob storage for clipboard images
//!
//! Image payloads live on disk next to the database instead of inside it,
//! which keeps SQLite pages small and WAL churn low.
//!
//! Layout under the root directory:
//!   thumbnails/<item-id>.jpg     downscaled JPEG preview
//!   images/<item-id>.<ext>       original bytes, ext sniffed from magic bytes
//!
//! Paths handed out and accepted by this module are relative to the root.

use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use image::codecs::jpeg::JpegEncoder;
use tracing::{debug, info, warn};

use crate::config::BlobConfig;
use crate::interface::BlobError;

pub const THUMBNAIL_DIR: &str = "thumbnails";
pub const IMAGE_DIR: &str = "images";

/// Suffix of in-progress writes; renamed into place once complete
const PARTIAL_SUFFIX: &str = "partial";

pub struct BlobStore {
    root: PathBuf,
    config: BlobConfig,
}

impl BlobStore {
    /// Open (creating if needed) a blob store rooted at `root`
    pub fn open<P: Into<PathBuf>>(root: P, config: BlobConfig) -> Result<Self, BlobError> {
        let root = root.into();
        fs::create_dir_all(root.join(THUMBNAIL_DIR))?;
        fs::create_dir_all(root.join(IMAGE_DIR))?;
        Ok(Self { root, config })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &BlobConfig {
        &self.config
    }

    /// Downscale and re-encode `bytes` as a JPEG thumbnail for item `id`.
    /// Returns the relative path of the written file.
    pub fn save_thumbnail(&self, bytes: &[u8], id: &str) -> Result<String, BlobError> {
        validate_id(id)?;
        let jpeg = generate_thumbnail(
            bytes,
            self.config.thumbnail_max_dimension,
            self.config.thumbnail_quality,
        )?;
        let relative = format!("{}/{}.jpg", THUMBNAIL_DIR, id);
        self.write_atomic(&relative, &jpeg)?;
        debug!(id = %id, size = jpeg.len(), "Stored thumbnail");
        Ok(relative)
    }

    /// Store the original image bytes for item `id`, verbatim.
    /// Fails with `ImageTooLarge` above the configured ceiling.
    pub fn save_full_image(&self, bytes: &[u8], id: &str) -> Result<String, BlobError> {
        validate_id(id)?;
        let limit = self.config.max_full_image_bytes;
        if bytes.len() > limit {
            return Err(BlobError::ImageTooLarge { size: bytes.len(), limit });
        }
        let relative = format!("{}/{}.{}", IMAGE_DIR, id, sniff_extension(bytes));
        self.write_atomic(&relative, bytes)?;
        debug!(id = %id, size = bytes.len(), path = %relative, "Stored full image");
        Ok(relative)
    }

    pub fn load_thumbnail(&self, path: &str) -> Result<Vec<u8>, BlobError> {
        Ok(fs::read(self.resolve(path, THUMBNAIL_DIR)?)?)
    }

    pub fn load_full_image(&self, path: &str) -> Result<Vec<u8>, BlobError> {
        Ok(fs::read(self.resolve(path, IMAGE_DIR)?)?)
    }

    /// Remove the blob files of one record. Missing files are not an error.
    pub fn delete(&self, thumbnail: Option<&str>, full_image: Option<&str>) -> Result<(), BlobError> {
        let targets = [(thumbnail, THUMBNAIL_DIR), (full_image, IMAGE_DIR)];
        for (path, dir) in targets {
            let Some(path) = path else { continue };
            let absolute = self.resolve(path, dir)?;
            match fs::remove_file(&absolute) {
                Ok(()) => debug!(path = %path, "Deleted blob file"),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    debug!(path = %path, "Blob file not found, nothing to delete")
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Delete every file in the blob directories whose relative path is not
    /// in `valid_paths`. Returns the number of files removed.
    ///
    /// Meant for idle maintenance. A capture's blobs are written before its
    /// record commits, so in-progress `.partial` files and anything modified
    /// within `orphan_grace` are left alone even when unreferenced.
    pub fn cleanup_orphans(&self, valid_paths: &HashSet<String>) -> Result<usize, BlobError> {
        let mut deleted = 0;

        for dir in [THUMBNAIL_DIR, IMAGE_DIR] {
            for entry in fs::read_dir(self.root.join(dir))? {
                let entry = entry?;
                let metadata = entry.metadata()?;
                if !metadata.is_file() {
                    continue;
                }
                let name = entry.file_name();
                let relative = format!("{}/{}", dir, name.to_string_lossy());
                if valid_paths.contains(&relative) {
                    continue;
                }
                if Path::new(&name).extension().is_some_and(|ext| ext == PARTIAL_SUFFIX) {
                    debug!(path = %relative, "Skipping in-progress blob write");
                    continue;
                }
                if !self.is_past_grace(&metadata) {
                    debug!(path = %relative, "Skipping recently written blob");
                    continue;
                }
                match fs::remove_file(entry.path()) {
                    Ok(()) => {
                        debug!(path = %relative, "Removed orphaned blob");
                        deleted += 1;
                    }
                    Err(e) => warn!(path = %relative, error = %e, "Failed to remove orphaned blob"),
                }
            }
        }

        if deleted > 0 {
            info!(deleted, "Garbage collected orphaned blobs");
        }
        Ok(deleted)
    }

    /// A file with an unreadable or future mtime counts as fresh
    fn is_past_grace(&self, metadata: &fs::Metadata) -> bool {
        if self.config.orphan_grace.is_zero() {
            return true;
        }
        metadata
            .modified()
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .is_some_and(|age| age >= self.config.orphan_grace)
    }

    /// Total bytes used by thumbnails and full images
    pub fn total_storage_size(&self) -> Result<u64, BlobError> {
        let mut total = 0;
        for dir in [THUMBNAIL_DIR, IMAGE_DIR] {
            for entry in fs::read_dir(self.root.join(dir))? {
                let metadata = entry?.metadata()?;
                if metadata.is_file() {
                    total += metadata.len();
                }
            }
        }
        Ok(total)
    }

    /// Write to a sibling partial file and rename it into place, so a crash
    /// never leaves a truncated blob under its final name.
    fn write_atomic(&self, relative: &str, bytes: &[u8]) -> Result<(), BlobError> {
        let target = self.root.join(relative);
        let partial = target.with_extension(PARTIAL_SUFFIX);
        fs::write(&partial, bytes)?;
        if let Err(e) = fs::rename(&partial, &target) {
            let _ = fs::remove_file(&partial);
            return Err(e.into());
        }
        Ok(())
    }

    /// Turn a stored relative path into an absolute one, accepting only
    /// `<dir>/<file>` with no traversal.
    fn resolve(&self, relative: &str, dir: &str) -> Result<PathBuf, BlobError> {
        let path = Path::new(relative);
        let mut components = path.components();
        let valid = matches!(components.next(), Some(Component::Normal(d)) if d == dir)
            && matches!(components.next(), Some(Component::Normal(_)))
            && components.next().is_none();
        if !valid {
            return Err(BlobError::InvalidPath(relative.to_string()));
        }
        Ok(self.root.join(path))
    }
}

/// Item ids become file names, so they must be a single plain component
fn validate_id(id: &str) -> Result<(), BlobError> {
    let ok = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(BlobError::InvalidPath(id.to_string()))
    }
}

/// File extension for an image payload, from its leading signature bytes
pub fn sniff_extension(bytes: &[u8]) -> &'static str {
    const PNG: &[u8] = &[0x89, b'P', b'N', b'G'];
    const TIFF_LE: &[u8] = &[b'I', b'I', 0x2A, 0x00];
    const TIFF_BE: &[u8] = &[b'M', b'M', 0x00, 0x2A];
    const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF];

    if bytes.starts_with(PNG) {
        "png"
    } else if bytes.starts_with(TIFF_LE) || bytes.starts_with(TIFF_BE) {
        "tiff"
    } else if bytes.starts_with(JPEG) {
        "jpg"
    } else {
        "dat"
    }
}

/// Decode `bytes`, shrink to fit `max_dimension` (aspect preserved, never
/// upscaled) and encode as JPEG at `quality`.
pub fn generate_thumbnail(bytes: &[u8], max_dimension: u32, quality: u8) -> Result<Vec<u8>, BlobError> {
    let img = image::load_from_memory(bytes)?;
    let img = if img.width() > max_dimension || img.height() > max_dimension {
        img.thumbnail(max_dimension, max_dimension)
    } else {
        img
    };

    // JPEG has no alpha channel
    let rgb = img.to_rgb8();
    let mut jpeg = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut jpeg, quality.clamp(1, 100));
    rgb.write_with_encoder(encoder)?;
    Ok(jpeg)
}
