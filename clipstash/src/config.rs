//! Engine tunables and the settings collaborator
//!
//! `StoreConfig` holds constants of the capture engine itself. User-facing
//! values (retention, poll interval, ignore list, sensitive filter) belong to
//! the external settings layer and are read through `SettingsProvider`.

use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Images above this size are fingerprinted from head and tail samples only
pub const DEFAULT_HASH_SAMPLE_THRESHOLD: usize = 1024 * 1024;
pub const DEFAULT_HASH_SAMPLE_LEN: usize = 1024;

pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_FULL_IMAGE_BYTES: usize = 20 * 1024 * 1024;
pub const DEFAULT_THUMBNAIL_MAX_DIMENSION: u32 = 256;
pub const DEFAULT_THUMBNAIL_QUALITY: u8 = 70;
/// Blob files younger than this are never treated as orphans
pub const DEFAULT_ORPHAN_GRACE: Duration = Duration::from_secs(60);

/// Fingerprint sampling parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashConfig {
    pub sample_threshold: usize,
    pub sample_len: usize,
}

impl Default for HashConfig {
    fn default() -> Self {
        Self {
            sample_threshold: DEFAULT_HASH_SAMPLE_THRESHOLD,
            sample_len: DEFAULT_HASH_SAMPLE_LEN,
        }
    }
}

/// Blob sizing and encoding parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobConfig {
    pub max_full_image_bytes: usize,
    pub thumbnail_max_dimension: u32,
    /// JPEG quality, 1-100
    pub thumbnail_quality: u8,
    /// Minimum age before an unreferenced blob file may be swept; covers the
    /// gap between writing a capture's blobs and committing its record
    pub orphan_grace: Duration,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            max_full_image_bytes: DEFAULT_MAX_FULL_IMAGE_BYTES,
            thumbnail_max_dimension: DEFAULT_THUMBNAIL_MAX_DIMENSION,
            thumbnail_quality: DEFAULT_THUMBNAIL_QUALITY,
            orphan_grace: DEFAULT_ORPHAN_GRACE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Sliding window inside which an identical fingerprint counts as a repeat
    pub dedup_window: Duration,
    pub blobs: BlobConfig,
    pub hashing: HashConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dedup_window: DEFAULT_DEDUP_WINDOW,
            blobs: BlobConfig::default(),
            hashing: HashConfig::default(),
        }
    }
}

/// Read-only view of the user settings owned by the settings layer.
///
/// The core asks for values at the moment it needs them and never keeps them
/// past the current operation, except the poll interval which is read once
/// per detector start.
pub trait SettingsProvider: Send + Sync {
    /// Maximum number of unpinned records kept
    fn retention_limit(&self) -> usize;
    fn poll_interval(&self) -> Duration;
    /// Source application ids whose copies are never recorded
    fn ignored_sources(&self) -> HashSet<String>;
    /// Drop captures the clipboard marks as concealed or transient
    fn filter_sensitive(&self) -> bool;
}

/// File-backed settings used by the command-line front end
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub retention_limit: usize,
    pub poll_interval_ms: u64,
    pub ignored_sources: Vec<String>,
    pub filter_sensitive: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            retention_limit: 500,
            poll_interval_ms: 500,
            ignored_sources: Vec::new(),
            filter_sensitive: true,
        }
    }
}

impl Settings {
    /// Load settings from a JSON file; missing keys take their defaults
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid settings file: {0}")]
    Parse(#[from] serde_json::Error),
}

impl SettingsProvider for Settings {
    fn retention_limit(&self) -> usize {
        self.retention_limit
    }

    fn poll_interval(&self) -> Duration {
        // A zero period would make the ticker spin
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    fn ignored_sources(&self) -> HashSet<String> {
        self.ignored_sources.iter().cloned().collect()
    }

    fn filter_sensitive(&self) -> bool {
        self.filter_sensitive
    }
}
