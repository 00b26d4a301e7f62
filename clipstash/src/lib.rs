//! clipstash - local clipboard history capture engine
//!
//! Watches the clipboard, classifies and fingerprints each change, suppresses
//! repeats inside a sliding window, and keeps a bounded history in SQLite
//! with image payloads stored as files alongside it.

pub mod blob_store;
pub mod clipboard;
pub mod config;
pub mod content_detection;
pub mod coordinator;
pub mod database;
pub mod detector;
pub mod fingerprint;
pub mod interface;
pub mod models;
pub mod store;

pub use blob_store::BlobStore;
pub use clipboard::{ClipboardReader, SystemClipboard};
pub use config::{Settings, SettingsProvider, StoreConfig};
pub use coordinator::{IngestSummary, IngestionCoordinator};
pub use detector::Detector;
pub use interface::*;
pub use models::{CapturedContent, HistoryRecord, Representations};
pub use store::{HistoryStore, StoreStats};
