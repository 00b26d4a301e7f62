//! Ingestion coordinator
//!
//! Single consumer of the detector's capture channel. For each capture, in
//! arrival order: duplicate check, image blobs (images only), record save,
//! retention enforcement. Storage work runs on the blocking pool and is
//! awaited to completion, so a capture already received is never half written.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::blob_store::BlobStore;
use crate::config::SettingsProvider;
use crate::interface::{BlobError, ContentType, IngestOutcome, StoreError};
use crate::models::{CapturedContent, HistoryRecord, ImagePaths};
use crate::store::HistoryStore;

/// Tally of one `run`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub stored: usize,
    pub duplicates: usize,
    pub failed: usize,
}

pub struct IngestionCoordinator {
    store: Arc<HistoryStore>,
    settings: Arc<dyn SettingsProvider>,
}

impl IngestionCoordinator {
    pub fn new(store: Arc<HistoryStore>, settings: Arc<dyn SettingsProvider>) -> Self {
        Self { store, settings }
    }

    /// Consume captures until the channel closes
    pub async fn run(&self, mut captures: mpsc::Receiver<CapturedContent>) -> IngestSummary {
        let mut summary = IngestSummary::default();

        while let Some(capture) = captures.recv().await {
            match self.ingest(capture).await {
                Ok(IngestOutcome::Stored { .. }) => summary.stored += 1,
                Ok(IngestOutcome::Duplicate) => summary.duplicates += 1,
                Err(e) => {
                    error!(error = %e, "Capture dropped");
                    summary.failed += 1;
                }
            }
        }

        info!(
            stored = summary.stored,
            duplicates = summary.duplicates,
            failed = summary.failed,
            "Capture channel closed, ingestion finished"
        );
        summary
    }

    /// Run one capture through the pipeline
    pub async fn ingest(&self, capture: CapturedContent) -> Result<IngestOutcome, StoreError> {
        let store = Arc::clone(&self.store);
        let settings = Arc::clone(&self.settings);
        tokio::task::spawn_blocking(move || ingest_blocking(&store, settings.as_ref(), capture)).await?
    }
}

fn ingest_blocking(
    store: &HistoryStore,
    settings: &dyn SettingsProvider,
    capture: CapturedContent,
) -> Result<IngestOutcome, StoreError> {
    // The window is measured from the capture's own instant
    if store.is_duplicate_at(&capture.content_hash, capture.captured_at)? {
        debug!(hash = %capture.content_hash, "Duplicate capture within window");
        return Ok(IngestOutcome::Duplicate);
    }

    let id = Uuid::new_v4().to_string();

    let image_paths = match capture.representations.image() {
        Some(bytes) if capture.content_type == ContentType::Image => {
            write_image_blobs(store.blobs(), &id, bytes)
        }
        _ => ImagePaths::default(),
    };

    let record = HistoryRecord::from_capture(id.clone(), capture, image_paths);
    if let Err(e) = store.save(&record) {
        discard_blobs(store.blobs(), &record);
        return Err(e);
    }

    let limit = settings.retention_limit();
    if let Err(e) = store.enforce_limit(limit) {
        warn!(error = %e, limit, "Retention enforcement failed; will retry on next capture");
    }

    Ok(IngestOutcome::Stored { id })
}

/// Thumbnail and full image for an image capture. Either may be missing
/// afterwards; neither failure stops the record from being saved.
fn write_image_blobs(blobs: &BlobStore, id: &str, bytes: &[u8]) -> ImagePaths {
    let thumbnail = match blobs.save_thumbnail(bytes, id) {
        Ok(path) => Some(path),
        Err(e) => {
            warn!(id = %id, error = %e, "Thumbnail generation failed");
            None
        }
    };

    let full_image = match blobs.save_full_image(bytes, id) {
        Ok(path) => Some(path),
        Err(BlobError::ImageTooLarge { size, limit }) => {
            info!(id = %id, size, limit, "Image over size ceiling, keeping thumbnail only");
            None
        }
        Err(e) => {
            warn!(id = %id, error = %e, "Failed to store full image");
            None
        }
    };

    ImagePaths { thumbnail, full_image }
}

/// Remove blobs written for a record that never made it into the database
fn discard_blobs(blobs: &BlobStore, record: &HistoryRecord) {
    let (thumbnail, full_image) = record.blob_paths();
    if thumbnail.is_none() && full_image.is_none() {
        return;
    }
    if let Err(e) = blobs.delete(thumbnail, full_image) {
        warn!(id = %record.id, error = %e, "Failed to remove blobs of unsaved record");
    }
}
