//! HistoryStore - the durable record store
//!
//! Owns the SQLite metadata database and the blob directories next to it.
//! Metadata is authoritative: blob cleanup after a delete, clear or eviction
//! is best effort, and anything it misses is reclaimed by `sweep_orphans`.
//!
//! Concurrency Model:
//! - Database uses r2d2 connection pool (concurrent reads on WAL snapshots)
//! - Every mutation is one transaction behind the database write gate
//! - Methods are blocking; async callers go through `spawn_blocking`

use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::blob_store::BlobStore;
use crate::config::StoreConfig;
use crate::database::{BlobRefs, Database};
use crate::interface::{ExportEntry, StoreError};
use crate::models::HistoryRecord;

/// Database file name inside the data directory
pub const DATABASE_FILE: &str = "history.sqlite";

/// Sizes reported by `HistoryStore::stats`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub total_records: u64,
    pub unpinned_records: u64,
    pub database_bytes: i64,
    pub blob_bytes: u64,
}

pub struct HistoryStore {
    db: Database,
    blobs: BlobStore,
    config: StoreConfig,
}

impl HistoryStore {
    /// Open the store rooted at `data_dir`: `history.sqlite` plus the blob
    /// subdirectories. A schema version mismatch is `MigrationRequired`.
    pub fn open<P: AsRef<Path>>(data_dir: P, config: StoreConfig) -> Result<Self, StoreError> {
        let data_dir = data_dir.as_ref();
        let db = Database::open(data_dir.join(DATABASE_FILE)).map_err(StoreError::from_open)?;
        let blobs = BlobStore::open(data_dir, config.blobs)?;

        info!(path = %data_dir.display(), "History store opened");
        Ok(Self { db, blobs, config })
    }

    /// Create a store with an in-memory database (for testing)
    #[cfg(test)]
    pub(crate) fn new_in_memory(blob_root: &Path, config: StoreConfig) -> Result<Self, StoreError> {
        let db = Database::open_in_memory().map_err(StoreError::from_open)?;
        let blobs = BlobStore::open(blob_root, config.blobs)?;
        Ok(Self { db, blobs, config })
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Writes
    // ─────────────────────────────────────────────────────────────────────────

    pub fn save(&self, record: &HistoryRecord) -> Result<(), StoreError> {
        self.db.insert_record(record).map_err(StoreError::SaveFailed)?;
        debug!(
            id = %record.id,
            content_type = %record.content_type,
            size = record.data_size,
            "Saved history record"
        );
        Ok(())
    }

    /// Flip the pin flag; returns the new value
    pub fn toggle_pin(&self, id: &str) -> Result<bool, StoreError> {
        self.db
            .toggle_pin(id)
            .map_err(StoreError::SaveFailed)?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    /// Remove one record, then its blob files
    pub fn delete(&self, id: &str) -> Result<(), StoreError> {
        let refs = self
            .db
            .delete_record(id)
            .map_err(StoreError::DeleteFailed)?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        self.remove_blobs(&refs);
        debug!(id = %id, "Deleted history record");
        Ok(())
    }

    /// Remove every unpinned record and its blobs. Returns how many went.
    pub fn clear_history(&self) -> Result<usize, StoreError> {
        let (deleted, refs) = self.db.clear_unpinned().map_err(StoreError::DeleteFailed)?;
        for r in &refs {
            self.remove_blobs(r);
        }
        info!(deleted, "Cleared unpinned history");
        Ok(deleted)
    }

    /// Evict the oldest unpinned records until at most `limit` remain.
    /// Returns the number evicted.
    pub fn enforce_limit(&self, limit: usize) -> Result<usize, StoreError> {
        let victims = self
            .db
            .evict_unpinned_beyond(limit)
            .map_err(StoreError::DeleteFailed)?;
        if victims.is_empty() {
            return Ok(0);
        }

        for (_, refs) in &victims {
            self.remove_blobs(refs);
        }
        info!(evicted = victims.len(), limit, "Evicted records beyond retention limit");
        Ok(victims.len())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────

    pub fn get(&self, id: &str) -> Result<HistoryRecord, StoreError> {
        self.db
            .fetch_record(id)
            .map_err(StoreError::FetchFailed)?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    pub fn fetch_recent(&self, limit: usize) -> Result<Vec<HistoryRecord>, StoreError> {
        self.db.fetch_unpinned(limit).map_err(StoreError::FetchFailed)
    }

    pub fn fetch_pinned(&self) -> Result<Vec<HistoryRecord>, StoreError> {
        self.db.fetch_pinned().map_err(StoreError::FetchFailed)
    }

    pub fn search(&self, query: &str) -> Result<Vec<HistoryRecord>, StoreError> {
        self.db.search(query).map_err(StoreError::FetchFailed)
    }

    /// True if this fingerprint was recorded within the dedup window before now
    pub fn is_duplicate(&self, hash: &str) -> Result<bool, StoreError> {
        self.is_duplicate_at(hash, Utc::now())
    }

    /// Same as `is_duplicate` with an explicit reference instant
    pub fn is_duplicate_at(&self, hash: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let window_ms = i64::try_from(self.config.dedup_window.as_millis()).unwrap_or(i64::MAX);
        let cutoff = now.timestamp_millis().saturating_sub(window_ms);
        self.db.hash_seen_since(hash, cutoff).map_err(StoreError::FetchFailed)
    }

    pub fn unpinned_count(&self) -> Result<u64, StoreError> {
        self.db.count_unpinned().map_err(StoreError::FetchFailed)
    }

    pub fn total_count(&self) -> Result<u64, StoreError> {
        self.db.count_all().map_err(StoreError::FetchFailed)
    }

    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        Ok(StoreStats {
            total_records: self.total_count()?,
            unpinned_records: self.unpinned_count()?,
            database_bytes: self.db.database_size().map_err(StoreError::FetchFailed)?,
            blob_bytes: self.blobs.total_storage_size()?,
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Export and maintenance
    // ─────────────────────────────────────────────────────────────────────────

    pub fn export_entries(&self) -> Result<Vec<ExportEntry>, StoreError> {
        let records = self.db.fetch_all().map_err(StoreError::FetchFailed)?;
        Ok(records.iter().map(HistoryRecord::to_export_entry).collect())
    }

    /// Pretty-printed JSON array of every record, newest first
    pub fn export_history(&self) -> Result<String, StoreError> {
        Ok(serde_json::to_string_pretty(&self.export_entries()?)?)
    }

    /// Write `export_history` output to `path`. Returns the entry count.
    pub fn export_to_file<P: AsRef<Path>>(&self, path: P) -> Result<usize, StoreError> {
        let entries = self.export_entries()?;
        let json = serde_json::to_string_pretty(&entries)?;
        std::fs::write(path.as_ref(), json)?;
        info!(path = %path.as_ref().display(), entries = entries.len(), "Exported history");
        Ok(entries.len())
    }

    /// Delete blob files no record references. Returns the number removed.
    /// Files younger than the configured grace period are kept, so this is
    /// safe to run while ingestion is live, though it is meant for idle time.
    pub fn sweep_orphans(&self) -> Result<usize, StoreError> {
        let referenced = self.db.referenced_blob_paths().map_err(StoreError::FetchFailed)?;
        Ok(self.blobs.cleanup_orphans(&referenced)?)
    }

    fn remove_blobs(&self, refs: &BlobRefs) {
        if refs.is_empty() {
            return;
        }
        if let Err(e) = self
            .blobs
            .delete(refs.thumbnail_path.as_deref(), refs.full_image_path.as_deref())
        {
            warn!(error = %e, "Failed to delete blob files; left for orphan sweep");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HashConfig;
    use crate::interface::ContentType;
    use crate::models::{CapturedContent, ImagePaths};
    use chrono::Duration;
    use std::collections::HashSet;

    fn setup() -> (tempfile::TempDir, HistoryStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new_in_memory(dir.path(), StoreConfig::default()).unwrap();
        (dir, store)
    }

    fn text_at(id: &str, text: &str, at: DateTime<Utc>) -> HistoryRecord {
        let mut capture = CapturedContent::from_text(text, &HashConfig::default());
        capture.captured_at = at;
        HistoryRecord::from_capture(id.to_string(), capture, ImagePaths::default())
    }

    fn ids(records: Vec<HistoryRecord>) -> Vec<String> {
        records.into_iter().map(|r| r.id).collect()
    }

    #[test]
    fn test_dedup_window_is_sliding() {
        let (_dir, store) = setup();
        let t0 = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let record = text_at("first", "hello", t0);
        let hash = record.content_hash.clone();
        store.save(&record).unwrap();
        assert_eq!(record.data_size, 5);

        assert!(store.is_duplicate_at(&hash, t0 + Duration::seconds(1)).unwrap());
        assert!(!store.is_duplicate_at(&hash, t0 + Duration::hours(1)).unwrap());
        assert!(!store.is_duplicate_at("unrelated", t0).unwrap());
    }

    #[test]
    fn test_get_and_not_found() {
        let (_dir, store) = setup();
        store.save(&text_at("a", "alpha", Utc::now())).unwrap();
        assert_eq!(store.get("a").unwrap().text_content.as_deref(), Some("alpha"));
        assert!(matches!(store.get("zzz"), Err(StoreError::NotFound(id)) if id == "zzz"));
    }

    #[test]
    fn test_toggle_pin_and_delete_unknown_id() {
        let (_dir, store) = setup();
        assert!(matches!(store.toggle_pin("ghost"), Err(StoreError::NotFound(_))));
        assert!(matches!(store.delete("ghost"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_pinned_records_move_between_views() {
        let (_dir, store) = setup();
        let now = Utc::now();
        store.save(&text_at("a", "a", now - Duration::seconds(2))).unwrap();
        store.save(&text_at("b", "b", now - Duration::seconds(1))).unwrap();
        assert!(store.toggle_pin("a").unwrap());

        assert_eq!(ids(store.fetch_recent(10).unwrap()), vec!["b"]);
        assert_eq!(ids(store.fetch_pinned().unwrap()), vec!["a"]);
        assert_eq!(store.unpinned_count().unwrap(), 1);
        assert_eq!(store.total_count().unwrap(), 2);
    }

    #[test]
    fn test_enforce_limit_is_idempotent_and_spares_pinned() {
        let (_dir, store) = setup();
        let base = Utc::now() - Duration::minutes(10);
        for i in 0..5 {
            store.save(&text_at(&format!("t{}", i), &format!("item {}", i), base + Duration::seconds(i))).unwrap();
        }
        store.save(&text_at("pin", "keep me", base - Duration::hours(1))).unwrap();
        store.toggle_pin("pin").unwrap();

        assert_eq!(store.enforce_limit(2).unwrap(), 3);
        assert_eq!(store.enforce_limit(2).unwrap(), 0);
        assert_eq!(ids(store.fetch_recent(10).unwrap()), vec!["t4", "t3"]);
        assert_eq!(ids(store.fetch_pinned().unwrap()), vec!["pin"]);

        // Limit above the count leaves everything
        assert_eq!(store.enforce_limit(100).unwrap(), 0);
        assert_eq!(store.unpinned_count().unwrap(), 2);
    }

    #[test]
    fn test_delete_removes_thumbnail_file() {
        let (dir, store) = setup();
        std::fs::write(dir.path().join("thumbnails/img.jpg"), b"jpeg").unwrap();
        let mut record = text_at("img", "x", Utc::now());
        record.content_type = ContentType::Image;
        record.text_content = None;
        record.thumbnail_path = Some("thumbnails/img.jpg".into());
        store.save(&record).unwrap();

        store.delete("img").unwrap();
        assert!(!dir.path().join("thumbnails/img.jpg").exists());
        assert!(matches!(store.get("img"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_delete_survives_missing_blob() {
        let (_dir, store) = setup();
        let mut record = text_at("img", "x", Utc::now());
        record.thumbnail_path = Some("thumbnails/never-written.jpg".into());
        store.save(&record).unwrap();
        store.delete("img").unwrap();
        assert_eq!(store.total_count().unwrap(), 0);
    }

    #[test]
    fn test_clear_history_keeps_pinned_and_their_blobs() {
        let (dir, store) = setup();
        std::fs::write(dir.path().join("images/gone.png"), b"png").unwrap();
        std::fs::write(dir.path().join("images/kept.png"), b"png").unwrap();

        let mut gone = text_at("gone", "gone", Utc::now());
        gone.full_image_path = Some("images/gone.png".into());
        let mut kept = text_at("kept", "kept", Utc::now());
        kept.full_image_path = Some("images/kept.png".into());
        store.save(&gone).unwrap();
        store.save(&kept).unwrap();
        store.toggle_pin("kept").unwrap();

        assert_eq!(store.clear_history().unwrap(), 1);
        assert!(!dir.path().join("images/gone.png").exists());
        assert!(dir.path().join("images/kept.png").exists());
        assert_eq!(ids(store.fetch_pinned().unwrap()), vec!["kept"]);
    }

    #[test]
    fn test_export_is_newest_first_with_sizes() {
        let (_dir, store) = setup();
        let base = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        store.save(&text_at("old", "hello", base)).unwrap();
        store.save(&text_at("new", "hello world", base + Duration::seconds(30))).unwrap();

        let json = store.export_history().unwrap();
        let entries: Vec<ExportEntry> = serde_json::from_str(&json).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, "new");
        assert_eq!(entries[0].data_size, 11);
        assert_eq!(entries[1].data_size, 5);
        assert!(entries[0].timestamp > entries[1].timestamp);
        assert_eq!(entries[1].timestamp, 1_700_000_000.0);
        assert!(json.contains('\n'));
    }

    #[test]
    fn test_export_to_file() {
        let (dir, store) = setup();
        store.save(&text_at("a", "a", Utc::now())).unwrap();
        let path = dir.path().join("export.json");
        assert_eq!(store.export_to_file(&path).unwrap(), 1);
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"contentType\": \"text\""));
    }

    #[test]
    fn test_sweep_orphans_keeps_referenced_blobs() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = StoreConfig::default();
        config.blobs.orphan_grace = std::time::Duration::ZERO;
        let store = HistoryStore::new_in_memory(dir.path(), config).unwrap();
        std::fs::write(dir.path().join("thumbnails/live.jpg"), b"x").unwrap();
        std::fs::write(dir.path().join("thumbnails/orphan.jpg"), b"x").unwrap();
        let mut record = text_at("live", "x", Utc::now());
        record.thumbnail_path = Some("thumbnails/live.jpg".into());
        store.save(&record).unwrap();

        assert_eq!(store.sweep_orphans().unwrap(), 1);
        let left: HashSet<_> = std::fs::read_dir(dir.path().join("thumbnails"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(left, HashSet::from(["live.jpg".to_string()]));
    }

    #[test]
    fn test_sweep_orphans_leaves_fresh_unreferenced_blobs() {
        let (dir, store) = setup();
        // Blob written by an ingest whose record has not committed yet
        let pending = store.blobs().save_full_image(b"pending", "in-flight").unwrap();

        assert_eq!(store.sweep_orphans().unwrap(), 0);
        assert!(dir.path().join(&pending).exists());

        let mut record = text_at("in-flight", "x", Utc::now());
        record.full_image_path = Some(pending.clone());
        store.save(&record).unwrap();
        let saved = store.get("in-flight").unwrap();
        let bytes = store.blobs().load_full_image(saved.full_image_path.as_deref().unwrap()).unwrap();
        assert_eq!(bytes, b"pending".to_vec());
    }

    #[test]
    fn test_open_on_disk_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = HistoryStore::open(dir.path(), StoreConfig::default()).unwrap();
            store.save(&text_at("a", "persisted", Utc::now())).unwrap();
        }
        let store = HistoryStore::open(dir.path(), StoreConfig::default()).unwrap();
        assert_eq!(store.get("a").unwrap().text_content.as_deref(), Some("persisted"));
        assert!(dir.path().join(DATABASE_FILE).exists());
        let stats = store.stats().unwrap();
        assert_eq!(stats.total_records, 1);
        assert!(stats.database_bytes > 0);
    }

    #[test]
    fn test_open_with_foreign_schema_requires_migration() {
        let dir = tempfile::tempdir().unwrap();
        {
            let conn = rusqlite::Connection::open(dir.path().join(DATABASE_FILE)).unwrap();
            conn.execute_batch("PRAGMA user_version = 9;").unwrap();
        }
        match HistoryStore::open(dir.path(), StoreConfig::default()) {
            Err(StoreError::MigrationRequired { found, .. }) => assert_eq!(found, 9),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("expected MigrationRequired"),
        }
    }
}
