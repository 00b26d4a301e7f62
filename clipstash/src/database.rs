//! SQLite database layer for clipboard history
//!
//! Single `history` table, one row per record. Uses r2d2 connection pooling
//! so readers proceed on WAL snapshots while mutations go through one write
//! gate and one transaction each.

use std::collections::HashSet;
use std::path::Path;

use chrono::DateTime;
use parking_lot::Mutex;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

use crate::interface::ContentType;
use crate::models::HistoryRecord;

/// Bumped whenever the `history` table layout changes
pub const SCHEMA_VERSION: i64 = 1;

const RECORD_COLUMNS: &str = "id, timestamp, content_type, is_pinned, content_hash, data_size, \
     source_app_bundle_id, source_app_name, text_content, plain_text_content, rtf_data, \
     html_content, url_string, file_url_string, file_name, thumbnail_path, full_image_path";

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("Schema version {found}, expected {expected}")]
    SchemaVersion { found: i64, expected: i64 },
}

pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Blob files referenced by a deleted row
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlobRefs {
    pub thumbnail_path: Option<String>,
    pub full_image_path: Option<String>,
}

impl BlobRefs {
    pub fn is_empty(&self) -> bool {
        self.thumbnail_path.is_none() && self.full_image_path.is_none()
    }
}

/// Thread-safe database wrapper using connection pooling
///
/// Uses r2d2 connection pool for concurrent read access.
/// WAL mode enables readers to proceed without blocking each other.
/// `write_gate` makes this process the single logical writer.
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
    write_gate: Mutex<()>,
}

impl Database {
    /// Open or create a database at the given path with connection pooling
    pub fn open<P: AsRef<Path>>(path: P) -> DatabaseResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.execute_batch(
                "
                PRAGMA journal_mode=WAL;
                PRAGMA synchronous=NORMAL;
                PRAGMA busy_timeout=5000;
                PRAGMA cache_size=-16000;
            ",
            )?;
            Ok(())
        });

        let pool = Pool::builder().max_size(8).build(manager)?;

        let db = Self { pool, write_gate: Mutex::new(()) };
        db.setup_schema()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    #[cfg(test)]
    pub fn open_in_memory() -> DatabaseResult<Self> {
        let manager = SqliteConnectionManager::memory();

        // In-memory needs single connection to maintain state
        let pool = Pool::builder().max_size(1).build(manager)?;

        let db = Self { pool, write_gate: Mutex::new(()) };
        db.setup_schema()?;
        Ok(db)
    }

    /// Get a connection from the pool
    fn get_conn(&self) -> DatabaseResult<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    /// Create the schema on a fresh database; refuse anything else that does
    /// not carry the current version rather than guessing at its layout.
    fn setup_schema(&self) -> DatabaseResult<()> {
        let _gate = self.write_gate.lock();
        let conn = self.get_conn()?;

        let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if version == SCHEMA_VERSION {
            return Ok(());
        }

        let has_history = conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'history'",
                [],
                |_| Ok(()),
            )
            .optional()?
            .is_some();

        if version != 0 || has_history {
            return Err(DatabaseError::SchemaVersion { found: version, expected: SCHEMA_VERSION });
        }

        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(
            r#"
            CREATE TABLE history (
                id TEXT PRIMARY KEY NOT NULL,
                timestamp INTEGER NOT NULL,
                content_type TEXT NOT NULL,
                is_pinned INTEGER NOT NULL DEFAULT 0,
                content_hash TEXT NOT NULL,
                data_size INTEGER NOT NULL DEFAULT 0,
                source_app_bundle_id TEXT,
                source_app_name TEXT,
                text_content TEXT,
                plain_text_content TEXT,
                rtf_data BLOB,
                html_content TEXT,
                url_string TEXT,
                file_url_string TEXT,
                file_name TEXT,
                thumbnail_path TEXT,
                full_image_path TEXT
            );

            CREATE INDEX idx_history_hash_timestamp ON history(content_hash, timestamp);
            CREATE INDEX idx_history_pinned_timestamp ON history(is_pinned, timestamp);
        "#,
        )?;
        tx.execute_batch(&format!("PRAGMA user_version = {};", SCHEMA_VERSION))?;
        tx.commit()?;

        Ok(())
    }

    /// Get the database size in bytes
    pub fn database_size(&self) -> DatabaseResult<i64> {
        let conn = self.get_conn()?;
        let page_count: i64 = conn.query_row("PRAGMA page_count", [], |row| row.get(0))?;
        let page_size: i64 = conn.query_row("PRAGMA page_size", [], |row| row.get(0))?;
        Ok(page_count * page_size)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Writes (all behind write_gate, one transaction each)
    // ─────────────────────────────────────────────────────────────────────────

    pub fn insert_record(&self, record: &HistoryRecord) -> DatabaseResult<()> {
        let _gate = self.write_gate.lock();
        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;

        tx.execute(
            &format!(
                "INSERT INTO history ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                RECORD_COLUMNS
            ),
            params![
                record.id,
                record.timestamp.timestamp_millis(),
                record.content_type.as_db_str(),
                record.is_pinned,
                record.content_hash,
                record.data_size,
                record.source_app_bundle_id,
                record.source_app_name,
                record.text_content,
                record.plain_text_content,
                record.rtf_data,
                record.html_content,
                record.url_string,
                record.file_url_string,
                record.file_name,
                record.thumbnail_path,
                record.full_image_path,
            ],
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Flip the pin flag. Returns the new value, or None if no such record.
    pub fn toggle_pin(&self, id: &str) -> DatabaseResult<Option<bool>> {
        let _gate = self.write_gate.lock();
        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;

        let changed = tx.execute(
            "UPDATE history SET is_pinned = 1 - is_pinned WHERE id = ?1",
            [id],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        let pinned: bool =
            tx.query_row("SELECT is_pinned FROM history WHERE id = ?1", [id], |row| row.get(0))?;

        tx.commit()?;
        Ok(Some(pinned))
    }

    /// Delete one record. Returns its blob references, or None if no such record.
    pub fn delete_record(&self, id: &str) -> DatabaseResult<Option<BlobRefs>> {
        let _gate = self.write_gate.lock();
        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;

        let refs = tx
            .query_row(
                "SELECT thumbnail_path, full_image_path FROM history WHERE id = ?1",
                [id],
                Self::row_to_blob_refs,
            )
            .optional()?;
        if refs.is_none() {
            return Ok(None);
        }
        tx.execute("DELETE FROM history WHERE id = ?1", [id])?;

        tx.commit()?;
        Ok(refs)
    }

    /// Delete every unpinned record. Returns how many rows went, plus the
    /// blob references of those that had any.
    pub fn clear_unpinned(&self) -> DatabaseResult<(usize, Vec<BlobRefs>)> {
        let _gate = self.write_gate.lock();
        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;

        let refs = {
            let mut stmt = tx.prepare(
                "SELECT thumbnail_path, full_image_path FROM history
                 WHERE is_pinned = 0 AND (thumbnail_path IS NOT NULL OR full_image_path IS NOT NULL)",
            )?;
            let rows = stmt.query_map([], Self::row_to_blob_refs)?;
            rows.collect::<Result<Vec<_>, _>>()?
        };
        let deleted = tx.execute("DELETE FROM history WHERE is_pinned = 0", [])?;

        tx.commit()?;
        Ok((deleted, refs))
    }

    /// Delete the oldest unpinned records until at most `limit` remain.
    /// Ties on timestamp go by insertion order. Returns (id, blobs) per row.
    pub fn evict_unpinned_beyond(&self, limit: usize) -> DatabaseResult<Vec<(String, BlobRefs)>> {
        let _gate = self.write_gate.lock();
        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;

        let count: i64 =
            tx.query_row("SELECT COUNT(*) FROM history WHERE is_pinned = 0", [], |row| row.get(0))?;
        let excess = count.saturating_sub(i64::try_from(limit).unwrap_or(i64::MAX));
        if excess <= 0 {
            return Ok(Vec::new());
        }

        let victims = {
            let mut stmt = tx.prepare(
                "SELECT id, thumbnail_path, full_image_path FROM history
                 WHERE is_pinned = 0 ORDER BY timestamp ASC, rowid ASC LIMIT ?1",
            )?;
            let rows = stmt.query_map([excess], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    BlobRefs { thumbnail_path: row.get(1)?, full_image_path: row.get(2)? },
                ))
            })?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        {
            let mut delete = tx.prepare("DELETE FROM history WHERE id = ?1")?;
            for (id, _) in &victims {
                delete.execute([id])?;
            }
        }

        tx.commit()?;
        Ok(victims)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────

    pub fn fetch_record(&self, id: &str) -> DatabaseResult<Option<HistoryRecord>> {
        let conn = self.get_conn()?;
        let record = conn
            .query_row(
                &format!("SELECT {} FROM history WHERE id = ?1", RECORD_COLUMNS),
                [id],
                Self::row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    /// Newest unpinned records, at most `limit`
    pub fn fetch_unpinned(&self, limit: usize) -> DatabaseResult<Vec<HistoryRecord>> {
        let conn = self.get_conn()?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        Self::query_records(
            &conn,
            &format!(
                "SELECT {} FROM history WHERE is_pinned = 0 ORDER BY timestamp DESC, rowid DESC LIMIT ?1",
                RECORD_COLUMNS
            ),
            params![limit],
        )
    }

    /// Every pinned record, newest first
    pub fn fetch_pinned(&self) -> DatabaseResult<Vec<HistoryRecord>> {
        let conn = self.get_conn()?;
        Self::query_records(
            &conn,
            &format!(
                "SELECT {} FROM history WHERE is_pinned = 1 ORDER BY timestamp DESC, rowid DESC",
                RECORD_COLUMNS
            ),
            [],
        )
    }

    /// Every record, newest first
    pub fn fetch_all(&self) -> DatabaseResult<Vec<HistoryRecord>> {
        let conn = self.get_conn()?;
        Self::query_records(
            &conn,
            &format!("SELECT {} FROM history ORDER BY timestamp DESC, rowid DESC", RECORD_COLUMNS),
            [],
        )
    }

    /// Case-insensitive substring match over `text_content`, newest first.
    ///
    /// SQLite's LIKE only folds ASCII case, which is exact for ASCII queries.
    /// Other queries are matched with Unicode lowercasing on this side.
    pub fn search(&self, query: &str) -> DatabaseResult<Vec<HistoryRecord>> {
        let conn = self.get_conn()?;

        if query.is_ascii() {
            let escaped = query
                .replace('\\', "\\\\")
                .replace('%', "\\%")
                .replace('_', "\\_");
            let pattern = format!("%{}%", escaped);
            return Self::query_records(
                &conn,
                &format!(
                    r#"SELECT {} FROM history WHERE text_content LIKE ?1 ESCAPE '\'
                       ORDER BY timestamp DESC, rowid DESC"#,
                    RECORD_COLUMNS
                ),
                params![pattern],
            );
        }

        let needle = query.to_lowercase();
        let candidates = Self::query_records(
            &conn,
            &format!(
                "SELECT {} FROM history WHERE text_content IS NOT NULL ORDER BY timestamp DESC, rowid DESC",
                RECORD_COLUMNS
            ),
            [],
        )?;
        Ok(candidates
            .into_iter()
            .filter(|r| {
                r.text_content
                    .as_deref()
                    .is_some_and(|t| t.to_lowercase().contains(&needle))
            })
            .collect())
    }

    /// True if a record with this hash has a timestamp strictly after `cutoff_ms`
    pub fn hash_seen_since(&self, hash: &str, cutoff_ms: i64) -> DatabaseResult<bool> {
        let conn = self.get_conn()?;
        let seen: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM history WHERE content_hash = ?1 AND timestamp > ?2)",
            params![hash, cutoff_ms],
            |row| row.get(0),
        )?;
        Ok(seen)
    }

    pub fn count_unpinned(&self) -> DatabaseResult<u64> {
        let conn = self.get_conn()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM history WHERE is_pinned = 0", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn count_all(&self) -> DatabaseResult<u64> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM history", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Every blob path any record still references
    pub fn referenced_blob_paths(&self) -> DatabaseResult<HashSet<String>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT thumbnail_path, full_image_path FROM history
             WHERE thumbnail_path IS NOT NULL OR full_image_path IS NOT NULL",
        )?;
        let mut paths = HashSet::new();
        for refs in stmt.query_map([], Self::row_to_blob_refs)? {
            let refs = refs?;
            paths.extend(refs.thumbnail_path);
            paths.extend(refs.full_image_path);
        }
        Ok(paths)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Row mapping
    // ─────────────────────────────────────────────────────────────────────────

    fn query_records<P: rusqlite::Params>(
        conn: &Connection,
        sql: &str,
        params: P,
    ) -> DatabaseResult<Vec<HistoryRecord>> {
        let mut stmt = conn.prepare(sql)?;
        let records = stmt
            .query_map(params, Self::row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn row_to_blob_refs(row: &rusqlite::Row) -> rusqlite::Result<BlobRefs> {
        Ok(BlobRefs {
            thumbnail_path: row.get(0)?,
            full_image_path: row.get(1)?,
        })
    }

    /// Convert a row selected with `RECORD_COLUMNS` into a record
    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<HistoryRecord> {
        let timestamp_ms: i64 = row.get(1)?;
        let timestamp = DateTime::from_timestamp_millis(timestamp_ms).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                1,
                Type::Integer,
                format!("timestamp {} out of range", timestamp_ms).into(),
            )
        })?;

        let content_type_str: String = row.get(2)?;
        let content_type = ContentType::from_db_str(&content_type_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                Type::Text,
                format!("unknown content type '{}'", content_type_str).into(),
            )
        })?;

        Ok(HistoryRecord {
            id: row.get(0)?,
            timestamp,
            content_type,
            is_pinned: row.get(3)?,
            content_hash: row.get(4)?,
            data_size: row.get(5)?,
            source_app_bundle_id: row.get(6)?,
            source_app_name: row.get(7)?,
            text_content: row.get(8)?,
            plain_text_content: row.get(9)?,
            rtf_data: row.get(10)?,
            html_content: row.get(11)?,
            url_string: row.get(12)?,
            file_url_string: row.get(13)?,
            file_name: row.get(14)?,
            thumbnail_path: row.get(15)?,
            full_image_path: row.get(16)?,
        })
    }
}
