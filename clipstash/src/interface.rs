//! clipstash public interface
//!
//! Shared types consumed by the UI, settings and hotkey layers, plus the
//! error taxonomy every storage and blob operation reports through.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::database::DatabaseError;

// ═══════════════════════════════════════════════════════════════════════════════
// ENUMS
// ═══════════════════════════════════════════════════════════════════════════════

/// Canonical content category of a capture. Exactly one per record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Image,
    File,
    Url,
    RichText,
    Html,
    Text,
}

impl ContentType {
    pub const ALL: [ContentType; 6] = [
        ContentType::Image,
        ContentType::File,
        ContentType::Url,
        ContentType::RichText,
        ContentType::Html,
        ContentType::Text,
    ];

    /// String stored in the `content_type` column and written to exports
    pub fn as_db_str(&self) -> &'static str {
        match self {
            ContentType::Image => "image",
            ContentType::File => "file",
            ContentType::Url => "url",
            ContentType::RichText => "rtf",
            ContentType::Html => "html",
            ContentType::Text => "text",
        }
    }

    pub fn from_db_str(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_db_str() == value)
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_db_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RECORDS (Structs)
// ═══════════════════════════════════════════════════════════════════════════════

/// Application the clipboard content came from, when the OS reports it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceApp {
    pub bundle_id: Option<String>,
    pub name: Option<String>,
}

/// One entry of the history export. Field names are the export's wire keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportEntry {
    pub id: String,
    /// Seconds since the Unix epoch
    pub timestamp: f64,
    pub content_type: String,
    pub is_pinned: bool,
    pub data_size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_app: Option<String>,
}

/// Result of handing one capture to the ingestion pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Record saved under this id
    Stored { id: String },
    /// An identical capture is already inside the dedup window
    Duplicate,
}

// ═══════════════════════════════════════════════════════════════════════════════
// ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

/// Error type for Storage Engine operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),
    #[error("Failed to save record: {0}")]
    SaveFailed(#[source] DatabaseError),
    #[error("Failed to fetch records: {0}")]
    FetchFailed(#[source] DatabaseError),
    #[error("Failed to delete records: {0}")]
    DeleteFailed(#[source] DatabaseError),
    #[error("Database schema version {found} does not match {expected}; migration required")]
    MigrationRequired { found: i64, expected: i64 },
    #[error("Metadata store unavailable: {0}")]
    Unavailable(#[source] DatabaseError),
    #[error("Blob store error: {0}")]
    Blob(#[from] BlobError),
    #[error("Export failed: {0}")]
    Export(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl StoreError {
    /// Maps an error from opening the database. A version mismatch keeps its
    /// own variant so callers can tell it apart from an unreachable store.
    pub(crate) fn from_open(e: DatabaseError) -> Self {
        match e {
            DatabaseError::SchemaVersion { found, expected } => {
                StoreError::MigrationRequired { found, expected }
            }
            other => StoreError::Unavailable(other),
        }
    }
}

/// Error type for Blob Store operations
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("Image of {size} bytes exceeds the {limit} byte ceiling")]
    ImageTooLarge { size: usize, limit: usize },
    #[error("Thumbnail generation failed: {0}")]
    ThumbnailGenerationFailed(#[from] image::ImageError),
    #[error("Invalid blob path: {0}")]
    InvalidPath(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_db_roundtrip() {
        for t in ContentType::ALL {
            assert_eq!(ContentType::from_db_str(t.as_db_str()), Some(t));
        }
        assert_eq!(ContentType::from_db_str("color"), None);
    }

    #[test]
    fn test_export_entry_omits_absent_optionals() {
        let entry = ExportEntry {
            id: "a".into(),
            timestamp: 1.5,
            content_type: "image".into(),
            is_pinned: false,
            data_size: 10,
            text_content: None,
            source_app: None,
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert!(json.get("textContent").is_none());
        assert!(json.get("sourceApp").is_none());
        assert_eq!(json["contentType"], "image");
        assert_eq!(json["isPinned"], false);
        assert_eq!(json["dataSize"], 10);
    }

    #[test]
    fn test_schema_version_maps_to_migration_required() {
        let err = StoreError::from_open(DatabaseError::SchemaVersion { found: 7, expected: 1 });
        assert!(matches!(err, StoreError::MigrationRequired { found: 7, expected: 1 }));
    }
}
