//! Core data models for clipstash
//!
//! `CapturedContent` is the transient value the detector emits; `HistoryRecord`
//! is the durable row the Storage Engine keeps.

use chrono::{DateTime, Utc};
use std::path::Path;

use crate::config::HashConfig;
use crate::content_detection::classify;
use crate::fingerprint::fingerprint;
use crate::interface::{ContentType, ExportEntry, SourceApp};

// ─────────────────────────────────────────────────────────────────────────────
// CAPTURE (transient, detector → coordinator)
// ─────────────────────────────────────────────────────────────────────────────

/// Every representation the clipboard offered for one change.
/// Empty strings and empty byte buffers count as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Representations {
    pub plain_text: Option<String>,
    pub rtf: Option<Vec<u8>>,
    pub html: Option<String>,
    pub image: Option<Vec<u8>>,
    /// Absolute paths, in clipboard order
    pub file_paths: Vec<String>,
    pub url: Option<String>,
}

impl Representations {
    pub fn text(&self) -> Option<&str> {
        non_empty_str(&self.plain_text)
    }

    pub fn rtf(&self) -> Option<&[u8]> {
        non_empty_bytes(&self.rtf)
    }

    pub fn html(&self) -> Option<&str> {
        non_empty_str(&self.html)
    }

    pub fn image(&self) -> Option<&[u8]> {
        non_empty_bytes(&self.image)
    }

    pub fn url(&self) -> Option<&str> {
        non_empty_str(&self.url)
    }

    pub fn has_files(&self) -> bool {
        !self.file_paths.is_empty()
    }

    /// True when nothing worth recording was offered
    pub fn is_empty(&self) -> bool {
        self.text().is_none()
            && self.rtf().is_none()
            && self.html().is_none()
            && self.image().is_none()
            && self.url().is_none()
            && !self.has_files()
    }
}

fn non_empty_str(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

fn non_empty_bytes(value: &Option<Vec<u8>>) -> Option<&[u8]> {
    value.as_deref().filter(|b| !b.is_empty())
}

/// One observed clipboard change, classified and fingerprinted
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedContent {
    pub representations: Representations,
    pub source: SourceApp,
    pub captured_at: DateTime<Utc>,
    pub content_type: ContentType,
    pub content_hash: String,
}

impl CapturedContent {
    pub fn new(
        representations: Representations,
        source: SourceApp,
        captured_at: DateTime<Utc>,
        hashing: &HashConfig,
    ) -> Self {
        let content_type = classify(&representations);
        let content_hash = fingerprint(&representations, hashing);
        Self {
            representations,
            source,
            captured_at,
            content_type,
            content_hash,
        }
    }

    /// Plain-text capture stamped now (convenience for callers and tests)
    pub fn from_text(text: impl Into<String>, hashing: &HashConfig) -> Self {
        let representations = Representations {
            plain_text: Some(text.into()),
            ..Representations::default()
        };
        Self::new(representations, SourceApp::default(), Utc::now(), hashing)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HISTORY RECORD (durable)
// ─────────────────────────────────────────────────────────────────────────────

/// Relative blob paths written for an image capture before its record is saved
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImagePaths {
    pub thumbnail: Option<String>,
    pub full_image: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub content_type: ContentType,
    pub is_pinned: bool,
    pub content_hash: String,
    pub data_size: i64,
    pub source_app_bundle_id: Option<String>,
    pub source_app_name: Option<String>,
    pub text_content: Option<String>,
    pub plain_text_content: Option<String>,
    pub rtf_data: Option<Vec<u8>>,
    pub html_content: Option<String>,
    pub url_string: Option<String>,
    pub file_url_string: Option<String>,
    pub file_name: Option<String>,
    pub thumbnail_path: Option<String>,
    pub full_image_path: Option<String>,
}

impl HistoryRecord {
    /// Build the record for a capture, populating only the payload fields
    /// that belong to its content type.
    pub fn from_capture(id: String, capture: CapturedContent, image_paths: ImagePaths) -> Self {
        let CapturedContent {
            representations: reps,
            source,
            captured_at,
            content_type,
            content_hash,
        } = capture;

        let mut record = Self {
            id,
            timestamp: captured_at,
            content_type,
            is_pinned: false,
            content_hash,
            data_size: 0,
            source_app_bundle_id: source.bundle_id,
            source_app_name: source.name,
            text_content: None,
            plain_text_content: None,
            rtf_data: None,
            html_content: None,
            url_string: None,
            file_url_string: None,
            file_name: None,
            thumbnail_path: None,
            full_image_path: None,
        };

        let plain = reps.text().map(str::to_string);

        match content_type {
            ContentType::Image => {
                record.data_size = reps.image().map_or(0, |b| b.len() as i64);
                record.thumbnail_path = image_paths.thumbnail;
                record.full_image_path = image_paths.full_image;
            }
            ContentType::File => {
                let names: Vec<String> = reps.file_paths.iter().map(|p| file_name_of(p)).collect();
                if let Some(first) = reps.file_paths.first() {
                    record.file_url_string = Some(file_url_of(first));
                    record.file_name = names.first().cloned();
                }
                record.text_content = Some(names.join(", "));
            }
            ContentType::Url => {
                let url = reps.url().unwrap_or_default().to_string();
                record.data_size = url.len() as i64;
                record.text_content = Some(url.clone());
                record.url_string = Some(url);
            }
            ContentType::RichText => {
                let rtf = reps.rtf().unwrap_or_default().to_vec();
                record.data_size = rtf.len() as i64;
                record.rtf_data = Some(rtf);
                record.text_content = plain.clone();
                record.plain_text_content = plain;
            }
            ContentType::Html => {
                let html = reps.html().unwrap_or_default().to_string();
                record.data_size = html.len() as i64;
                record.html_content = Some(html);
                record.text_content = plain.clone();
                record.plain_text_content = plain;
            }
            ContentType::Text => {
                let text = plain.unwrap_or_default();
                record.data_size = text.len() as i64;
                record.text_content = Some(text);
            }
        }

        record
    }

    /// Blob files owned by this record
    pub fn blob_paths(&self) -> (Option<&str>, Option<&str>) {
        (self.thumbnail_path.as_deref(), self.full_image_path.as_deref())
    }

    pub fn to_export_entry(&self) -> ExportEntry {
        ExportEntry {
            id: self.id.clone(),
            timestamp: self.timestamp.timestamp_millis() as f64 / 1000.0,
            content_type: self.content_type.as_db_str().to_string(),
            is_pinned: self.is_pinned,
            data_size: self.data_size,
            text_content: self.text_content.clone(),
            source_app: self.source_app_name.clone(),
        }
    }
}

fn file_name_of(path: &str) -> String {
    Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path)
        .to_string()
}

/// `file://` URL for an absolute path, the raw path otherwise
fn file_url_of(path: &str) -> String {
    url::Url::from_file_path(path)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| path.to_string())
}
