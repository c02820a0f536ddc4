use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use chrono::{DateTime, Utc};

use crate::utils::format_size;

/// Folder used for images whose type cannot be resolved.
pub const UNCATEGORIZED_FOLDER: &str = "0_others";

/// Folder shared by every thumbnail, regardless of type.
pub const THUMBNAIL_FOLDER: &str = "thumbnails";

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct ImageType {
    #[serde(skip)]
    pub id: i64,
    pub type_id: i64,
    pub type_name: String,
    pub description: String,
    #[serde(skip)]
    pub created_time: DateTime<Utc>,
}

impl ImageType {
    /// Physical directory holding this type's originals: `{type_id}_{type_name}`.
    pub fn folder_name(&self) -> String {
        folder_name(self.type_id, &self.type_name)
    }
}

pub fn folder_name(type_id: i64, type_name: &str) -> String {
    format!("{}_{}", type_id, type_name)
}

/// Catalog row for one stored image, joined with its type's name.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Image {
    pub id: i64,
    pub type_id: Option<i64>,
    pub uuid_filename: String,
    pub original_filename: String,
    pub file_size: i64,
    pub md5_hash: String,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub mime_type: String,
    pub upload_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub description: Option<String>,
    pub is_deleted: bool,
    pub tags: Option<String>,
    pub type_name: Option<String>,
}

impl Image {
    pub fn folder_name(&self) -> String {
        match (self.type_id, &self.type_name) {
            (Some(type_id), Some(type_name)) => folder_name(type_id, type_name),
            _ => UNCATEGORIZED_FOLDER.to_string(),
        }
    }

    pub fn to_record(&self) -> ImageRecord {
        let dimensions = match (self.width, self.height) {
            (Some(width), Some(height)) if width > 0 && height > 0 => {
                Some(Dimensions { width, height })
            }
            _ => None,
        };

        ImageRecord {
            id: self.id,
            type_id: self.type_id,
            tags: self.tags.clone(),
            filename: self.uuid_filename.clone(),
            original_name: self.original_filename.clone(),
            url: format!("/images/{}/{}", self.folder_name(), self.uuid_filename),
            thumbnail_url: format!("/images/{}/{}", THUMBNAIL_FOLDER, self.uuid_filename),
            size: self.file_size,
            md5_hash: self.md5_hash.clone(),
            size_human: format_size(self.file_size.max(0) as u64),
            mime_type: self.mime_type.clone(),
            dimensions,
            description: self.description.clone(),
        }
    }
}

/// Values written by a successful intake, before the catalog assigns an id.
#[derive(Debug, Clone)]
pub struct NewImage {
    pub type_id: Option<i64>,
    pub uuid_filename: String,
    pub original_filename: String,
    pub file_size: i64,
    pub md5_hash: String,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub mime_type: String,
    pub description: Option<String>,
    pub tags: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Dimensions {
    pub width: i64,
    pub height: i64,
}

/// Public representation of an image.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageRecord {
    pub id: i64,
    pub type_id: Option<i64>,
    pub tags: Option<String>,
    pub filename: String,
    pub original_name: String,
    pub url: String,
    pub thumbnail_url: String,
    pub size: i64,
    pub md5_hash: String,
    pub size_human: String,
    pub mime_type: String,
    pub dimensions: Option<Dimensions>,
    pub description: Option<String>,
}

/// Result of a single upload: a fresh record or the existing duplicate.
#[derive(Debug, Clone)]
pub enum UploadOutcome {
    Created(ImageRecord),
    Duplicate(ImageRecord),
}

impl UploadOutcome {
    pub fn record(&self) -> &ImageRecord {
        match self {
            UploadOutcome::Created(record) | UploadOutcome::Duplicate(record) => record,
        }
    }

    pub fn into_record(self) -> ImageRecord {
        match self {
            UploadOutcome::Created(record) | UploadOutcome::Duplicate(record) => record,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, UploadOutcome::Duplicate(_))
    }
}

/// Per-file entry of a batch upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItemResult {
    pub filename: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ImageRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// An incoming file, already read from the transport.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub filename: String,
    pub content_type: Option<String>,
    pub data: bytes::Bytes,
}

/// One file of a batch as received: its bytes, or why it was refused while being read.
#[derive(Debug)]
pub enum BatchEntry {
    File(UploadFile),
    Rejected {
        filename: String,
        error: crate::error::AppError,
    },
}

impl BatchEntry {
    pub fn filename(&self) -> &str {
        match self {
            BatchEntry::File(file) => &file.filename,
            BatchEntry::Rejected { filename, .. } => filename,
        }
    }
}

impl From<UploadFile> for BatchEntry {
    fn from(file: UploadFile) -> Self {
        BatchEntry::File(file)
    }
}

/// Either key accepted by the type registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeKey {
    Id(i64),
    Name(String),
}

impl TypeKey {
    /// Build a key from optional request parameters, preferring the id.
    pub fn from_parts(type_id: Option<i64>, type_name: Option<String>) -> Option<Self> {
        match (type_id, type_name.filter(|n| !n.is_empty())) {
            (Some(id), _) => Some(TypeKey::Id(id)),
            (None, Some(name)) => Some(TypeKey::Name(name)),
            (None, None) => None,
        }
    }
}

impl std::fmt::Display for TypeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TypeKey::Id(id) => write!(f, "type_id {}", id),
            TypeKey::Name(name) => write!(f, "type_name {}", name),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    pub type_id: Option<i64>,
    pub keyword: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pagination {
    pub current_page: i64,
    pub page_size: i64,
    pub total: i64,
    pub pages: i64,
    pub has_prev: bool,
    pub has_next: bool,
}

impl Pagination {
    pub fn new(page: i64, page_size: i64, total: i64) -> Self {
        let pages = (total + page_size - 1) / page_size;
        Pagination {
            current_page: page,
            page_size,
            total,
            pages,
            has_prev: page > 1,
            has_next: page < pages,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagePage {
    pub data: Vec<ImageRecord>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Stats {
    pub total_active: i64,
    pub total_size: i64,
    pub total_size_human: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageStatus {
    pub total_size: i64,
    pub total_size_human: String,
    pub deleted_size: i64,
    pub deleted_size_human: String,
}

/// Administrative overview of the whole catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogStatus {
    pub total_images: i64,
    pub active_images: i64,
    pub deleted_images: i64,
    pub storage: StorageStatus,
    pub mime_types: std::collections::BTreeMap<String, i64>,
    pub latest_upload: Option<DateTime<Utc>>,
    pub oldest_upload: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportReport {
    pub imported: usize,
    pub duplicates: usize,
    pub failed: usize,
}

/// Raw bytes plus what a client needs to serve them.
#[derive(Debug, Clone)]
pub struct FileContent {
    pub data: bytes::Bytes,
    pub mime_type: String,
    pub filename: String,
}

/// Envelope wrapping every successful response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    pub data: Option<T>,
    pub code: u16,
    pub timestamp: String,
}

impl<T> ApiResponse<T> {
    pub fn new(code: u16, message: impl Into<String>, data: Option<T>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data,
            code,
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_image(type_id: Option<i64>, type_name: Option<&str>) -> Image {
        let now = Utc::now();
        Image {
            id: 7,
            type_id,
            uuid_filename: "0123abcd.jpg".to_string(),
            original_filename: "cat.jpg".to_string(),
            file_size: 2048,
            md5_hash: "d41d8cd98f00b204e9800998ecf8427e".to_string(),
            width: Some(640),
            height: Some(480),
            mime_type: "image/jpeg".to_string(),
            upload_time: now,
            created_at: now,
            updated_at: now,
            description: None,
            is_deleted: false,
            tags: Some("pets".to_string()),
            type_name: type_name.map(str::to_string),
        }
    }

    #[test]
    fn record_urls_follow_folder_layout() {
        let record = sample_image(Some(10), Some("photos")).to_record();
        assert_eq!(record.url, "/images/10_photos/0123abcd.jpg");
        assert_eq!(record.thumbnail_url, "/images/thumbnails/0123abcd.jpg");
        assert_eq!(record.size_human, "2.00 KB");
        assert_eq!(record.dimensions, Some(Dimensions { width: 640, height: 480 }));
    }

    #[test]
    fn unresolved_type_uses_others_folder() {
        let mut image = sample_image(Some(99), None);
        image.width = None;
        let record = image.to_record();
        assert_eq!(record.url, "/images/0_others/0123abcd.jpg");
        assert!(record.dimensions.is_none());
    }

    #[test]
    fn pagination_counts_pages() {
        let p = Pagination::new(1, 3, 7);
        assert_eq!(p.pages, 3);
        assert!(!p.has_prev);
        assert!(p.has_next);

        let last = Pagination::new(3, 3, 7);
        assert!(last.has_prev);
        assert!(!last.has_next);

        let empty = Pagination::new(1, 50, 0);
        assert_eq!(empty.pages, 0);
        assert!(!empty.has_next);
    }

    #[test]
    fn type_key_prefers_id() {
        assert_eq!(TypeKey::from_parts(Some(3), Some("x".into())), Some(TypeKey::Id(3)));
        assert_eq!(TypeKey::from_parts(None, Some("x".into())), Some(TypeKey::Name("x".into())));
        assert_eq!(TypeKey::from_parts(None, Some(String::new())), None);
    }
}
