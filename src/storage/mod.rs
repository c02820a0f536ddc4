// Submodule for local file system storage
mod local;

use std::{path::{Path, PathBuf}, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tracing::info;

pub use local::LocalStorage;

// Storage error types
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("File not found: {0}")]
    NotFound(String), // Returned when a file cannot be found

    #[error("Io Error: {0}")]
    IoError(#[from] std::io::Error), // Wraps standard I/O errors

    #[error("Upload Error: {0}")]
    UploadError(String), // Errors while persisting bytes

    #[error("Invalid path: {0}")]
    InvalidPath(String), // Paths escaping the storage root
}

/// Blob store addressed by paths relative to the upload root.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Persist `content` at `file_path`, creating parent directories.
    /// The file only becomes visible once fully written.
    async fn upload(&self, file_path: &str, content: Bytes) -> Result<PathBuf, StorageError>;

    /// Read a whole file.
    async fn download(&self, file_path: &str) -> Result<Bytes, StorageError>;

    async fn create_dir(&self, dir: &str) -> Result<(), StorageError>;

    /// Rename a directory. When `from` does not exist, `to` is created instead.
    async fn rename_dir(&self, from: &str, to: &str) -> Result<(), StorageError>;

    /// Remove a directory if it is empty. Returns `false` when it still holds entries.
    async fn remove_dir_if_empty(&self, dir: &str) -> Result<bool, StorageError>;

    fn root(&self) -> &Path;
}

pub type SharedStorage = Arc<dyn Storage>;

// Initialize the local storage backend rooted at `upload_folder`
pub async fn init_storage(upload_folder: &Path) -> Result<SharedStorage, StorageError> {
    info!("Initializing Local storage at {:?}", upload_folder);
    Ok(Arc::new(LocalStorage::new(upload_folder).await?))
}
