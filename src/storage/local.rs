use std::{
    io::ErrorKind,
    path::{Component, Path, PathBuf},
};
use bytes::Bytes;
use super::{Storage, StorageError};
use async_trait::async_trait;
use tokio::{fs, io::AsyncWriteExt};
use uuid::Uuid;

use crate::models::THUMBNAIL_FOLDER;

// Local filesystem storage
#[derive(Clone, Debug)]
pub struct LocalStorage {
    base_path: PathBuf, // Base directory where files will be stored
}

impl LocalStorage {
    /// Creates a new LocalStorage instance and ensures the root and thumbnail directories exist
    pub async fn new(base_path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path).await?;
        fs::create_dir_all(base_path.join(THUMBNAIL_FOLDER)).await?;
        Ok(Self { base_path })
    }

    /// Returns the full path of a file relative to the base directory
    fn get_full_path(&self, file_path: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(file_path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes || file_path.is_empty() {
            return Err(StorageError::InvalidPath(file_path.to_string()));
        }
        Ok(self.base_path.join(relative))
    }
}

#[async_trait]
impl Storage for LocalStorage {

    /// Writes content to a hidden temporary file next to the target, then renames it into place
    async fn upload(&self, file_path: &str, content: Bytes) -> Result<PathBuf, StorageError> {
        let full_path = self.get_full_path(file_path)?;

        let parent = full_path
            .parent()
            .ok_or_else(|| StorageError::InvalidPath(file_path.to_string()))?;
        fs::create_dir_all(parent).await?;

        let temp_path = parent.join(format!(".{}.part", Uuid::new_v4().simple()));
        let written = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(&content).await?;
            file.sync_all().await?;
            fs::rename(&temp_path, &full_path).await
        }
        .await;

        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StorageError::UploadError(format!("{}: {}", file_path, e)));
        }

        tracing::info!("Saved file at {:?}", full_path);

        Ok(full_path)
    }

    /// Reads a file from local filesystem
    async fn download(&self, file_path: &str) -> Result<Bytes, StorageError> {
        let full_path = self.get_full_path(file_path)?;

        match fs::read(&full_path).await {
            Ok(content) => Ok(Bytes::from(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound(file_path.to_string())),
            Err(e) => Err(StorageError::IoError(e)),
        }
    }

    async fn create_dir(&self, dir: &str) -> Result<(), StorageError> {
        let full_path = self.get_full_path(dir)?;
        fs::create_dir_all(&full_path).await?;
        Ok(())
    }

    async fn rename_dir(&self, from: &str, to: &str) -> Result<(), StorageError> {
        let from_path = self.get_full_path(from)?;
        let to_path = self.get_full_path(to)?;

        if fs::try_exists(&from_path).await? {
            if fs::try_exists(&to_path).await? {
                return Err(StorageError::UploadError(format!(
                    "cannot rename {} to {}: target already exists",
                    from, to
                )));
            }
            fs::rename(&from_path, &to_path).await?;
        } else {
            fs::create_dir_all(&to_path).await?;
        }
        Ok(())
    }

    async fn remove_dir_if_empty(&self, dir: &str) -> Result<bool, StorageError> {
        let full_path = self.get_full_path(dir)?;

        if !fs::try_exists(&full_path).await? {
            return Ok(true);
        }

        let mut entries = fs::read_dir(&full_path).await?;
        if entries.next_entry().await?.is_some() {
            return Ok(false);
        }

        fs::remove_dir(&full_path).await?;
        Ok(true)
    }

    fn root(&self) -> &Path {
        &self.base_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn storage() -> (TempDir, LocalStorage) {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();
        (dir, storage)
    }

    #[tokio::test]
    async fn upload_then_download() {
        let (dir, storage) = storage().await;

        let path = storage
            .upload("1_a/x.png", Bytes::from_static(b"pixels"))
            .await
            .unwrap();
        assert_eq!(path, dir.path().join("1_a/x.png"));
        assert_eq!(storage.download("1_a/x.png").await.unwrap(), Bytes::from_static(b"pixels"));

        // No temporary files are left behind
        let names: Vec<_> = std::fs::read_dir(dir.path().join("1_a"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);

        assert!(matches!(
            storage.download("1_a/missing.png").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn rejects_paths_outside_root() {
        let (_dir, storage) = storage().await;
        assert!(matches!(
            storage.download("../etc/passwd").await,
            Err(StorageError::InvalidPath(_))
        ));
        assert!(storage.upload("/abs", Bytes::from_static(b"x")).await.is_err());
    }

    #[tokio::test]
    async fn rename_moves_or_creates_directory() {
        let (dir, storage) = storage().await;

        storage.create_dir("5_old").await.unwrap();
        storage.upload("5_old/a.jpg", Bytes::from_static(b"a")).await.unwrap();
        storage.rename_dir("5_old", "5_new").await.unwrap();
        assert!(!dir.path().join("5_old").exists());
        assert!(dir.path().join("5_new/a.jpg").exists());

        storage.rename_dir("6_missing", "6_fresh").await.unwrap();
        assert!(dir.path().join("6_fresh").is_dir());
    }

    #[tokio::test]
    async fn remove_dir_only_when_empty() {
        let (dir, storage) = storage().await;

        storage.create_dir("7_full").await.unwrap();
        storage.upload("7_full/a.jpg", Bytes::from_static(b"a")).await.unwrap();
        assert!(!storage.remove_dir_if_empty("7_full").await.unwrap());
        assert!(dir.path().join("7_full").exists());

        storage.create_dir("8_empty").await.unwrap();
        assert!(storage.remove_dir_if_empty("8_empty").await.unwrap());
        assert!(!dir.path().join("8_empty").exists());
    }
}
