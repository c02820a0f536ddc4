use std::{
    future::Future,
    path::{Path, PathBuf},
    sync::Arc,
};

use bytes::Bytes;
use sqlx::SqlitePool;
use tracing::{error, info, warn};

use crate::{
    catalog::ImageQueries,
    config::Config,
    error::{AppError, Result},
    fingerprint::{fingerprint_bytes, fingerprint_reader},
    locks::KeyedLocks,
    models::*,
    registry::TypeRegistry,
    storage::{SharedStorage, StorageError},
    thumbnail::{self, ThumbnailError, ThumbnailOptions},
    utils::{format_size, generate_uuid_filename, get_file_extension, mime_type_for_extension},
};

/// Orchestrates intake, lookup, listing and soft deletion of stored images.
#[derive(Clone)]
pub struct ImageStore {
    pool: SqlitePool,
    storage: SharedStorage,
    registry: TypeRegistry,
    config: Arc<Config>,
    fingerprint_locks: Arc<KeyedLocks>,
}

/// Files written during one intake. Removed on drop unless the catalog insert committed,
/// which covers both error returns and a cancelled request.
struct StagedFiles {
    paths: Vec<PathBuf>,
    committed: bool,
}

impl StagedFiles {
    fn new() -> Self {
        Self { paths: Vec::new(), committed: false }
    }

    fn track(&mut self, path: PathBuf) {
        self.paths.push(path);
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for StagedFiles {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        for path in &self.paths {
            match std::fs::remove_file(path) {
                Ok(()) => info!("Rolled back file {:?}", path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => error!("Failed to roll back file {:?}: {}", path, e),
            }
        }
    }
}

impl ImageStore {
    pub fn new(pool: SqlitePool, storage: SharedStorage, config: Config) -> Self {
        let registry = TypeRegistry::new(pool.clone(), storage.clone());
        Self {
            pool,
            storage,
            registry,
            config: Arc::new(config),
            fingerprint_locks: Arc::new(KeyedLocks::new()),
        }
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Stores one image under its type's folder.
    ///
    /// Content whose fingerprint matches an active image is not stored again;
    /// the existing record comes back as [`UploadOutcome::Duplicate`].
    pub async fn upload(
        &self,
        file: UploadFile,
        type_key: &TypeKey,
        tags: Option<String>,
        description: Option<String>,
    ) -> Result<UploadOutcome> {
        if file.filename.trim().is_empty() {
            return Err(AppError::MissingParameter("No file selected".into()));
        }

        let extension = self.check_extension(&file.filename)?;

        let file_size = file.data.len() as u64;
        if file_size > self.config.max_file_size {
            return Err(AppError::InvalidArgument(format!(
                "File size {} exceeds maximum limit of {} bytes",
                file_size, self.config.max_file_size
            )));
        }

        // Held until the catalog row exists so the type directory cannot move meanwhile
        let _type_guard = self.registry.read_guard().await;
        let image_type = self.registry.resolve(type_key).await?;

        let md5_hash = fingerprint_bytes(&file.data, self.config.fingerprint_prefix_bytes);
        let _fingerprint_guard = self.fingerprint_locks.lock(&md5_hash).await;

        if let Some(existing) = ImageQueries::find_by_hash(&self.pool, &md5_hash).await? {
            info!(
                "Duplicate upload of {} matches image {} ({})",
                file.filename, existing.id, existing.uuid_filename
            );
            return Ok(UploadOutcome::Duplicate(existing.to_record()));
        }

        let uuid_filename = generate_uuid_filename(&extension);
        let relative_path = format!("{}/{}", image_type.folder_name(), uuid_filename);

        let mut staged = StagedFiles::new();
        let full_path = self.storage.upload(&relative_path, file.data.clone()).await?;
        staged.track(full_path.clone());

        let dimensions = self
            .bounded("read dimensions", &file.filename, thumbnail::read_dimensions_async(full_path.clone()))
            .await;

        let thumbnail_options = ThumbnailOptions {
            max_width: self.config.thumbnail_size,
            max_height: self.config.thumbnail_size,
            quality: self.config.thumbnail_quality,
        };
        // Tracked up front: a timed-out job may still write it after we stop waiting
        match thumbnail::thumbnail_path(&full_path, self.storage.root()) {
            Ok(path) => staged.track(path),
            Err(e) => warn!("No thumbnail location for {}: {}", file.filename, e),
        }
        self.bounded(
            "generate thumbnail",
            &file.filename,
            thumbnail::generate_async(full_path.clone(), self.storage.root().to_path_buf(), thumbnail_options),
        )
        .await;

        let mime_type = file
            .content_type
            .filter(|ct| ct.starts_with("image/"))
            .unwrap_or_else(|| mime_type_for_extension(&extension).to_string());

        let new_image = NewImage {
            type_id: Some(image_type.type_id),
            uuid_filename,
            original_filename: file.filename,
            file_size: file_size as i64,
            md5_hash,
            width: dimensions.map(|(w, _)| i64::from(w)),
            height: dimensions.map(|(_, h)| i64::from(h)),
            mime_type,
            description: description.filter(|d| !d.is_empty()),
            tags: tags.filter(|t| !t.is_empty()),
        };

        let image = ImageQueries::insert(&self.pool, &new_image).await?;
        staged.commit();

        info!(
            "Image uploaded: {} -> {} ({} bytes)",
            image.original_filename, relative_path, image.file_size
        );
        Ok(UploadOutcome::Created(image.to_record()))
    }

    /// Uploads each file independently; a failing file never aborts its siblings.
    pub async fn upload_many(
        &self,
        files: Vec<BatchEntry>,
        type_key: &TypeKey,
        tags: Option<String>,
    ) -> Result<Vec<BatchItemResult>> {
        if files.is_empty() {
            return Err(AppError::MissingParameter("No file(s) selected".into()));
        }
        // Unknown type fails the whole request
        self.registry.resolve(type_key).await?;

        let max_files = self.config.max_files_per_batch;
        let mut results = Vec::with_capacity(files.len());

        for (index, entry) in files.into_iter().enumerate() {
            let filename = entry.filename().to_string();

            if index >= max_files {
                results.push(BatchItemResult::failure(
                    filename,
                    format!("Too many files. Maximum allowed is {}", max_files),
                ));
                continue;
            }

            let file = match entry {
                BatchEntry::File(file) => file,
                BatchEntry::Rejected { error, .. } => {
                    warn!("Upload of {} refused: {}", filename, error);
                    results.push(BatchItemResult::failure(filename, error.to_string()));
                    continue;
                }
            };

            match self.upload(file, type_key, tags.clone(), None).await {
                Ok(UploadOutcome::Created(record)) => {
                    results.push(BatchItemResult::success(filename, record, None));
                }
                Ok(UploadOutcome::Duplicate(record)) => {
                    results.push(BatchItemResult::success(
                        filename,
                        record,
                        Some("Duplicate image found".to_string()),
                    ));
                }
                Err(e) => {
                    warn!("Upload of {} failed: {}", filename, e);
                    results.push(BatchItemResult::failure(filename, e.to_string()));
                }
            }
        }

        Ok(results)
    }

    pub async fn get(&self, id: i64) -> Result<ImageRecord> {
        Ok(self.find_active(id).await?.to_record())
    }

    /// Lookup that also returns soft-deleted records.
    pub async fn get_including_deleted(&self, id: i64) -> Result<Image> {
        ImageQueries::find_by_id_including_deleted(&self.pool, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Image {} not found", id)))
    }

    /// Looks up by on-disk name first, then by original upload name.
    ///
    /// The fallback is unreliable: original names are not unique, so among
    /// several uploads with the same name the oldest one is returned.
    pub async fn get_by_filename(&self, name: &str) -> Result<ImageRecord> {
        Ok(self.find_by_filename(name).await?.to_record())
    }

    /// Bytes of an original, addressed by a path whose last segment is the on-disk
    /// or original file name.
    pub async fn get_raw(&self, path: &str) -> Result<FileContent> {
        let name = Path::new(path)
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| AppError::InvalidArgument(format!("Invalid image path: {}", path)))?;

        let image = self.find_by_filename(name).await?;
        let data = self.read_original(&image).await?;

        Ok(FileContent {
            data,
            mime_type: image.mime_type,
            filename: image.uuid_filename,
        })
    }

    /// Original bytes served under the name they were uploaded with.
    pub async fn download(&self, id: i64) -> Result<FileContent> {
        let image = self.find_active(id).await?;
        let data = self.read_original(&image).await?;

        Ok(FileContent {
            data,
            mime_type: image.mime_type,
            filename: image.original_filename,
        })
    }

    pub async fn get_thumbnail(&self, uuid_filename: &str) -> Result<FileContent> {
        if uuid_filename.contains(['/', '\\']) {
            return Err(AppError::InvalidArgument(format!("Invalid thumbnail name: {}", uuid_filename)));
        }

        let image = ImageQueries::find_by_uuid_filename(&self.pool, uuid_filename)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Thumbnail not found: {}", uuid_filename)))?;

        let relative_path = format!("{}/{}", THUMBNAIL_FOLDER, image.uuid_filename);
        let data = self.storage.download(&relative_path).await.map_err(|e| match e {
            StorageError::NotFound(_) => AppError::NotFound(format!("Thumbnail not found: {}", uuid_filename)),
            other => AppError::Storage(other),
        })?;

        let extension = get_file_extension(&image.uuid_filename).unwrap_or_default();
        Ok(FileContent {
            data,
            mime_type: mime_type_for_extension(&extension).to_string(),
            filename: image.uuid_filename,
        })
    }

    /// Active images, newest first. Pages start at 1; lower values are clamped.
    pub async fn list(&self, filter: ListFilter) -> Result<ImagePage> {
        let page = filter.page.unwrap_or(1).max(1);
        let page_size = filter
            .page_size
            .unwrap_or(i64::from(self.config.default_page_size))
            .clamp(1, i64::from(self.config.max_page_size));

        // A page too far out to address is simply past the end
        let offset = (page - 1).checked_mul(page_size).unwrap_or(i64::MAX);
        let (items, total) = ImageQueries::list(
            &self.pool,
            filter.type_id,
            filter.keyword.as_deref(),
            page_size,
            offset,
        )
        .await?;

        Ok(ImagePage {
            data: items.iter().map(Image::to_record).collect(),
            pagination: Pagination::new(page, page_size, total),
        })
    }

    /// Hides an image from every lookup. Its bytes and thumbnail stay on disk.
    pub async fn soft_delete(&self, id: i64) -> Result<()> {
        if !ImageQueries::soft_delete(&self.pool, id).await? {
            return Err(AppError::NotFound(format!("Image {} not found", id)));
        }
        info!("Image {} soft-deleted", id);
        Ok(())
    }

    pub async fn update_description(&self, id: i64, description: Option<String>) -> Result<ImageRecord> {
        if !ImageQueries::update_description(&self.pool, id, description.as_deref()).await? {
            return Err(AppError::NotFound(format!("Image {} not found", id)));
        }
        self.get(id).await
    }

    pub async fn stats(&self) -> Result<Stats> {
        let (total_active, total_size) = ImageQueries::totals(&self.pool, false).await?;
        Ok(Stats {
            total_active,
            total_size,
            total_size_human: format_size(total_size.max(0) as u64),
        })
    }

    pub async fn status(&self) -> Result<CatalogStatus> {
        let (active_images, total_size) = ImageQueries::totals(&self.pool, false).await?;
        let (deleted_images, deleted_size) = ImageQueries::totals(&self.pool, true).await?;
        let mime_types = ImageQueries::mime_type_counts(&self.pool).await?.into_iter().collect();

        Ok(CatalogStatus {
            total_images: active_images + deleted_images,
            active_images,
            deleted_images,
            storage: StorageStatus {
                total_size,
                total_size_human: format_size(total_size.max(0) as u64),
                deleted_size,
                deleted_size_human: format_size(deleted_size.max(0) as u64),
            },
            mime_types,
            latest_upload: ImageQueries::upload_time_bound(&self.pool, true).await?,
            oldest_upload: ImageQueries::upload_time_bound(&self.pool, false).await?,
        })
    }

    /// Imports every file with an allowed extension from `folder` into `type_id`.
    pub async fn import_folder(&self, type_id: i64, folder: &Path) -> Result<ImportReport> {
        let type_key = TypeKey::Id(type_id);
        self.registry.resolve(&type_key).await?;

        let mut entries = tokio::fs::read_dir(folder)
            .await
            .map_err(|e| AppError::InvalidArgument(format!("Cannot read folder {:?}: {}", folder, e)))?;

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(StorageError::from)? {
            let path = entry.path();
            let allowed = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(get_file_extension)
                .is_some_and(|ext| self.config.is_extension_allowed(&ext));
            if allowed && entry.file_type().await.map_err(StorageError::from)?.is_file() {
                paths.push(path);
            }
        }
        paths.sort();

        let mut report = ImportReport::default();
        for path in paths {
            let filename = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string();

            // Known content is skipped before the whole file is read
            match self.fingerprint_file(path.clone()).await {
                Ok(hash) => {
                    if ImageQueries::find_by_hash(&self.pool, &hash).await?.is_some() {
                        report.duplicates += 1;
                        continue;
                    }
                }
                Err(e) => warn!("Cannot fingerprint {:?}: {}", path, e),
            }

            let outcome = match tokio::fs::read(&path).await {
                Ok(data) => {
                    let file = UploadFile {
                        filename: filename.clone(),
                        content_type: None,
                        data: Bytes::from(data),
                    };
                    self.upload(file, &type_key, None, None).await
                }
                Err(e) => Err(AppError::Storage(StorageError::IoError(e))),
            };

            match outcome {
                Ok(UploadOutcome::Created(_)) => report.imported += 1,
                Ok(UploadOutcome::Duplicate(_)) => report.duplicates += 1,
                Err(e) => {
                    warn!("Import of {:?} failed: {}", path, e);
                    report.failed += 1;
                }
            }
        }

        info!(
            "Imported folder {:?} into type {}: {} new, {} duplicate, {} failed",
            folder, type_id, report.imported, report.duplicates, report.failed
        );
        Ok(report)
    }

    async fn fingerprint_file(&self, path: PathBuf) -> std::io::Result<String> {
        let prefix_bytes = self.config.fingerprint_prefix_bytes;
        tokio::task::spawn_blocking(move || {
            let mut file = std::fs::File::open(&path)?;
            fingerprint_reader(&mut file, prefix_bytes)
        })
        .await
        .map_err(std::io::Error::other)?
    }

    fn check_extension(&self, filename: &str) -> Result<String> {
        match get_file_extension(filename) {
            Some(ext) if self.config.is_extension_allowed(&ext) => Ok(ext),
            Some(ext) => Err(AppError::InvalidArgument(format!("File extension .{} is not allowed", ext))),
            None => Err(AppError::InvalidArgument(format!("File {} has no extension", filename))),
        }
    }

    async fn find_active(&self, id: i64) -> Result<Image> {
        ImageQueries::find_by_id(&self.pool, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Image {} not found", id)))
    }

    async fn find_by_filename(&self, name: &str) -> Result<Image> {
        if let Some(image) = ImageQueries::find_by_uuid_filename(&self.pool, name).await? {
            return Ok(image);
        }
        ImageQueries::find_by_original_filename(&self.pool, name)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Image not found: {}", name)))
    }

    async fn read_original(&self, image: &Image) -> Result<Bytes> {
        let relative_path = format!("{}/{}", image.folder_name(), image.uuid_filename);
        self.storage.download(&relative_path).await.map_err(|e| match e {
            StorageError::NotFound(_) => {
                AppError::NotFound(format!("File not found on disk: {}", relative_path))
            }
            other => AppError::Storage(other),
        })
    }

    /// Best-effort processing step: failures and timeouts are logged and yield `None`.
    async fn bounded<T>(
        &self,
        step: &str,
        filename: &str,
        work: impl Future<Output = Result<T, ThumbnailError>>,
    ) -> Option<T> {
        match tokio::time::timeout(self.config.processing_timeout(), work).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                warn!("Cannot {} for {}: {}", step, filename, e);
                None
            }
            Err(_) => {
                warn!("Timed out trying to {} for {}", step, filename);
                None
            }
        }
    }
}

impl BatchItemResult {
    fn success(filename: String, record: ImageRecord, message: Option<String>) -> Self {
        Self {
            filename,
            success: true,
            message,
            data: Some(record),
            error: None,
        }
    }

    fn failure(filename: String, error: String) -> Self {
        Self {
            filename,
            success: false,
            message: None,
            data: None,
            error: Some(error),
        }
    }
}
