use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::sync::{OwnedRwLockReadGuard, RwLock};
use tracing::{info, warn};

use crate::{
    catalog::{ImageQueries, TypeQueries},
    error::{AppError, Result},
    models::{folder_name, ImageType, TypeKey},
    storage::SharedStorage,
    utils::{is_valid_type_name, MAX_TYPE_NAME_LEN},
};

/// Image categories and their `{type_id}_{type_name}` directories.
///
/// Uploads hold the registry lock shared while they resolve a type and write
/// into its directory; rename and remove hold it exclusively, so a directory
/// never moves under an in-flight write.
#[derive(Clone)]
pub struct TypeRegistry {
    pool: SqlitePool,
    storage: SharedStorage,
    lock: Arc<RwLock<()>>,
}

impl TypeRegistry {
    pub fn new(pool: SqlitePool, storage: SharedStorage) -> Self {
        Self {
            pool,
            storage,
            lock: Arc::new(RwLock::new(())),
        }
    }

    /// Shared guard blocking rename/remove while held.
    pub async fn read_guard(&self) -> OwnedRwLockReadGuard<()> {
        self.lock.clone().read_owned().await
    }

    pub async fn register(&self, type_id: i64, type_name: &str, description: &str) -> Result<ImageType> {
        validate_type_name(type_name)?;
        let _guard = self.lock.write().await;

        let mut tx = self.pool.begin().await?;
        if TypeQueries::find(&mut *tx, &TypeKey::Id(type_id)).await?.is_some() {
            return Err(AppError::Conflict(format!("Image type {} already exists", type_id)));
        }

        let image_type = TypeQueries::insert(&mut *tx, type_id, type_name, description)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                    AppError::Conflict(format!("Image type {} already exists", type_id))
                }
                other => AppError::DatabaseError(other),
            })?;

        // Directory first: a failed mkdir rolls the row back with the transaction
        self.storage.create_dir(&image_type.folder_name()).await?;
        tx.commit().await?;

        info!("Registered image type {} ({})", type_id, image_type.folder_name());
        Ok(image_type)
    }

    pub async fn resolve(&self, key: &TypeKey) -> Result<ImageType> {
        TypeQueries::find(&self.pool, key)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Image type not found: {}", key)))
    }

    pub async fn get(&self, type_id: i64) -> Result<ImageType> {
        self.resolve(&TypeKey::Id(type_id)).await
    }

    pub async fn list(&self) -> Result<Vec<ImageType>> {
        Ok(TypeQueries::list(&self.pool).await?)
    }

    /// Renames a type and its directory. Only allowed while no active image references it.
    pub async fn rename(
        &self,
        type_id: i64,
        new_name: &str,
        new_description: Option<&str>,
    ) -> Result<ImageType> {
        validate_type_name(new_name)?;
        let _guard = self.lock.write().await;

        let mut tx = self.pool.begin().await?;
        let current = TypeQueries::find(&mut *tx, &TypeKey::Id(type_id))
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Image type not found: type_id {}", type_id)))?;

        let referencing = ImageQueries::count_active_by_type(&mut *tx, type_id).await?;
        if referencing > 0 {
            return Err(AppError::BusinessRuleViolation(format!(
                "Image type {} is referenced by {} image(s) and cannot be renamed",
                type_id, referencing
            )));
        }

        let old_folder = current.folder_name();
        let new_folder = folder_name(type_id, new_name);
        let description = new_description.unwrap_or(&current.description);

        if old_folder != new_folder {
            self.storage
                .rename_dir(&old_folder, &new_folder)
                .await
                .map_err(|e| AppError::InternalError(format!("Failed to rename directory {}: {}", old_folder, e)))?;
        }

        let updated = async {
            let updated = TypeQueries::update(&mut *tx, type_id, new_name, description)
                .await?
                .ok_or(sqlx::Error::RowNotFound)?;
            tx.commit().await?;
            Ok::<_, sqlx::Error>(updated)
        }
        .await;

        match updated {
            Ok(updated) => {
                info!("Renamed image type {}: {} -> {}", type_id, old_folder, new_folder);
                Ok(updated)
            }
            Err(e) => {
                // Put the directory back so disk and catalog agree again
                if old_folder != new_folder {
                    if let Err(undo) = self.storage.rename_dir(&new_folder, &old_folder).await {
                        warn!("Failed to restore directory {} after catalog error: {}", old_folder, undo);
                    }
                }
                Err(e.into())
            }
        }
    }

    /// Removes a type that no active image references.
    ///
    /// A directory that still holds files (bytes of soft-deleted images) is kept
    /// and the row is removed anyway. Any other directory failure aborts the
    /// removal with the catalog untouched.
    pub async fn remove(&self, type_id: i64) -> Result<()> {
        let _guard = self.lock.write().await;

        let mut tx = self.pool.begin().await?;
        let current = TypeQueries::find(&mut *tx, &TypeKey::Id(type_id))
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Image type not found: type_id {}", type_id)))?;

        let referencing = ImageQueries::count_active_by_type(&mut *tx, type_id).await?;
        if referencing > 0 {
            return Err(AppError::BusinessRuleViolation(format!(
                "Image type {} is referenced by {} image(s) and cannot be removed",
                type_id, referencing
            )));
        }

        let folder = current.folder_name();
        let removed = self
            .storage
            .remove_dir_if_empty(&folder)
            .await
            .map_err(|e| AppError::InternalError(format!("Failed to remove directory {}: {}", folder, e)))?;
        if !removed {
            warn!("Directory {} is not empty, leaving it in place", folder);
        }

        TypeQueries::delete(&mut *tx, type_id).await?;
        tx.commit().await?;

        info!("Removed image type {} ({})", type_id, folder);
        Ok(())
    }
}

fn validate_type_name(type_name: &str) -> Result<()> {
    if is_valid_type_name(type_name) {
        Ok(())
    } else {
        Err(AppError::InvalidArgument(format!(
            "type_name must be 1-{} characters without any of \\ / : * ? \" < > |",
            MAX_TYPE_NAME_LEN
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{catalog::ImageQueries, models::NewImage, storage::LocalStorage};
    use sqlx::sqlite::SqlitePoolOptions;
    use tempfile::TempDir;

    async fn registry() -> (TempDir, SqlitePool, TypeRegistry) {
        let dir = TempDir::new().unwrap();
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::database::init_schema(&pool).await.unwrap();
        let storage: SharedStorage = Arc::new(LocalStorage::new(dir.path()).await.unwrap());
        let registry = TypeRegistry::new(pool.clone(), storage);
        (dir, pool, registry)
    }

    async fn add_image(pool: &SqlitePool, type_id: i64) -> i64 {
        let image = ImageQueries::insert(
            pool,
            &NewImage {
                type_id: Some(type_id),
                uuid_filename: crate::utils::generate_uuid_filename("jpg"),
                original_filename: "a.jpg".into(),
                file_size: 1,
                md5_hash: uuid::Uuid::new_v4().simple().to_string(),
                width: None,
                height: None,
                mime_type: "image/jpeg".into(),
                description: None,
                tags: None,
            },
        )
        .await
        .unwrap();
        image.id
    }

    #[tokio::test]
    async fn register_creates_directory() {
        let (dir, _pool, registry) = registry().await;

        let t = registry.register(10, "photos", "desc").await.unwrap();

        assert_eq!(t.folder_name(), "10_photos");
        assert!(dir.path().join("10_photos").is_dir());
        assert_eq!(registry.resolve(&TypeKey::Name("photos".into())).await.unwrap(), t);
    }

    #[tokio::test]
    async fn duplicate_id_conflicts() {
        let (_dir, _pool, registry) = registry().await;
        registry.register(10, "photos", "").await.unwrap();

        let err = registry.register(10, "other", "").await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn unsafe_names_are_rejected() {
        let (dir, _pool, registry) = registry().await;

        let err = registry.register(1, "../escape", "").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument(_)));
        let err = registry.register(1, &"x".repeat(51), "").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument(_)));
        assert!(registry.list().await.unwrap().is_empty());
        assert!(!dir.path().join("1_x").exists());
    }

    #[tokio::test]
    async fn unknown_type_is_not_found() {
        let (_dir, _pool, registry) = registry().await;
        assert!(matches!(registry.get(5).await, Err(AppError::NotFound(_))));
        assert!(matches!(registry.rename(5, "x", None).await, Err(AppError::NotFound(_))));
        assert!(matches!(registry.remove(5).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn rename_moves_directory_when_unreferenced() {
        let (dir, _pool, registry) = registry().await;
        registry.register(3, "old", "first").await.unwrap();

        let renamed = registry.rename(3, "new", None).await.unwrap();

        assert_eq!(renamed.type_name, "new");
        assert_eq!(renamed.description, "first");
        assert!(!dir.path().join("3_old").exists());
        assert!(dir.path().join("3_new").is_dir());
    }

    #[tokio::test]
    async fn rename_refused_while_referenced() {
        let (dir, pool, registry) = registry().await;
        registry.register(3, "old", "").await.unwrap();
        add_image(&pool, 3).await;

        let err = registry.rename(3, "new", Some("d")).await.unwrap_err();

        assert!(matches!(err, AppError::BusinessRuleViolation(_)));
        assert!(dir.path().join("3_old").is_dir());
        assert!(!dir.path().join("3_new").exists());
        assert_eq!(registry.get(3).await.unwrap().type_name, "old");
    }

    #[tokio::test]
    async fn soft_deleted_images_do_not_block_removal() {
        let (dir, pool, registry) = registry().await;
        registry.register(4, "gone", "").await.unwrap();
        let id = add_image(&pool, 4).await;

        assert!(matches!(registry.remove(4).await, Err(AppError::BusinessRuleViolation(_))));

        ImageQueries::soft_delete(&pool, id).await.unwrap();
        registry.remove(4).await.unwrap();

        assert!(!dir.path().join("4_gone").exists());
        assert!(matches!(registry.get(4).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn non_empty_directory_survives_removal() {
        let (dir, _pool, registry) = registry().await;
        registry.register(6, "kept", "").await.unwrap();
        std::fs::write(dir.path().join("6_kept/orphan.jpg"), b"x").unwrap();

        registry.remove(6).await.unwrap();

        assert!(dir.path().join("6_kept/orphan.jpg").exists());
        assert!(registry.list().await.unwrap().is_empty());
    }
}
