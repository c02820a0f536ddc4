//! Catalog queries: the single source of truth for which images and types exist.

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteExecutor, SqlitePool};

use crate::models::{Image, ImageType, NewImage, TypeKey};

const SELECT_IMAGE: &str = r#"
    SELECT i.id, i.type_id, i.uuid_filename, i.original_filename, i.file_size, i.md5_hash,
           i.width, i.height, i.mime_type, i.upload_time, i.created_at, i.updated_at,
           i.description, i.is_deleted, i.tags, t.type_name AS type_name
    FROM images i
    LEFT JOIN image_types t ON t.type_id = i.type_id
"#;

pub struct ImageQueries;

impl ImageQueries {
    pub async fn insert(pool: &SqlitePool, image: &NewImage) -> Result<Image, sqlx::Error> {
        let now = Utc::now();
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO images (
                type_id, uuid_filename, original_filename, file_size, md5_hash, width, height,
                mime_type, upload_time, created_at, updated_at, description, is_deleted, tags
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?)
            RETURNING id
            "#,
        )
        .bind(image.type_id)
        .bind(&image.uuid_filename)
        .bind(&image.original_filename)
        .bind(image.file_size)
        .bind(&image.md5_hash)
        .bind(image.width)
        .bind(image.height)
        .bind(&image.mime_type)
        .bind(now)
        .bind(now)
        .bind(now)
        .bind(&image.description)
        .bind(&image.tags)
        .fetch_one(pool)
        .await?;

        Self::find_by_id_including_deleted(pool, id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Image>, sqlx::Error> {
        sqlx::query_as(&format!("{SELECT_IMAGE} WHERE i.id = ? AND i.is_deleted = 0"))
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Administrative lookup that ignores the soft-delete flag.
    pub async fn find_by_id_including_deleted(
        pool: &SqlitePool,
        id: i64,
    ) -> Result<Option<Image>, sqlx::Error> {
        sqlx::query_as(&format!("{SELECT_IMAGE} WHERE i.id = ?"))
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_uuid_filename(
        pool: &SqlitePool,
        uuid_filename: &str,
    ) -> Result<Option<Image>, sqlx::Error> {
        sqlx::query_as(&format!(
            "{SELECT_IMAGE} WHERE i.uuid_filename = ? AND i.is_deleted = 0"
        ))
        .bind(uuid_filename)
        .fetch_optional(pool)
        .await
    }

    /// Original names are not unique; the oldest matching record wins.
    pub async fn find_by_original_filename(
        pool: &SqlitePool,
        original_filename: &str,
    ) -> Result<Option<Image>, sqlx::Error> {
        sqlx::query_as(&format!(
            "{SELECT_IMAGE} WHERE i.original_filename = ? AND i.is_deleted = 0 ORDER BY i.id ASC LIMIT 1"
        ))
        .bind(original_filename)
        .fetch_optional(pool)
        .await
    }

    /// Active image with the given fingerprint. Soft-deleted rows never match.
    pub async fn find_by_hash(pool: &SqlitePool, md5_hash: &str) -> Result<Option<Image>, sqlx::Error> {
        sqlx::query_as(&format!(
            "{SELECT_IMAGE} WHERE i.md5_hash = ? AND i.is_deleted = 0 ORDER BY i.id ASC LIMIT 1"
        ))
        .bind(md5_hash)
        .fetch_optional(pool)
        .await
    }

    /// One page of active images, newest id first, plus the total match count.
    pub async fn list(
        pool: &SqlitePool,
        type_id: Option<i64>,
        keyword: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Image>, i64), sqlx::Error> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM images i");
        push_list_filter(&mut count, type_id, keyword);
        let (total,): (i64,) = count.build_query_as().fetch_one(pool).await?;

        let mut select = QueryBuilder::<Sqlite>::new(SELECT_IMAGE);
        push_list_filter(&mut select, type_id, keyword);
        select.push(" ORDER BY i.id DESC LIMIT ");
        select.push_bind(limit);
        select.push(" OFFSET ");
        select.push_bind(offset);
        let items = select.build_query_as::<Image>().fetch_all(pool).await?;

        Ok((items, total))
    }

    /// Flags an active image as deleted. Returns `false` when no active row matched.
    pub async fn soft_delete(pool: &SqlitePool, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE images SET is_deleted = 1, updated_at = ? WHERE id = ? AND is_deleted = 0",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn update_description(
        pool: &SqlitePool,
        id: i64,
        description: Option<&str>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE images SET description = ?, updated_at = ? WHERE id = ? AND is_deleted = 0",
        )
        .bind(description)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn count_active_by_type(
        executor: impl SqliteExecutor<'_>,
        type_id: i64,
    ) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM images WHERE type_id = ? AND is_deleted = 0")
                .bind(type_id)
                .fetch_one(executor)
                .await?;
        Ok(count)
    }

    /// `(count, byte sum)` over images with the given deleted flag.
    pub async fn totals(pool: &SqlitePool, deleted: bool) -> Result<(i64, i64), sqlx::Error> {
        sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(file_size), 0) FROM images WHERE is_deleted = ?",
        )
        .bind(deleted)
        .fetch_one(pool)
        .await
    }

    pub async fn mime_type_counts(pool: &SqlitePool) -> Result<Vec<(String, i64)>, sqlx::Error> {
        sqlx::query_as(
            "SELECT mime_type, COUNT(*) FROM images WHERE is_deleted = 0 GROUP BY mime_type ORDER BY mime_type",
        )
        .fetch_all(pool)
        .await
    }

    /// Upload time of the newest (`latest = true`) or oldest active image.
    pub async fn upload_time_bound(
        pool: &SqlitePool,
        latest: bool,
    ) -> Result<Option<DateTime<Utc>>, sqlx::Error> {
        let order = if latest { "DESC" } else { "ASC" };
        let row: Option<(DateTime<Utc>,)> = sqlx::query_as(&format!(
            "SELECT upload_time FROM images WHERE is_deleted = 0 ORDER BY upload_time {order}, id {order} LIMIT 1"
        ))
        .fetch_optional(pool)
        .await?;
        Ok(row.map(|(t,)| t))
    }
}

fn push_list_filter(builder: &mut QueryBuilder<'_, Sqlite>, type_id: Option<i64>, keyword: Option<&str>) {
    builder.push(" WHERE i.is_deleted = 0");
    if let Some(type_id) = type_id {
        builder.push(" AND i.type_id = ");
        builder.push_bind(type_id);
    }
    if let Some(keyword) = keyword.filter(|k| !k.is_empty()) {
        builder.push(" AND i.original_filename LIKE ");
        builder.push_bind(format!("%{}%", escape_like(keyword)));
        builder.push(" ESCAPE '\\'");
    }
}

fn escape_like(keyword: &str) -> String {
    let mut escaped = String::with_capacity(keyword.len());
    for c in keyword.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

pub struct TypeQueries;

impl TypeQueries {
    pub async fn insert(
        executor: impl SqliteExecutor<'_>,
        type_id: i64,
        type_name: &str,
        description: &str,
    ) -> Result<ImageType, sqlx::Error> {
        sqlx::query_as(
            r#"
            INSERT INTO image_types (type_id, type_name, description, created_time)
            VALUES (?, ?, ?, ?)
            RETURNING id, type_id, type_name, description, created_time
            "#,
        )
        .bind(type_id)
        .bind(type_name)
        .bind(description)
        .bind(Utc::now())
        .fetch_one(executor)
        .await
    }

    pub async fn find(
        executor: impl SqliteExecutor<'_>,
        key: &TypeKey,
    ) -> Result<Option<ImageType>, sqlx::Error> {
        match key {
            TypeKey::Id(type_id) => {
                sqlx::query_as(
                    "SELECT id, type_id, type_name, description, created_time FROM image_types WHERE type_id = ?",
                )
                .bind(type_id)
                .fetch_optional(executor)
                .await
            }
            TypeKey::Name(type_name) => {
                sqlx::query_as(
                    "SELECT id, type_id, type_name, description, created_time FROM image_types WHERE type_name = ? ORDER BY type_id LIMIT 1",
                )
                .bind(type_name)
                .fetch_optional(executor)
                .await
            }
        }
    }

    pub async fn list(executor: impl SqliteExecutor<'_>) -> Result<Vec<ImageType>, sqlx::Error> {
        sqlx::query_as(
            "SELECT id, type_id, type_name, description, created_time FROM image_types ORDER BY type_id",
        )
        .fetch_all(executor)
        .await
    }

    pub async fn update(
        executor: impl SqliteExecutor<'_>,
        type_id: i64,
        type_name: &str,
        description: &str,
    ) -> Result<Option<ImageType>, sqlx::Error> {
        sqlx::query_as(
            r#"
            UPDATE image_types SET type_name = ?, description = ?
            WHERE type_id = ?
            RETURNING id, type_id, type_name, description, created_time
            "#,
        )
        .bind(type_name)
        .bind(description)
        .bind(type_id)
        .fetch_optional(executor)
        .await
    }

    pub async fn delete(executor: impl SqliteExecutor<'_>, type_id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM image_types WHERE type_id = ?")
            .bind(type_id)
            .execute(executor)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
