use std::str::FromStr;

use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};
use tracing::info;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS image_types (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        type_id INTEGER NOT NULL UNIQUE,
        type_name VARCHAR(50) NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        created_time TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS images (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        type_id INTEGER,
        uuid_filename VARCHAR(100) NOT NULL,
        original_filename VARCHAR(255) NOT NULL,
        file_size INTEGER NOT NULL,
        md5_hash VARCHAR(32) NOT NULL,
        width INTEGER,
        height INTEGER,
        mime_type VARCHAR(50) NOT NULL,
        upload_time TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        description TEXT,
        is_deleted BOOLEAN NOT NULL DEFAULT 0,
        tags VARCHAR(255)
    )
    "#,
    "CREATE UNIQUE INDEX IF NOT EXISTS ix_images_uuid_filename ON images (uuid_filename)",
    "CREATE INDEX IF NOT EXISTS ix_images_md5_hash ON images (md5_hash)",
    "CREATE INDEX IF NOT EXISTS ix_images_type_id ON images (type_id)",
];

/// Initialize and return a SQLite connection pool with the catalog schema in place.
pub async fn init_db(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    info!("Connecting to database...");

    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

    // An in-memory database exists per connection, so it gets exactly one
    let pool = if database_url.contains(":memory:") {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?
    } else {
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options.journal_mode(SqliteJournalMode::Wal))
            .await?
    };

    init_schema(&pool).await?;

    info!("Database connection established");
    Ok(pool)
}

pub async fn init_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
