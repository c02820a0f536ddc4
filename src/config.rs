use std::{env, path::{Path, PathBuf}, str::FromStr, time::Duration};

use dotenvy::dotenv;
use thiserror::Error;
use validator::Validate;

use crate::{
    fingerprint::DEFAULT_PREFIX_BYTES,
    thumbnail::{DEFAULT_MAX_DIMENSION, DEFAULT_QUALITY},
};

pub const DEFAULT_ALLOWED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "bmp"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },

    #[error("Invalid configuration: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

#[derive(Debug, Clone, Validate)]
pub struct Config {
    pub database_url: String,
    pub upload_folder: PathBuf,
    pub bind_addr: String,
    #[validate(range(min = 1, max = 104857600))] // Max 100MB
    pub max_file_size: u64,
    #[validate(range(min = 1, max = 100))]
    pub max_files_per_batch: usize,
    #[validate(range(min = 1024, max = 67108864))]
    pub fingerprint_prefix_bytes: u64,
    #[validate(range(min = 16, max = 4096))]
    pub thumbnail_size: u32,
    #[validate(range(min = 1, max = 100))]
    pub thumbnail_quality: u8,
    #[validate(range(min = 1, max = 1000))]
    pub default_page_size: u32,
    #[validate(range(min = 1, max = 1000))]
    pub max_page_size: u32,
    #[validate(range(min = 1, max = 3600))]
    pub processing_timeout_secs: u64,
    pub auth_code: Option<String>,
    pub allowed_extensions: Vec<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load environment variables from `.env` file (if it exists)
        dotenv().ok();

        let allowed_extensions = env::var("ALLOWED_EXTENSIONS")
            .map(|s| {
                s.split(',')
                    .map(|ext| ext.trim().trim_start_matches('.').to_lowercase())
                    .filter(|ext| !ext.is_empty())
                    .collect()
            })
            .unwrap_or_else(|_| default_extensions());

        let config = Config {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://image_vault.db?mode=rwc".to_string()),
            upload_folder: PathBuf::from(env::var("UPLOAD_FOLDER").unwrap_or_else(|_| "uploads".to_string())),
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            max_file_size: parse_var("MAX_FILE_SIZE", 15 * 1024 * 1024)?,
            max_files_per_batch: parse_var("MAX_FILES_PER_BATCH", 10)?,
            fingerprint_prefix_bytes: parse_var("FINGERPRINT_PREFIX_BYTES", DEFAULT_PREFIX_BYTES)?,
            thumbnail_size: parse_var("THUMBNAIL_SIZE", DEFAULT_MAX_DIMENSION)?,
            thumbnail_quality: parse_var("THUMBNAIL_QUALITY", DEFAULT_QUALITY)?,
            default_page_size: parse_var("DEFAULT_PAGE_SIZE", 50)?,
            max_page_size: parse_var("MAX_PAGE_SIZE", 100)?,
            processing_timeout_secs: parse_var("PROCESSING_TIMEOUT_SECS", 30)?,
            auth_code: env::var("IMAGE_SERVICE_AUTH_CODE").ok().filter(|s| !s.is_empty()),
            allowed_extensions,
        };

        // Validate configuration values (e.g. file size range)
        config.validate()?;
        Ok(config)
    }

    /// Default configuration rooted at `upload_folder`, backed by an in-memory catalog.
    pub fn for_root(upload_folder: impl AsRef<Path>) -> Self {
        Config {
            database_url: "sqlite::memory:".to_string(),
            upload_folder: upload_folder.as_ref().to_path_buf(),
            bind_addr: "127.0.0.1:0".to_string(),
            max_file_size: 15 * 1024 * 1024,
            max_files_per_batch: 10,
            fingerprint_prefix_bytes: DEFAULT_PREFIX_BYTES,
            thumbnail_size: DEFAULT_MAX_DIMENSION,
            thumbnail_quality: DEFAULT_QUALITY,
            default_page_size: 50,
            max_page_size: 100,
            processing_timeout_secs: 30,
            auth_code: None,
            allowed_extensions: default_extensions(),
        }
    }

    pub fn processing_timeout(&self) -> Duration {
        Duration::from_secs(self.processing_timeout_secs)
    }

    pub fn is_extension_allowed(&self, extension: &str) -> bool {
        self.allowed_extensions.iter().any(|ext| ext == extension)
    }
}

fn default_extensions() -> Vec<String> {
    DEFAULT_ALLOWED_EXTENSIONS.iter().map(|s| s.to_string()).collect()
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::for_root("uploads");
        assert!(config.validate().is_ok());
        assert_eq!(config.thumbnail_size, 300);
        assert_eq!(config.thumbnail_quality, 85);
        assert_eq!(config.fingerprint_prefix_bytes, 512 * 1024);
        assert!(config.is_extension_allowed("webp"));
        assert!(!config.is_extension_allowed("pdf"));
    }

    #[test]
    fn out_of_range_values_fail_validation() {
        let mut config = Config::for_root("uploads");
        config.thumbnail_quality = 0;
        assert!(config.validate().is_err());
    }
}
