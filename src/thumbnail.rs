use std::{
    fs::File,
    io::BufWriter,
    path::{Path, PathBuf},
};

use image::{codecs::jpeg::JpegEncoder, imageops::FilterType, DynamicImage, ImageFormat};
use thiserror::Error;

use crate::models::THUMBNAIL_FOLDER;

pub const DEFAULT_MAX_DIMENSION: u32 = 300;
pub const DEFAULT_QUALITY: u8 = 85;

#[derive(Debug, Error)]
pub enum ThumbnailError {
    #[error("Failed to decode image: {0}")]
    Image(#[from] image::ImageError),

    #[error("Io Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Source has no file name: {0:?}")]
    InvalidSource(PathBuf),

    #[error("Thumbnail task failed: {0}")]
    Task(String),
}

#[derive(Debug, Clone, Copy)]
pub struct ThumbnailOptions {
    pub max_width: u32,
    pub max_height: u32,
    pub quality: u8,
}

impl Default for ThumbnailOptions {
    fn default() -> Self {
        Self {
            max_width: DEFAULT_MAX_DIMENSION,
            max_height: DEFAULT_MAX_DIMENSION,
            quality: DEFAULT_QUALITY,
        }
    }
}

/// Where the thumbnail of `source` lives: `destination_root/thumbnails/<source file name>`.
pub fn thumbnail_path(source: &Path, destination_root: &Path) -> Result<PathBuf, ThumbnailError> {
    let filename = source
        .file_name()
        .ok_or_else(|| ThumbnailError::InvalidSource(source.to_path_buf()))?;
    Ok(destination_root.join(THUMBNAIL_FOLDER).join(filename))
}

/// Generates a thumbnail for `source`, bounded by the options' dimensions with
/// aspect ratio preserved. Images already within bounds are not upscaled.
pub fn generate(
    source: &Path,
    destination_root: &Path,
    options: ThumbnailOptions,
) -> Result<PathBuf, ThumbnailError> {
    let output_path = thumbnail_path(source, destination_root)?;
    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let img = image::ImageReader::open(source)?.with_guessed_format()?.decode()?;

    let thumbnail = if img.width() > options.max_width || img.height() > options.max_height {
        img.resize(options.max_width, options.max_height, FilterType::Lanczos3)
    } else {
        img
    };

    let format = ImageFormat::from_path(&output_path).unwrap_or(ImageFormat::Jpeg);
    if let Err(e) = write_thumbnail(&thumbnail, &output_path, format, options.quality) {
        // Never leave a half-written thumbnail behind
        let _ = std::fs::remove_file(&output_path);
        return Err(e);
    }

    Ok(output_path)
}

/// Runs [`generate`] on the blocking pool.
pub async fn generate_async(
    source: PathBuf,
    destination_root: PathBuf,
    options: ThumbnailOptions,
) -> Result<PathBuf, ThumbnailError> {
    // CPU heavy: keep it off the async executor
    tokio::task::spawn_blocking(move || generate(&source, &destination_root, options))
        .await
        .map_err(|e| ThumbnailError::Task(e.to_string()))?
}

/// Pixel dimensions read from the image header.
pub fn read_dimensions(source: &Path) -> Result<(u32, u32), ThumbnailError> {
    Ok(image::ImageReader::open(source)?.with_guessed_format()?.into_dimensions()?)
}

pub async fn read_dimensions_async(source: PathBuf) -> Result<(u32, u32), ThumbnailError> {
    tokio::task::spawn_blocking(move || read_dimensions(&source))
        .await
        .map_err(|e| ThumbnailError::Task(e.to_string()))?
}

fn write_thumbnail(
    thumbnail: &DynamicImage,
    output_path: &Path,
    format: ImageFormat,
    quality: u8,
) -> Result<(), ThumbnailError> {
    match format {
        ImageFormat::Jpeg => {
            let mut writer = BufWriter::new(File::create(output_path)?);
            // JPEG has no alpha channel
            let rgb = DynamicImage::ImageRgb8(thumbnail.to_rgb8());
            rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut writer, quality))?;
        }
        format => {
            thumbnail.save_with_format(output_path, format)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage, Rgba, RgbaImage};
    use tempfile::TempDir;

    fn write_png(path: &Path, width: u32, height: u32) {
        let img = RgbaImage::from_fn(width, height, |x, y| Rgba([(x % 256) as u8, (y % 256) as u8, 90, 255]));
        img.save_with_format(path, ImageFormat::Png).unwrap();
    }

    #[test]
    fn large_image_is_bounded_and_keeps_aspect_ratio() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("wide.png");
        write_png(&source, 900, 450);

        let out = generate(&source, dir.path(), ThumbnailOptions::default()).unwrap();

        assert_eq!(out, dir.path().join("thumbnails").join("wide.png"));
        let (w, h) = image::image_dimensions(&out).unwrap();
        assert_eq!((w, h), (300, 150));
    }

    #[test]
    fn small_image_is_not_upscaled() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("tiny.png");
        write_png(&source, 40, 20);

        let out = generate(&source, dir.path(), ThumbnailOptions::default()).unwrap();

        assert_eq!(image::image_dimensions(&out).unwrap(), (40, 20));
    }

    #[test]
    fn jpeg_thumbnail_from_rgb_source() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("photo.jpg");
        let img = RgbImage::from_fn(640, 960, |x, y| Rgb([(x % 200) as u8, (y % 200) as u8, 30]));
        img.save_with_format(&source, ImageFormat::Jpeg).unwrap();

        let out = generate(&source, dir.path(), ThumbnailOptions::default()).unwrap();

        let (w, h) = image::image_dimensions(&out).unwrap();
        assert!(w <= 300 && h <= 300);
        assert_eq!(h, 300);
    }

    #[test]
    fn corrupt_source_fails_without_output() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("broken.jpg");
        std::fs::write(&source, b"definitely not a jpeg").unwrap();

        assert!(generate(&source, dir.path(), ThumbnailOptions::default()).is_err());
        assert!(!dir.path().join("thumbnails").join("broken.jpg").exists());
        assert!(read_dimensions(&source).is_err());
    }

    #[test]
    fn dimensions_come_from_header() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("dims.png");
        write_png(&source, 33, 17);
        assert_eq!(read_dimensions(&source).unwrap(), (33, 17));
    }
}
