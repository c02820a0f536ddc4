use std::path::Path;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Characters that cannot appear in a directory-name component.
const PATH_UNSAFE_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

pub const MAX_TYPE_NAME_LEN: usize = 50;

/// Extracts the file extension from a filename and converts it to lowercase.
pub fn get_file_extension(filename: &str) -> Option<String> {
    Path::new(filename) // treats string as filesystem path.
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .map(|ext| ext.to_lowercase())
}

/// Random 128-bit hex name carrying the original (lower-cased) extension.
pub fn generate_uuid_filename(extension: &str) -> String {
    format!("{}.{}", Uuid::new_v4().simple(), extension)
}

/// Checks that a type name can be used verbatim as part of a directory name.
pub fn is_valid_type_name(name: &str) -> bool {
    !name.trim().is_empty()
        && name.chars().count() <= MAX_TYPE_NAME_LEN
        && !name.contains(PATH_UNSAFE_CHARS)
        && name != "."
        && name != ".."
}

/// Formats a byte count with binary units, e.g. `1.50 MB`.
pub fn format_size(size_bytes: u64) -> String {
    let mut size = size_bytes as f64;
    for unit in ["B", "KB", "MB", "GB"] {
        if size < 1024.0 {
            return format!("{:.2} {}", size, unit);
        }
        size /= 1024.0;
    }
    format!("{:.2} TB", size)
}

/// MIME type implied by an image extension.
pub fn mime_type_for_extension(extension: &str) -> &'static str {
    match extension {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        _ => "application/octet-stream",
    }
}

/// Compares two secrets by their SHA-256 digests so the comparison does not
/// short-circuit on the first differing byte of the raw input.
pub fn secrets_match(provided: &str, expected: &str) -> bool {
    let a = Sha256::digest(provided.as_bytes());
    let b = Sha256::digest(expected.as_bytes());
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
