//! Partial-content fingerprints used for duplicate detection.
//!
//! Only the first `prefix_bytes` of a file are hashed (MD5, lowercase hex).
//! Two files that share that prefix but differ afterwards get the same
//! fingerprint and are treated as the same image. Every producer of
//! fingerprints in one deployment must use the same prefix length, otherwise
//! the dedup lookup never matches.

use std::io::{self, Read, Seek, SeekFrom};

pub const DEFAULT_PREFIX_BYTES: u64 = 512 * 1024;

/// Fingerprint of an in-memory buffer.
pub fn fingerprint_bytes(data: &[u8], prefix_bytes: u64) -> String {
    let end = usize::try_from(prefix_bytes).unwrap_or(usize::MAX).min(data.len());
    format!("{:x}", md5::compute(&data[..end]))
}

/// Fingerprint of a seekable stream. The stream's position is restored before returning.
pub fn fingerprint_reader<R: Read + Seek>(reader: &mut R, prefix_bytes: u64) -> io::Result<String> {
    let position = reader.stream_position()?;
    reader.seek(SeekFrom::Start(0))?;

    let result = hash_prefix(reader, prefix_bytes);

    reader.seek(SeekFrom::Start(position))?;
    result
}

fn hash_prefix<R: Read>(reader: &mut R, prefix_bytes: u64) -> io::Result<String> {
    let mut context = md5::Context::new();
    let mut limited = reader.by_ref().take(prefix_bytes);
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = limited.read(&mut buf)?;
        if n == 0 {
            break;
        }
        context.consume(&buf[..n]);
    }
    Ok(format!("{:x}", context.compute()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn known_digest() {
        assert_eq!(fingerprint_bytes(b"", 16), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(fingerprint_bytes(b"abc", 16), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn bytes_after_prefix_are_ignored() {
        let mut a = vec![7u8; 2048];
        let mut b = a.clone();
        a.extend_from_slice(b"tail one");
        b.extend_from_slice(b"another tail");
        assert_eq!(fingerprint_bytes(&a, 2048), fingerprint_bytes(&b, 2048));
        assert_ne!(fingerprint_bytes(&a, 4096), fingerprint_bytes(&b, 4096));
    }

    #[test]
    fn short_input_hashes_what_is_there() {
        assert_eq!(fingerprint_bytes(b"abc", 1024), fingerprint_bytes(b"abc", 3));
    }

    #[test]
    fn reader_matches_bytes_and_restores_position() {
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let mut cursor = Cursor::new(data.clone());
        cursor.set_position(1234);

        let hash = fingerprint_reader(&mut cursor, 100_000).unwrap();

        assert_eq!(hash, fingerprint_bytes(&data, 100_000));
        assert_eq!(cursor.position(), 1234);
    }
}
