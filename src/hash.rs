//! Checksum utilities for branch file verification.
//!
//! Branch manifests carry SHA-1 digests as 40 hex characters. This module
//! computes them by streaming the file and compares them case-insensitively.

use sha1::{Digest, Sha1};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::error::{SyncError, SyncResult};

/// Length of a hex-encoded SHA-1 digest
pub const CHECKSUM_HEX_LEN: usize = 40;

const READ_CHUNK: usize = 1024 * 1024;

/// Compute the SHA-1 of a file and return it as lowercase hex.
///
/// Uses streaming to handle large files without loading into memory.
/// A read error mid-stream fails the whole computation.
pub fn compute_file_checksum(path: &Path) -> SyncResult<String> {
    let file = File::open(path).map_err(|e| SyncError::io(path, e))?;
    compute_reader_checksum(BufReader::with_capacity(READ_CHUNK, file))
        .map_err(|e| SyncError::io(path, e))
}

/// Compute the SHA-1 of everything a reader yields.
pub fn compute_reader_checksum<R: Read>(mut reader: R) -> std::io::Result<String> {
    let mut buf = vec![0u8; READ_CHUNK];
    let mut hasher = Sha1::new();

    loop {
        let bytes_read = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// SHA-1 of an in-memory buffer, lowercase hex.
pub fn compute_bytes_checksum(data: &[u8]) -> String {
    hex::encode(Sha1::digest(data))
}

/// Compare two hex digests, ignoring ASCII case and surrounding whitespace.
pub fn checksums_match(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// Whether a string looks like a hex SHA-1 digest.
pub fn is_valid_checksum(value: &str) -> bool {
    let value = value.trim();
    value.len() == CHECKSUM_HEX_LEN && value.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Verify a file's checksum matches the expected digest.
///
/// Returns Ok(true) if it matches, Ok(false) on mismatch.
pub fn verify_file_checksum(path: &Path, expected: &str) -> SyncResult<bool> {
    let actual = compute_file_checksum(path)?;
    Ok(checksums_match(&actual, expected))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_checksum_empty_file() -> anyhow::Result<()> {
        let tmp = NamedTempFile::new()?;
        let checksum = compute_file_checksum(tmp.path())?;
        assert_eq!(checksum, "da39a3ee5e6b4b0d3255bfef95601890afd80709");
        Ok(())
    }

    #[test]
    fn test_checksum_known_value() -> anyhow::Result<()> {
        let mut tmp = NamedTempFile::new()?;
        tmp.write_all(b"abc")?;
        tmp.flush()?;

        let checksum = compute_file_checksum(tmp.path())?;
        assert_eq!(checksum, "a9993e364706816aba3e25717850c26c9cd0d89d");
        assert_eq!(checksum.len(), CHECKSUM_HEX_LEN);

        // Same content, same digest
        let again = compute_file_checksum(tmp.path())?;
        assert_eq!(checksum, again);
        assert_eq!(checksum, compute_bytes_checksum(b"abc"));
        Ok(())
    }

    #[test]
    fn test_checksum_spans_multiple_chunks() -> anyhow::Result<()> {
        let data: Vec<u8> = (0..(READ_CHUNK * 2 + 17)).map(|i| (i % 251) as u8).collect();
        let mut tmp = NamedTempFile::new()?;
        tmp.write_all(&data)?;
        tmp.flush()?;

        assert_eq!(compute_file_checksum(tmp.path())?, compute_bytes_checksum(&data));
        Ok(())
    }

    #[test]
    fn test_checksum_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = compute_file_checksum(&dir.path().join("nope.bin")).unwrap_err();
        assert!(matches!(err, SyncError::Io { .. }));
    }

    #[test]
    fn test_checksums_match_ignores_case() {
        assert!(checksums_match(
            "A9993E364706816ABA3E25717850C26C9CD0D89D",
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        ));
        assert!(!checksums_match(
            "a9993e364706816aba3e25717850c26c9cd0d89d",
            "da39a3ee5e6b4b0d3255bfef95601890afd80709"
        ));
    }

    #[test]
    fn test_verify_checksum() -> anyhow::Result<()> {
        let mut tmp = NamedTempFile::new()?;
        tmp.write_all(b"Test content for hashing")?;
        tmp.flush()?;

        let checksum = compute_file_checksum(tmp.path())?;
        assert!(verify_file_checksum(tmp.path(), &checksum.to_uppercase())?);
        assert!(!verify_file_checksum(tmp.path(), &"0".repeat(40))?);
        Ok(())
    }

    #[test]
    fn test_is_valid_checksum() {
        assert!(is_valid_checksum("A9993E364706816ABA3E25717850C26C9CD0D89D"));
        assert!(!is_valid_checksum("a9993e"));
        assert!(!is_valid_checksum(&"g".repeat(40)));
    }
}
