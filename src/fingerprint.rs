//! File fingerprints for change detection
//!
//! Two tiers:
//! 1. Short fingerprint: blake3 over at most the first 2 GiB (routine dedupe)
//! 2. Full fingerprint: blake3 over the whole file (scheme migration only)
//!
//! Files larger than the cap whose first 2 GiB are identical share a short
//! fingerprint.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use blake3::Hasher;
use memmap2::MmapOptions;

use crate::error::FileError;

/// Upper bound on the bytes hashed for a short fingerprint
pub const SHORT_FINGERPRINT_CAP: u64 = 2 * 1024 * 1024 * 1024;

/// Version of the short fingerprint algorithm written to the ledger.
///
/// Scheme 1 rows predate the `scheme` column and are only reachable through
/// the file-name bridge.
pub const FINGERPRINT_SCHEME: i64 = 2;

const BLOCK_SIZE: usize = 8 * 1024 * 1024; // 8MB
const MEMMAP_THRESHOLD: u64 = 10 * 1024 * 1024; // 10MB

/// Bounded-prefix hash of a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShortFingerprint {
    pub digest: String,
    /// Bytes that went into the digest
    pub bytes_hashed: u64,
    /// True when the whole file fit under the cap
    pub complete: bool,
}

impl ShortFingerprint {
    /// The full fingerprint, if the short one already covers the whole file
    pub fn as_full(&self) -> Option<&str> {
        self.complete.then_some(self.digest.as_str())
    }
}

/// Compute the short fingerprint of `path`
pub fn short_fingerprint(path: &Path) -> Result<ShortFingerprint, FileError> {
    short_fingerprint_capped(path, SHORT_FINGERPRINT_CAP)
}

pub(crate) fn short_fingerprint_capped(
    path: &Path,
    cap: u64,
) -> Result<ShortFingerprint, FileError> {
    let io_err = |e: io::Error| FileError::io(path, e);
    let file = File::open(path).map_err(io_err)?;
    let mut reader = BufReader::with_capacity(BLOCK_SIZE, file);
    let mut hasher = Hasher::new();
    let mut buffer = vec![0u8; BLOCK_SIZE];
    let mut bytes_hashed = 0u64;

    while bytes_hashed < cap {
        let want = (cap - bytes_hashed).min(BLOCK_SIZE as u64) as usize;
        let bytes_read = read_block(&mut reader, &mut buffer[..want]).map_err(io_err)?;
        if bytes_read == 0 {
            return Ok(ShortFingerprint {
                digest: hasher.finalize().to_hex().to_string(),
                bytes_hashed,
                complete: true,
            });
        }
        hasher.update(&buffer[..bytes_read]);
        bytes_hashed += bytes_read as u64;
    }

    // Hit the cap exactly; the file is complete only if nothing follows.
    let mut next = [0u8; 1];
    let complete = read_block(&mut reader, &mut next).map_err(io_err)? == 0;

    Ok(ShortFingerprint {
        digest: hasher.finalize().to_hex().to_string(),
        bytes_hashed,
        complete,
    })
}

/// Compute the blake3 hash of the whole file
///
/// Uses memory mapping for large files
pub fn full_fingerprint(path: &Path) -> Result<String, FileError> {
    let io_err = |e: io::Error| FileError::io(path, e);
    let file = File::open(path).map_err(io_err)?;
    let file_size = file.metadata().map_err(io_err)?.len();

    let mut hasher = Hasher::new();

    if file_size >= MEMMAP_THRESHOLD {
        // Safety: the mapping is read-only and dropped before returning
        let mmap = unsafe { MmapOptions::new().map(&file) }.map_err(io_err)?;
        hasher.update(&mmap[..]);
        return Ok(hasher.finalize().to_hex().to_string());
    }

    let mut reader = BufReader::with_capacity(BLOCK_SIZE, file);
    let mut buffer = vec![0u8; BLOCK_SIZE];
    loop {
        let bytes_read = read_block(&mut reader, &mut buffer).map_err(io_err)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher.finalize().to_hex().to_string())
}

fn read_block(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match reader.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_short_matches_full_for_small_file() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("clip.mp4");
        fs::write(&file_path, b"not really a video").unwrap();

        let short = short_fingerprint(&file_path).unwrap();
        let full = full_fingerprint(&file_path).unwrap();

        assert!(short.complete);
        assert_eq!(short.bytes_hashed, 18);
        assert_eq!(short.as_full(), Some(full.as_str()));
    }

    #[test]
    fn test_cap_limits_hashed_bytes() {
        let temp_dir = TempDir::new().unwrap();
        let a = temp_dir.path().join("a.mkv");
        let b = temp_dir.path().join("b.mkv");
        fs::write(&a, b"same-prefix-AAAA").unwrap();
        fs::write(&b, b"same-prefix-BBBB").unwrap();

        let short_a = short_fingerprint_capped(&a, 11).unwrap();
        let short_b = short_fingerprint_capped(&b, 11).unwrap();

        assert_eq!(short_a.digest, short_b.digest);
        assert_eq!(short_a.bytes_hashed, 11);
        assert!(!short_a.complete);
        assert!(short_a.as_full().is_none());
        assert_ne!(full_fingerprint(&a).unwrap(), full_fingerprint(&b).unwrap());
    }

    #[test]
    fn test_file_exactly_at_cap_is_complete() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("exact.mov");
        fs::write(&file_path, b"12345678").unwrap();

        let short = short_fingerprint_capped(&file_path, 8).unwrap();
        assert!(short.complete);
        assert_eq!(short.digest, full_fingerprint(&file_path).unwrap());
    }

    #[test]
    fn test_content_change_changes_fingerprint() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("movie.mp4");
        fs::write(&file_path, b"original bytes").unwrap();
        let before = short_fingerprint(&file_path).unwrap();

        fs::write(&file_path, b"original").unwrap();
        let after = short_fingerprint(&file_path).unwrap();

        assert_ne!(before.digest, after.digest);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let temp_dir = TempDir::new().unwrap();
        let err = short_fingerprint(&temp_dir.path().join("gone.avi")).unwrap_err();
        assert!(matches!(err, FileError::Io { .. }));
    }
}
