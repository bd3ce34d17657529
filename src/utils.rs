//! Utility functions for watchmirror
//!
//! Small helpers shared by the scanner, the ingestor and the CLI:
//!
//! - File content hashing (SHA-256, hex encoded)
//! - Converting absolute paths to root-relative paths
//! - Human-readable byte and duration formatting
//!
//! All functions are thread-safe and can be called concurrently from the
//! hashing pool and the pipeline workers.

use crate::error::{MirrorError, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Number of bytes in one mebibyte, the unit of `max_file_size`
pub const MIB: u64 = 1024 * 1024;

/// Hash a file's content using SHA-256
///
/// Reads the whole file through an 8KB buffer and returns the digest as a
/// 64-character lowercase hexadecimal string.
///
/// # Errors
///
/// - [`MirrorError::Io`] if the file cannot be opened or read
///
/// # Example
///
/// ```rust,ignore
/// use crate::utils::hash_file_content;
/// use std::path::Path;
///
/// let hash = hash_file_content(Path::new("photo.jpg"))?;
/// assert_eq!(hash.len(), 64);
/// ```
pub fn hash_file_content(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 8192]; // 8KB buffer

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Hash arbitrary data using SHA-256
pub fn hash_data(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Make a path relative to a base path
///
/// Tries a lexical strip first so that symbolic links inside a watch root keep
/// their own path, and falls back to canonicalising both paths when the
/// lexical strip fails (for example because of `..` components).
///
/// # Errors
///
/// - [`MirrorError::OutsideWatchRoot`] if the path is not under the base path
/// - [`MirrorError::Io`] if canonicalization fails (fallback case only)
pub fn make_relative(path: &Path, base: &Path) -> Result<PathBuf> {
    if let Ok(relative) = path.strip_prefix(base) {
        return Ok(relative.to_path_buf());
    }

    let path_canon = path.canonicalize()?;
    let base_canon = base.canonicalize()?;

    path_canon
        .strip_prefix(&base_canon)
        .map(|p| p.to_path_buf())
        .map_err(|_| MirrorError::OutsideWatchRoot(path.to_path_buf()))
}

/// Format bytes in human-readable form using 1024-based units
///
/// ```rust,ignore
/// assert_eq!(format_bytes(1536), "1.50 KB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

/// Format a duration for log records, truncated to milliseconds
pub fn format_elapsed(elapsed: Duration) -> String {
    let millis = Duration::from_millis(elapsed.as_millis() as u64);
    humantime::format_duration(millis).to_string()
}
