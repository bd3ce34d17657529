//! Error types for watchmirror
//!
//! This module defines every error that can occur while mirroring files into
//! the backup tree. Errors fall into four classes:
//!
//! 1. **Startup** errors (configuration, notification subscription) are fatal.
//! 2. **Per-file** errors (size limit, not a regular file, folder creation,
//!    image tool failures) are logged and the file is skipped.
//! 3. **Per-pass** errors (tree walk failures, cancellation mid-walk) abort the
//!    reconciliation pass of a single watch root.
//! 4. **Shutdown** is reported as [`MirrorError::Cancelled`] and is not a failure.

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the watchmirror library
pub type Result<T> = std::result::Result<T, MirrorError>;

/// Main error type for all watchmirror operations
#[derive(Debug, Error)]
pub enum MirrorError {
    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors during JSON serialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Errors while parsing the YAML configuration
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Invalid filter pattern
    #[error("Invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// Invalid or unreadable configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Walk directory error from walkdir crate
    #[error("Walk directory error: {0}")]
    WalkDir(#[from] walkdir::Error),

    /// File system notification error
    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    /// File too large for configured limits
    #[error("size limits on the file {path:?} of maximum ({size} bytes, limit {limit} bytes)")]
    FileTooLarge {
        /// Path to the file
        path: PathBuf,
        /// Actual file size
        size: u64,
        /// Configured size limit
        limit: u64,
    },

    /// Source is not a regular file
    #[error("{0:?} is not a regular file")]
    NotRegularFile(PathBuf),

    /// Destination folder could not be created
    #[error("creating folder {path:?}: {source}")]
    CreateFolder {
        /// Folder that could not be created
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// External image tool exited with an error
    #[error("Image tool error: {0}")]
    ImageTool(String),

    /// External image tool is not installed
    #[error("Image tool not found: {0}")]
    ToolNotFound(String),

    /// Path does not belong to any configured watch root
    #[error("Path {0:?} is outside every watch root")]
    OutsideWatchRoot(PathBuf),

    /// Thread pool error
    #[error("Thread pool error: {0}")]
    ThreadPool(String),

    /// Operation was cancelled by shutdown
    #[error("walk canceled")]
    Cancelled,

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<rayon::ThreadPoolBuildError> for MirrorError {
    fn from(err: rayon::ThreadPoolBuildError) -> Self {
        MirrorError::ThreadPool(err.to_string())
    }
}

impl MirrorError {
    /// Create a configuration error with a custom message
    pub fn config(msg: impl Into<String>) -> Self {
        MirrorError::Config(msg.into())
    }

    /// Create an image tool error with a custom message
    pub fn image_tool(msg: impl Into<String>) -> Self {
        MirrorError::ImageTool(msg.into())
    }

    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        MirrorError::Internal(msg.into())
    }

    /// Check if this error only concerns a single file
    ///
    /// Per-file errors never abort a reconciliation pass or the process.
    pub fn is_per_file(&self) -> bool {
        matches!(
            self,
            MirrorError::Io(_)
                | MirrorError::FileTooLarge { .. }
                | MirrorError::NotRegularFile(_)
                | MirrorError::CreateFolder { .. }
                | MirrorError::ImageTool(_)
                | MirrorError::ToolNotFound(_)
                | MirrorError::OutsideWatchRoot(_)
        )
    }

    /// Check if this error was caused by cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, MirrorError::Cancelled)
    }
}
