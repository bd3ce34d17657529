//! Core data types used throughout watchmirror
//!
//! ## Overview
//!
//! - **Paths**: [`PathContext`] locates a file relative to its watch root
//! - **Ingestion**: [`IngestKind`], [`IngestRequest`], [`IngestOutcome`]
//! - **Live events**: [`EventOp`], [`LiveEvent`]
//! - **Reconciliation**: [`ContentRecord`], [`PassReport`]

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

/// Position of a file relative to its watch root
///
/// Stores the root's index in the configured list and the relative path
/// components instead of slicing absolute path strings, so the live pipeline
/// and reconciliation compute destinations the same way.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathContext {
    /// Index of the watch root in `file_system.paths`
    pub root_index: usize,
    /// Path of the file relative to the watch root, including the file name
    pub relative: PathBuf,
}

impl PathContext {
    /// Directory chain between the watch root and the file
    pub fn relative_dir(&self) -> &Path {
        self.relative.parent().unwrap_or_else(|| Path::new(""))
    }
}

/// Ingestion variant selected by extension classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestKind {
    /// Byte-exact copy with size limit
    Generic,
    /// Copy followed by optional re-encoding
    Image,
}

/// A single file to bring into the backup tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestRequest {
    /// Absolute path of the source file
    pub source: PathBuf,
    /// Where the file sits relative to its watch root
    pub context: PathContext,
    /// Generic or image ingestion
    pub kind: IngestKind,
}

/// Result of a successful ingestion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// File copied without re-encoding
    Copied {
        /// Destination file
        destination: PathBuf,
        /// Number of bytes copied
        bytes: u64,
    },
    /// Image copied; its quality was already at or below the target
    AlreadyCompressed {
        /// Destination file
        destination: PathBuf,
        /// Quality reported by the image tool
        quality: u32,
    },
    /// Image copied and re-encoded in place
    Compressed {
        /// Destination file
        destination: PathBuf,
        /// Size before re-encoding
        before: u64,
        /// Size after re-encoding
        after: u64,
    },
}

impl IngestOutcome {
    /// Destination file written by the ingestion
    pub fn destination(&self) -> &Path {
        match self {
            IngestOutcome::Copied { destination, .. }
            | IngestOutcome::AlreadyCompressed { destination, .. }
            | IngestOutcome::Compressed { destination, .. } => destination,
        }
    }
}

/// Kind of change reported by the notification source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventOp {
    /// File created (or renamed into place)
    Create,
    /// File content written
    Write,
    /// Any other operation; ignored by the pipeline
    Other,
}

/// Raw change notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveEvent {
    /// Absolute path reported by the OS
    pub path: PathBuf,
    /// Operation kind
    pub op: EventOp,
}

impl LiveEvent {
    /// Create a new event
    pub fn new(path: impl Into<PathBuf>, op: EventOp) -> Self {
        Self {
            path: path.into(),
            op,
        }
    }
}

/// Product of reading and hashing one file during a tree walk
#[derive(Debug)]
pub struct ContentRecord {
    /// Absolute path of the file
    pub path: PathBuf,
    /// Hex SHA-256 of the whole file, or the read error
    pub content_hash: Result<String>,
}

/// Statistics of one reconciliation pass over a watch root
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassReport {
    /// Unique id of the pass, also attached to its log records
    pub pass_id: Uuid,
    /// Watch root reconciled
    pub root: PathBuf,
    /// Wall-clock start
    pub started_at: DateTime<Utc>,
    /// Files hashed in the backup tree
    pub backup_files: usize,
    /// Files hashed in the watch root
    pub source_files: usize,
    /// Files skipped because their content is already backed up
    pub skipped_by_hash: usize,
    /// Files skipped because a backup entry has the same name
    pub skipped_by_name: usize,
    /// Files ingested
    pub ingested: usize,
    /// Files whose ingestion failed
    pub failed: usize,
    /// Files that could not be read or hashed
    pub hash_errors: usize,
    /// Time spent on the pass
    #[serde(with = "duration_millis")]
    pub duration: Duration,
}

impl PassReport {
    /// Empty report for a pass starting now
    pub fn new(root: PathBuf) -> Self {
        Self {
            pass_id: Uuid::new_v4(),
            root,
            started_at: Utc::now(),
            backup_files: 0,
            source_files: 0,
            skipped_by_hash: 0,
            skipped_by_name: 0,
            ingested: 0,
            failed: 0,
            hash_errors: 0,
            duration: Duration::ZERO,
        }
    }

    /// Files left alone because they are already represented
    pub fn skipped(&self) -> usize {
        self.skipped_by_hash + self.skipped_by_name
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
