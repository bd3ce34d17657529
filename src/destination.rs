//! Mapping source files to their place in the backup tree
//!
//! Every file lands at
//!
//! ```text
//! <backup base>/Backup Files/<watch root name>/<relative directories>/<file name>
//! ```
//!
//! Live events and reconciliation share this single mapping: both resolve a
//! [`PathContext`] (watch root index plus root-relative path) and hand it to
//! the [`DestinationBuilder`].

use crate::error::{MirrorError, Result};
use crate::types::PathContext;
use crate::utils;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::trace;

/// Arena of configured watch roots addressed by index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchRoots {
    roots: Vec<PathBuf>,
}

impl WatchRoots {
    /// Wrap the configured roots, keeping their order
    pub fn new(roots: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            roots: roots.into_iter().collect(),
        }
    }

    /// Root at `index`
    pub fn get(&self, index: usize) -> Option<&Path> {
        self.roots.get(index).map(PathBuf::as_path)
    }

    /// Number of roots
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    /// Whether no root is configured
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Iterate over `(index, root)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Path)> {
        self.roots.iter().map(PathBuf::as_path).enumerate()
    }

    /// Find the root containing `path`
    ///
    /// When roots are nested the deepest one wins. Returns `None` for the
    /// roots themselves and for paths outside every root.
    pub fn resolve(&self, path: &Path) -> Option<PathContext> {
        self.iter()
            .filter_map(|(root_index, root)| {
                let relative = path.strip_prefix(root).ok()?;
                if relative.as_os_str().is_empty() {
                    return None;
                }
                Some((root.components().count(), PathContext {
                    root_index,
                    relative: relative.to_path_buf(),
                }))
            })
            .max_by_key(|(depth, _)| *depth)
            .map(|(_, context)| context)
    }

    /// Context for a file known to live under root `root_index`
    pub fn context_for(&self, root_index: usize, path: &Path) -> Result<PathContext> {
        let root = self
            .get(root_index)
            .ok_or_else(|| MirrorError::OutsideWatchRoot(path.to_path_buf()))?;
        Ok(PathContext {
            root_index,
            relative: utils::make_relative(path, root)?,
        })
    }
}

/// Computes and creates destination folders under the backup root
#[derive(Debug, Clone)]
pub struct DestinationBuilder {
    backup_root: PathBuf,
    roots: WatchRoots,
}

impl DestinationBuilder {
    /// Create a builder for `backup_root` (`<base>/Backup Files`)
    pub fn new(backup_root: PathBuf, roots: WatchRoots) -> Self {
        Self { backup_root, roots }
    }

    /// Root of the mirrored tree
    pub fn backup_root(&self) -> &Path {
        &self.backup_root
    }

    /// Watch roots the builder maps from
    pub fn roots(&self) -> &WatchRoots {
        &self.roots
    }

    /// Create the backup root if it does not exist yet
    pub fn ensure_backup_root(&self) -> Result<()> {
        fs::create_dir_all(&self.backup_root).map_err(|source| MirrorError::CreateFolder {
            path: self.backup_root.clone(),
            source,
        })
    }

    /// Destination directory for a file, without touching the filesystem
    pub fn destination_dir(&self, context: &PathContext) -> Result<PathBuf> {
        let root_name = self
            .roots
            .get(context.root_index)
            .and_then(Path::file_name)
            .ok_or_else(|| MirrorError::OutsideWatchRoot(context.relative.clone()))?;

        Ok(self.backup_root.join(root_name).join(context.relative_dir()))
    }

    /// Full destination path for a file, without touching the filesystem
    pub fn destination_path(&self, context: &PathContext) -> Result<PathBuf> {
        let file_name = context
            .relative
            .file_name()
            .ok_or_else(|| MirrorError::internal(format!("{:?} has no file name", context.relative)))?;
        Ok(self.destination_dir(context)?.join(file_name))
    }

    /// Create the destination directory tree and return the file path
    ///
    /// # Errors
    ///
    /// - [`MirrorError::CreateFolder`] when the directories cannot be created
    ///   (permission denied, disk full); the caller abandons the file
    pub fn prepare(&self, context: &PathContext) -> Result<PathBuf> {
        let destination = self.destination_path(context)?;
        if let Some(dir) = destination.parent() {
            fs::create_dir_all(dir).map_err(|source| MirrorError::CreateFolder {
                path: dir.to_path_buf(),
                source,
            })?;
            trace!("Prepared destination folder {}", dir.display());
        }
        Ok(destination)
    }
}
