//! Parallel tree scanning with content hashing
//!
//! A [`TreeScanner`] walks one directory tree and hashes every eligible file.
//! The walk itself is sequential; each file found becomes a hashing unit
//! spawned onto a bounded rayon pool. Units stream their [`ContentRecord`]
//! back over a channel while the caller drains it, and the channel closes once
//! the walker and every unit have dropped their sender.
//!
//! The result is all-or-nothing: a walk error or cancellation returns an error
//! and the records hashed so far are discarded. Per-file read failures are not
//! walk errors; they travel inside the record.

use crate::error::{MirrorError, Result};
use crate::filter::{is_hidden_name, ExtensionFilter};
use crate::types::ContentRecord;
use crate::utils::{format_elapsed, hash_file_content};
use rayon::ThreadPool;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

/// Callback invoked by the draining thread with the number of records so far
pub type ProgressFn = Arc<dyn Fn(usize) + Send + Sync>;

/// Build the hashing pool shared by the scans of one pass
pub fn build_pool(threads: usize) -> Result<Arc<ThreadPool>> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads.max(1))
        .thread_name(|i| format!("scan-{}", i))
        .build()?;
    Ok(Arc::new(pool))
}

/// Walks and hashes one directory tree
#[derive(Clone)]
pub struct TreeScanner {
    root: PathBuf,
    filter: ExtensionFilter,
    prune_hidden: bool,
    pool: Arc<ThreadPool>,
    progress: Option<ProgressFn>,
}

impl std::fmt::Debug for TreeScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeScanner")
            .field("root", &self.root)
            .field("prune_hidden", &self.prune_hidden)
            .field("threads", &self.pool.current_num_threads())
            .finish()
    }
}

impl TreeScanner {
    /// Scanner over `root`, hashing on `pool`
    pub fn new(root: impl Into<PathBuf>, filter: ExtensionFilter, pool: Arc<ThreadPool>) -> Self {
        Self {
            root: root.into(),
            filter,
            prune_hidden: false,
            pool,
            progress: None,
        }
    }

    /// Skip directories whose name starts with `.` below the root
    pub fn prune_hidden(mut self, prune: bool) -> Self {
        self.prune_hidden = prune;
        self
    }

    /// Report the running record count while draining
    pub fn with_progress(mut self, progress: Option<ProgressFn>) -> Self {
        self.progress = progress;
        self
    }

    /// Root being scanned
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Walk the tree and hash every eligible regular file
    ///
    /// # Errors
    ///
    /// - [`MirrorError::Cancelled`] if `cancel` fires before the last record
    ///   is drained
    /// - [`MirrorError::WalkDir`] if a directory cannot be read
    pub fn collect(&self, cancel: &CancellationToken) -> Result<Vec<ContentRecord>> {
        let start = Instant::now();
        let (tx, rx) = async_channel::bounded(self.pool.current_num_threads() * 4);

        let records = std::thread::scope(|threads| {
            let walker = threads.spawn(move || self.walk(tx, cancel));

            let mut records = Vec::new();
            while let Ok(record) = rx.recv_blocking() {
                records.push(record);
                if let Some(progress) = &self.progress {
                    progress(records.len());
                }
            }

            walker
                .join()
                .map_err(|_| MirrorError::internal("scan walker panicked"))??;
            // The walk may have ended before the token fired
            if cancel.is_cancelled() {
                return Err(MirrorError::Cancelled);
            }
            Ok::<_, MirrorError>(records)
        })?;

        debug!(
            root = %self.root.display(),
            files = records.len(),
            duration = %format_elapsed(start.elapsed()),
            "scan finished"
        );
        Ok(records)
    }

    /// Walk on the current thread, spawning one hashing unit per file
    fn walk(&self, tx: async_channel::Sender<ContentRecord>, cancel: &CancellationToken) -> Result<()> {
        let prune_hidden = self.prune_hidden;
        let entries = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(move |entry| !(prune_hidden && is_hidden_dir(entry)));

        self.pool.scope(|scope| {
            for entry in entries {
                if cancel.is_cancelled() {
                    return Err(MirrorError::Cancelled);
                }
                let entry = entry.map_err(|e| {
                    warn!("Walk error in {}: {}", self.root.display(), e);
                    MirrorError::from(e)
                })?;

                if !entry.file_type().is_file() || !self.filter.accepts(entry.path()) {
                    continue;
                }

                let tx = tx.clone();
                let path = entry.into_path();
                scope.spawn(move |_| {
                    let content_hash = hash_file_content(&path);
                    if let Err(e) = &content_hash {
                        debug!("Hashing {} failed: {}", path.display(), e);
                    }
                    // Receiver only disappears when the caller is gone
                    let _ = tx.send_blocking(ContentRecord { path, content_hash });
                });
            }
            Ok(())
        })
    }
}

/// Directory below the root whose name starts with `.`
fn is_hidden_dir(entry: &DirEntry) -> bool {
    entry.depth() > 0 && entry.file_type().is_dir() && is_hidden_name(entry.file_name())
}
