//! Periodic reconciliation of watch roots against the backup tree
//!
//! A pass over one watch root:
//!
//! 1. hashes the whole backup tree into a pass-local index (hash → path);
//! 2. hashes the watch root, pruning hidden directories;
//! 3. walks the source records in path order and ingests every file whose
//!    content is not in the index and whose file name differs from every
//!    path the index anchors.
//!
//! Both scans finish before the diff starts. The name check catches images
//! whose backup copy was re-encoded and therefore no longer hashes like the
//! source. It also hides distinct files that share a name across folders; that
//! trade-off is kept as is.
//!
//! The index is updated after every successful ingestion, so two source files
//! with the same content or the same name yield a single ingestion per pass.

use crate::config::Config;
use crate::destination::WatchRoots;
use crate::error::{MirrorError, Result};
use crate::filter::ExtensionFilter;
use crate::image_tool::ImageTool;
use crate::ingest::Ingestor;
use crate::scan::{build_pool, ProgressFn, TreeScanner};
use crate::types::{ContentRecord, IngestRequest, PassReport};
use crate::utils::format_elapsed;
use rayon::ThreadPool;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span};

/// Pass-local view of the backup tree
///
/// The first path recorded for a hash anchors it. `names` holds the file
/// names of the anchored paths and nothing else.
#[derive(Debug, Default)]
struct BackupIndex {
    by_hash: HashMap<String, PathBuf>,
    names: HashSet<OsString>,
}

impl BackupIndex {
    fn insert(&mut self, hash: String, path: PathBuf) {
        if let Entry::Vacant(slot) = self.by_hash.entry(hash) {
            if let Some(name) = ExtensionFilter::basename(&path) {
                self.names.insert(name);
            }
            slot.insert(path);
        }
    }

    fn contains_hash(&self, hash: &str) -> bool {
        self.by_hash.contains_key(hash)
    }

    fn contains_name(&self, path: &Path) -> bool {
        ExtensionFilter::basename(path).is_some_and(|name| self.names.contains(&name))
    }
}

/// Runs reconciliation passes against one configuration snapshot
pub struct Reconciler {
    config: Arc<Config>,
    ingestor: Ingestor,
    pool: Arc<ThreadPool>,
    progress: Option<ProgressFn>,
}

impl Reconciler {
    /// Build a reconciler for `config`
    ///
    /// # Errors
    ///
    /// Fails if the prefix patterns are invalid or the hashing pool cannot be
    /// created.
    pub fn new(config: Arc<Config>, image_tool: Arc<dyn ImageTool>) -> Result<Self> {
        let ingestor = Ingestor::from_config(&config, image_tool)?;
        let pool = build_pool(config.scan_workers())?;
        Ok(Self {
            config,
            ingestor,
            pool,
            progress: None,
        })
    }

    /// Report scan progress (records hashed so far in the current tree)
    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Configuration snapshot used by every pass of this reconciler
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Watch roots reconciled by [`Reconciler::reconcile_all`]
    pub fn roots(&self) -> &WatchRoots {
        self.ingestor.destinations().roots()
    }

    fn scanner(&self, root: &Path) -> TreeScanner {
        TreeScanner::new(root, self.ingestor.filter().clone(), self.pool.clone())
            .with_progress(self.progress.clone())
    }

    /// Reconcile the watch root at `index`
    ///
    /// # Errors
    ///
    /// - [`MirrorError::CreateFolder`] if the backup root cannot be created
    /// - [`MirrorError::WalkDir`] if either tree cannot be walked
    /// - [`MirrorError::Cancelled`] on shutdown
    ///
    /// Per-file failures are counted in the report, never returned.
    pub fn reconcile_root(&self, index: usize, cancel: &CancellationToken) -> Result<PassReport> {
        let root = self
            .roots()
            .get(index)
            .ok_or_else(|| MirrorError::internal(format!("no watch root at index {}", index)))?
            .to_path_buf();
        let mut report = PassReport::new(root.clone());
        let span = info_span!("reconcile", pass_id = %report.pass_id, root = %root.display());
        let _enter = span.enter();
        let start = Instant::now();

        let destinations = self.ingestor.destinations();
        destinations.ensure_backup_root()?;

        let mut backup_records = self.scanner(destinations.backup_root()).collect(cancel)?;
        backup_records.sort_by(|a, b| a.path.cmp(&b.path));
        report.backup_files = backup_records.len();
        let mut backup_index = BackupIndex::default();
        for record in backup_records {
            match record.content_hash {
                Ok(hash) => backup_index.insert(hash, record.path),
                Err(e) => {
                    report.hash_errors += 1;
                    error!("hashing backup file {}: {}", record.path.display(), e);
                }
            }
        }

        let mut source_records = self.scanner(&root).prune_hidden(true).collect(cancel)?;
        source_records.sort_by(|a, b| a.path.cmp(&b.path));
        report.source_files = source_records.len();

        for record in source_records {
            if cancel.is_cancelled() {
                return Err(MirrorError::Cancelled);
            }
            self.reconcile_file(index, record, &mut backup_index, &mut report);
        }

        report.duration = start.elapsed();
        info!(
            ingested = report.ingested,
            skipped = report.skipped(),
            failed = report.failed,
            duration = %format_elapsed(report.duration),
            "sync of {} done",
            root.display()
        );
        Ok(report)
    }

    fn reconcile_file(
        &self,
        index: usize,
        record: ContentRecord,
        backup_index: &mut BackupIndex,
        report: &mut PassReport,
    ) {
        let hash = match record.content_hash {
            Ok(hash) => hash,
            Err(e) => {
                report.hash_errors += 1;
                error!("hashing {}: {}", record.path.display(), e);
                return;
            }
        };

        if backup_index.contains_hash(&hash) {
            report.skipped_by_hash += 1;
            debug!("{} already backed up", record.path.display());
            return;
        }
        if backup_index.contains_name(&record.path) {
            report.skipped_by_name += 1;
            debug!("{} has a namesake in the backup", record.path.display());
            return;
        }

        let context = match self.roots().context_for(index, &record.path) {
            Ok(context) => context,
            Err(e) => {
                report.failed += 1;
                error!("{}", e);
                return;
            }
        };
        let request = IngestRequest {
            kind: self.ingestor.filter().classify(&record.path),
            context,
            source: record.path,
        };

        // Failures are logged by the ingestor
        match self.ingestor.ingest(&request) {
            Ok(outcome) => {
                report.ingested += 1;
                backup_index.insert(hash, outcome.destination().to_path_buf());
            }
            Err(_) => report.failed += 1,
        }
    }

    /// Reconcile every watch root in configuration order
    ///
    /// A failed pass is logged and does not affect the other roots.
    /// Cancellation stops the loop; the cancelled pass is the last entry.
    pub fn reconcile_all(&self, cancel: &CancellationToken) -> Vec<(PathBuf, Result<PassReport>)> {
        let mut results = Vec::with_capacity(self.roots().len());
        for (index, root) in self.roots().iter() {
            if cancel.is_cancelled() {
                break;
            }
            let result = self.reconcile_root(index, cancel);
            let stop = match &result {
                Err(e) if e.is_cancelled() => {
                    info!("sync of {} cancelled", root.display());
                    true
                }
                Err(e) => {
                    error!("sync of {} failed: {}", root.display(), e);
                    false
                }
                Ok(_) => false,
            };
            results.push((root.to_path_buf(), result));
            if stop {
                break;
            }
        }
        results
    }
}
