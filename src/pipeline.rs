//! Live event pipeline
//!
//! A fixed pool of worker tasks shares one bounded MPMC channel of
//! [`LiveEvent`]s fed by the [`crate::watcher::FsWatcher`]. Each worker takes
//! an event, turns it into an [`IngestRequest`] (or drops it) and runs the
//! ingestion on the blocking pool, awaiting it before taking the next event.
//!
//! Workers share nothing but the channel and the immutable ingestor. There is
//! no ordering between workers and no deduplication: two events for the same
//! file are ingested twice and the last rename over the destination wins.

use crate::filter::{strip_temp_marker, ExtensionFilter};
use crate::ingest::Ingestor;
use crate::types::{EventOp, IngestRequest, LiveEvent};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

/// Counters shared by the workers of one pipeline
#[derive(Debug, Default)]
pub struct PipelineStats {
    received: AtomicUsize,
    ignored: AtomicUsize,
    ingested: AtomicUsize,
    failed: AtomicUsize,
}

impl PipelineStats {
    /// Events taken from the channel
    pub fn received(&self) -> usize {
        self.received.load(Ordering::Relaxed)
    }

    /// Events dropped before ingestion
    pub fn ignored(&self) -> usize {
        self.ignored.load(Ordering::Relaxed)
    }

    /// Successful ingestions
    pub fn ingested(&self) -> usize {
        self.ingested.load(Ordering::Relaxed)
    }

    /// Failed ingestions
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Turns live events into ingestions
#[derive(Debug, Clone)]
pub struct EventPipeline {
    ingestor: Arc<Ingestor>,
}

impl EventPipeline {
    /// Create a pipeline feeding `ingestor`
    pub fn new(ingestor: Arc<Ingestor>) -> Self {
        Self { ingestor }
    }

    /// Decide what to do with one event
    ///
    /// Returns `None` for operations other than create/write, for paths the
    /// filter rejects, for paths outside every watch root and for paths below
    /// a hidden directory. A trailing `~` is stripped first, so the settled
    /// file name is ingested.
    pub fn prepare(&self, event: &LiveEvent) -> Option<IngestRequest> {
        if event.op == EventOp::Other {
            return None;
        }

        let path = strip_temp_marker(&event.path);
        let filter = self.ingestor.filter();
        if !filter.accepts(&path) {
            trace!("ignoring {}", path.display());
            return None;
        }

        let Some(context) = self.ingestor.destinations().roots().resolve(&path) else {
            debug!("{} is outside every watch root", path.display());
            return None;
        };
        if ExtensionFilter::is_hidden_relative(&context.relative) {
            trace!("ignoring {} in hidden directory", path.display());
            return None;
        }

        Some(IngestRequest {
            kind: filter.classify(&path),
            context,
            source: path,
        })
    }

    /// Start `workers` tasks draining `rx` until it closes or `cancel` fires
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        &self,
        workers: usize,
        rx: async_channel::Receiver<LiveEvent>,
        cancel: CancellationToken,
    ) -> PipelineHandle {
        let stats = Arc::new(PipelineStats::default());
        let workers = (0..workers.max(1))
            .map(|id| {
                let pipeline = self.clone();
                let rx = rx.clone();
                let cancel = cancel.clone();
                let stats = stats.clone();
                tokio::spawn(async move { pipeline.work(id, rx, cancel, stats).await })
            })
            .collect();
        info!("Started event pipeline");

        PipelineHandle { workers, stats }
    }

    async fn work(
        self,
        id: usize,
        rx: async_channel::Receiver<LiveEvent>,
        cancel: CancellationToken,
        stats: Arc<PipelineStats>,
    ) {
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = rx.recv() => match event {
                    Ok(event) => event,
                    Err(_) => break,
                },
            };
            stats.received.fetch_add(1, Ordering::Relaxed);

            let Some(request) = self.prepare(&event) else {
                stats.ignored.fetch_add(1, Ordering::Relaxed);
                continue;
            };

            let ingestor = self.ingestor.clone();
            match tokio::task::spawn_blocking(move || ingestor.ingest(&request)).await {
                Ok(Ok(_)) => {
                    stats.ingested.fetch_add(1, Ordering::Relaxed);
                }
                // Logged by the ingestor
                Ok(Err(_)) => {
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                    error!(worker = id, "ingestion task failed: {}", e);
                }
            }
        }
        debug!(worker = id, "event worker stopped");
    }
}

/// Running pipeline workers
#[derive(Debug)]
pub struct PipelineHandle {
    workers: Vec<JoinHandle<()>>,
    stats: Arc<PipelineStats>,
}

impl PipelineHandle {
    /// Counters of this pipeline
    pub fn stats(&self) -> Arc<PipelineStats> {
        self.stats.clone()
    }

    /// Number of worker tasks
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Wait for every worker to exit
    pub async fn join(self) {
        for worker in self.workers {
            if let Err(e) = worker.await {
                error!("event worker panicked: {}", e);
            }
        }
    }
}
