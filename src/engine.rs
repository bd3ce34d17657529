//! Engine lifecycle: watcher, initial pass, workers, janitor
//!
//! One engine run owns a child of the process shutdown token, the bounded
//! event channel, the watch subscriptions, the pipeline workers and the
//! janitor task. Stopping cancels the child token and closes the channel, so
//! restarting after a configuration change re-acquires everything from the
//! new snapshot without touching the process-wide shutdown.
//!
//! Startup order:
//!
//! 1. ensure the backup root exists;
//! 2. subscribe the watch roots (events queue up in the bounded channel);
//! 3. run one reconciliation pass to completion;
//! 4. start the pipeline workers;
//! 5. start the janitor, scheduled from the duration of step 3.

use crate::config::{ConfigHandle, ConfigWatcher};
use crate::error::Result;
use crate::image_tool::ImageTool;
use crate::ingest::Ingestor;
use crate::janitor::Janitor;
use crate::pipeline::{EventPipeline, PipelineHandle, PipelineStats};
use crate::types::LiveEvent;
use crate::watcher::FsWatcher;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Quiet period letting an editor finish writing the configuration file
const RELOAD_SETTLE: Duration = Duration::from_millis(200);

/// Resources of one engine run
struct RunningEngine {
    cancel: CancellationToken,
    events: async_channel::Sender<LiveEvent>,
    watcher: FsWatcher,
    pipeline: PipelineHandle,
    janitor: Arc<Janitor>,
    janitor_task: JoinHandle<()>,
}

/// Continuous backup engine
pub struct Engine {
    config: ConfigHandle,
    image_tool: Arc<dyn ImageTool>,
    shutdown: CancellationToken,
    running: Option<RunningEngine>,
}

impl Engine {
    /// Create a stopped engine
    ///
    /// Cancelling `shutdown` stops every run of this engine.
    pub fn new(config: ConfigHandle, image_tool: Arc<dyn ImageTool>, shutdown: CancellationToken) -> Self {
        Self {
            config,
            image_tool,
            shutdown,
            running: None,
        }
    }

    /// Shared configuration handle
    pub fn config(&self) -> &ConfigHandle {
        &self.config
    }

    /// Whether a run is active
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Counters of the live pipeline of the current run
    pub fn pipeline_stats(&self) -> Option<Arc<PipelineStats>> {
        self.running.as_ref().map(|r| r.pipeline.stats())
    }

    /// Completed janitor passes in the current run, the startup pass included
    pub fn completed_passes(&self) -> Option<usize> {
        self.running.as_ref().map(|r| r.janitor.completed_passes())
    }

    /// Start a run from the current configuration snapshot
    ///
    /// # Errors
    ///
    /// - [`crate::MirrorError::CreateFolder`] if the backup root cannot be created
    /// - [`crate::MirrorError::Watch`] if a watch root cannot be subscribed
    pub async fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            debug!("Engine already running");
            return Ok(());
        }

        let snapshot = self.config.snapshot();
        let cancel = self.shutdown.child_token();
        let ingestor = Arc::new(Ingestor::from_config(&snapshot, self.image_tool.clone())?);
        ingestor.destinations().ensure_backup_root()?;

        let (tx, rx) = async_channel::bounded(snapshot.general.event_buffer);
        let watcher = FsWatcher::start(&snapshot.file_system.paths, tx.clone())?;

        let janitor = Arc::new(Janitor::new(self.config.clone(), self.image_tool.clone()));
        let first_elapsed = match janitor.run_pass(&cancel).await {
            Ok(elapsed) => elapsed,
            Err(e) => {
                error!("initial sync failed: {}", e);
                Duration::ZERO
            }
        };

        let pipeline = EventPipeline::new(ingestor).spawn(snapshot.general.worker, rx, cancel.clone());
        let janitor_task = janitor.clone().spawn(first_elapsed, cancel.clone());

        info!(
            roots = snapshot.file_system.paths.len(),
            workers = pipeline.worker_count(),
            backup = %snapshot.backup_root().display(),
            "watchmirror started"
        );
        self.running = Some(RunningEngine {
            cancel,
            events: tx,
            watcher,
            pipeline,
            janitor,
            janitor_task,
        });
        Ok(())
    }

    /// Stop the current run and wait for in-flight work to finish
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        running.cancel.cancel();
        running.events.close();
        if let Err(e) = running.watcher.stop() {
            error!("stopping watcher: {}", e);
        }
        running.pipeline.join().await;
        if let Err(e) = running.janitor_task.await {
            error!("janitor task failed: {}", e);
        }
        info!("watchmirror stopped");
    }

    /// Stop and start again from the current snapshot
    pub async fn restart(&mut self) -> Result<()> {
        self.stop().await;
        self.start().await
    }

    /// Apply a configuration file change
    ///
    /// An unreadable or invalid file is logged and the current snapshot stays.
    /// Only a failed restart is returned.
    pub async fn reload(&mut self, path: &Path) -> Result<()> {
        let previous = match self.config.reload(path) {
            Ok(previous) => previous,
            Err(e) => {
                error!("Config file re-load failed, keeping current configuration: {}", e);
                return Ok(());
            }
        };

        if previous.requires_restart(&self.config.snapshot()) {
            info!("Restarting engine for the new configuration");
            self.restart().await?;
        }
        Ok(())
    }

    /// Start, then serve until shutdown, reloading on configuration changes
    ///
    /// # Errors
    ///
    /// Returns startup errors and errors restarting after a reload.
    pub async fn run(mut self, config_path: Option<&Path>) -> Result<()> {
        self.start().await?;

        let (reload_tx, reload_rx) = async_channel::bounded(1);
        let _config_watcher = match config_path {
            Some(path) => match ConfigWatcher::start(path, reload_tx) {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    error!("cannot watch {}: {}", path.display(), e);
                    None
                }
            },
            None => None,
        };

        let shutdown = self.shutdown.clone();
        let result = loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break Ok(()),
                signal = reload_rx.recv() => {
                    let Some(path) = config_path.filter(|_| signal.is_ok()) else {
                        // No config watcher: only shutdown remains
                        shutdown.cancelled().await;
                        break Ok(());
                    };
                    tokio::time::sleep(RELOAD_SETTLE).await;
                    while reload_rx.try_recv().is_ok() {}
                    if let Err(e) = self.reload(path).await {
                        break Err(e);
                    }
                }
            }
        };

        self.stop().await;
        result
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            running.cancel.cancel();
            running.events.close();
        }
    }
}
