//! Periodic reconciliation scheduler
//!
//! The janitor alternates between [`JanitorState::Idle`] and
//! [`JanitorState::Running`]. After a pass that took `elapsed`, the next one
//! starts at `now + elapsed + base`, so a slow pass pushes the schedule out
//! instead of stacking passes back to back. `base` is read from the current
//! configuration snapshot before every wait, which makes `sync_interval`
//! reloadable without a restart.

use crate::config::ConfigHandle;
use crate::error::{MirrorError, Result};
use crate::image_tool::ImageTool;
use crate::reconcile::Reconciler;
use crate::utils::format_elapsed;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Observable scheduler state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JanitorState {
    /// Waiting for the next deadline
    Idle,
    /// A reconciliation pass is in progress
    Running,
}

/// Start of the next pass
pub fn next_deadline(now: Instant, elapsed: Duration, base: Duration) -> Instant {
    now + elapsed + base
}

/// Runs reconciliation passes on a timer
#[derive(Debug)]
pub struct Janitor {
    config: ConfigHandle,
    image_tool: Arc<dyn ImageTool>,
    state: RwLock<JanitorState>,
    passes: AtomicUsize,
}

impl Janitor {
    /// Create an idle janitor
    pub fn new(config: ConfigHandle, image_tool: Arc<dyn ImageTool>) -> Self {
        Self {
            config,
            image_tool,
            state: RwLock::new(JanitorState::Idle),
            passes: AtomicUsize::new(0),
        }
    }

    /// Current state
    pub fn state(&self) -> JanitorState {
        *self.state.read()
    }

    /// Number of completed passes
    pub fn completed_passes(&self) -> usize {
        self.passes.load(Ordering::Relaxed)
    }

    /// Reconcile every watch root once and return the time it took
    ///
    /// Takes a fresh configuration snapshot, so a pass always sees the
    /// configuration current at its start.
    pub async fn run_pass(&self, cancel: &CancellationToken) -> Result<Duration> {
        *self.state.write() = JanitorState::Running;
        let start = Instant::now();
        let result = self.reconcile(cancel).await;
        *self.state.write() = JanitorState::Idle;
        result?;

        self.passes.fetch_add(1, Ordering::Relaxed);
        let elapsed = start.elapsed();
        info!(duration = %format_elapsed(elapsed), "janitor pass finished");
        Ok(elapsed)
    }

    async fn reconcile(&self, cancel: &CancellationToken) -> Result<()> {
        let reconciler = Reconciler::new(self.config.snapshot(), self.image_tool.clone())?;
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || reconciler.reconcile_all(&cancel))
            .await
            .map_err(|e| MirrorError::internal(format!("reconciliation task failed: {}", e)))?;
        Ok(())
    }

    /// Run passes on the timer until `cancel` fires
    ///
    /// `first_elapsed` is the duration of the pass run at startup.
    /// Cancellation during a wait stops the loop without starting a pass;
    /// cancellation during a pass lets it wind down first.
    pub fn spawn(self: Arc<Self>, first_elapsed: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut elapsed = first_elapsed;
            loop {
                let base = self.config.snapshot().general.sync_interval;
                let deadline = next_deadline(Instant::now(), elapsed, base);
                debug!("next sync in {}", format_elapsed(elapsed + base));

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep_until(deadline) => {}
                }

                elapsed = match self.run_pass(&cancel).await {
                    Ok(elapsed) => elapsed,
                    Err(e) => {
                        error!("janitor pass failed: {}", e);
                        Duration::ZERO
                    }
                };
            }
            debug!("janitor stopped");
        })
    }
}
