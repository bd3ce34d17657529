//! OS file system notifications for the watch roots
//!
//! [`FsWatcher`] subscribes one `notify` watcher recursively to every watch
//! root and turns notifications into [`LiveEvent`]s on a bounded channel. The
//! notify callback blocks when the channel is full, so a burst of changes
//! slows the notification thread down instead of growing a queue without
//! bound.

use crate::error::Result;
use crate::types::{EventOp, LiveEvent};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, trace};

/// Recursive watcher over a set of watch roots
pub struct FsWatcher {
    /// The notify watcher instance
    watcher: Mutex<RecommendedWatcher>,
    /// Roots subscribed by [`FsWatcher::start`]
    roots: Vec<PathBuf>,
    /// Whether the subscriptions are active
    running: Arc<AtomicBool>,
}

impl FsWatcher {
    /// Subscribe to every root and forward events into `tx`
    ///
    /// # Errors
    ///
    /// Returns [`crate::MirrorError::Watch`] when a root cannot be subscribed
    /// (missing directory, inotify limit reached). Roots subscribed before the
    /// failure are released when the partially built watcher is dropped.
    pub fn start(roots: &[PathBuf], tx: async_channel::Sender<LiveEvent>) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let running_clone = running.clone();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => {
                    trace!("File system event: {:?}", event);
                    for live in map_event(event) {
                        if !running_clone.load(Ordering::Relaxed) {
                            return;
                        }
                        // Closed channel means the engine is stopping
                        if tx.send_blocking(live).is_err() {
                            debug!("Event channel closed, dropping notification");
                            return;
                        }
                    }
                }
                Err(e) => error!("Watch error: {}", e),
            }
        })?;

        for root in roots {
            watcher.watch(root, RecursiveMode::Recursive)?;
            info!("Starting file system watch on: {}", root.display());
        }

        Ok(FsWatcher {
            watcher: Mutex::new(watcher),
            roots: roots.to_vec(),
            running,
        })
    }

    /// Whether the subscriptions are still active
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Unsubscribe from every root
    pub fn stop(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::Relaxed) {
            debug!("Watcher not running");
            return Ok(());
        }

        info!("Stopping file system watch");
        let mut watcher = self.watcher.lock();
        for root in &self.roots {
            // A root deleted while watched is already gone from the backend
            if let Err(e) = watcher.unwatch(root) {
                debug!("Unwatch {}: {}", root.display(), e);
            }
        }
        Ok(())
    }
}

impl Drop for FsWatcher {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Translate one notification into live events
///
/// Creations and data writes are forwarded. A rename is reported as a
/// creation of its target, which covers editors that save through a temporary
/// file. Removals, access and metadata changes become nothing.
pub fn map_event(event: Event) -> Vec<LiveEvent> {
    let op = match event.kind {
        EventKind::Create(_) => EventOp::Create,
        EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any) => EventOp::Write,
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => EventOp::Create,
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            // paths = [from, to]
            return event
                .paths
                .into_iter()
                .nth(1)
                .map(|to| vec![LiveEvent::new(to, EventOp::Create)])
                .unwrap_or_default();
        }
        _ => EventOp::Other,
    };

    if op == EventOp::Other {
        return Vec::new();
    }
    event.paths.into_iter().map(|p| LiveEvent::new(p, op)).collect()
}
