//! # watchmirror - continuous deduplicating backup mirror
//!
//! Watches a set of directories and keeps a mirrored copy of every eligible
//! file under a single backup tree, reacting to file system notifications in
//! real time and reconciling the whole tree periodically.
//!
//! ## Overview
//!
//! Every file lands at
//!
//! ```text
//! <hard_drive_path>/Backup Files/<watch root name>/<relative directories>/<file name>
//! ```
//!
//! Two paths lead there:
//!
//! - **Live events**: an OS watcher feeds create/write notifications into a
//!   bounded channel drained by a fixed pool of workers. Each worker filters
//!   the path, resolves its destination and copies it.
//! - **Reconciliation**: at startup and then on a timer, every watch root is
//!   compared with the backup tree by content hash. Files whose content (or
//!   whose file name) is already present are skipped; the rest are copied.
//!
//! JPEG and PNG files can additionally be re-encoded after copying through an
//! external tool (ImageMagick), leaving the source untouched.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use watchmirror::{Config, ConfigHandle, Engine, ImageMagick};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load("/etc/watchmirror/config.yml".as_ref())?;
//! let shutdown = CancellationToken::new();
//! let engine = Engine::new(
//!     ConfigHandle::new(config),
//!     Arc::new(ImageMagick::detect()),
//!     shutdown.clone(),
//! );
//!
//! // Serves until `shutdown` is cancelled
//! engine.run(None).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ### One-off reconciliation
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use watchmirror::{Config, ImageMagick, Reconciler};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Arc::new(Config::load("config.yml".as_ref())?);
//! let reconciler = Reconciler::new(config, Arc::new(ImageMagick::detect()))?;
//! for (root, result) in reconciler.reconcile_all(&CancellationToken::new()) {
//!     match result {
//!         Ok(report) => println!("{}: {} ingested", root.display(), report.ingested),
//!         Err(e) => eprintln!("{}: {}", root.display(), e),
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency
//!
//! - Pipeline workers are tokio tasks; each runs one blocking ingestion at a
//!   time on the blocking pool.
//! - Reconciliation hashes files on a bounded rayon pool and performs the
//!   diff sequentially once both trees are hashed.
//! - Shutdown is a [`tokio_util::sync::CancellationToken`]; every engine run
//!   owns a child token so restarts never cancel the process.
//!
//! ## Module Organization
//!
//! - [`config`]: YAML configuration, snapshots and hot reload
//! - [`filter`]: extension, prefix and hidden-directory rules
//! - [`destination`]: source path to backup path mapping
//! - [`ingest`] / [`image_tool`]: copying and image re-encoding
//! - [`scan`] / [`reconcile`]: tree hashing and the dedup diff
//! - [`watcher`] / [`pipeline`]: OS notifications and live workers
//! - [`janitor`] / [`engine`]: scheduling and lifecycle
//! - [`logging`]: subscriber setup
//! - [`types`] / [`error`]: shared types and errors

pub mod config;
pub mod destination;
pub mod engine;
pub mod error;
pub mod filter;
pub mod image_tool;
pub mod ingest;
pub mod janitor;
pub mod logging;
pub mod pipeline;
pub mod reconcile;
pub mod scan;
pub mod types;
pub mod utils;
pub mod watcher;

// Re-export main types for convenience
pub use config::{Config, ConfigHandle, ConfigWatcher};
pub use destination::{DestinationBuilder, WatchRoots};
pub use engine::Engine;
pub use error::{MirrorError, Result};
pub use filter::ExtensionFilter;
pub use image_tool::{EncodeSettings, ImageMagick, ImageTool, Interlace};
pub use ingest::{Compression, Ingestor};
pub use janitor::{Janitor, JanitorState};
pub use pipeline::{EventPipeline, PipelineHandle, PipelineStats};
pub use reconcile::Reconciler;
pub use scan::TreeScanner;
pub use types::*;
pub use watcher::FsWatcher;
