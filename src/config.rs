//! Configuration loading and hot reload
//!
//! The configuration is a YAML document with a `general` section (worker
//! pool, janitor interval, logging) and a `file_system` section (watch roots,
//! backup location, size limit, compression and prefix allow-list).
//!
//! Components never read a global configuration. Each engine run, reconciliation
//! pass and pipeline captures an immutable [`Config`] snapshot from a
//! [`ConfigHandle`]; reloading swaps the snapshot atomically and only affects
//! work started afterwards.
//!
//! ```yaml
//! general:
//!   worker: 4
//!   event_buffer: 256
//!   sync_interval: 30m
//! file_system:
//!   paths: [/data/photos]
//!   max_file_size: 10
//!   compress: { enabled: true, quality: 70 }
//!   backup:
//!     hard_drive_path: /mnt/backup
//!     prefix: ["*"]
//! ```

use crate::error::{MirrorError, Result};
use crate::utils::MIB;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::RwLock;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Name of the folder created under the backup base directory
pub const BACKUP_FOLDER: &str = "Backup Files";

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/watchmirror/config.yml";

/// Default janitor base interval
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Top-level configuration document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Process-wide settings
    #[serde(default)]
    pub general: GeneralConfig,
    /// Watch roots and backup settings
    pub file_system: FileSystemConfig,
}

/// Worker pool, scheduling and logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Number of live event workers
    pub worker: usize,
    /// Capacity of the bounded event channel
    pub event_buffer: usize,
    /// Size of the hashing pool used by reconciliation (0 = CPU count)
    pub scan_workers: usize,
    /// Base interval between reconciliation passes
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub sync_interval: Duration,
    /// Enable debug logging
    pub verbose: bool,
    /// Optional file receiving info-level records
    pub info_log: Option<PathBuf>,
    /// Optional file receiving error-level records
    pub error_log: Option<PathBuf>,
    /// Optional pid file written while the daemon runs
    pub pid_file: Option<PathBuf>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            worker: num_cpus::get(),
            event_buffer: 256,
            scan_workers: 0,
            sync_interval: DEFAULT_SYNC_INTERVAL,
            verbose: false,
            info_log: None,
            error_log: None,
            pid_file: None,
        }
    }
}

/// Watch roots and backup destination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileSystemConfig {
    /// Directories to mirror
    pub paths: Vec<PathBuf>,
    /// Image compression settings
    #[serde(default)]
    pub compress: CompressConfig,
    /// Maximum file size in MiB (0 = unlimited)
    #[serde(default)]
    pub max_file_size: u64,
    /// Backup destination
    pub backup: BackupConfig,
}

/// Image compression settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressConfig {
    /// Whether images are re-encoded after copying
    pub enabled: bool,
    /// Target quality (1..=100)
    pub quality: u32,
    /// Chroma sampling factor passed to the encoder
    pub sampling_factor: String,
}

impl Default for CompressConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            quality: 85,
            sampling_factor: "4:2:0".to_string(),
        }
    }
}

/// Backup destination settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Base directory holding the `Backup Files` folder
    pub hard_drive_path: PathBuf,
    /// Optional file name prefix allow-list (`*` allows everything)
    #[serde(default)]
    pub prefix: Vec<String>,
}

fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
}

fn serialize_duration<S>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&humantime::format_duration(*duration).to_string())
}

impl Config {
    /// Read, parse and validate a configuration file
    ///
    /// # Errors
    ///
    /// - [`MirrorError::Config`] if the file cannot be read or is invalid
    /// - [`MirrorError::Yaml`] if the document cannot be parsed
    pub fn load(path: &Path) -> Result<Self> {
        let path = std::path::absolute(path)?;
        let raw = std::fs::read_to_string(&path).map_err(|e| {
            MirrorError::config(format!("fail to read config {}: {}", path.display(), e))
        })?;
        let config = Self::from_yaml(&raw)?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parse and validate a YAML document
    ///
    /// Relative watch roots and backup base are anchored at the working
    /// directory, so walks and OS notifications report the same prefix.
    pub fn from_yaml(raw: &str) -> Result<Self> {
        let mut config: Config = serde_yaml::from_str(raw)?;
        config.validate()?;
        config.resolve_paths()?;
        Ok(config)
    }

    fn resolve_paths(&mut self) -> Result<()> {
        for path in &mut self.file_system.paths {
            if path.is_relative() {
                *path = std::path::absolute(&*path)?;
            }
        }
        let base = &mut self.file_system.backup.hard_drive_path;
        if base.is_relative() {
            *base = std::path::absolute(&*base)?;
        }
        Ok(())
    }

    /// Check invariants the rest of the system relies on
    pub fn validate(&self) -> Result<()> {
        if self.general.worker == 0 {
            return Err(MirrorError::config("general.worker must be at least 1"));
        }
        if self.general.event_buffer == 0 {
            return Err(MirrorError::config("general.event_buffer must be at least 1"));
        }
        if self.general.sync_interval.is_zero() {
            return Err(MirrorError::config("general.sync_interval must be positive"));
        }
        if self.file_system.paths.is_empty() {
            return Err(MirrorError::config("file_system.paths must list at least one directory"));
        }
        if self.file_system.backup.hard_drive_path.as_os_str().is_empty() {
            return Err(MirrorError::config("file_system.backup.hard_drive_path is required"));
        }
        let quality = self.file_system.compress.quality;
        if self.file_system.compress.enabled && !(1..=100).contains(&quality) {
            return Err(MirrorError::config(format!(
                "file_system.compress.quality must be within 1..=100, got {}",
                quality
            )));
        }
        for path in &self.file_system.paths {
            if path.file_name().is_none() {
                return Err(MirrorError::config(format!(
                    "watch path {} has no directory name",
                    path.display()
                )));
            }
        }
        Ok(())
    }

    /// Root of the mirrored tree (`<hard_drive_path>/Backup Files`)
    pub fn backup_root(&self) -> PathBuf {
        self.file_system.backup.hard_drive_path.join(BACKUP_FOLDER)
    }

    /// Maximum accepted file size in bytes, `None` when unlimited
    pub fn max_file_size_bytes(&self) -> Option<u64> {
        match self.file_system.max_file_size {
            0 => None,
            mib => Some(mib.saturating_mul(MIB)),
        }
    }

    /// Size of the hashing pool used during reconciliation
    pub fn scan_workers(&self) -> usize {
        match self.general.scan_workers {
            0 => num_cpus::get(),
            n => n,
        }
    }

    /// Whether switching from `self` to `other` requires restarting the engine
    ///
    /// Watch subscriptions, the worker pool, the event channel and the live
    /// ingestor (filter, size limit, compression) are fixed for one engine run;
    /// the janitor interval and the hashing pool size are read per pass.
    pub fn requires_restart(&self, other: &Config) -> bool {
        self.file_system != other.file_system
            || self.general.worker != other.general.worker
            || self.general.event_buffer != other.general.event_buffer
    }
}

/// Shared handle to the current configuration snapshot
///
/// Readers call [`ConfigHandle::snapshot`] once at the start of a unit of work
/// and keep the returned `Arc` for its whole duration. No lock is held while
/// the snapshot is in use.
#[derive(Debug, Clone)]
pub struct ConfigHandle {
    current: Arc<RwLock<Arc<Config>>>,
}

impl ConfigHandle {
    /// Wrap an initial configuration
    pub fn new(config: Config) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    /// Current immutable snapshot
    pub fn snapshot(&self) -> Arc<Config> {
        Arc::clone(&self.current.read())
    }

    /// Atomically install a new configuration, returning the previous one
    pub fn replace(&self, config: Config) -> Arc<Config> {
        std::mem::replace(&mut *self.current.write(), Arc::new(config))
    }

    /// Reload from disk; on failure the current snapshot stays in place
    pub fn reload(&self, path: &Path) -> Result<Arc<Config>> {
        let config = Config::load(path)?;
        let previous = self.replace(config);
        info!("Config file re-load: {}", path.display());
        Ok(previous)
    }
}

/// Watches the configuration file and signals when it changes
///
/// Editors commonly save through a `name~` backup file, so a trailing `~`
/// on the notified name is ignored when matching.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    path: PathBuf,
}

impl ConfigWatcher {
    /// Start watching `path`; every change sends `()` on `tx`
    pub fn start(path: &Path, tx: async_channel::Sender<()>) -> Result<Self> {
        let path = std::path::absolute(path)?;
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| MirrorError::config(format!("{} has no parent", path.display())))?;

        let target = path.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) => {
                    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                        return;
                    }
                    let touched = event
                        .paths
                        .iter()
                        .any(|p| crate::filter::strip_temp_marker(p) == target);
                    // A full channel already carries a pending reload
                    if touched && tx.try_send(()).is_err() {
                        debug!("Config reload already pending");
                    }
                }
                Err(e) => error!("read config error {}", e),
            }
        })?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        info!("Watching configuration file {}", path.display());

        Ok(Self {
            _watcher: watcher,
            path,
        })
    }

    /// Path being watched
    pub fn path(&self) -> &Path {
        &self.path
    }
}
