//! Tracing subscriber setup
//!
//! Records always go to stderr, filtered by `RUST_LOG` when set. Two optional
//! daily-rolling files mirror the split of a classic daemon: one receives
//! INFO and above, the other ERROR only. File writers are non-blocking; the
//! returned [`LogGuards`] must be kept alive until exit so buffered records
//! are flushed.

use crate::config::GeneralConfig;
use crate::error::{MirrorError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Logging options resolved from the command line and the configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogSettings {
    /// Debug level on the console
    pub verbose: bool,
    /// File receiving INFO and above
    pub info_log: Option<PathBuf>,
    /// File receiving ERROR only
    pub error_log: Option<PathBuf>,
}

impl LogSettings {
    /// Settings from the `general` section, `--debug` forcing verbose output
    pub fn from_config(general: &GeneralConfig, debug: bool) -> Self {
        Self {
            verbose: debug || general.verbose,
            info_log: general.info_log.clone(),
            error_log: general.error_log.clone(),
        }
    }

    /// Console filter used when `RUST_LOG` is not set
    pub fn default_directive(&self) -> &'static str {
        if self.verbose {
            "watchmirror=debug"
        } else {
            "watchmirror=info"
        }
    }
}

/// Flush guards of the non-blocking file writers
#[must_use = "dropping the guards stops the file writers"]
pub struct LogGuards {
    _guards: Vec<WorkerGuard>,
}

/// Non-blocking daily-rolling writer for `path`
fn file_writer(path: &Path, guards: &mut Vec<WorkerGuard>) -> Result<NonBlocking> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let name = path
        .file_name()
        .ok_or_else(|| MirrorError::config(format!("log file {} has no name", path.display())))?;
    fs::create_dir_all(dir)?;

    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, name));
    guards.push(guard);
    Ok(writer)
}

/// Install the global subscriber
///
/// # Errors
///
/// Fails if a log directory cannot be created or a global subscriber is
/// already installed.
pub fn init(settings: &LogSettings) -> Result<LogGuards> {
    let mut guards = Vec::new();

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.default_directive()));
    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(env_filter);

    let info = match &settings.info_log {
        Some(path) => Some(
            fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer(path, &mut guards)?)
                .with_filter(LevelFilter::INFO),
        ),
        None => None,
    };
    let error = match &settings.error_log {
        Some(path) => Some(
            fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer(path, &mut guards)?)
                .with_filter(LevelFilter::ERROR),
        ),
        None => None,
    };

    tracing_subscriber::registry()
        .with(console)
        .with(info)
        .with(error)
        .try_init()
        .map_err(|e| MirrorError::internal(format!("installing log subscriber: {}", e)))?;

    Ok(LogGuards { _guards: guards })
}
