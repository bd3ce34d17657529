//! # watchmirror CLI
//!
//! Command-line front end of the watchmirror daemon.
//!
//! ## Usage
//! ```bash
//! # Run the daemon (default subcommand)
//! watchmirror -c /etc/watchmirror/config.yml
//!
//! # One reconciliation pass over every watch root
//! watchmirror sync
//! watchmirror sync --json
//!
//! # Validate the configuration
//! watchmirror check
//! ```

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use watchmirror::config::DEFAULT_CONFIG_PATH;
use watchmirror::logging::{self, LogSettings};
use watchmirror::utils::format_elapsed;
use watchmirror::{Config, ConfigHandle, Engine, ImageMagick, PassReport, Reconciler};

/// watchmirror - continuous deduplicating backup mirror
#[derive(Parser)]
#[command(name = "watchmirror")]
#[command(version)]
#[command(about = "Mirror watched directories into a deduplicated backup tree")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch and mirror until interrupted (default)
    Run,
    /// Reconcile every watch root once and exit
    Sync {
        /// Print the pass reports as JSON
        #[arg(long)]
        json: bool,
    },
    /// Validate the configuration and print the resolved settings
    Check,
}

fn main() {
    let cli = Cli::parse();

    // Disable colors if needed
    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli) {
        eprintln!("{}: {:#}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

/// Main command runner
fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => cmd_run(&cli.config, cli.debug),
        Commands::Sync { json } => cmd_sync(&cli.config, cli.debug, json),
        Commands::Check => cmd_check(&cli.config),
    }
}

fn load_config(path: &Path) -> anyhow::Result<Config> {
    Config::load(path).with_context(|| format!("loading {}", path.display()))
}

fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("watchmirror")
        .build()
        .context("starting async runtime")
}

/// Removes the pid file when dropped
struct PidFile {
    path: PathBuf,
}

impl PidFile {
    fn create(path: &Path) -> anyhow::Result<Self> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(path, format!("{}\n", std::process::id()))
            .with_context(|| format!("writing pid file {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Cancel `token` on Ctrl-C or SIGTERM
async fn cancel_on_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("listening for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("listening for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Interrupted"),
        _ = terminate => info!("Terminated"),
    }
    token.cancel();
}

/// Run the daemon
///
/// Startup failures (invalid configuration, unreachable watch root) end the
/// process with a non-zero status; a signal drains in-flight work and exits
/// cleanly.
fn cmd_run(config_path: &Path, debug: bool) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let _guards = logging::init(&LogSettings::from_config(&config.general, debug))?;
    let _pid = config
        .general
        .pid_file
        .as_deref()
        .map(PidFile::create)
        .transpose()?;

    let config_path = std::path::absolute(config_path)?;
    let image_tool = Arc::new(ImageMagick::detect());
    let runtime = runtime()?;

    let result = runtime.block_on(async {
        let shutdown = CancellationToken::new();
        tokio::spawn(cancel_on_signal(shutdown.clone()));

        Engine::new(ConfigHandle::new(config), image_tool, shutdown)
            .run(Some(&config_path))
            .await
    });

    if let Err(e) = &result {
        error!("fatal: {}", e);
    }
    Ok(result?)
}

#[derive(Serialize)]
struct SyncEntry {
    root: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<PassReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Reconcile every watch root once
fn cmd_sync(config_path: &Path, debug: bool, json: bool) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let _guards = logging::init(&LogSettings::from_config(&config.general, debug))?;

    let progress = if json {
        None
    } else {
        let pb = ProgressBar::new_spinner();
        pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
        pb.enable_steady_tick(Duration::from_millis(100));
        pb.set_message("Scanning files...");
        Some(pb)
    };

    let mut reconciler = Reconciler::new(Arc::new(config), Arc::new(ImageMagick::detect()))?;
    if let Some(pb) = progress.clone() {
        reconciler = reconciler.with_progress(Arc::new(move |n| {
            pb.set_message(format!("Hashing files... {}", n));
        }));
    }

    let start = Instant::now();
    let results = runtime()?.block_on(async {
        let cancel = CancellationToken::new();
        let worker_cancel = cancel.clone();
        let mut task = tokio::task::spawn_blocking(move || reconciler.reconcile_all(&worker_cancel));
        tokio::select! {
            results = &mut task => results,
            _ = cancel_on_signal(cancel) => task.await,
        }
    })?;

    if let Some(pb) = progress {
        pb.finish_and_clear();
    }

    let entries: Vec<SyncEntry> = results
        .into_iter()
        .map(|(root, result)| match result {
            Ok(report) => SyncEntry {
                root,
                report: Some(report),
                error: None,
            },
            Err(e) => SyncEntry {
                root,
                report: None,
                error: Some(e.to_string()),
            },
        })
        .collect();
    let failed = entries.iter().filter(|e| e.error.is_some()).count();

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        print_sync_table(&entries, start.elapsed());
    }

    if failed > 0 {
        return Err(anyhow!("{} of {} watch roots failed", failed, entries.len()));
    }
    Ok(())
}

fn print_sync_table(entries: &[SyncEntry], elapsed: Duration) {
    println!("{}", "Sync results:".blue().bold());
    for entry in entries {
        match (&entry.report, &entry.error) {
            (Some(report), _) => {
                println!("{} {}", "✓".green().bold(), entry.root.display().to_string().cyan());
                println!(
                    "    Ingested: {} | Skipped: {} ({} by content, {} by name) | Failed: {}",
                    report.ingested.to_string().green(),
                    report.skipped().to_string().dimmed(),
                    report.skipped_by_hash,
                    report.skipped_by_name,
                    if report.failed > 0 {
                        report.failed.to_string().red()
                    } else {
                        report.failed.to_string().dimmed()
                    }
                );
                println!(
                    "    Files: {} source, {} in backup | Time: {}",
                    report.source_files,
                    report.backup_files,
                    format_elapsed(report.duration).dimmed()
                );
            }
            (None, error) => {
                println!(
                    "{} {}: {}",
                    "✗".red().bold(),
                    entry.root.display().to_string().cyan(),
                    error.as_deref().unwrap_or("cancelled").red()
                );
            }
        }
    }
    println!("\n{} {}", "Total time:".dimmed(), format_elapsed(elapsed));
}

/// Validate the configuration
fn cmd_check(config_path: &Path) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let general = &config.general;
    let fs_config = &config.file_system;

    println!("{} {} is valid", "✓".green().bold(), config_path.display().to_string().cyan());
    println!("\n{}", "Watch roots:".blue().bold());
    for path in &fs_config.paths {
        let marker = if path.is_dir() { "✓".green() } else { "✗".red() };
        println!("  {} {}", marker, path.display());
    }

    println!("\n{}", "Backup:".blue().bold());
    println!("  Destination: {}", config.backup_root().display().to_string().cyan());
    match config.max_file_size_bytes() {
        Some(limit) => println!("  Size limit: {}", watchmirror::utils::format_bytes(limit).cyan()),
        None => println!("  Size limit: {}", "unlimited".dimmed()),
    }
    if fs_config.backup.prefix.is_empty() {
        println!("  Prefixes: {}", "any".dimmed());
    } else {
        println!("  Prefixes: {}", fs_config.backup.prefix.join(", ").cyan());
    }

    println!("\n{}", "Compression:".blue().bold());
    if fs_config.compress.enabled {
        println!(
            "  Quality: {} | Sampling: {}",
            fs_config.compress.quality.to_string().cyan(),
            fs_config.compress.sampling_factor.cyan()
        );
        if !ImageMagick::detect().is_available() {
            println!("  {}", "ImageMagick not found on PATH, images will be copied as is".yellow());
        }
    } else {
        println!("  {}", "disabled".dimmed());
    }

    println!("\n{}", "General:".blue().bold());
    println!("  Workers: {} | Event buffer: {}", general.worker, general.event_buffer);
    println!("  Hashing threads: {}", config.scan_workers());
    println!("  Sync interval: {}", humantime::format_duration(general.sync_interval));
    if let Some(path) = &general.pid_file {
        println!("  Pid file: {}", path.display());
    }

    Ok(())
}
