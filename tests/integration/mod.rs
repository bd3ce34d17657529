//! Integration tests for watchmirror
//!
//! End-to-end scenarios over real temporary directory trees: reconciliation
//! passes, the live pipeline and the full engine.

use ::watchmirror::*;
use filetime::FileTime;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Image tool working on fake images whose content starts with `Q<quality>:`
#[derive(Debug, Default)]
pub struct FakeImageTool {
    pub recompressions: AtomicUsize,
}

impl FakeImageTool {
    /// Fake image at `quality` with `body` bytes of payload
    pub fn image(quality: u32, body: usize) -> Vec<u8> {
        let mut content = format!("Q{}:", quality).into_bytes();
        content.extend(std::iter::repeat(b'x').take(body));
        content
    }
}

impl ImageTool for FakeImageTool {
    fn quality(&self, path: &Path) -> Result<u32> {
        let content = fs::read(path)?;
        let text = String::from_utf8_lossy(&content);
        text.strip_prefix('Q')
            .and_then(|rest| rest.split(':').next())
            .and_then(|q| q.parse().ok())
            .ok_or_else(|| MirrorError::image_tool("not a fake image"))
    }

    fn recompress(&self, path: &Path, settings: &EncodeSettings) -> Result<()> {
        let content = fs::read(path)?;
        let body = content.iter().skip_while(|b| **b != b':').count().saturating_sub(1);
        fs::write(path, Self::image(settings.quality, body / 2))?;
        self.recompressions.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Deterministic file content generator
pub struct FileGenerator {
    pub rng: StdRng,
}

impl FileGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn content(&mut self, len: usize) -> Vec<u8> {
        (0..len).map(|_| self.rng.random()).collect()
    }
}

/// Temporary watch roots plus a backup base, with a matching configuration
pub struct MirrorTestHarness {
    pub temp_dir: TempDir,
    pub roots: Vec<PathBuf>,
    pub config: Config,
    pub image_tool: Arc<FakeImageTool>,
}

impl MirrorTestHarness {
    /// Harness with one watch root per name
    pub fn new(root_names: &[&str]) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let roots: Vec<PathBuf> = root_names.iter().map(|n| temp_dir.path().join("data").join(n)).collect();
        for root in &roots {
            fs::create_dir_all(root).unwrap();
        }

        let yaml = format!(
            "general:\n  worker: 2\n  event_buffer: 16\n  scan_workers: 2\nfile_system:\n  paths: [{}]\n  backup:\n    hard_drive_path: \"{}\"\n",
            roots
                .iter()
                .map(|r| format!("\"{}\"", r.display()))
                .collect::<Vec<_>>()
                .join(", "),
            temp_dir.path().join("mnt").display()
        );
        let config = Config::from_yaml(&yaml).unwrap();

        Self {
            temp_dir,
            roots,
            config,
            image_tool: Arc::new(FakeImageTool::default()),
        }
    }

    /// Enable compression with target `quality`
    pub fn with_compression(mut self, quality: u32) -> Self {
        self.config.file_system.compress.enabled = true;
        self.config.file_system.compress.quality = quality;
        self
    }

    /// Limit file size to `mib` MiB
    pub fn with_max_file_size(mut self, mib: u64) -> Self {
        self.config.file_system.max_file_size = mib;
        self
    }

    /// Write a file below watch root `root`
    pub fn write(&self, root: usize, relative: &str, content: &[u8]) -> PathBuf {
        let path = self.roots[root].join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    /// Path in the mirrored tree
    pub fn backup(&self, relative: &str) -> PathBuf {
        self.config.backup_root().join(relative)
    }

    /// Number of regular files in the mirrored tree
    pub fn backup_file_count(&self) -> usize {
        walkdir::WalkDir::new(self.config.backup_root())
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .count()
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(Arc::new(self.config.clone()), self.image_tool.clone()).unwrap()
    }

    /// Run one pass over every root and return the reports
    pub fn sync(&self) -> Vec<PassReport> {
        self.reconciler()
            .reconcile_all(&CancellationToken::new())
            .into_iter()
            .map(|(_, result)| result.unwrap())
            .collect()
    }

    pub fn ingestor(&self) -> Arc<Ingestor> {
        Arc::new(Ingestor::from_config(&self.config, self.image_tool.clone()).unwrap())
    }
}

fn mtime(path: &Path) -> FileTime {
    FileTime::from_last_modification_time(&fs::metadata(path).unwrap())
}

#[test]
fn test_existing_hashes_are_never_copied() {
    let harness = MirrorTestHarness::new(&["photos"]);
    let mut generator = FileGenerator::new(7);
    for i in 0..20 {
        let content = generator.content(512);
        harness.write(0, &format!("batch/file_{}.txt", i), &content);
        let backup = harness.backup(&format!("older/renamed_{}.txt", i));
        fs::create_dir_all(backup.parent().unwrap()).unwrap();
        fs::write(backup, &content).unwrap();
    }

    let report = &harness.sync()[0];
    assert_eq!(report.source_files, 20);
    assert_eq!(report.skipped_by_hash, 20);
    assert_eq!(report.ingested, 0);
    assert_eq!(harness.backup_file_count(), 20);
}

#[test]
fn test_duplicate_by_name_only_first_encountered() {
    let harness = MirrorTestHarness::new(&["photos"]);
    harness.write(0, "a/photo.jpg", b"first photo");
    harness.write(0, "b/photo.jpg", b"second photo, different bytes");

    let first = &harness.sync()[0];
    assert_eq!(first.ingested, 1);
    assert_eq!(first.skipped_by_name, 1);
    assert!(harness.backup("photos/a/photo.jpg").exists());
    assert!(!harness.backup("photos/b/photo.jpg").exists());

    let second = &harness.sync()[0];
    assert_eq!(second.ingested, 0);
    assert!(!harness.backup("photos/b/photo.jpg").exists());
}

#[test]
fn test_repeated_passes_are_stable() {
    let harness = MirrorTestHarness::new(&["photos", "docs"]);
    let mut generator = FileGenerator::new(42);
    for i in 0..10 {
        harness.write(0, &format!("2024/img_{}.png", i), &generator.content(256));
        harness.write(1, &format!("letters/letter_{}.pdf", i), &generator.content(256));
    }

    let first: usize = harness.sync().iter().map(|r| r.ingested).sum();
    assert_eq!(first, 20);
    let count = harness.backup_file_count();
    let before = mtime(&harness.backup("photos/2024/img_3.png"));

    let second = harness.sync();
    assert!(second.iter().all(|r| r.ingested == 0 && r.failed == 0));
    assert_eq!(harness.backup_file_count(), count);
    assert_eq!(mtime(&harness.backup("photos/2024/img_3.png")), before);
}

#[test]
fn test_unknown_extension_and_hidden_dirs_never_ingested() {
    let harness = MirrorTestHarness::new(&["photos"]);
    harness.write(0, "notes.xyz123", b"unknown extension");
    harness.write(0, "Makefile", b"no extension");
    harness.write(0, ".thumbnails/a.jpg", b"hidden dir");
    harness.write(0, "2024/.cache/deep/b.jpg", b"nested hidden dir");
    harness.write(0, "draft.txt~", b"editor backup");
    harness.write(0, "2024/visible.jpg", b"visible");

    let report = &harness.sync()[0];
    assert_eq!(report.ingested, 1);
    assert_eq!(harness.backup_file_count(), 1);
    assert!(harness.backup("photos/2024/visible.jpg").exists());

    // Live events take the same decisions
    let pipeline = EventPipeline::new(harness.ingestor());
    for relative in ["notes.xyz123", "Makefile", ".thumbnails/a.jpg", "2024/.cache/deep/b.jpg"] {
        let event = LiveEvent::new(harness.roots[0].join(relative), EventOp::Write);
        assert!(pipeline.prepare(&event).is_none(), "{} accepted", relative);
    }
}

#[test]
fn test_size_limit_rejects_at_or_above_limit() {
    let harness = MirrorTestHarness::new(&["videos"]).with_max_file_size(1);
    let exact = harness.write(0, "exact.mp4", &vec![0u8; 1024 * 1024]);
    harness.write(0, "small.mp4", &vec![1u8; 1024 * 1024 - 1]);

    let report = &harness.sync()[0];
    assert_eq!(report.ingested, 1);
    assert_eq!(report.failed, 1);
    assert!(harness.backup("videos/small.mp4").exists());
    assert!(!harness.backup("videos/exact.mp4").exists());

    let ingestor = harness.ingestor();
    let request = EventPipeline::new(ingestor.clone())
        .prepare(&LiveEvent::new(exact, EventOp::Create))
        .unwrap();
    let err = ingestor.ingest(&request).unwrap_err();
    assert!(matches!(err, MirrorError::FileTooLarge { .. }));
    assert!(err.to_string().starts_with("size limits on the file"));
}

#[test]
fn test_compression_noop_and_in_place() {
    let harness = MirrorTestHarness::new(&["photos"]).with_compression(70);
    let low = FakeImageTool::image(60, 100);
    let high = FakeImageTool::image(95, 100);
    harness.write(0, "low.jpg", &low);
    let high_source = harness.write(0, "high.png", &high);

    harness.sync();

    assert_eq!(fs::read(harness.backup("photos/low.jpg")).unwrap(), low);
    let compressed = harness.backup("photos/high.png");
    assert_eq!(harness.image_tool.quality(&compressed).unwrap(), 70);
    assert!(fs::metadata(&compressed).unwrap().len() < high.len() as u64);
    assert_eq!(fs::read(&high_source).unwrap(), high);
    assert_eq!(harness.image_tool.recompressions.load(Ordering::Relaxed), 1);
}

#[test]
fn test_photo_scenario_compressed_once_then_left_alone() {
    let harness = MirrorTestHarness::new(&["photos"])
        .with_compression(70)
        .with_max_file_size(10);
    let source = harness.write(0, "2024/a.jpg", &FakeImageTool::image(95, 4096));

    let first = &harness.sync()[0];
    assert_eq!(first.ingested, 1);
    let destination = harness.backup("photos/2024/a.jpg");
    assert!(harness.image_tool.quality(&destination).unwrap() <= 70);
    assert_eq!(harness.image_tool.quality(&source).unwrap(), 95);

    // Make any rewrite observable through the modification time
    filetime::set_file_mtime(&destination, FileTime::from_unix_time(1_000_000_000, 0)).unwrap();
    let content = fs::read(&destination).unwrap();

    let second = &harness.sync()[0];
    assert_eq!(second.ingested, 0);
    assert_eq!(second.skipped_by_name, 1);
    assert_eq!(mtime(&destination), FileTime::from_unix_time(1_000_000_000, 0));
    assert_eq!(fs::read(&destination).unwrap(), content);
    assert_eq!(harness.image_tool.recompressions.load(Ordering::Relaxed), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_temp_marker_captured_at_final_name() {
    let harness = MirrorTestHarness::new(&["docs"]);
    let settled = harness.write(0, "report.txt", b"final content");
    let (tx, rx) = async_channel::bounded(4);
    let handle = EventPipeline::new(harness.ingestor()).spawn(2, rx, CancellationToken::new());

    let mut temp_name = settled.clone().into_os_string();
    temp_name.push("~");
    tx.send(LiveEvent::new(PathBuf::from(temp_name), EventOp::Write)).await.unwrap();
    tx.close();
    handle.join().await;

    assert_eq!(fs::read(harness.backup("docs/report.txt")).unwrap(), b"final content");
    assert!(!harness.backup("docs/report.txt~").exists());
    assert_eq!(harness.backup_file_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_engine_mirrors_live_changes() {
    let harness = MirrorTestHarness::new(&["photos"]);
    harness.write(0, "before.jpg", b"before start");

    let shutdown = CancellationToken::new();
    let mut engine = Engine::new(
        ConfigHandle::new(harness.config.clone()),
        harness.image_tool.clone(),
        shutdown.clone(),
    );
    engine.start().await.unwrap();
    assert!(harness.backup("photos/before.jpg").exists());

    harness.write(0, "after.txt", b"written while running");
    let target = harness.backup("photos/after.txt");
    let arrived = tokio::time::timeout(Duration::from_secs(10), async {
        while fs::read(&target).ok().as_deref() != Some(b"written while running".as_slice()) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(arrived.is_ok(), "live change not mirrored");

    shutdown.cancel();
    engine.stop().await;
    assert!(!engine.is_running());
}
