//! Concurrency tests for watchmirror
//!
//! Many workers racing on the same destination, backpressure on a tiny
//! channel, and cancellation in the middle of a pass.

use crate::integration::{FileGenerator, MirrorTestHarness};
use ::watchmirror::*;
use std::fs;
use std::sync::Arc;
use std::thread;
use tokio_util::sync::CancellationToken;

fn staging_files(harness: &MirrorTestHarness) -> Vec<String> {
    walkdir::WalkDir::new(harness.config.backup_root())
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with(".tmp"))
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_ingestions_of_one_file() {
    let harness = MirrorTestHarness::new(&["docs"]);
    let mut generator = FileGenerator::new(3);
    let content = generator.content(256 * 1024);
    let source = harness.write(0, "shared.zip", &content);

    let (tx, rx) = async_channel::bounded(4);
    let handle = EventPipeline::new(harness.ingestor()).spawn(8, rx, CancellationToken::new());
    for _ in 0..32 {
        tx.send(LiveEvent::new(source.clone(), EventOp::Write)).await.unwrap();
    }
    tx.close();
    handle.join().await;

    assert_eq!(fs::read(harness.backup("docs/shared.zip")).unwrap(), content);
    assert!(staging_files(&harness).is_empty());
    assert_eq!(harness.backup_file_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_backpressure_with_single_slot_channel() {
    let harness = MirrorTestHarness::new(&["photos"]);
    let mut paths = Vec::new();
    for i in 0..100 {
        paths.push(harness.write(0, &format!("burst/img_{:03}.jpg", i), format!("image {}", i).as_bytes()));
    }

    let (tx, rx) = async_channel::bounded(1);
    let handle = EventPipeline::new(harness.ingestor()).spawn(3, rx, CancellationToken::new());
    let stats = handle.stats();

    let producer = thread::spawn(move || {
        for path in paths {
            tx.send_blocking(LiveEvent::new(path, EventOp::Create)).unwrap();
        }
    });
    tokio::task::spawn_blocking(move || producer.join().unwrap()).await.unwrap();
    handle.join().await;

    assert_eq!(stats.received(), 100);
    assert_eq!(stats.ingested(), 100);
    assert_eq!(harness.backup_file_count(), 100);
}

#[test]
fn test_cancellation_mid_pass_is_clean() {
    let harness = MirrorTestHarness::new(&["photos"]);
    let mut generator = FileGenerator::new(11);
    for dir in 0..20 {
        for file in 0..25 {
            harness.write(0, &format!("d{}/f{}_{}.txt", dir, dir, file), &generator.content(2048));
        }
    }

    // Cancel as soon as the source walk yields its first record
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let reconciler = harness.reconciler().with_progress(Arc::new(move |_| trigger.cancel()));

    let results = reconciler.reconcile_all(&cancel);
    assert_eq!(results.len(), 1);
    let err = results[0].1.as_ref().unwrap_err();
    assert!(err.is_cancelled(), "unexpected error: {}", err);
    assert_eq!(harness.backup_file_count(), 0);
    assert!(staging_files(&harness).is_empty());

    // A later pass completes the mirror
    let report = &harness.sync()[0];
    assert_eq!(report.ingested, 500);
    assert_eq!(harness.backup_file_count(), 500);
}

#[test]
fn test_parallel_passes_on_distinct_roots() {
    let harness = MirrorTestHarness::new(&["a", "b", "c"]);
    for root in 0..3 {
        for i in 0..30 {
            harness.write(root, &format!("r{}_{}.txt", root, i), format!("{} {}", root, i).as_bytes());
        }
    }

    let reconciler = Arc::new(harness.reconciler());
    let handles: Vec<_> = (0..3)
        .map(|index| {
            let reconciler = reconciler.clone();
            thread::spawn(move || reconciler.reconcile_root(index, &CancellationToken::new()))
        })
        .collect();

    for handle in handles {
        let report = handle.join().unwrap().unwrap();
        assert_eq!(report.source_files, 30);
    }
    assert_eq!(harness.backup_file_count(), 90);
}
