//! Main test module for watchmirror
//!
//! This module includes all test suites:
//! - Integration tests for end-to-end scenarios
//! - Concurrency tests for racing workers and cancellation
//! - Property-based tests for mirror invariants

pub mod concurrency;
pub mod integration;
pub mod property;

#[cfg(test)]
mod edge_cases {
    use crate::integration::MirrorTestHarness;
    use ::watchmirror::*;
    use std::fs;

    #[test]
    fn test_empty_roots() {
        let harness = MirrorTestHarness::new(&["photos", "docs"]);
        let reports = harness.sync();

        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.source_files == 0 && r.ingested == 0));
        assert!(harness.config.backup_root().is_dir());
    }

    #[test]
    fn test_special_filenames() {
        let harness = MirrorTestHarness::new(&["docs"]);
        let special_names = vec![
            "file with spaces.txt",
            "file-with-dashes.txt",
            "file_with_underscores.txt",
            "file.with.dots.txt",
            "file@with#special$chars.txt",
            "file(with)parens.txt",
            "file[with]brackets.txt",
        ];
        for name in &special_names {
            harness.write(0, name, format!("Content of {}", name).as_bytes());
        }

        harness.sync();
        for name in &special_names {
            let content = fs::read_to_string(harness.backup(&format!("docs/{}", name))).unwrap();
            assert_eq!(content, format!("Content of {}", name));
        }
    }

    #[test]
    fn test_unicode_filenames() {
        let harness = MirrorTestHarness::new(&["docs"]);
        let unicode_names = vec!["файл.txt", "文件.txt", "ファイル.txt", "αρχείο.txt", "🚀🌟💾.txt"];

        let mut created = Vec::new();
        for name in &unicode_names {
            let path = harness.roots[0].join(name);
            if fs::write(&path, format!("Unicode content: {}", name)).is_ok() {
                created.push(name);
            }
        }
        if created.is_empty() {
            // No unicode support on this system
            return;
        }

        harness.sync();
        for name in created {
            let content = fs::read_to_string(harness.backup(&format!("docs/{}", name))).unwrap();
            assert_eq!(content, format!("Unicode content: {}", name));
        }
    }

    #[test]
    fn test_case_insensitive_extensions() {
        let harness = MirrorTestHarness::new(&["photos"]);
        harness.write(0, "IMG_0001.JPG", b"upper");
        harness.write(0, "Scan.Pdf", b"mixed");
        harness.write(0, "archive.TAR.GZ", b"double");

        let report = &harness.sync()[0];
        assert_eq!(report.ingested, 3);
    }

    #[test]
    fn test_prefix_allow_list() {
        let mut harness = MirrorTestHarness::new(&["photos"]);
        harness.config.file_system.backup.prefix = vec!["IMG_".to_string()];
        harness.write(0, "IMG_0001.jpg", b"kept");
        harness.write(0, "holiday.jpg", b"skipped");

        harness.sync();
        assert!(harness.backup("photos/IMG_0001.jpg").exists());
        assert!(!harness.backup("photos/holiday.jpg").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_file_is_copied_by_content() {
        let harness = MirrorTestHarness::new(&["docs"]);
        let target = harness.temp_dir.path().join("outside.txt");
        fs::write(&target, b"linked content").unwrap();
        std::os::unix::fs::symlink(&target, harness.roots[0].join("link.txt")).unwrap();

        // Walks do not follow links; live events do
        assert_eq!(harness.sync()[0].source_files, 0);

        let ingestor = harness.ingestor();
        let request = EventPipeline::new(ingestor.clone())
            .prepare(&LiveEvent::new(harness.roots[0].join("link.txt"), EventOp::Create))
            .unwrap();
        ingestor.ingest(&request).unwrap();
        assert_eq!(fs::read(harness.backup("docs/link.txt")).unwrap(), b"linked content");
    }

    #[cfg(unix)]
    #[test]
    fn test_blocked_destination_is_per_file_failure() {
        let harness = MirrorTestHarness::new(&["docs"]);
        harness.write(0, "sub/a.txt", b"a");
        harness.write(0, "b.txt", b"b");
        let backup_root = harness.config.backup_root();
        fs::create_dir_all(backup_root.join("docs")).unwrap();
        // A file where the `sub` folder should go
        fs::write(backup_root.join("docs/sub"), b"blocker").unwrap();

        let report = &harness.sync()[0];
        assert_eq!(report.failed, 1);
        assert_eq!(report.ingested, 1);
        assert!(backup_root.join("docs/b.txt").exists());
    }
}

// Re-export test utilities for use across suites
pub use integration::{FakeImageTool, FileGenerator, MirrorTestHarness};
