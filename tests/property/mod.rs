//! Property-based testing for watchmirror
//!
//! Uses proptest to check the mirror invariants over randomly generated
//! directory trees.

use crate::integration::MirrorTestHarness;
use ::watchmirror::*;
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Generate relative file paths with eligible extensions
fn path_strategy() -> impl Strategy<Value = PathBuf> {
    let dir_strategy = prop::collection::vec("[a-z]{1,6}", 0..=3);
    let filename_strategy = "[a-z]{1,8}\\.(txt|pdf|jpg|png|md)";

    (dir_strategy, filename_strategy).prop_map(|(dirs, filename)| {
        let mut path: PathBuf = dirs.into_iter().collect();
        path.push(filename);
        path
    })
}

/// Generate a small tree: relative path to content
fn tree_strategy() -> impl Strategy<Value = BTreeMap<PathBuf, Vec<u8>>> {
    prop::collection::btree_map(path_strategy(), prop::collection::vec(any::<u8>(), 0..256), 1..12)
}

/// Write `tree` below root `root`, skipping paths that collide with a directory
fn materialize(harness: &MirrorTestHarness, tree: &BTreeMap<PathBuf, Vec<u8>>) -> Vec<PathBuf> {
    let mut written = Vec::new();
    for (relative, content) in tree {
        let path = harness.roots[0].join(relative);
        if std::fs::create_dir_all(path.parent().unwrap()).is_ok() && std::fs::write(&path, content).is_ok() {
            written.push(relative.clone());
        }
    }
    written
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// A second pass never copies anything
    #[test]
    fn prop_reconciliation_is_idempotent(tree in tree_strategy()) {
        let harness = MirrorTestHarness::new(&["root"]);
        materialize(&harness, &tree);

        harness.sync();
        let count = harness.backup_file_count();

        let second = harness.sync();
        prop_assert_eq!(second[0].ingested, 0);
        prop_assert_eq!(harness.backup_file_count(), count);
    }

    /// Every backed-up file mirrors a source file at the same relative path
    /// with identical bytes, and every source content is represented
    #[test]
    fn prop_mirror_preserves_paths_and_content(tree in tree_strategy()) {
        let harness = MirrorTestHarness::new(&["root"]);
        let written = materialize(&harness, &tree);
        harness.sync();

        let backup_root = harness.backup("root");
        let mut mirrored_contents = Vec::new();
        for entry in walkdir::WalkDir::new(&backup_root).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(&backup_root).unwrap().to_path_buf();
            let mirrored = std::fs::read(entry.path()).unwrap();
            prop_assert_eq!(&mirrored, &std::fs::read(harness.roots[0].join(&relative)).unwrap());
            mirrored_contents.push(mirrored);
        }

        // A source is either copied, or shares its content or its name with a copy
        for relative in &written {
            let content = std::fs::read(harness.roots[0].join(relative)).unwrap();
            let name = relative.file_name().unwrap();
            let represented = mirrored_contents.contains(&content)
                || walkdir::WalkDir::new(&backup_root)
                    .into_iter()
                    .filter_map(|e| e.ok())
                    .any(|e| e.file_name() == name);
            prop_assert!(represented, "{:?} not represented", relative);
        }
    }

    /// Live requests map to the same destination reconciliation uses
    #[test]
    fn prop_live_and_reconcile_destinations_agree(relative in path_strategy()) {
        let harness = MirrorTestHarness::new(&["root"]);
        let source = harness.roots[0].join(&relative);

        let pipeline = EventPipeline::new(harness.ingestor());
        let request = pipeline
            .prepare(&LiveEvent::new(source.clone(), EventOp::Create))
            .unwrap();

        let roots = WatchRoots::new(harness.config.file_system.paths.clone());
        let context = roots.context_for(0, &source).unwrap();
        prop_assert_eq!(&request.context, &context);

        let builder = DestinationBuilder::new(harness.config.backup_root(), roots);
        let destination = builder.destination_path(&context).unwrap();
        prop_assert_eq!(destination, harness.backup("root").join(&relative));
    }

    /// Names with a trailing `~` resolve to the settled name
    #[test]
    fn prop_temp_marker_resolves_to_settled_name(relative in path_strategy()) {
        let harness = MirrorTestHarness::new(&["root"]);
        let settled = harness.roots[0].join(&relative);
        let mut marked = settled.clone().into_os_string();
        marked.push("~");

        let pipeline = EventPipeline::new(harness.ingestor());
        let request = pipeline
            .prepare(&LiveEvent::new(PathBuf::from(marked), EventOp::Write))
            .unwrap();
        prop_assert_eq!(request.source.as_path(), Path::new(&settled));
    }
}
