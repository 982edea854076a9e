//! Build planner redundancy tests
//!
//! - A build with target `c` brings every included path up to `c` copies
//! - Paths already at `c` copies are never re-included
//! - Builds publish whole volumes or nothing

mod common;

use arcdiscvist::build::{BuildRequest, Builder, Destination};
use arcdiscvist::container::TarContainer;
use arcdiscvist::manifest::{bundle_key, manifest_key};
use common::TestArchive;

fn three_files() -> TestArchive {
    let archive = TestArchive::new();
    archive.write("music/a.flac", &b"a".repeat(300));
    archive.write("music/b.flac", &b"b".repeat(200));
    archive.write("music/c.flac", &b"c".repeat(100));
    archive
}

/// After building with c=2 and indexing, every included path has
/// min(2, volumes holding it) copies.
#[test]
fn test_build_with_two_copies_reaches_target() {
    let archive = three_files();
    let mut store = archive.open();

    archive.build_label(&mut store, "vol1", &["music"], 1);
    archive.index(&mut store);
    archive.write("music/d.flac", b"late addition");

    let second = archive.build(&mut store, "vol2", &["music"], 2);
    assert_eq!(second.files, 4);
    assert_eq!(second.satisfied, 0);
    archive.index(&mut store);

    let index = store.index();
    for path in ["music/a.flac", "music/b.flac", "music/c.flac"] {
        assert_eq!(index.copy_count(path), 2, "{}", path);
    }
    assert_eq!(index.copy_count("music/d.flac"), 1);
}

/// Paths already at the target are skipped; only the short ones are added.
#[test]
fn test_satisfied_paths_not_reincluded() {
    let archive = three_files();
    let mut store = archive.open();

    archive.build_label(&mut store, "vol1", &["music"], 1);
    archive.index(&mut store);
    archive.write("music/d.flac", b"late addition");
    archive.build_label(&mut store, "vol2", &["music"], 2);
    archive.index(&mut store);

    let third = archive.build(&mut store, "vol3", &["music"], 2);
    let label = third.label.unwrap();
    assert_eq!(third.files, 1);
    assert_eq!(third.satisfied, 3);

    archive.index(&mut store);
    assert_eq!(store.index().entries_on(&label).len(), 1);
    assert_eq!(store.index().copy_count("music/d.flac"), 2);
}

/// Nothing is written when every path has enough copies.
#[test]
fn test_nothing_to_build() {
    let archive = three_files();
    let mut store = archive.open();
    archive.build_label(&mut store, "vol1", &["music"], 1);
    archive.index(&mut store);
    let volumes = store.registry().len();

    let report = archive.build(&mut store, "vol2", &["music"], 1);
    assert!(report.label.is_none());
    assert_eq!(report.satisfied, 3);
    assert_eq!(store.registry().len(), volumes);
    assert!(!archive.volume_dir("vol2").exists());
}

/// Files that do not fit are deferred; smaller ones still get packed.
#[test]
fn test_capacity_defers_what_does_not_fit() {
    let archive = three_files();
    let mut store = archive.open();
    let container = TarContainer::new(false);

    let request = BuildRequest {
        destination: Destination::Directory(archive.volume_dir("small")),
        subtrees: vec!["music".to_string()],
        min_copies: 1,
        capacity: Some(350),
        pack_small: true,
    };
    let report = Builder::new(&archive.config, &container)
        .build(&mut store, &request)
        .unwrap();

    assert_eq!(report.bytes, 300);
    assert_eq!(report.deferred.len(), 2);
    assert!(report.deferred.contains(&"music/b.flac".to_string()));
}

/// The published volume carries bundle and manifest, and nothing staged.
#[test]
fn test_published_volume_layout() {
    let archive = three_files();
    let mut store = archive.open();
    let label = archive.build_label(&mut store, "vol1", &["music"], 1);

    let dir = archive.volume_dir("vol1");
    assert!(dir.join(bundle_key(&label)).is_file());
    assert!(dir.join(manifest_key(&label)).is_file());

    let stray: Vec<_> = std::fs::read_dir(&dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .filter(|name| name.starts_with('.'))
        .collect();
    assert!(stray.is_empty(), "{:?}", stray);
}

/// A destination that cannot be created aborts the build.
#[test]
fn test_unwritable_destination_is_fatal() {
    let archive = three_files();
    let mut store = archive.open();
    let blocker = archive.path().join("blocker");
    std::fs::write(&blocker, b"not a directory").unwrap();

    let container = TarContainer::new(false);
    let request = BuildRequest {
        destination: Destination::Directory(blocker.join("vol")),
        subtrees: vec!["music".to_string()],
        min_copies: 1,
        capacity: None,
        pack_small: false,
    };
    let err = Builder::new(&archive.config, &container)
        .build(&mut store, &request)
        .unwrap_err();
    assert!(err.is_fatal());
    assert!(store.registry().is_empty());
}
