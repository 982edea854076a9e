//! Content index invariants
//!
//! - Reconcile is idempotent
//! - Discarding the index and reconciling reproduces it
//! - Divergent content for one path is reported, never resolved silently
//! - Destroy drops exactly one volume's copies, and can be undone

mod common;

use arcdiscvist::errors::ArcdErrorCode;
use arcdiscvist::store::ArchiveStore;
use arcdiscvist::volume::VolumeStatus;
use common::TestArchive;

fn two_volume_archive() -> (TestArchive, String, String) {
    let archive = TestArchive::new();
    archive.write("docs/a.txt", b"alpha");
    archive.write("docs/b.txt", b"bravo");
    archive.write("photos/2024/c.jpg", b"charlie");

    let mut store = archive.open();
    let first = archive.build_label(&mut store, "vol1", &["docs", "photos"], 1);
    archive.index(&mut store);
    let second = archive.build_label(&mut store, "vol2", &["docs"], 2);
    archive.index(&mut store);
    drop(store);

    (archive, first, second)
}

// =============================================================================
// Reconcile
// =============================================================================

/// Reconciling twice against unchanged volumes yields an identical index.
#[test]
fn test_reconcile_idempotent() {
    let (archive, _, _) = two_volume_archive();
    let mut store = archive.open();

    let before = store.index().clone();
    let report = archive.index(&mut store);
    assert_eq!(store.index(), &before);
    assert_eq!(report.created, 0);
    assert_eq!(report.copies_added, 0);
    assert_eq!(report.unchanged, 5);
    assert!(report.is_clean());
}

/// Reconcile never removes copies of volumes that are not attached.
#[test]
fn test_reconcile_keeps_unattached_copies() {
    let (archive, first, second) = two_volume_archive();
    std::fs::remove_dir_all(archive.volume_dir("vol2")).unwrap();

    let mut store = archive.open();
    archive.index(&mut store);
    let entry = store.index().entry("docs/a.txt").unwrap();
    assert!(entry.copies.contains(&first));
    assert!(entry.copies.contains(&second));
}

/// Discarding the index and reconciling reproduces every entry.
#[test]
fn test_rebuild_equivalence() {
    let (archive, first, second) = two_volume_archive();
    let mut store = archive.open();
    let before = store.index().clone();

    store.reset_index().unwrap();
    assert!(store.index().is_empty());
    assert!(store.registry().contains(&first));

    archive.index(&mut store);
    assert_eq!(store.index(), &before);
    assert_eq!(store.index().copy_count("docs/a.txt"), 2);
    assert_eq!(store.index().copy_count("photos/2024/c.jpg"), 1);
    assert!(store.index().entry("docs/b.txt").unwrap().copies.contains(&second));
}

/// Discarding the whole store directory also rebuilds, registering labels
/// from the manifests.
#[test]
fn test_rebuild_from_empty_store() {
    let (archive, first, second) = two_volume_archive();
    let before = archive.open().index().clone();

    std::fs::remove_dir_all(&archive.config.state_dir).unwrap();
    let mut store = archive.open();
    archive.index(&mut store);

    assert_eq!(store.index(), &before);
    assert!(store.registry().contains(&first));
    assert!(store.registry().contains(&second));
}

/// Reopening the store sees what the last command committed.
#[test]
fn test_state_survives_reopen() {
    let (archive, _, _) = two_volume_archive();
    let before = archive.open().index().clone();

    let shared = ArchiveStore::open_shared(&archive.config.state_dir).unwrap();
    assert_eq!(shared.index(), &before);
    assert_eq!(shared.index().len(), 3);
}

// =============================================================================
// Conflicts
// =============================================================================

/// Two volumes claiming different content for one path surface a conflict.
#[test]
fn test_divergent_content_is_a_conflict() {
    let archive = TestArchive::new();
    archive.write("docs/a.txt", b"first version");

    let mut store = archive.open();
    let first = archive.build_label(&mut store, "vol1", &["docs"], 1);
    archive.index(&mut store);

    archive.write("docs/a.txt", b"second version");
    let report = archive.build(&mut store, "vol2", &["docs"], 1);
    assert_eq!(report.new_versions, vec!["docs/a.txt"]);
    let second = report.label.unwrap();

    let reconcile = archive.index(&mut store);
    assert_eq!(reconcile.conflicts.len(), 1);
    let conflict = &reconcile.conflicts[0];
    assert_eq!(conflict.path, "docs/a.txt");
    assert_ne!(conflict.claimed_hash, conflict.recorded_hash);

    let mut involved = vec![conflict.volume.clone()];
    involved.extend(conflict.holders.iter().cloned());
    involved.sort();
    let mut expected = vec![first, second];
    expected.sort();
    assert_eq!(involved, expected);

    assert!(store.index().is_conflicted("docs/a.txt"));
    let err = reconcile.into_result().unwrap_err();
    assert_eq!(err.code(), ArcdErrorCode::IntegrityConflict);
}

/// Lookups of a conflicted path fail instead of picking a version.
#[test]
fn test_conflicted_lookup_refused() {
    let archive = TestArchive::new();
    archive.write("a.txt", b"one");
    let mut store = archive.open();
    archive.build_label(&mut store, "vol1", &["a.txt"], 1);
    archive.index(&mut store);

    archive.write("a.txt", b"two");
    archive.build_label(&mut store, "vol2", &["a.txt"], 1);
    archive.index(&mut store);

    let err = store.index().lookup("a.txt").unwrap_err();
    assert_eq!(err.code(), ArcdErrorCode::IntegrityConflict);
}

// =============================================================================
// Destroy
// =============================================================================

/// Destroy removes exactly the destroyed volume's copies.
#[test]
fn test_destroy_drops_only_that_volume() {
    let (archive, first, second) = two_volume_archive();
    let mut store = archive.open();

    let summary = store.destroy(&first).unwrap();
    assert_eq!(summary.copies_dropped, 3);
    assert_eq!(summary.entries_removed, vec!["photos/2024/c.jpg"]);

    let index = store.index();
    assert!(index.entry("photos/2024/c.jpg").is_none());
    for path in ["docs/a.txt", "docs/b.txt"] {
        let entry = index.entry(path).unwrap();
        assert_eq!(entry.copies.iter().collect::<Vec<_>>(), vec![&second]);
    }
    assert_eq!(
        store.registry().get(&first).unwrap().status,
        VolumeStatus::Destroyed
    );
}

/// A destroyed volume stays out of the index even when attached.
#[test]
fn test_destroyed_volume_ignored_by_reconcile() {
    let (archive, first, _) = two_volume_archive();
    let mut store = archive.open();
    store.destroy(&first).unwrap();

    let report = archive.index(&mut store);
    assert_eq!(report.skipped_destroyed, vec![first.clone()]);
    assert!(store.index().entries_on(&first).is_empty());
}

/// Reactivating and reconciling restores the volume's copies.
#[test]
fn test_destroy_undone_by_reactivate() {
    let (archive, first, _) = two_volume_archive();
    let mut store = archive.open();
    let before = store.index().clone();

    store.destroy(&first).unwrap();
    store.reactivate(&first).unwrap();
    assert!(store.registry().get(&first).unwrap().is_active());

    archive.index(&mut store);
    assert_eq!(store.index(), &before);
}

/// Destroy is durable across reopen.
#[test]
fn test_destroy_persisted() {
    let (archive, first, _) = two_volume_archive();
    {
        let mut store = archive.open();
        store.destroy(&first).unwrap();
    }
    let store = archive.open();
    assert!(store.registry().is_destroyed(&first));
    assert!(store.index().entries_on(&first).is_empty());
}

/// Destroying an unknown label is NotFound and changes nothing.
#[test]
fn test_destroy_unknown_label() {
    let (archive, _, _) = two_volume_archive();
    let mut store = archive.open();
    let before = store.state().clone();

    let err = store.destroy("ZZZZZZ").unwrap_err();
    assert_eq!(err.code(), ArcdErrorCode::NotFound);
    assert_eq!(store.state(), &before);
}
