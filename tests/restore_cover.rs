//! Restore planning and execution
//!
//! - The plan covers every restorable file with as few volumes as the
//!   greedy cover finds
//! - Restored files are byte-identical to the archived ones
//! - A volume that cannot be reached is replaced by another copy

mod common;

use std::fs;

use arcdiscvist::container::TarContainer;
use arcdiscvist::errors::ArcdErrorCode;
use arcdiscvist::restore::{AutoPrompt, RestoreOptions, Restorer, StepState};
use arcdiscvist::volume::Discovery;
use common::TestArchive;

/// vol1 = {x/a, x/b, x/c}, vol2 = {x/c, y/d}
fn overlapping_volumes() -> (TestArchive, String, String) {
    let archive = TestArchive::new();
    archive.write("x/a.txt", b"file a");
    archive.write("x/b.txt", b"file b");
    archive.write("x/c.txt", b"file c");

    let mut store = archive.open();
    let first = archive.build_label(&mut store, "vol1", &["x"], 1);
    archive.index(&mut store);

    archive.write("y/d.txt", b"file d");
    let second = archive.build_label(&mut store, "vol2", &["x/c.txt", "y"], 2);
    archive.index(&mut store);
    drop(store);

    (archive, first, second)
}

fn paths(list: &[&str]) -> Vec<String> {
    list.iter().map(|p| p.to_string()).collect()
}

// =============================================================================
// Planning
// =============================================================================

/// Everything needs both volumes; the bigger one is asked for first.
#[test]
fn test_plan_covers_with_two_volumes() {
    let (archive, first, second) = overlapping_volumes();
    let store = archive.open();
    let discovery = Discovery::from_config(&archive.config);
    let container = TarContainer::new(false);
    let restorer = Restorer::new(
        store.state(),
        &discovery,
        &container,
        RestoreOptions::from_config(&archive.config),
    );

    let (plan, failures) = restorer.plan(&paths(&["x", "y"]));
    assert!(failures.is_empty());
    assert_eq!(plan.labels(), vec![first.as_str(), second.as_str()]);
    assert_eq!(plan.volumes[0].paths.len(), 3);
    assert_eq!(plan.volumes[1].paths, vec!["y/d.txt"]);
    assert!(plan.unrecoverable.is_empty());
}

/// A request one volume can satisfy needs only that volume.
#[test]
fn test_plan_single_volume_suffices() {
    let (archive, _, second) = overlapping_volumes();
    let store = archive.open();
    let discovery = Discovery::from_config(&archive.config);
    let container = TarContainer::new(false);
    let restorer = Restorer::new(
        store.state(),
        &discovery,
        &container,
        RestoreOptions::from_config(&archive.config),
    );

    let (plan, _) = restorer.plan(&paths(&["x/c.txt", "y/d.txt"]));
    assert_eq!(plan.labels(), vec![second.as_str()]);
}

/// After a destroy the plan only uses the volumes that remain.
#[test]
fn test_plan_after_destroy_uses_remaining_volume() {
    let (archive, first, _) = overlapping_volumes();
    {
        let mut store = archive.open();
        store.destroy(&first).unwrap();
    }
    let store = archive.open();
    let discovery = Discovery::from_config(&archive.config);
    let container = TarContainer::new(false);
    let restorer = Restorer::new(
        store.state(),
        &discovery,
        &container,
        RestoreOptions::from_config(&archive.config),
    );

    let (plan, failures) = restorer.plan(&paths(&["x"]));
    assert_eq!(plan.volumes.len(), 1);
    assert_eq!(plan.volumes[0].paths, vec!["x/c.txt"]);
    assert!(failures.is_empty());
    assert!(store.index().entry("x/a.txt").is_none());
}

// =============================================================================
// Execution
// =============================================================================

/// Restoring everything brings back byte-identical files.
#[test]
fn test_restore_all_byte_identical() {
    let (archive, first, second) = overlapping_volumes();
    let store = archive.open();
    let discovery = Discovery::from_config(&archive.config);
    let container = TarContainer::new(false);
    let restorer = Restorer::new(
        store.state(),
        &discovery,
        &container,
        RestoreOptions::from_config(&archive.config),
    );

    let target = archive.restored();
    let report = restorer
        .restore(&paths(&["x", "y"]), &target, &mut AutoPrompt)
        .unwrap()
        .into_result()
        .unwrap();

    assert_eq!(report.restored.len(), 4);
    assert_eq!(report.planned, vec![first, second]);
    for name in ["x/a.txt", "x/b.txt", "x/c.txt", "y/d.txt"] {
        assert_eq!(
            fs::read(target.join(name)).unwrap(),
            fs::read(archive.config.source_root.join(name)).unwrap(),
            "{}",
            name
        );
    }
}

/// When the bigger volume is gone, its shared file comes from the other.
#[test]
fn test_missing_volume_falls_back_to_other_copy() {
    let (archive, _, second) = overlapping_volumes();
    fs::remove_dir_all(archive.volume_dir("vol1")).unwrap();

    let store = archive.open();
    let discovery = Discovery::from_config(&archive.config);
    let container = TarContainer::new(false);
    let restorer = Restorer::new(
        store.state(),
        &discovery,
        &container,
        RestoreOptions::from_config(&archive.config),
    );

    let target = archive.restored();
    let report = restorer
        .restore(&paths(&["x", "y"]), &target, &mut AutoPrompt)
        .unwrap();

    let skipped: Vec<_> = report
        .steps
        .iter()
        .filter(|s| s.state == StepState::Skipped)
        .collect();
    assert_eq!(skipped.len(), 1);
    assert!(report.restored.contains(&"x/c.txt".to_string()));
    assert!(report.restored.contains(&"y/d.txt".to_string()));
    assert!(report
        .steps
        .iter()
        .any(|s| s.label == second && s.state == StepState::Extracted));

    let mut failed: Vec<&str> = report.failures.iter().map(|f| f.item.as_str()).collect();
    failed.sort();
    assert_eq!(failed, vec!["x/a.txt", "x/b.txt"]);

    // Every failure is the missing volume, so that is what the run reports
    let err = report.into_result().unwrap_err();
    assert_eq!(err.code(), ArcdErrorCode::Unavailable);
}

/// A second run over a complete target restores nothing again.
#[test]
fn test_rerun_finds_everything_present() {
    let (archive, _, _) = overlapping_volumes();
    let store = archive.open();
    let discovery = Discovery::from_config(&archive.config);
    let container = TarContainer::new(false);
    let restorer = Restorer::new(
        store.state(),
        &discovery,
        &container,
        RestoreOptions::from_config(&archive.config),
    );

    let target = archive.restored();
    let request = paths(&["x", "y"]);
    restorer.restore(&request, &target, &mut AutoPrompt).unwrap();

    let again = restorer.restore(&request, &target, &mut AutoPrompt).unwrap();
    assert_eq!(again.already_present, 4);
    assert!(again.restored.is_empty());
    assert!(again.steps.is_empty());
}
