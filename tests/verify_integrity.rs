//! Verification and repair
//!
//! - Altering one file's bytes on a volume makes verify report exactly
//!   that file
//! - With repair data, the damage is repaired and written back

mod common;

use arcdiscvist::container::TarContainer;
use arcdiscvist::errors::ArcdErrorCode;
use arcdiscvist::verify::{FileState, VerifyStatus, Verifier};
use arcdiscvist::volume::Discovery;
use common::TestArchive;

fn seeded(archive: &TestArchive) -> String {
    archive.write("docs/a.txt", b"alpha file, left alone");
    archive.write("docs/b.txt", b"bravo file, about to be damaged");
    archive.write("docs/c.txt", b"charlie file, also left alone");

    let mut store = archive.open();
    let label = archive.build_label(&mut store, "vol1", &["docs"], 1);
    archive.index(&mut store);
    label
}

fn verify_all(archive: &TestArchive) -> arcdiscvist::verify::VerifyReport {
    let container = TarContainer::new(false);
    let discovered = Discovery::from_config(&archive.config).discover();
    Verifier::new(&container).verify_all(&discovered, &[])
}

/// An untouched volume verifies clean.
#[test]
fn test_intact_volume_verifies() {
    let archive = TestArchive::new();
    let label = seeded(&archive);

    let report = verify_all(&archive);
    assert_eq!(report.volumes.len(), 1);
    assert_eq!(report.volumes[0].label, label);
    assert_eq!(report.volumes[0].status, VerifyStatus::Ok);
    assert!(report.into_result().is_ok());
}

/// Without repair data, exactly the altered file is reported corrupt.
#[test]
fn test_corruption_detected_exactly() {
    let archive = TestArchive::without_repair();
    let label = seeded(&archive);
    archive.damage_bundle("vol1", &label, b"bravo file");

    let report = verify_all(&archive);
    let volume = &report.volumes[0];
    assert_eq!(
        volume.status,
        VerifyStatus::Corrupt {
            unrecoverable: vec!["docs/b.txt".to_string()]
        }
    );
    for check in &volume.files {
        if check.path == "docs/b.txt" {
            assert!(matches!(check.state, FileState::Corrupt { .. }));
        } else {
            assert_eq!(check.state, FileState::Ok, "{}", check.path);
        }
    }
    assert!(!volume.rewritten);

    let err = report.into_result().unwrap_err();
    assert_eq!(err.code(), ArcdErrorCode::Corrupt);
    assert!(err.message().contains(&label));
}

/// With repair data the damaged file is repaired and the volume rewritten.
#[test]
fn test_damage_repaired_on_rewritable_volume() {
    let archive = TestArchive::new();
    let label = seeded(&archive);
    archive.damage_bundle("vol1", &label, b"bravo file");

    let report = verify_all(&archive);
    let volume = &report.volumes[0];
    assert_eq!(volume.status, VerifyStatus::Repaired { files: 1 });
    assert!(volume.rewritten);
    let repaired: Vec<&str> = volume
        .files
        .iter()
        .filter(|c| c.state == FileState::Repaired)
        .map(|c| c.path.as_str())
        .collect();
    assert_eq!(repaired, vec!["docs/b.txt"]);

    let again = verify_all(&archive);
    assert_eq!(again.volumes[0].status, VerifyStatus::Ok);
}

/// Asking for a volume that is not attached is a per-volume failure.
#[test]
fn test_unattached_label_reported() {
    let archive = TestArchive::new();
    let label = seeded(&archive);

    let container = TarContainer::new(false);
    let discovered = Discovery::from_config(&archive.config).discover();
    let report = Verifier::new(&container)
        .verify_all(&discovered, &[label.clone(), "ZZZZZZ".to_string()]);

    assert_eq!(report.volumes.len(), 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].item, "ZZZZZZ");
    assert_eq!(report.failures[0].code, ArcdErrorCode::Unavailable.as_str());
}
