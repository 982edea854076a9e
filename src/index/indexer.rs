//! Indexer
//!
//! Reconciles the content index against the volumes discovery can see.
//! Reconcile only adds: volumes that are not attached keep every copy they
//! had. Destroyed volumes are skipped even when attached.

use serde::Serialize;

use super::content::{IntegrityConflict, RecordOutcome};
use crate::errors::{ArcdError, ArcdResult, ItemFailure};
use crate::observability::{log_event_with_fields, Event, ObservationScope};
use crate::store::{ArchiveStore, StoreState};
use crate::volume::{DiscoveredVolume, Discovery};

/// Files recorded from one volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolumeIndexed {
    pub label: String,
    pub location: String,
    pub files: usize,
}

/// Outcome of a reconcile pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub volumes: Vec<VolumeIndexed>,
    /// New paths
    pub created: usize,
    /// New holders for known content
    pub copies_added: usize,
    pub unchanged: usize,
    pub stale: usize,
    pub conflicts: Vec<IntegrityConflict>,
    /// Attached volumes ignored because they are destroyed
    pub skipped_destroyed: Vec<String>,
    /// Attached volumes that need decryption first
    pub encrypted: Vec<String>,
    pub failures: Vec<ItemFailure>,
}

impl ReconcileReport {
    /// Turn unresolved conflicts and failures into an error.
    ///
    /// Conflicts take precedence: they are never resolved silently.
    pub fn into_result(self) -> ArcdResult<Self> {
        if let Some(first) = self.conflicts.first() {
            let mut err = first.clone().into_error();
            if self.conflicts.len() > 1 {
                err = err.with_detail(&format!(" (and {} more)", self.conflicts.len() - 1));
            }
            return Err(err);
        }
        if !self.failures.is_empty() {
            return Err(ArcdError::partial_failure(
                self.failures.len(),
                self.volumes.len() + self.failures.len(),
            ));
        }
        Ok(self)
    }

    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty() && self.failures.is_empty()
    }
}

/// Record every attached volume's manifest into the state.
///
/// Volumes are processed in label order so conflict outcomes do not
/// depend on discovery order.
pub fn reconcile_volumes(volumes: &[DiscoveredVolume], state: &mut StoreState) -> ReconcileReport {
    let mut report = ReconcileReport::default();
    let mut ordered: Vec<&DiscoveredVolume> = volumes.iter().collect();
    ordered.sort_by(|a, b| a.label.cmp(&b.label));

    for volume in ordered {
        if state.registry.is_destroyed(&volume.label) {
            log_event_with_fields(
                Event::DestroyedVolumeSeen,
                &[("label", volume.label.as_str()), ("location", volume.location.as_str())],
            );
            report.skipped_destroyed.push(volume.label.clone());
            continue;
        }

        let manifest = match volume.read_manifest() {
            Ok(manifest) => manifest,
            Err(e) => {
                report.failures.push(ItemFailure::new(&volume.label, &e));
                continue;
            }
        };

        if let Err(e) = state.registry.register(
            &volume.label,
            manifest.medium,
            Some(volume.location.clone()),
        ) {
            report.failures.push(ItemFailure::new(&volume.label, &e));
            continue;
        }

        for entry in &manifest.files {
            match state.index.record_entry(entry, &volume.label) {
                Ok(RecordOutcome::Created) => report.created += 1,
                Ok(RecordOutcome::CopyAdded) => report.copies_added += 1,
                Ok(RecordOutcome::Unchanged) => report.unchanged += 1,
                Ok(RecordOutcome::Stale) => report.stale += 1,
                Ok(RecordOutcome::Conflict(conflict)) => {
                    log_event_with_fields(
                        Event::IntegrityConflict,
                        &[
                            ("path", conflict.path.as_str()),
                            ("volume", conflict.volume.as_str()),
                            ("holders", conflict.holders.join(",").as_str()),
                        ],
                    );
                    report.conflicts.push(conflict);
                }
                Err(e) => report
                    .failures
                    .push(ItemFailure::new(format!("{}:{}", volume.label, entry.path), &e)),
            }
        }

        let files = manifest.files.len().to_string();
        log_event_with_fields(
            Event::VolumeIndexed,
            &[("label", volume.label.as_str()), ("files", files.as_str())],
        );
        report.volumes.push(VolumeIndexed {
            label: volume.label.clone(),
            location: volume.location.clone(),
            files: manifest.files.len(),
        });
    }

    report
}

/// Reconciles a store against discovery
pub struct Indexer<'a> {
    discovery: &'a Discovery,
}

impl<'a> Indexer<'a> {
    pub fn new(discovery: &'a Discovery) -> Self {
        Self { discovery }
    }

    /// Discover attached volumes, record their manifests and commit.
    ///
    /// Conflicts and per-volume failures are in the report; only
    /// structural failures are returned as errors.
    pub fn reconcile(&self, store: &mut ArchiveStore) -> ArcdResult<ReconcileReport> {
        let scope = ObservationScope::new("RECONCILE");

        let discovered = self.discovery.discover();
        let state = match store.state_mut() {
            Ok(state) => state,
            Err(e) => {
                scope.fail(e.message(), e.is_fatal());
                return Err(e);
            }
        };
        let mut report = reconcile_volumes(&discovered.volumes, state);
        report.encrypted = discovered.encrypted.into_iter().map(|(label, _)| label).collect();

        if let Err(e) = store.commit() {
            scope.fail(e.message(), true);
            return Err(e);
        }

        let volumes = report.volumes.len().to_string();
        let conflicts = report.conflicts.len().to_string();
        scope.complete_with_fields(&[
            ("volumes", volumes.as_str()),
            ("conflicts", conflicts.as_str()),
        ]);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{LocalBackend, StorageBackend};
    use crate::errors::ArcdErrorCode;
    use crate::manifest::{manifest_key, ContentHash, ManifestEntry, VolumeManifest};
    use crate::volume::Medium;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn volume(temp: &TempDir, label: &str, files: &[(&str, &str)]) -> DiscoveredVolume {
        let dir = temp.path().join(label);
        let backend = LocalBackend::new(dir.clone());
        let entries = files
            .iter()
            .map(|(path, content)| ManifestEntry {
                path: path.to_string(),
                hash: ContentHash::of_bytes(content.as_bytes()),
                size: content.len() as u64,
                mode: 0o644,
                modified: 0,
            })
            .collect();
        let manifest = VolumeManifest::new(label, Medium::Rewritable, entries).unwrap();
        backend
            .put(&manifest_key(label), &manifest.to_json().unwrap())
            .unwrap();
        DiscoveredVolume::new(label, dir.display().to_string(), Medium::Rewritable, Arc::new(backend))
    }

    #[test]
    fn test_reconcile_idempotent() {
        let temp = TempDir::new().unwrap();
        let volumes = vec![
            volume(&temp, "BBBBBB", &[("a", "1"), ("b", "2")]),
            volume(&temp, "AAAAAA", &[("a", "1")]),
        ];

        let mut state = StoreState::default();
        let first = reconcile_volumes(&volumes, &mut state);
        assert_eq!(first.created, 2);
        assert_eq!(first.copies_added, 1);
        let snapshot = state.clone();

        let second = reconcile_volumes(&volumes, &mut state);
        assert_eq!(second.unchanged, 3);
        assert_eq!(state, snapshot);
    }

    #[test]
    fn test_conflict_reported_and_raised() {
        let temp = TempDir::new().unwrap();
        let volumes = vec![
            volume(&temp, "AAAAAA", &[("docs/a.txt", "v1")]),
            volume(&temp, "BBBBBB", &[("docs/a.txt", "v2")]),
        ];

        let mut state = StoreState::default();
        let report = reconcile_volumes(&volumes, &mut state);
        assert_eq!(report.conflicts.len(), 1);

        let err = report.into_result().unwrap_err();
        assert_eq!(err.code(), ArcdErrorCode::IntegrityConflict);
        assert!(err.message().contains("AAAAAA"));
        assert!(err.message().contains("BBBBBB"));
        assert!(state.index.lookup("docs/a.txt").is_err());
    }

    #[test]
    fn test_destroyed_volume_skipped() {
        let temp = TempDir::new().unwrap();
        let volumes = vec![volume(&temp, "AAAAAA", &[("a", "1")])];

        let mut state = StoreState::default();
        state.registry.register("AAAAAA", Medium::Rewritable, None).unwrap();
        state.registry.mark_destroyed("AAAAAA").unwrap();

        let report = reconcile_volumes(&volumes, &mut state);
        assert_eq!(report.skipped_destroyed, vec!["AAAAAA"]);
        assert!(state.index.is_empty());
    }

    #[test]
    fn test_unreadable_manifest_is_item_failure() {
        let temp = TempDir::new().unwrap();
        let good = volume(&temp, "AAAAAA", &[("a", "1")]);
        let dir = temp.path().join("BADBAD");
        let backend = LocalBackend::new(dir.clone());
        backend.put("BADBAD.meta.arcd", b"garbage").unwrap();
        let bad = DiscoveredVolume::new("BADBAD", "bad", Medium::Rewritable, Arc::new(backend));

        let mut state = StoreState::default();
        let report = reconcile_volumes(&[good, bad], &mut state);
        assert_eq!(report.volumes.len(), 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].item, "BADBAD");
        assert!(!state.registry.contains("BADBAD"));
    }
}
