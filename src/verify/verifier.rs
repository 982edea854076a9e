//! Verifier
//!
//! A volume is checked in one sequential pass over its bundle. Files with
//! repair data are buffered so a damaged copy can be handed to the decoder;
//! everything else is hashed as it streams past.

use std::collections::BTreeMap;
use std::io::{self, Read, Write};

use super::{FileCheck, FileState, VerifyReport, VerifyStatus, VolumeVerification};
use crate::container::{ArchiveContainer, Visit};
use crate::errors::{ArcdError, ArcdResult, ItemFailure};
use crate::manifest::{bundle_key, repair_key, ContentHash, HashingReader, VolumeManifest};
use crate::observability::{log_event_with_fields, Event, Logger, ObservationScope};
use crate::repair::RepairData;
use crate::volume::{DiscoveredVolume, DiscoveryReport};

/// What the bundle pass saw for one manifest path
enum Seen {
    Intact,
    Damaged { bytes: Option<Vec<u8>>, reason: String },
}

/// Checks volumes against their manifests
pub struct Verifier<'a> {
    container: &'a dyn ArchiveContainer,
}

impl<'a> Verifier<'a> {
    pub fn new(container: &'a dyn ArchiveContainer) -> Self {
        Self { container }
    }

    /// Verify the discovered volumes, or only the named ones
    pub fn verify_all(&self, discovered: &DiscoveryReport, labels: &[String]) -> VerifyReport {
        let mut report = VerifyReport::default();

        for label in labels {
            if discovered.get(label).is_none() {
                report
                    .failures
                    .push(ItemFailure::new(label, &ArcdError::unavailable(label)));
            }
        }

        for volume in &discovered.volumes {
            if !labels.is_empty() && !labels.contains(&volume.label) {
                continue;
            }
            match self.verify_volume(volume) {
                Ok(result) => report.volumes.push(result),
                Err(e) => report.failures.push(ItemFailure::new(&volume.label, &e)),
            }
        }

        report
    }

    /// Verify one volume, repairing what its repair data allows
    pub fn verify_volume(&self, volume: &DiscoveredVolume) -> ArcdResult<VolumeVerification> {
        let scope = ObservationScope::with_fields("VERIFY", &[("label", volume.label.as_str())]);

        let manifest = match volume.read_manifest() {
            Ok(manifest) => manifest,
            Err(e) => {
                scope.fail(e.message(), false);
                return Err(e);
            }
        };
        let repair = self.load_repair(volume);

        let mut seen = self.scan_bundle(volume, &manifest, repair.as_ref());
        for entry in &manifest.files {
            seen.entry(entry.path.clone()).or_insert_with(|| Seen::Damaged {
                bytes: None,
                reason: "missing from bundle".to_string(),
            });
        }

        let mut files = Vec::with_capacity(manifest.files.len());
        let mut repaired = BTreeMap::new();
        let mut unrecoverable = Vec::new();

        for (path, state) in seen {
            let Some(entry) = manifest.entry(&path) else {
                continue;
            };
            let state = match state {
                Seen::Intact => FileState::Ok,
                Seen::Damaged { bytes, reason } => {
                    let attempt = repair
                        .as_ref()
                        .and_then(|r| r.get(&path))
                        .filter(|r| r.hash == entry.hash)
                        .map(|r| r.repair(bytes.as_deref().unwrap_or(&[])));
                    match attempt {
                        Some(Ok(fixed)) => {
                            log_event_with_fields(
                                Event::FileRepaired,
                                &[("label", volume.label.as_str()), ("path", path.as_str())],
                            );
                            repaired.insert(path.clone(), fixed);
                            FileState::Repaired
                        }
                        other => {
                            let reason = match other {
                                Some(Err(e)) => format!("{}; {}", reason, e.message()),
                                _ => format!("{}; no repair data", reason),
                            };
                            log_event_with_fields(
                                Event::FileCorrupt,
                                &[
                                    ("label", volume.label.as_str()),
                                    ("path", path.as_str()),
                                    ("reason", reason.as_str()),
                                ],
                            );
                            unrecoverable.push(path.clone());
                            FileState::Corrupt { reason }
                        }
                    }
                }
            };
            files.push(FileCheck { path, state });
        }

        let rewritten = if !repaired.is_empty() && volume.medium.is_rewritable() {
            match self.rewrite_bundle(volume, &repaired) {
                Ok(()) => true,
                Err(e) => {
                    Logger::warn(
                        "VERIFY_REWRITE_FAILED",
                        &[("label", volume.label.as_str()), ("reason", e.message())],
                    );
                    false
                }
            }
        } else {
            false
        };

        let status = if !unrecoverable.is_empty() {
            VerifyStatus::Corrupt { unrecoverable }
        } else if !repaired.is_empty() {
            VerifyStatus::Repaired {
                files: repaired.len(),
            }
        } else {
            VerifyStatus::Ok
        };

        let status_label = status.label();
        scope.complete_with_fields(&[("status", status_label.as_str())]);

        Ok(VolumeVerification {
            label: volume.label.clone(),
            location: volume.location.clone(),
            status,
            files,
            rewritten,
        })
    }

    fn load_repair(&self, volume: &DiscoveredVolume) -> Option<RepairData> {
        if !volume.has_repair_data() {
            return None;
        }
        let loaded = volume
            .backend()
            .get(&repair_key(&volume.label))
            .map_err(ArcdError::from)
            .and_then(|data| RepairData::from_json(&data));
        match loaded {
            Ok(repair) => Some(repair),
            Err(e) => {
                Logger::warn(
                    "REPAIR_DATA_UNREADABLE",
                    &[("label", volume.label.as_str()), ("reason", e.message())],
                );
                None
            }
        }
    }

    /// Stream the bundle once, classifying every manifest path it contains
    fn scan_bundle(
        &self,
        volume: &DiscoveredVolume,
        manifest: &VolumeManifest,
        repair: Option<&RepairData>,
    ) -> BTreeMap<String, Seen> {
        let mut seen = BTreeMap::new();

        let reader = match volume.backend().reader(&bundle_key(&volume.label)) {
            Ok(reader) => reader,
            Err(e) => {
                Logger::warn(
                    "BUNDLE_UNREADABLE",
                    &[("label", volume.label.as_str()), ("reason", e.to_string().as_str())],
                );
                return seen;
            }
        };

        let result = self.container.unpack(reader, &mut |file| {
            let Some(entry) = manifest.entry(&file.path) else {
                return Ok(Visit::Continue);
            };
            if seen.contains_key(&file.path) {
                return Ok(Visit::Continue);
            }

            let buffer = repair.map(|r| r.get(&file.path).is_some()).unwrap_or(false);
            let outcome = if buffer {
                let mut bytes = Vec::new();
                file.reader
                    .read_to_end(&mut bytes)
                    .map(|_| (ContentHash::of_bytes(&bytes), bytes.len() as u64, Some(bytes)))
            } else {
                let mut hashing = HashingReader::new(&mut *file.reader);
                io::copy(&mut hashing, &mut io::sink()).map(|_| {
                    let (hash, size) = hashing.finish();
                    (hash, size, None)
                })
            };

            let state = match outcome {
                Ok((hash, size, _)) if hash == entry.hash && size == entry.size => Seen::Intact,
                Ok((_, _, bytes)) => Seen::Damaged {
                    bytes,
                    reason: "content hash mismatch".to_string(),
                },
                Err(e) => Seen::Damaged {
                    bytes: None,
                    reason: format!("unreadable: {}", e),
                },
            };
            seen.insert(file.path, state);
            Ok(Visit::Continue)
        });

        if let Err(e) = result {
            Logger::warn(
                "BUNDLE_DAMAGED",
                &[("label", volume.label.as_str()), ("reason", e.message())],
            );
        }
        seen
    }

    /// Write the bundle back with repaired bytes substituted
    ///
    /// The new bundle is staged beside the old one and renamed over it, so
    /// a failed rewrite leaves the volume as it was.
    fn rewrite_bundle(
        &self,
        volume: &DiscoveredVolume,
        repaired: &BTreeMap<String, Vec<u8>>,
    ) -> ArcdResult<()> {
        let key = bundle_key(&volume.label);
        let reader = volume.backend().reader(&key)?;
        let mut reader = Some(reader);
        let mut failure: Option<ArcdError> = None;

        let stored = volume.backend().put_stream(&key, &mut |out: &mut dyn Write| {
            let Some(reader) = reader.take() else {
                return Err(io::Error::new(io::ErrorKind::Other, "bundle already consumed"));
            };
            self.container
                .rewrite(reader, &|path| repaired.get(path).cloned(), out)
                .map_err(|e| {
                    let message = e.message().to_string();
                    failure = Some(e);
                    io::Error::new(io::ErrorKind::Other, message)
                })
        });

        match (stored, failure) {
            (_, Some(e)) => Err(e),
            (Err(e), None) => Err(e.into()),
            (Ok(()), None) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{LocalBackend, StorageBackend};
    use crate::container::{PackEntry, TarContainer};
    use crate::manifest::{manifest_key, ManifestEntry};
    use crate::repair::RepairEncoder;
    use crate::volume::Medium;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    /// Write a volume holding the given files; returns it and its directory
    fn write_volume(
        temp: &TempDir,
        files: &[(&str, Vec<u8>)],
        with_repair: bool,
    ) -> (DiscoveredVolume, std::path::PathBuf) {
        let label = "KQ7MZA";
        let src = temp.path().join("src");
        let dir = temp.path().join("vol");
        fs::create_dir_all(&src).unwrap();

        let mut pack = Vec::new();
        let mut entries = Vec::new();
        let mut repair = RepairData::new(label);
        let encoder = RepairEncoder::new(64, 3000, 1 << 20);
        for (path, bytes) in files {
            let source = src.join(path);
            fs::write(&source, bytes).unwrap();
            pack.push(PackEntry {
                path: path.to_string(),
                source,
                mode: 0o644,
                modified: 0,
            });
            entries.push(ManifestEntry {
                path: path.to_string(),
                hash: ContentHash::of_bytes(bytes),
                size: bytes.len() as u64,
                mode: 0o644,
                modified: 0,
            });
            if let Some(r) = encoder.encode(bytes) {
                repair.files.insert(path.to_string(), r);
            }
        }

        let backend = LocalBackend::new(dir.clone());
        let mut bundle = Vec::new();
        TarContainer::new(false).pack(&pack, &mut bundle).unwrap();
        backend.put(&bundle_key(label), &bundle).unwrap();
        let manifest = VolumeManifest::new(label, Medium::Rewritable, entries).unwrap();
        backend.put(&manifest_key(label), &manifest.to_json().unwrap()).unwrap();
        if with_repair {
            backend.put(&repair_key(label), &repair.to_json().unwrap()).unwrap();
        }

        let volume = DiscoveredVolume::new(
            label,
            dir.display().to_string(),
            Medium::Rewritable,
            Arc::new(backend),
        );
        (volume, dir)
    }

    fn corrupt_in_bundle(dir: &std::path::Path, needle: &[u8]) {
        let path = dir.join("KQ7MZA.arcd");
        let mut data = fs::read(&path).unwrap();
        let at = data.windows(needle.len()).position(|w| w == needle).unwrap();
        data[at] ^= 0x20;
        fs::write(&path, data).unwrap();
    }

    fn sample_files() -> Vec<(&'static str, Vec<u8>)> {
        vec![
            ("a.txt", b"first file contents ".repeat(20)),
            ("b.txt", b"second file, untouched".to_vec()),
        ]
    }

    #[test]
    fn test_intact_volume_ok() {
        let temp = TempDir::new().unwrap();
        let (volume, _) = write_volume(&temp, &sample_files(), false);

        let container = TarContainer::new(false);
        let result = Verifier::new(&container).verify_volume(&volume).unwrap();
        assert_eq!(result.status, VerifyStatus::Ok);
        assert_eq!(result.files.len(), 2);
    }

    #[test]
    fn test_altered_file_is_exactly_the_corrupt_one() {
        let temp = TempDir::new().unwrap();
        let (volume, dir) = write_volume(&temp, &sample_files(), false);
        corrupt_in_bundle(&dir, b"first file");

        let container = TarContainer::new(false);
        let result = Verifier::new(&container).verify_volume(&volume).unwrap();

        assert_eq!(
            result.status,
            VerifyStatus::Corrupt {
                unrecoverable: vec!["a.txt".to_string()]
            }
        );
        let b = result.files.iter().find(|f| f.path == "b.txt").unwrap();
        assert_eq!(b.state, FileState::Ok);
    }

    #[test]
    fn test_damage_repaired_and_rewritten() {
        let temp = TempDir::new().unwrap();
        let (volume, dir) = write_volume(&temp, &sample_files(), true);
        corrupt_in_bundle(&dir, b"first file");

        let container = TarContainer::new(false);
        let verifier = Verifier::new(&container);
        let result = verifier.verify_volume(&volume).unwrap();
        assert_eq!(result.status, VerifyStatus::Repaired { files: 1 });
        assert!(result.rewritten);
        let hidden: Vec<_> = fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .filter(|name| name.to_string_lossy().starts_with('.'))
            .collect();
        assert!(hidden.is_empty(), "{:?}", hidden);

        let again = verifier.verify_volume(&volume).unwrap();
        assert_eq!(again.status, VerifyStatus::Ok);
    }

    #[test]
    fn test_missing_bundle_reports_every_file() {
        let temp = TempDir::new().unwrap();
        let (volume, dir) = write_volume(&temp, &sample_files(), false);
        fs::remove_file(dir.join("KQ7MZA.arcd")).unwrap();

        let container = TarContainer::new(false);
        let result = Verifier::new(&container).verify_volume(&volume).unwrap();
        match result.status {
            VerifyStatus::Corrupt { unrecoverable } => assert_eq!(unrecoverable.len(), 2),
            other => panic!("expected corrupt, got {:?}", other),
        }
    }

    #[test]
    fn test_requested_label_not_attached() {
        let container = TarContainer::new(false);
        let report = Verifier::new(&container)
            .verify_all(&DiscoveryReport::default(), &["GONE22".to_string()]);
        assert_eq!(report.failures.len(), 1);
        assert!(report.into_result().is_err());
    }
}
