//! Volume discovery
//!
//! Finds volumes reachable right now by looking for manifest markers
//! (`<LABEL>.meta.arcd`) in three places:
//!
//! - under configured volume roots, up to one directory below the root
//!   (so `/media` finds `/media/disc/KQ7MZA.meta.arcd`)
//! - in manually supplied directories
//! - in configured remote backends
//!
//! Absence from a discovery pass says nothing about whether a volume still
//! exists.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use walkdir::WalkDir;

use super::Medium;
use crate::backend::{LocalBackend, StorageBackend};
use crate::config::{Config, VolumeRoot};
use crate::errors::{ArcdError, ArcdResult};
use crate::manifest::{
    label_from_manifest_key, manifest_key, repair_key, VolumeManifest, MANIFEST_SUFFIX,
};
use crate::observability::{log_event_with_fields, Event};

/// Staging directories and other dot-entries are never volumes
fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().map(|n| n.starts_with('.')).unwrap_or(false)
}

/// A volume reachable during this discovery pass
#[derive(Debug, Clone)]
pub struct DiscoveredVolume {
    pub label: String,
    pub location: String,
    pub medium: Medium,
    backend: Arc<dyn StorageBackend>,
}

impl DiscoveredVolume {
    pub fn new(
        label: impl Into<String>,
        location: impl Into<String>,
        medium: Medium,
        backend: Arc<dyn StorageBackend>,
    ) -> Self {
        Self {
            label: label.into(),
            location: location.into(),
            medium,
            backend,
        }
    }

    pub fn backend(&self) -> &dyn StorageBackend {
        self.backend.as_ref()
    }

    /// Read and validate the volume's manifest
    pub fn read_manifest(&self) -> ArcdResult<VolumeManifest> {
        let data = self.backend.get(&manifest_key(&self.label))?;
        let manifest = VolumeManifest::from_json(&data)?;
        if manifest.label != self.label {
            return Err(ArcdError::manifest(format!(
                "Manifest at {} names volume {} but is stored as {}",
                self.location, manifest.label, self.label
            )));
        }
        Ok(manifest)
    }

    /// Whether repair data sits alongside the bundle
    pub fn has_repair_data(&self) -> bool {
        self.backend.exists(&repair_key(&self.label)).unwrap_or(false)
    }
}

/// Outcome of one discovery pass
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    /// Readable volumes sorted by label
    pub volumes: Vec<DiscoveredVolume>,
    /// Encrypted volumes as (label, location); unreadable without decryption
    pub encrypted: Vec<(String, String)>,
    /// Sources that could not be searched, as (location, reason)
    pub unreachable: Vec<(String, String)>,
}

impl DiscoveryReport {
    pub fn get(&self, label: &str) -> Option<&DiscoveredVolume> {
        self.volumes
            .binary_search_by(|v| v.label.as_str().cmp(label))
            .ok()
            .map(|i| &self.volumes[i])
    }

    pub fn labels(&self) -> Vec<&str> {
        self.volumes.iter().map(|v| v.label.as_str()).collect()
    }
}

/// Locator for attached volumes
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    roots: Vec<VolumeRoot>,
    locations: Vec<PathBuf>,
    remotes: Vec<(String, Arc<dyn StorageBackend>)>,
}

impl Discovery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discovery over everything the configuration names
    pub fn from_config(config: &Config) -> Self {
        let mut discovery = Self::new();
        for root in &config.volume_roots {
            discovery.add_root(root.path.clone(), root.medium);
        }
        for location in &config.manual_locations {
            discovery.add_location(location.clone());
        }
        for remote in &config.remotes {
            discovery.add_remote(&remote.name, Arc::new(LocalBackend::new(remote.path.clone())));
        }
        discovery
    }

    pub fn add_root(&mut self, path: PathBuf, medium: Medium) {
        self.roots.push(VolumeRoot { path, medium });
    }

    pub fn add_location(&mut self, path: PathBuf) {
        self.locations.push(path);
    }

    pub fn add_remote(&mut self, name: &str, backend: Arc<dyn StorageBackend>) {
        self.remotes.push((name.to_string(), backend));
    }

    /// Find every volume currently reachable
    pub fn discover(&self) -> DiscoveryReport {
        let mut found = Vec::new();
        let mut report = DiscoveryReport::default();

        for root in &self.roots {
            self.walk_root(root, &mut found, &mut report);
        }

        for location in &self.locations {
            let backend: Arc<dyn StorageBackend> = Arc::new(LocalBackend::new(location.clone()));
            let address = location.display().to_string();
            Self::scan_backend(&address, Medium::Rewritable, backend, &mut found, &mut report);
        }

        for (name, backend) in &self.remotes {
            let address = format!("remote:{}", name);
            Self::scan_backend(&address, Medium::Remote, backend.clone(), &mut found, &mut report);
        }

        report.volumes = Self::dedupe(found);
        for volume in &report.volumes {
            log_event_with_fields(
                Event::VolumeDiscovered,
                &[
                    ("label", volume.label.as_str()),
                    ("location", volume.location.as_str()),
                    ("medium", volume.medium.as_str()),
                ],
            );
        }
        report
    }

    /// Locate one volume, failing with `Unavailable` if it is not reachable
    pub fn resolve(&self, label: &str) -> ArcdResult<DiscoveredVolume> {
        self.discover()
            .volumes
            .into_iter()
            .find(|v| v.label == label)
            .ok_or_else(|| ArcdError::unavailable(label))
    }

    fn walk_root(
        &self,
        root: &VolumeRoot,
        found: &mut Vec<DiscoveredVolume>,
        report: &mut DiscoveryReport,
    ) {
        if !root.path.is_dir() {
            report.unreachable.push((
                root.path.display().to_string(),
                "not a directory".to_string(),
            ));
            return;
        }

        let mut directories = BTreeSet::new();
        let walker = WalkDir::new(&root.path)
            .min_depth(1)
            .max_depth(2)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name()));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let location = e
                        .path()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| root.path.display().to_string());
                    report.unreachable.push((location, e.to_string()));
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let is_marker = entry
                .file_name()
                .to_str()
                .map(|n| n.contains(MANIFEST_SUFFIX))
                .unwrap_or(false);
            if let (true, Some(parent)) = (is_marker, entry.path().parent()) {
                directories.insert(parent.to_path_buf());
            }
        }

        for dir in directories {
            let address = dir.display().to_string();
            let backend: Arc<dyn StorageBackend> = Arc::new(LocalBackend::new(dir));
            Self::scan_backend(&address, root.medium, backend, found, report);
        }
    }

    fn scan_backend(
        address: &str,
        medium: Medium,
        backend: Arc<dyn StorageBackend>,
        found: &mut Vec<DiscoveredVolume>,
        report: &mut DiscoveryReport,
    ) {
        let keys = match backend.list("") {
            Ok(keys) => keys,
            Err(e) => {
                report.unreachable.push((address.to_string(), e.to_string()));
                return;
            }
        };

        for key in keys {
            match label_from_manifest_key(&key) {
                Some((label, true)) => {
                    log_event_with_fields(
                        Event::VolumeEncrypted,
                        &[("label", label), ("location", address)],
                    );
                    report.encrypted.push((label.to_string(), address.to_string()));
                }
                Some((label, false)) => {
                    found.push(DiscoveredVolume::new(label, address, medium, backend.clone()));
                }
                None => {}
            }
        }
    }

    /// One entry per label; the first location in sorted order wins
    fn dedupe(mut found: Vec<DiscoveredVolume>) -> Vec<DiscoveredVolume> {
        found.sort_by(|a, b| (&a.label, &a.location).cmp(&(&b.label, &b.location)));
        found.dedup_by(|later, earlier| later.label == earlier.label);
        found
    }
}
