//! Shared fixture for integration tests
//!
//! Every archive lives in its own temp directory:
//!
//! ```text
//! <tmp>/source/    files to archive
//! <tmp>/volumes/   one directory per volume
//! <tmp>/state/     index store
//! <tmp>/restored/  restore target
//! ```

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use arcdiscvist::build::{BuildReport, BuildRequest, Builder, Destination};
use arcdiscvist::config::{Config, VolumeRoot};
use arcdiscvist::container::TarContainer;
use arcdiscvist::index::{Indexer, ReconcileReport};
use arcdiscvist::manifest::bundle_key;
use arcdiscvist::store::ArchiveStore;
use arcdiscvist::volume::{Discovery, Medium};
use tempfile::TempDir;

pub struct TestArchive {
    pub temp: TempDir,
    pub config: Config,
}

impl TestArchive {
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("source");
        let volumes = temp.path().join("volumes");
        fs::create_dir_all(&source).unwrap();
        fs::create_dir_all(&volumes).unwrap();

        let mut config = Config::with_state_dir(temp.path().join("state"));
        config.source_root = source;
        config.volume_roots.push(VolumeRoot {
            path: volumes,
            medium: Medium::Rewritable,
        });
        config.poll_interval_ms = 10;
        config.prompt_timeout_secs = 0;

        Self { temp, config }
    }

    /// Same archive without repair data on new volumes
    pub fn without_repair() -> Self {
        let mut archive = Self::new();
        archive.config.repair_ratio_bps = 0;
        archive
    }

    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    pub fn restored(&self) -> PathBuf {
        self.temp.path().join("restored")
    }

    /// Write a source file, creating parent directories
    pub fn write(&self, rel: &str, content: &[u8]) {
        let path = self.config.source_root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    pub fn volume_dir(&self, name: &str) -> PathBuf {
        self.temp.path().join("volumes").join(name)
    }

    pub fn open(&self) -> ArchiveStore {
        ArchiveStore::open_exclusive(&self.config.state_dir).unwrap()
    }

    /// Build into `volumes/<name>`
    pub fn build(
        &self,
        store: &mut ArchiveStore,
        name: &str,
        subtrees: &[&str],
        copies: usize,
    ) -> BuildReport {
        let container = TarContainer::new(false);
        let request = BuildRequest {
            destination: Destination::Directory(self.volume_dir(name)),
            subtrees: subtrees.iter().map(|s| s.to_string()).collect(),
            min_copies: copies,
            capacity: None,
            pack_small: false,
        };
        Builder::new(&self.config, &container)
            .build(store, &request)
            .unwrap()
    }

    /// Build and return the new label
    pub fn build_label(
        &self,
        store: &mut ArchiveStore,
        name: &str,
        subtrees: &[&str],
        copies: usize,
    ) -> String {
        self.build(store, name, subtrees, copies)
            .label
            .expect("build wrote no volume")
    }

    /// Discovery over the named volume directories only
    pub fn discovery_of(&self, names: &[&str]) -> Discovery {
        let mut discovery = Discovery::new();
        for name in names {
            discovery.add_location(self.volume_dir(name));
        }
        discovery
    }

    /// Reconcile against every volume under `volumes/`
    pub fn index(&self, store: &mut ArchiveStore) -> ReconcileReport {
        let discovery = Discovery::from_config(&self.config);
        Indexer::new(&discovery).reconcile(store).unwrap()
    }

    /// Flip one byte of `needle` inside a volume's bundle
    pub fn damage_bundle(&self, name: &str, label: &str, needle: &[u8]) {
        let path = self.volume_dir(name).join(bundle_key(label));
        let mut data = fs::read(&path).unwrap();
        let at = data
            .windows(needle.len())
            .position(|w| w == needle)
            .expect("needle not in bundle");
        data[at] ^= 0x20;
        fs::write(&path, data).unwrap();
    }

    /// Write the configuration for the `arcd` binary
    pub fn write_config(&self) -> PathBuf {
        let path = self.temp.path().join("arcdiscvist.json");
        fs::write(&path, serde_json::to_vec_pretty(&self.config).unwrap()).unwrap();
        path
    }
}
