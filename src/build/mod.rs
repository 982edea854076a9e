//! Volume building
//!
//! Selects the files under the requested source subtrees that need another
//! copy, packs them into a new volume under a fresh label and writes it to
//! the destination.
//!
//! # Two-phase commit
//!
//! A build reserves its label in the registry but does not touch the
//! content index. The new copies count only after an explicit `index` run
//! has read the published manifest back from the volume, which gives the
//! operator a checkpoint to confirm the physical write first.

mod planner;
mod scanner;
mod writer;

pub use planner::{plan_build, BuildPlan, HashedFile, PlanLimits, Selection};
pub use scanner::{ScanResult, Scanner, SourceFile};
pub use writer::{Destination, VolumeWriter, WrittenVolume, IMAGE_SUFFIX};

use serde::Serialize;

use crate::config::Config;
use crate::container::ArchiveContainer;
use crate::errors::{ArcdError, ArcdResult, ItemFailure};
use crate::manifest::hash_files_parallel;
use crate::observability::ObservationScope;
use crate::repair::RepairEncoder;
use crate::store::ArchiveStore;
use crate::volume::Medium;

/// What to build
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub destination: Destination,
    /// Subtrees relative to the source root
    pub subtrees: Vec<String>,
    pub min_copies: usize,
    pub capacity: Option<u64>,
    pub pack_small: bool,
}

/// Outcome of a build
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    /// Label of the new volume; `None` when nothing needed archiving
    pub label: Option<String>,
    pub location: Option<String>,
    pub medium: Medium,
    pub files: usize,
    pub bytes: u64,
    pub bundle_bytes: u64,
    pub repair_files: usize,
    /// Paths whose content differs from the indexed version
    pub new_versions: Vec<String>,
    /// Files skipped because enough copies exist
    pub satisfied: usize,
    /// Files that did not fit on the volume
    pub deferred: Vec<String>,
    pub failures: Vec<ItemFailure>,
}

impl BuildReport {
    /// `PartialFailure` if any source file could not be read
    pub fn into_result(self) -> ArcdResult<Self> {
        if self.failures.is_empty() {
            Ok(self)
        } else {
            Err(ArcdError::partial_failure(
                self.failures.len(),
                self.files + self.satisfied + self.failures.len(),
            ))
        }
    }
}

/// Runs builds against a store
pub struct Builder<'a> {
    config: &'a Config,
    container: &'a dyn ArchiveContainer,
}

impl<'a> Builder<'a> {
    pub fn new(config: &'a Config, container: &'a dyn ArchiveContainer) -> Self {
        Self { config, container }
    }

    /// Scan, hash, select, write, and reserve the new label
    pub fn build(&self, store: &mut ArchiveStore, request: &BuildRequest) -> ArcdResult<BuildReport> {
        let location = request.destination.location();
        let scope = ObservationScope::with_fields("BUILD", &[("destination", location.as_str())]);

        match self.run(store, request) {
            Ok(report) => {
                let files = report.files.to_string();
                let label = report.label.clone().unwrap_or_default();
                scope.complete_with_fields(&[("label", label.as_str()), ("files", files.as_str())]);
                Ok(report)
            }
            Err(e) => {
                scope.fail(e.message(), e.is_fatal());
                Err(e)
            }
        }
    }

    fn run(&self, store: &mut ArchiveStore, request: &BuildRequest) -> ArcdResult<BuildReport> {
        // Fail on a read-only store before doing any work
        store.state_mut()?;

        let scan = Scanner::from_config(self.config).scan(&request.subtrees);
        let mut failures = scan.failures;

        let items = scan
            .files
            .iter()
            .map(|f| (f.path.clone(), f.source.clone()))
            .collect();
        let hashes = hash_files_parallel(items, self.config.hash_workers);

        // Both sides are sorted by path
        let mut hashed = Vec::with_capacity(hashes.len());
        for ((path, result), file) in hashes.into_iter().zip(scan.files) {
            match result {
                Ok(hash) => hashed.push(HashedFile { file, hash }),
                Err(e) => failures.push(ItemFailure::new(path, &e)),
            }
        }

        let plan = plan_build(
            hashed,
            store.index(),
            PlanLimits {
                min_copies: request.min_copies,
                capacity: request.capacity,
                pack_small: request.pack_small,
            },
        );

        let mut report = BuildReport {
            label: None,
            location: None,
            medium: request.destination.medium(),
            files: 0,
            bytes: 0,
            bundle_bytes: 0,
            repair_files: 0,
            new_versions: plan.new_versions().into_iter().map(str::to_string).collect(),
            satisfied: plan.satisfied,
            deferred: plan.deferred.clone(),
            failures,
        };
        if plan.selected.is_empty() {
            return Ok(report);
        }

        let label = store
            .registry()
            .new_label(&mut rand::thread_rng(), self.config.label_length)?;
        let files: Vec<SourceFile> = plan.selected.iter().map(|(h, _)| h.file.clone()).collect();

        let writer = VolumeWriter::new(
            self.container,
            RepairEncoder::new(
                self.config.repair_symbol_size,
                self.config.repair_ratio_bps,
                self.config.max_repair_file_bytes,
            ),
        );
        let written = writer.write(&request.destination, &label, &files)?;

        store
            .state_mut()?
            .registry
            .register(&label, report.medium, Some(written.location.clone()))?;
        store.commit()?;

        report.files = written.manifest.files.len();
        report.bytes = written.manifest.total_size;
        report.bundle_bytes = written.bundle_bytes;
        report.repair_files = written.repair_files;
        report.location = Some(written.location);
        report.label = Some(label);
        Ok(report)
    }
}
