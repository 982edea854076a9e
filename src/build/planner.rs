//! Build selection
//!
//! A scanned file is selected for the new volume when:
//!
//! 1. the index has no entry for its path, or
//! 2. its content differs from the indexed content (a new version), or
//! 3. its content matches but fewer than `min_copies` volumes hold it.
//!
//! The selection is then cut to the volume capacity in path order.

use serde::Serialize;

use super::scanner::SourceFile;
use crate::index::ContentIndex;
use crate::manifest::ContentHash;

/// A scanned file with its freshly computed hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashedFile {
    pub file: SourceFile,
    pub hash: ContentHash,
}

/// Why a file was selected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Selection {
    New,
    NewVersion,
    UnderReplicated,
}

#[derive(Debug, Clone, Default)]
pub struct BuildPlan {
    /// Files for the new volume, sorted by path
    pub selected: Vec<(HashedFile, Selection)>,
    /// Files already held by enough volumes
    pub satisfied: usize,
    /// Selected files left out because the volume is full
    pub deferred: Vec<String>,
}

impl BuildPlan {
    pub fn total_size(&self) -> u64 {
        self.selected.iter().map(|(f, _)| f.file.size).sum()
    }

    pub fn new_versions(&self) -> Vec<&str> {
        self.selected
            .iter()
            .filter(|(_, s)| *s == Selection::NewVersion)
            .map(|(f, _)| f.file.path.as_str())
            .collect()
    }
}

/// Limits applied to one build
#[derive(Debug, Clone, Copy)]
pub struct PlanLimits {
    pub min_copies: usize,
    pub capacity: Option<u64>,
    pub pack_small: bool,
}

/// Decide which files go on the new volume
pub fn plan_build(mut files: Vec<HashedFile>, index: &ContentIndex, limits: PlanLimits) -> BuildPlan {
    files.sort_by(|a, b| a.file.path.cmp(&b.file.path));

    let mut plan = BuildPlan::default();
    let mut used = 0u64;
    let mut full = false;

    for hashed in files {
        let selection = match index.entry(&hashed.file.path) {
            None => Selection::New,
            Some(entry) if entry.hash != hashed.hash || entry.size != hashed.file.size => {
                Selection::NewVersion
            }
            Some(entry) if entry.copy_count() < limits.min_copies => Selection::UnderReplicated,
            Some(_) => {
                plan.satisfied += 1;
                continue;
            }
        };

        if let Some(capacity) = limits.capacity {
            let fits = used
                .checked_add(hashed.file.size)
                .map(|total| total <= capacity)
                .unwrap_or(false);
            if full || !fits {
                if !limits.pack_small {
                    full = true;
                }
                plan.deferred.push(hashed.file.path);
                continue;
            }
        }

        used += hashed.file.size;
        plan.selected.push((hashed, selection));
    }

    plan
}
