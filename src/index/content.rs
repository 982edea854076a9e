//! Content index
//!
//! Maps each virtual path to its current content and the set of volumes
//! believed to hold a byte-identical copy. The index is a derived cache:
//! replaying every manifest through [`ContentIndex::record_file`] in label
//! order rebuilds it exactly.
//!
//! # Conflicts
//!
//! When a volume claims a path with content that differs from what other
//! volumes already hold, the claim is kept aside as a dissent instead of
//! replacing the entry. The path is then reported conflicted and lookups
//! fail with `IntegrityConflict` until the operator destroys one side.
//! Removing the last holder of the recorded content promotes the dissent
//! from the lowest label, which is what a rebuild without that holder
//! would produce.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::glob::GlobPattern;
use super::path::{is_within, normalize_path};
use crate::errors::{ArcdError, ArcdResult};
use crate::manifest::{ContentHash, ManifestEntry};

/// Current state of one virtual path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub hash: ContentHash,
    pub size: u64,
    pub mode: u32,
    pub modified: i64,
    /// Volumes holding this exact content; never empty
    pub copies: BTreeSet<String>,
}

impl FileEntry {
    pub fn copy_count(&self) -> usize {
        self.copies.len()
    }

    fn same_content(&self, hash: &ContentHash, size: u64) -> bool {
        &self.hash == hash && self.size == size
    }
}

/// A volume's differing claim on a path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DissentingClaim {
    pub hash: ContentHash,
    pub size: u64,
    pub mode: u32,
    pub modified: i64,
}

/// A detected integrity conflict
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityConflict {
    pub path: String,
    /// Volume whose claim disagreed
    pub volume: String,
    pub claimed_hash: ContentHash,
    /// Volumes holding the recorded content
    pub holders: Vec<String>,
    pub recorded_hash: ContentHash,
}

impl IntegrityConflict {
    pub fn describe(&self) -> String {
        format!(
            "{}: volume {} holds {} but {} hold {}",
            self.path,
            self.volume,
            self.claimed_hash.short(),
            self.holders.join(", "),
            self.recorded_hash.short()
        )
    }

    pub fn into_error(self) -> ArcdError {
        ArcdError::integrity_conflict(self.describe())
    }
}

/// Outcome of recording one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// New path
    Created,
    /// Known content, new holder
    CopyAdded,
    /// Volume already recorded as a holder
    Unchanged,
    /// Volume already recorded with other content; ignored
    Stale,
    /// Different volume disagrees with the recorded content
    Conflict(IntegrityConflict),
}

/// Summary of removing a volume
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RemovalSummary {
    /// Entries that lost this volume as a holder
    pub copies_dropped: usize,
    /// Paths whose last copy was on this volume
    pub entries_removed: Vec<String>,
    /// Paths that took their content from a former dissent
    pub entries_promoted: Vec<String>,
}

/// Kind of an immediate child in a listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChildKind {
    Directory,
    File,
}

/// Immediate child of a directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Child {
    pub name: String,
    pub kind: ChildKind,
}

/// Per-volume totals derived from the index
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VolumeUsage {
    pub files: usize,
    pub bytes: u64,
}

/// Path-to-content index
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentIndex {
    entries: BTreeMap<String, FileEntry>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    conflicts: BTreeMap<String, BTreeMap<String, DissentingClaim>>,
}

impl ContentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a path.
    ///
    /// Fails with `NotFound` for unknown paths and `IntegrityConflict` for
    /// paths with unresolved dissent.
    pub fn lookup(&self, path: &str) -> ArcdResult<&FileEntry> {
        let path = normalize_path(path)?;
        let entry = self
            .entries
            .get(&path)
            .ok_or_else(|| ArcdError::not_found(&path))?;
        if let Some(conflict) = self.conflict(&path).into_iter().next() {
            return Err(conflict.into_error());
        }
        Ok(entry)
    }

    /// Raw entry access, ignoring conflicts
    pub fn entry(&self, path: &str) -> Option<&FileEntry> {
        self.entries.get(path)
    }

    /// All entries in path order
    pub fn entries(&self) -> impl Iterator<Item = &FileEntry> {
        self.entries.values()
    }

    pub fn copy_count(&self, path: &str) -> usize {
        self.entries.get(path).map(|e| e.copy_count()).unwrap_or(0)
    }

    pub fn is_conflicted(&self, path: &str) -> bool {
        self.conflicts.contains_key(path)
    }

    /// Unresolved conflicts on one path, one per dissenting volume
    pub fn conflict(&self, path: &str) -> Vec<IntegrityConflict> {
        let (Some(entry), Some(claims)) = (self.entries.get(path), self.conflicts.get(path)) else {
            return Vec::new();
        };
        claims
            .iter()
            .map(|(label, claim)| IntegrityConflict {
                path: path.to_string(),
                volume: label.clone(),
                claimed_hash: claim.hash.clone(),
                holders: entry.copies.iter().cloned().collect(),
                recorded_hash: entry.hash.clone(),
            })
            .collect()
    }

    /// Every unresolved conflict in path order
    pub fn conflicts(&self) -> Vec<IntegrityConflict> {
        self.conflicts.keys().flat_map(|p| self.conflict(p)).collect()
    }

    /// Record that a volume holds a file
    pub fn record_file(
        &mut self,
        path: &str,
        hash: &ContentHash,
        size: u64,
        mode: u32,
        modified: i64,
        label: &str,
    ) -> ArcdResult<RecordOutcome> {
        let path = normalize_path(path)?;
        if path.is_empty() {
            return Err(ArcdError::invalid_path("", "the root is not a file"));
        }

        let Some(entry) = self.entries.get_mut(&path) else {
            self.entries.insert(
                path.clone(),
                FileEntry {
                    path,
                    hash: hash.clone(),
                    size,
                    mode,
                    modified,
                    copies: BTreeSet::from([label.to_string()]),
                },
            );
            return Ok(RecordOutcome::Created);
        };

        if entry.same_content(hash, size) {
            return Ok(if entry.copies.insert(label.to_string()) {
                RecordOutcome::CopyAdded
            } else {
                RecordOutcome::Unchanged
            });
        }

        if entry.copies.contains(label) {
            return Ok(RecordOutcome::Stale);
        }

        let conflict = IntegrityConflict {
            path: path.clone(),
            volume: label.to_string(),
            claimed_hash: hash.clone(),
            holders: entry.copies.iter().cloned().collect(),
            recorded_hash: entry.hash.clone(),
        };
        self.conflicts.entry(path).or_default().insert(
            label.to_string(),
            DissentingClaim {
                hash: hash.clone(),
                size,
                mode,
                modified,
            },
        );
        Ok(RecordOutcome::Conflict(conflict))
    }

    /// Record a manifest entry for a volume
    pub fn record_entry(&mut self, entry: &ManifestEntry, label: &str) -> ArcdResult<RecordOutcome> {
        self.record_file(
            &entry.path,
            &entry.hash,
            entry.size,
            entry.mode,
            entry.modified,
            label,
        )
    }

    /// Forget everything a volume contributed
    pub fn remove_volume(&mut self, label: &str) -> RemovalSummary {
        let mut summary = RemovalSummary::default();

        for claims in self.conflicts.values_mut() {
            claims.remove(label);
        }

        let mut emptied = Vec::new();
        for (path, entry) in self.entries.iter_mut() {
            if entry.copies.remove(label) {
                summary.copies_dropped += 1;
                if entry.copies.is_empty() {
                    emptied.push(path.clone());
                }
            }
        }

        for path in emptied {
            self.entries.remove(&path);
            if self.promote_dissent(&path) {
                summary.entries_promoted.push(path);
            } else {
                summary.entries_removed.push(path);
            }
        }

        self.conflicts.retain(|_, claims| !claims.is_empty());
        summary
    }

    /// Turn the lowest-label dissent into the entry, absorbing agreeing claims
    fn promote_dissent(&mut self, path: &str) -> bool {
        let Some(claims) = self.conflicts.remove(path) else {
            return false;
        };
        let Some((first_label, first)) = claims.iter().next() else {
            return false;
        };

        let mut entry = FileEntry {
            path: path.to_string(),
            hash: first.hash.clone(),
            size: first.size,
            mode: first.mode,
            modified: first.modified,
            copies: BTreeSet::from([first_label.clone()]),
        };
        let mut remaining = BTreeMap::new();
        for (label, claim) in claims.iter().skip(1) {
            if entry.same_content(&claim.hash, claim.size) {
                entry.copies.insert(label.clone());
            } else {
                remaining.insert(label.clone(), claim.clone());
            }
        }

        self.entries.insert(path.to_string(), entry);
        if !remaining.is_empty() {
            self.conflicts.insert(path.to_string(), remaining);
        }
        true
    }

    /// Immediate children of a directory: directories first, then files,
    /// each in lexical order
    pub fn list_children(&self, path: &str) -> ArcdResult<Vec<Child>> {
        let dir = normalize_path(path)?;
        let prefix = if dir.is_empty() {
            String::new()
        } else {
            format!("{}/", dir)
        };

        let mut directories = BTreeSet::new();
        let mut files = Vec::new();
        for key in self.entries.range(prefix.clone()..).map(|(k, _)| k) {
            let Some(rest) = key.strip_prefix(&prefix) else {
                break;
            };
            match rest.split_once('/') {
                Some((child, _)) => {
                    directories.insert(child.to_string());
                }
                None => files.push(rest.to_string()),
            }
        }

        Ok(directories
            .into_iter()
            .map(|name| Child {
                name,
                kind: ChildKind::Directory,
            })
            .chain(files.into_iter().map(|name| Child {
                name,
                kind: ChildKind::File,
            }))
            .collect())
    }

    /// Paths matching a glob, in path order
    pub fn find(&self, pattern: &str) -> ArcdResult<Vec<String>> {
        let glob = GlobPattern::new(pattern)?;
        Ok(self
            .entries
            .keys()
            .filter(|p| glob.matches(p))
            .cloned()
            .collect())
    }

    /// Entries at or below a path: the file itself, or every descendant
    pub fn expand(&self, path: &str) -> ArcdResult<Vec<&FileEntry>> {
        let path = normalize_path(path)?;
        if let Some(entry) = self.entries.get(&path) {
            return Ok(vec![entry]);
        }
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{}/", path)
        };
        let found: Vec<&FileEntry> = self
            .entries
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(_, e)| e)
            .collect();
        if found.is_empty() {
            return Err(ArcdError::not_found(if path.is_empty() { "/" } else { path.as_str() }));
        }
        Ok(found)
    }

    /// Entries held by one volume
    pub fn entries_on(&self, label: &str) -> Vec<&FileEntry> {
        self.entries
            .values()
            .filter(|e| e.copies.contains(label))
            .collect()
    }

    /// File count and bytes per volume
    pub fn usage(&self) -> BTreeMap<String, VolumeUsage> {
        let mut usage: BTreeMap<String, VolumeUsage> = BTreeMap::new();
        for entry in self.entries.values() {
            for label in &entry.copies {
                let u = usage.entry(label.clone()).or_default();
                u.files += 1;
                u.bytes += entry.size;
            }
        }
        usage
    }

    /// Whether any entry lies within a directory
    pub fn contains_dir(&self, dir: &str) -> bool {
        self.entries.keys().any(|p| is_within(p, dir))
    }
}
