//! Volume manifest structure and serialization
//!
//! The manifest travels with its volume and is never mutated after build.
//!
//! Format:
//! ```json
//! {
//!   "format_version": 1,
//!   "label": "KQ7MZA",
//!   "created_at": "2026-10-16T09:30:00Z",
//!   "medium": "write-once",
//!   "files": [
//!     {"path": "docs/a.txt", "hash": "sha256:...", "size": 12, "mode": 420, "modified": 1760000000}
//!   ],
//!   "total_size": 12,
//!   "checksum": "crc32:1c291ca3"
//! }
//! ```
//!
//! The checksum covers the canonical JSON of the manifest with an empty
//! `checksum` field.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::checksum::{compute_checksum, format_checksum, parse_checksum};
use super::hash::ContentHash;
use crate::errors::{ArcdError, ArcdResult};
use crate::index::normalize_path;
use crate::volume::{validate_label, Medium};

/// Current manifest format version
pub const MANIFEST_FORMAT_VERSION: u8 = 1;

/// One archived file as recorded at build time
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Normalized virtual path
    pub path: String,
    /// Content hash of the file bytes
    pub hash: ContentHash,
    /// Size in bytes
    pub size: u64,
    /// Unix permission bits
    pub mode: u32,
    /// Modification time, seconds since the epoch
    pub modified: i64,
}

/// Per-volume record of exactly which files the bundle holds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeManifest {
    /// Manifest format version
    pub format_version: u8,
    /// Owning volume label
    pub label: String,
    /// Creation timestamp (RFC3339)
    pub created_at: String,
    /// Medium the volume was built for
    pub medium: Medium,
    /// Entries sorted by path
    pub files: Vec<ManifestEntry>,
    /// Sum of all entry sizes
    pub total_size: u64,
    /// CRC32 over the canonical manifest (format: "crc32:XXXXXXXX")
    pub checksum: String,
}

impl VolumeManifest {
    /// Build a manifest for a new volume, stamping the current time
    pub fn new(label: &str, medium: Medium, files: Vec<ManifestEntry>) -> ArcdResult<Self> {
        let created_at = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
        Self::with_timestamp(label, &created_at, medium, files)
    }

    /// Build a manifest with an explicit creation timestamp
    pub fn with_timestamp(
        label: &str,
        created_at: &str,
        medium: Medium,
        mut files: Vec<ManifestEntry>,
    ) -> ArcdResult<Self> {
        validate_label(label)?;
        files.sort_by(|a, b| a.path.cmp(&b.path));
        if let Some(dup) = files.windows(2).find(|w| w[0].path == w[1].path) {
            return Err(ArcdError::manifest(format!(
                "Duplicate path in manifest: {}",
                dup[0].path
            )));
        }

        let total_size = files.iter().map(|f| f.size).sum();
        let mut manifest = Self {
            format_version: MANIFEST_FORMAT_VERSION,
            label: label.to_string(),
            created_at: created_at.to_string(),
            medium,
            files,
            total_size,
            checksum: String::new(),
        };
        manifest.checksum = format_checksum(manifest.compute_checksum()?);
        Ok(manifest)
    }

    fn compute_checksum(&self) -> ArcdResult<u32> {
        let mut canonical = self.clone();
        canonical.checksum = String::new();
        let bytes = serde_json::to_vec(&canonical).map_err(|e| {
            ArcdError::manifest(format!("Failed to serialize manifest {}: {}", self.label, e))
        })?;
        Ok(compute_checksum(&bytes))
    }

    /// Checks the recorded checksum against the content
    pub fn verify_checksum(&self) -> ArcdResult<()> {
        let recorded = parse_checksum(&self.checksum).ok_or_else(|| {
            ArcdError::manifest(format!(
                "Manifest {} has malformed checksum '{}'",
                self.label, self.checksum
            ))
        })?;
        let actual = self.compute_checksum()?;
        if recorded != actual {
            return Err(ArcdError::manifest(format!(
                "Manifest {} checksum mismatch: recorded {}, computed {}",
                self.label,
                self.checksum,
                format_checksum(actual)
            )));
        }
        Ok(())
    }

    /// Serializes the manifest to JSON
    pub fn to_json(&self) -> ArcdResult<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| {
            ArcdError::manifest(format!("Failed to serialize manifest {}: {}", self.label, e))
        })
    }

    /// Deserializes and validates a manifest
    ///
    /// Rejects unknown format versions, bad labels, non-normalized or
    /// unsorted paths, and checksum mismatches.
    pub fn from_json(data: &[u8]) -> ArcdResult<Self> {
        let manifest: Self = serde_json::from_slice(data)
            .map_err(|e| ArcdError::manifest(format!("Failed to parse manifest: {}", e)))?;

        if manifest.format_version != MANIFEST_FORMAT_VERSION {
            return Err(ArcdError::manifest(format!(
                "Unsupported manifest format version: expected {}, got {}",
                MANIFEST_FORMAT_VERSION, manifest.format_version
            )));
        }

        validate_label(&manifest.label)?;

        for entry in &manifest.files {
            let normalized = normalize_path(&entry.path)?;
            if normalized != entry.path || normalized.is_empty() {
                return Err(ArcdError::manifest(format!(
                    "Manifest {} has non-normalized path '{}'",
                    manifest.label, entry.path
                )));
            }
        }
        if manifest.files.windows(2).any(|w| w[0].path >= w[1].path) {
            return Err(ArcdError::manifest(format!(
                "Manifest {} paths are not sorted and unique",
                manifest.label
            )));
        }

        manifest.verify_checksum()?;
        Ok(manifest)
    }

    /// Find the entry for a path
    pub fn entry(&self, path: &str) -> Option<&ManifestEntry> {
        self.files
            .binary_search_by(|e| e.path.as_str().cmp(path))
            .ok()
            .map(|i| &self.files[i])
    }
}
