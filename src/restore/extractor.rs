//! File extraction from one volume
//!
//! Each wanted file is streamed from the bundle into `<name>.arcd-partial`
//! next to its final place, hashed on the way, fsynced, and renamed only if
//! the hash matches the index. A file is either fully restored or not
//! present, so an interrupted restore leaves a tree that a later run can
//! resume from.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::container::{ArchiveContainer, Visit};
use crate::errors::{ArcdError, ArcdErrorCode, ArcdResult, ItemFailure};
use crate::index::FileEntry;
use crate::manifest::{bundle_key, ContentHash, HashingWriter};
use crate::observability::{log_event_with_fields, Event};
use crate::volume::DiscoveredVolume;

pub const PARTIAL_SUFFIX: &str = ".arcd-partial";

/// What one volume supplied
#[derive(Debug, Default)]
pub struct Extraction {
    pub restored: Vec<String>,
    /// Paths that failed on this volume and may come from another copy
    pub failed: Vec<ItemFailure>,
}

pub struct Extractor<'a> {
    container: &'a dyn ArchiveContainer,
    target: &'a Path,
}

impl<'a> Extractor<'a> {
    pub fn new(container: &'a dyn ArchiveContainer, target: &'a Path) -> Self {
        Self { container, target }
    }

    /// Final location of a virtual path
    pub fn destination(&self, path: &str) -> PathBuf {
        self.target.join(path)
    }

    /// Whether a verified copy is already in place
    pub fn is_restored(&self, entry: &FileEntry) -> bool {
        let path = self.destination(&entry.path);
        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() && meta.len() == entry.size => {
                ContentHash::of_file(&path).map(|h| h == entry.hash).unwrap_or(false)
            }
            _ => false,
        }
    }

    /// Extract the wanted entries from a volume's bundle
    pub fn extract(&self, volume: &DiscoveredVolume, wanted: &BTreeMap<String, FileEntry>) -> Extraction {
        let mut extraction = Extraction::default();
        let mut seen = BTreeSet::new();

        let reader = match volume.backend().reader(&bundle_key(&volume.label)) {
            Ok(reader) => reader,
            Err(e) => {
                let error = ArcdError::from(e);
                extraction.failed = wanted.keys().map(|p| ItemFailure::new(p, &error)).collect();
                return extraction;
            }
        };

        let result = self.container.unpack(reader, &mut |file| {
            let Some(entry) = wanted.get(&file.path) else {
                return Ok(Visit::Continue);
            };
            if !seen.insert(file.path.clone()) {
                return Ok(Visit::Continue);
            }

            match self.write_verified(entry, file.reader) {
                Ok(()) => extraction.restored.push(file.path),
                Err(e) => {
                    if e.code() == ArcdErrorCode::Corrupt {
                        log_event_with_fields(
                            Event::RestoreHashMismatch,
                            &[("label", volume.label.as_str()), ("path", file.path.as_str())],
                        );
                    }
                    extraction.failed.push(ItemFailure::new(file.path, &e));
                }
            }

            Ok(if seen.len() == wanted.len() {
                Visit::Stop
            } else {
                Visit::Continue
            })
        });

        let damaged = result.err();
        for path in wanted.keys().filter(|p| !seen.contains(*p)) {
            let error = match &damaged {
                Some(e) => ArcdError::corrupt(format!(
                    "bundle of {} unreadable before {}: {}",
                    volume.label,
                    path,
                    e.message()
                )),
                None => ArcdError::not_found(format!("{} in bundle of {}", path, volume.label)),
            };
            extraction.failed.push(ItemFailure::new(path, &error));
        }
        extraction
    }

    fn write_verified(&self, entry: &FileEntry, reader: &mut dyn io::Read) -> ArcdResult<()> {
        let target = self.destination(&entry.path);
        let partial = partial_path(&target);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| ArcdError::io_error_at_path(parent, e))?;
        }

        let result = (|| -> ArcdResult<()> {
            let file = File::create(&partial).map_err(|e| ArcdError::io_error_at_path(&partial, e))?;
            let mut writer = HashingWriter::new(file);
            io::copy(reader, &mut writer).map_err(|e| ArcdError::io_error_at_path(&partial, e))?;
            let (file, hash, written) = writer.finish();
            file.sync_all()
                .map_err(|e| ArcdError::io_error_at_path(&partial, e))?;

            if hash != entry.hash || written != entry.size {
                return Err(ArcdError::corrupt(format!(
                    "restored {} hashes to {} ({} bytes), index records {} ({} bytes)",
                    entry.path,
                    hash.short(),
                    written,
                    entry.hash.short(),
                    entry.size
                )));
            }

            apply_metadata(&file, &partial, entry)?;
            drop(file);
            fs::rename(&partial, &target).map_err(|e| ArcdError::io_error_at_path(&target, e))
        })();

        if result.is_err() {
            let _ = fs::remove_file(&partial);
        }
        result
    }
}

fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(PARTIAL_SUFFIX);
    target.with_file_name(name)
}

fn apply_metadata(file: &File, path: &Path, entry: &FileEntry) -> ArcdResult<()> {
    let modified = SystemTime::UNIX_EPOCH + Duration::from_secs(entry.modified.max(0) as u64);
    file.set_modified(modified)
        .map_err(|e| ArcdError::io_error_at_path(path, e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(entry.mode & 0o7777))
            .map_err(|e| ArcdError::io_error_at_path(path, e))?;
    }
    Ok(())
}
