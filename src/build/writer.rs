//! Volume writing
//!
//! # Algorithm
//!
//! 1. Create a hidden staging directory (`.arcd-staging-<uuid>`) inside the
//!    destination, or under the state directory for remotes
//! 2. Pack the bundle into it and fsync
//! 3. Write the manifest from the hashes of the bytes actually packed
//! 4. Read the staged bundle back and encode repair data
//! 5. Publish: rename (directory), wrap in a burn image (write-once), or
//!    put each key (remote). The manifest goes last, so a volume is never
//!    discoverable before its bundle is complete
//! 6. Remove the staging directory whatever happened
//!
//! Existing keys at the destination are never overwritten.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use super::scanner::SourceFile;
use crate::backend::{LocalBackend, StorageBackend};
use crate::config::Config;
use crate::container::{ArchiveContainer, PackEntry, TarContainer, Visit};
use crate::crash_point::{maybe_crash, points};
use crate::errors::{ArcdError, ArcdResult};
use crate::manifest::{bundle_key, manifest_key, repair_key, ManifestEntry, VolumeManifest};
use crate::observability::{log_event_with_fields, Event};
use crate::repair::{RepairData, RepairEncoder};
use crate::volume::Medium;

/// Suffix of a write-once burn image
pub const IMAGE_SUFFIX: &str = ".img";

const STAGING_PREFIX: &str = ".arcd-staging-";

/// Where a new volume goes
#[derive(Debug, Clone)]
pub enum Destination {
    /// Mounted rewritable medium or plain directory
    Directory(PathBuf),
    /// Directory receiving a burn image for write-once media
    Image(PathBuf),
    /// Remote backend; staging happens locally first
    Remote {
        name: String,
        backend: Arc<dyn StorageBackend>,
        staging: PathBuf,
    },
}

impl Destination {
    /// Interpret a destination argument: `remote:<name>` or a directory
    pub fn parse(argument: &str, medium: Option<Medium>, config: &Config) -> ArcdResult<Self> {
        if let Some(name) = argument.strip_prefix("remote:") {
            let remote = config
                .remote(name)
                .ok_or_else(|| ArcdError::config(format!("Unknown remote '{}'", name)))?;
            if matches!(medium, Some(m) if m != Medium::Remote) {
                return Err(ArcdError::config(format!(
                    "{} is a remote destination; --medium does not apply",
                    argument
                )));
            }
            return Ok(Destination::Remote {
                name: name.to_string(),
                backend: Arc::new(LocalBackend::new(remote.path.clone())),
                staging: config.state_dir.join("staging"),
            });
        }

        let path = PathBuf::from(argument);
        match medium.unwrap_or(Medium::Rewritable) {
            Medium::Rewritable => Ok(Destination::Directory(path)),
            Medium::WriteOnce => Ok(Destination::Image(path)),
            Medium::Remote => Err(ArcdError::config(
                "Remote destinations are written as remote:<name>",
            )),
        }
    }

    pub fn medium(&self) -> Medium {
        match self {
            Destination::Directory(_) => Medium::Rewritable,
            Destination::Image(_) => Medium::WriteOnce,
            Destination::Remote { .. } => Medium::Remote,
        }
    }

    pub fn location(&self) -> String {
        match self {
            Destination::Directory(path) | Destination::Image(path) => path.display().to_string(),
            Destination::Remote { name, .. } => format!("remote:{}", name),
        }
    }

    fn staging_root(&self) -> &Path {
        match self {
            Destination::Directory(path) | Destination::Image(path) => path,
            Destination::Remote { staging, .. } => staging,
        }
    }
}

/// A volume that has been published
#[derive(Debug, Clone)]
pub struct WrittenVolume {
    pub manifest: VolumeManifest,
    /// Directory, image file or remote address
    pub location: String,
    pub bundle_bytes: u64,
    pub repair_files: usize,
}

struct Staged {
    manifest: VolumeManifest,
    /// Keys in publish order, manifest last
    keys: Vec<String>,
    bundle_bytes: u64,
    repair_files: usize,
}

/// Writes one volume to a destination
pub struct VolumeWriter<'a> {
    container: &'a dyn ArchiveContainer,
    repair: RepairEncoder,
}

impl<'a> VolumeWriter<'a> {
    pub fn new(container: &'a dyn ArchiveContainer, repair: RepairEncoder) -> Self {
        Self { container, repair }
    }

    /// Pack `files` as volume `label` and publish it.
    ///
    /// On any failure nothing is left at the destination.
    pub fn write(
        &self,
        destination: &Destination,
        label: &str,
        files: &[SourceFile],
    ) -> ArcdResult<WrittenVolume> {
        let root = destination.staging_root();
        let staging = root.join(format!("{}{}", STAGING_PREFIX, Uuid::new_v4().simple()));
        fs::create_dir_all(&staging)
            .map_err(|e| ArcdError::io_error_at_path(&staging, e).into_fatal())?;

        let result = self
            .stage(destination.medium(), label, files, &staging)
            .and_then(|staged| {
                maybe_crash(points::BUILD_BEFORE_PUBLISH);
                let location = self.publish(destination, label, &staged, &staging)?;
                Ok(WrittenVolume {
                    manifest: staged.manifest,
                    location,
                    bundle_bytes: staged.bundle_bytes,
                    repair_files: staged.repair_files,
                })
            });

        let _ = fs::remove_dir_all(&staging);

        match &result {
            Ok(written) => log_event_with_fields(
                Event::BundlePublished,
                &[("label", label), ("location", written.location.as_str())],
            ),
            Err(e) => log_event_with_fields(
                Event::BundleDiscarded,
                &[("label", label), ("reason", e.message())],
            ),
        }
        result
    }

    fn stage(
        &self,
        medium: Medium,
        label: &str,
        files: &[SourceFile],
        staging: &Path,
    ) -> ArcdResult<Staged> {
        let bundle_path = staging.join(bundle_key(label));
        let entries: Vec<PackEntry> = files
            .iter()
            .map(|f| PackEntry {
                path: f.path.clone(),
                source: f.source.clone(),
                mode: f.mode,
                modified: f.modified,
            })
            .collect();

        let mut out = BufWriter::new(create_file(&bundle_path)?);
        let packed = self.container.pack(&entries, &mut out)?;
        let bundle_bytes = finish_file(out, &bundle_path)?;

        // pack() reports entries in the order given
        let manifest_entries = packed
            .into_iter()
            .zip(files)
            .map(|(p, f)| ManifestEntry {
                path: p.path,
                hash: p.hash,
                size: p.size,
                mode: f.mode,
                modified: f.modified,
            })
            .collect();
        let manifest = VolumeManifest::new(label, medium, manifest_entries)?;

        let mut keys = vec![bundle_key(label)];
        let repair = self.encode_repair(label, &bundle_path)?;
        let repair_files = repair.as_ref().map(|r| r.files.len()).unwrap_or(0);
        if let Some(repair) = repair {
            write_synced(&staging.join(repair_key(label)), &repair.to_json()?)?;
            keys.push(repair_key(label));
        }
        write_synced(&staging.join(manifest_key(label)), &manifest.to_json()?)?;
        keys.push(manifest_key(label));

        Ok(Staged {
            manifest,
            keys,
            bundle_bytes,
            repair_files,
        })
    }

    /// Encode repair data from the staged bundle, not the source files
    fn encode_repair(&self, label: &str, bundle_path: &Path) -> ArcdResult<Option<RepairData>> {
        let mut data = RepairData::new(label);
        let input = File::open(bundle_path).map_err(|e| ArcdError::io_error_at_path(bundle_path, e))?;

        self.container.unpack(Box::new(BufReader::new(input)), &mut |entry| {
            if !self.repair.accepts(entry.size) {
                return Ok(Visit::Continue);
            }
            let mut bytes = Vec::with_capacity(entry.size as usize);
            entry.reader.read_to_end(&mut bytes).map_err(|e| {
                ArcdError::io_error(format!("Failed to read back {}", entry.path), e)
            })?;
            if let Some(repair) = self.repair.encode(&bytes) {
                data.files.insert(entry.path, repair);
            }
            Ok(Visit::Continue)
        })?;

        Ok(if data.files.is_empty() { None } else { Some(data) })
    }

    fn publish(
        &self,
        destination: &Destination,
        label: &str,
        staged: &Staged,
        staging: &Path,
    ) -> ArcdResult<String> {
        match destination {
            Destination::Directory(dir) => {
                for key in &staged.keys {
                    refuse_existing(&dir.join(key))?;
                }
                let mut moved: Vec<PathBuf> = Vec::new();
                for key in &staged.keys {
                    let target = dir.join(key);
                    if let Err(e) = fs::rename(staging.join(key), &target) {
                        for done in &moved {
                            let _ = fs::remove_file(done);
                        }
                        return Err(ArcdError::io_error_at_path(&target, e).into_fatal());
                    }
                    moved.push(target);
                }
                sync_dir(dir)?;
                Ok(dir.display().to_string())
            }

            Destination::Image(dir) => {
                let name = format!("{}{}", label, IMAGE_SUFFIX);
                let target = dir.join(&name);
                refuse_existing(&target)?;

                let modified = Utc::now().timestamp();
                let entries: Vec<PackEntry> = staged
                    .keys
                    .iter()
                    .map(|key| PackEntry {
                        path: key.clone(),
                        source: staging.join(key),
                        mode: 0o444,
                        modified,
                    })
                    .collect();
                let image_path = staging.join(&name);
                let mut out = BufWriter::new(create_file(&image_path)?);
                TarContainer::new(false).pack(&entries, &mut out)?;
                finish_file(out, &image_path)?;

                fs::rename(&image_path, &target)
                    .map_err(|e| ArcdError::io_error_at_path(&target, e).into_fatal())?;
                sync_dir(dir)?;
                Ok(target.display().to_string())
            }

            Destination::Remote { name, backend, .. } => {
                for key in &staged.keys {
                    if backend.exists(key)? {
                        return Err(ArcdError::io_error(
                            format!("{} already exists on remote:{}", key, name),
                            io::Error::from(io::ErrorKind::AlreadyExists),
                        )
                        .into_fatal());
                    }
                }
                let mut written: Vec<&str> = Vec::new();
                for key in &staged.keys {
                    if let Err(e) = backend.put_file(key, &staging.join(key)) {
                        for done in &written {
                            let _ = backend.delete(done);
                        }
                        return Err(ArcdError::from(e).into_fatal());
                    }
                    written.push(key);
                }
                Ok(format!("remote:{}", name))
            }
        }
    }
}

fn create_file(path: &Path) -> ArcdResult<File> {
    File::create(path).map_err(|e| ArcdError::io_error_at_path(path, e).into_fatal())
}

/// Flush, fsync and report the final size
fn finish_file(out: BufWriter<File>, path: &Path) -> ArcdResult<u64> {
    let file = out
        .into_inner()
        .map_err(|e| ArcdError::io_error_at_path(path, e.into_error()).into_fatal())?;
    file.sync_all()
        .and_then(|_| file.metadata())
        .map(|m| m.len())
        .map_err(|e| ArcdError::io_error_at_path(path, e).into_fatal())
}

fn write_synced(path: &Path, data: &[u8]) -> ArcdResult<()> {
    let mut file = create_file(path)?;
    file.write_all(data)
        .and_then(|_| file.sync_all())
        .map_err(|e| ArcdError::io_error_at_path(path, e).into_fatal())
}

fn sync_dir(dir: &Path) -> ArcdResult<()> {
    File::open(dir)
        .and_then(|d| d.sync_all())
        .map_err(|e| ArcdError::io_error_at_path(dir, e).into_fatal())
}

fn refuse_existing(target: &Path) -> ArcdResult<()> {
    if target.exists() {
        return Err(ArcdError::io_error_at_path(
            target,
            io::Error::from(io::ErrorKind::AlreadyExists),
        )
        .into_fatal());
    }
    Ok(())
}
