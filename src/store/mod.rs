//! Index store
//!
//! The store holds the volume registry and the content index for one
//! archive. It lives in the configured state directory:
//!
//! ```text
//! state_dir/
//!   index.json    snapshot of registry + content index
//!   journal.log   committed mutations not yet folded into the snapshot
//!   lock          advisory lock file
//! ```
//!
//! Everything in the content index can be rebuilt by discarding the store
//! and reconciling against all volumes. The registry is the one part that
//! cannot: it remembers destroyed labels so they are never reused and never
//! re-indexed by accident.
//!
//! # Destroy
//!
//! Destroy changes both halves at once. The journal record is the commit
//! point: once its fsync returns, both mutations happen, either now or on
//! replay when the store is next opened.

mod journal;
mod lock;

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use journal::{Journal, JournalRecord};
pub use lock::{LockMode, StoreLock};

use crate::crash_point::{maybe_crash, points};
use crate::errors::{ArcdError, ArcdResult};
use crate::index::{ContentIndex, RemovalSummary};
use crate::observability::{log_event_with_fields, Event};
use crate::volume::VolumeRegistry;

pub const SNAPSHOT_FILE: &str = "index.json";
pub const JOURNAL_FILE: &str = "journal.log";
pub const LOCK_FILE: &str = "lock";

const STORE_FORMAT_VERSION: u8 = 1;

/// Registry and index together
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreState {
    pub registry: VolumeRegistry,
    pub index: ContentIndex,
}

impl StoreState {
    /// Apply one journal record. Applying a record twice is harmless.
    pub fn apply(&mut self, record: &JournalRecord) -> ArcdResult<RemovalSummary> {
        match record {
            JournalRecord::Destroy { label, .. } => {
                self.registry.mark_destroyed(label)?;
                Ok(self.index.remove_volume(label))
            }
            JournalRecord::Reactivate { label, .. } => {
                self.registry.reactivate(label)?;
                Ok(RemovalSummary::default())
            }
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    format_version: u8,
    saved_at: String,
    registry: VolumeRegistry,
    index: ContentIndex,
}

/// Open index store
#[derive(Debug)]
pub struct ArchiveStore {
    dir: PathBuf,
    lock: StoreLock,
    state: StoreState,
    journal: Option<Journal>,
}

impl ArchiveStore {
    /// Open for mutation, replaying and checkpointing any journal records
    pub fn open_exclusive(dir: &Path) -> ArcdResult<Self> {
        Self::open(dir, LockMode::Exclusive)
    }

    /// Open for reading; journal records are applied in memory only
    pub fn open_shared(dir: &Path) -> ArcdResult<Self> {
        Self::open(dir, LockMode::Shared)
    }

    fn open(dir: &Path, mode: LockMode) -> ArcdResult<Self> {
        fs::create_dir_all(dir).map_err(|e| ArcdError::io_error_at_path(dir, e).into_fatal())?;
        let lock = StoreLock::acquire(&dir.join(LOCK_FILE), mode)?;

        let mut state = Self::load_snapshot(&dir.join(SNAPSHOT_FILE))?;
        let records = Journal::read_all(&dir.join(JOURNAL_FILE))?;
        for record in &records {
            state.apply(record).map_err(|e| {
                ArcdError::store_corrupt(format!(
                    "Journal record {} cannot be applied: {}",
                    record.txn(),
                    e.message()
                ))
            })?;
        }
        if !records.is_empty() {
            let count = records.len().to_string();
            log_event_with_fields(Event::JournalReplay, &[("records", count.as_str())]);
        }

        let journal = match mode {
            LockMode::Exclusive => Some(Journal::open(&dir.join(JOURNAL_FILE))?),
            LockMode::Shared => None,
        };

        let mut store = Self {
            dir: dir.to_path_buf(),
            lock,
            state,
            journal,
        };
        if mode == LockMode::Exclusive && !records.is_empty() {
            store.checkpoint()?;
        }

        let dir_display = dir.display().to_string();
        log_event_with_fields(
            Event::StoreOpened,
            &[
                ("dir", dir_display.as_str()),
                ("mode", if mode == LockMode::Exclusive { "exclusive" } else { "shared" }),
            ],
        );
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_writable(&self) -> bool {
        self.lock.mode() == LockMode::Exclusive
    }

    pub fn state(&self) -> &StoreState {
        &self.state
    }

    pub fn registry(&self) -> &VolumeRegistry {
        &self.state.registry
    }

    pub fn index(&self) -> &ContentIndex {
        &self.state.index
    }

    /// Mutable state; changes persist on [`ArchiveStore::commit`]
    pub fn state_mut(&mut self) -> ArcdResult<&mut StoreState> {
        self.ensure_writable()?;
        Ok(&mut self.state)
    }

    /// Persist the in-memory state
    pub fn commit(&mut self) -> ArcdResult<()> {
        self.ensure_writable()?;
        self.checkpoint()
    }

    /// Drop the content index, keeping the registry, so that the next
    /// reconcile rebuilds it from the volumes
    pub fn reset_index(&mut self) -> ArcdResult<()> {
        self.ensure_writable()?;
        self.state.index = ContentIndex::new();
        self.checkpoint()
    }

    /// Destroy a volume: mark it destroyed and drop all its copies, together
    pub fn destroy(&mut self, label: &str) -> ArcdResult<RemovalSummary> {
        self.ensure_writable()?;
        if !self.state.registry.contains(label) {
            return Err(ArcdError::not_found(format!("volume {}", label)));
        }

        let record = JournalRecord::Destroy {
            txn: Uuid::new_v4(),
            label: label.to_string(),
            at: Utc::now().to_rfc3339(),
        };
        self.append(&record)?;
        maybe_crash(points::DESTROY_AFTER_JOURNAL);

        let summary = self.state.apply(&record)?;
        self.checkpoint()?;

        let dropped = summary.copies_dropped.to_string();
        let removed = summary.entries_removed.len().to_string();
        log_event_with_fields(
            Event::VolumeDestroyed,
            &[
                ("label", label),
                ("copies_dropped", dropped.as_str()),
                ("entries_removed", removed.as_str()),
            ],
        );
        Ok(summary)
    }

    /// Clear a volume's destroyed status. Its copies return on the next
    /// reconcile that can see it.
    pub fn reactivate(&mut self, label: &str) -> ArcdResult<()> {
        self.ensure_writable()?;
        if !self.state.registry.contains(label) {
            return Err(ArcdError::not_found(format!("volume {}", label)));
        }

        let record = JournalRecord::Reactivate {
            txn: Uuid::new_v4(),
            label: label.to_string(),
            at: Utc::now().to_rfc3339(),
        };
        self.append(&record)?;
        self.state.apply(&record)?;
        self.checkpoint()?;

        log_event_with_fields(Event::VolumeReactivated, &[("label", label)]);
        Ok(())
    }

    fn append(&mut self, record: &JournalRecord) -> ArcdResult<()> {
        match self.journal.as_mut() {
            Some(journal) => journal.append(record),
            None => Err(Self::read_only_error(&self.dir)),
        }
    }

    fn ensure_writable(&self) -> ArcdResult<()> {
        if self.is_writable() {
            Ok(())
        } else {
            Err(Self::read_only_error(&self.dir))
        }
    }

    fn read_only_error(dir: &Path) -> ArcdError {
        ArcdError::io_error(
            format!("Index store at {} is open read-only", dir.display()),
            io::Error::new(io::ErrorKind::PermissionDenied, "shared lock"),
        )
    }

    /// Write the snapshot, then empty the journal
    fn checkpoint(&mut self) -> ArcdResult<()> {
        self.write_snapshot()?;
        maybe_crash(points::CHECKPOINT_BEFORE_JOURNAL_TRUNCATE);
        if let Some(journal) = self.journal.as_mut() {
            journal.truncate()?;
        }

        let entries = self.state.index.len().to_string();
        let volumes = self.state.registry.len().to_string();
        log_event_with_fields(
            Event::StoreCheckpoint,
            &[("entries", entries.as_str()), ("volumes", volumes.as_str())],
        );
        Ok(())
    }

    fn write_snapshot(&self) -> ArcdResult<()> {
        let snapshot = Snapshot {
            format_version: STORE_FORMAT_VERSION,
            saved_at: Utc::now().to_rfc3339(),
            registry: self.state.registry.clone(),
            index: self.state.index.clone(),
        };
        let data = serde_json::to_vec(&snapshot)
            .map_err(|e| ArcdError::store_corrupt(format!("Failed to encode snapshot: {}", e)))?;

        let target = self.dir.join(SNAPSHOT_FILE);
        let temp = self.dir.join(format!("{}.tmp", SNAPSHOT_FILE));
        let result = (|| {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&temp)?;
            file.write_all(&data)?;
            file.sync_all()?;
            maybe_crash(points::SNAPSHOT_BEFORE_RENAME);
            fs::rename(&temp, &target)?;
            File::open(&self.dir)?.sync_all()
        })();

        result.map_err(|e| ArcdError::io_error_at_path(&target, e).into_fatal())
    }

    fn load_snapshot(path: &Path) -> ArcdResult<StoreState> {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(StoreState::default()),
            Err(e) => return Err(ArcdError::io_error_at_path(path, e).into_fatal()),
        };

        let snapshot: Snapshot = serde_json::from_slice(&data).map_err(|e| {
            ArcdError::store_corrupt(format!(
                "Index snapshot {} is unreadable ({}); move it aside and run `arcd index` to rebuild",
                path.display(),
                e
            ))
        })?;
        if snapshot.format_version != STORE_FORMAT_VERSION {
            return Err(ArcdError::store_corrupt(format!(
                "Index snapshot {} has unsupported format version {}",
                path.display(),
                snapshot.format_version
            )));
        }

        Ok(StoreState {
            registry: snapshot.registry,
            index: snapshot.index,
        })
    }
}
