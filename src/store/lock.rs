//! Cross-process store lock
//!
//! Mutating commands hold an exclusive lock for as long as the store is
//! open; read-only commands hold a shared one. Neither waits: a lock held
//! elsewhere fails the command immediately with `ARCD_STORE_LOCKED`.
//!
//! The exclusive holder writes its pid and start time into the lock file so
//! the error can say who holds it.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::errors::{ArcdError, ArcdResult};

/// Lock mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug, Serialize, Deserialize)]
struct LockHolder {
    pid: u32,
    started_at: String,
}

/// Held lock; released on drop
#[derive(Debug)]
pub struct StoreLock {
    file: File,
    path: PathBuf,
    mode: LockMode,
}

impl StoreLock {
    pub fn acquire(path: &Path, mode: LockMode) -> ArcdResult<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(|e| ArcdError::io_error_at_path(path, e).into_fatal())?;

        let result = match mode {
            LockMode::Shared => FileExt::try_lock_shared(&file),
            LockMode::Exclusive => FileExt::try_lock_exclusive(&file),
        };
        if let Err(e) = result {
            if e.kind() == io::ErrorKind::WouldBlock
                || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
            {
                let holder = Self::read_holder(&mut file)
                    .map(|h| format!(" (pid {} since {})", h.pid, h.started_at))
                    .unwrap_or_default();
                let dir = path.parent().unwrap_or(path);
                return Err(ArcdError::store_locked(dir).with_detail(&holder));
            }
            return Err(ArcdError::io_error_at_path(path, e).into_fatal());
        }

        if mode == LockMode::Exclusive {
            Self::write_holder(&mut file)
                .map_err(|e| ArcdError::io_error_at_path(path, e).into_fatal())?;
        }

        Ok(Self {
            file,
            path: path.to_path_buf(),
            mode,
        })
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_holder(file: &mut File) -> Option<LockHolder> {
        let mut content = String::new();
        file.seek(SeekFrom::Start(0)).ok()?;
        file.read_to_string(&mut content).ok()?;
        serde_json::from_str(&content).ok()
    }

    fn write_holder(file: &mut File) -> io::Result<()> {
        let holder = LockHolder {
            pid: std::process::id(),
            started_at: Utc::now().to_rfc3339(),
        };
        let content = serde_json::to_vec(&holder)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&content)?;
        file.sync_all()
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
