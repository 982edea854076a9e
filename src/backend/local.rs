//! # Local Filesystem Backend
//!
//! Stores each key as a file in one directory. Used for mounted media and
//! for directories that mirror a remote bucket.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use uuid::Uuid;

use super::errors::{BackendError, BackendResult};
use super::{validate_key, StorageBackend};

/// Local filesystem storage backend
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    /// Create a new local backend
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Directory holding the keys
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn full_path(&self, key: &str) -> BackendResult<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    fn map_read_error(key: &str, e: io::Error) -> BackendError {
        if e.kind() == io::ErrorKind::NotFound {
            BackendError::ObjectNotFound(key.to_string())
        } else {
            BackendError::io(key, e)
        }
    }

    /// Write via a hidden temp file, fsync, then rename over the key
    fn publish(&self, key: &str, write: impl FnOnce(&mut File) -> io::Result<()>) -> BackendResult<()> {
        let target = self.full_path(key)?;
        fs::create_dir_all(&self.root).map_err(|e| BackendError::io(key, e))?;

        let temp = self.root.join(format!(".{}.{}.tmp", key, Uuid::new_v4().simple()));
        let result = (|| {
            let mut file = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&temp)?;
            write(&mut file)?;
            file.sync_all()?;
            fs::rename(&temp, &target)?;
            File::open(&self.root)?.sync_all()
        })();

        if let Err(e) = result {
            let _ = fs::remove_file(&temp);
            return Err(BackendError::io(key, e));
        }
        Ok(())
    }
}

impl StorageBackend for LocalBackend {
    fn put(&self, key: &str, data: &[u8]) -> BackendResult<()> {
        self.publish(key, |file| file.write_all(data))
    }

    fn get(&self, key: &str) -> BackendResult<Vec<u8>> {
        let path = self.full_path(key)?;
        fs::read(&path).map_err(|e| Self::map_read_error(key, e))
    }

    fn list(&self, prefix: &str) -> BackendResult<Vec<String>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(BackendError::Unreachable(self.root.display().to_string()))
            }
            Err(e) => return Err(BackendError::io(prefix, e)),
        };

        let mut results = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| BackendError::io(prefix, e))?;
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if name.starts_with(prefix) && !name.starts_with('.') {
                    results.push(name.to_string());
                }
            }
        }

        results.sort();
        Ok(results)
    }

    fn delete(&self, key: &str) -> BackendResult<()> {
        let path = self.full_path(key)?;
        fs::remove_file(&path).map_err(|e| Self::map_read_error(key, e))
    }

    fn exists(&self, key: &str) -> BackendResult<bool> {
        Ok(self.full_path(key)?.is_file())
    }

    fn put_stream(
        &self,
        key: &str,
        write: &mut dyn FnMut(&mut dyn Write) -> io::Result<()>,
    ) -> BackendResult<()> {
        self.publish(key, |file| write(file))
    }

    fn location(&self) -> String {
        self.root.display().to_string()
    }

    fn reader(&self, key: &str) -> BackendResult<Box<dyn Read + Send>> {
        let path = self.full_path(key)?;
        let file = File::open(&path).map_err(|e| Self::map_read_error(key, e))?;
        Ok(Box::new(io::BufReader::new(file)))
    }

    fn put_file(&self, key: &str, path: &Path) -> BackendResult<()> {
        self.publish(key, |file| {
            let mut source = File::open(path)?;
            io::copy(&mut source, file)?;
            Ok(())
        })
    }
}
