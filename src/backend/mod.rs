//! # Storage Backends
//!
//! Every volume is read and written through the same narrow object-store
//! interface, whether it is a mounted disc, an SD card, or a bucket. Keys are
//! flat names such as `KQ7MZA.meta.arcd`.

mod errors;
mod local;

use std::fmt::Debug;
use std::fs::File;
use std::io::{self, Cursor, Read, Write};
use std::path::Path;

pub use errors::{BackendError, BackendResult};
pub use local::LocalBackend;

/// Backend trait for volume storage
pub trait StorageBackend: Send + Sync + Debug {
    /// Store bytes under a key, replacing any previous object atomically
    fn put(&self, key: &str, data: &[u8]) -> BackendResult<()>;

    /// Fetch the bytes stored under a key
    fn get(&self, key: &str) -> BackendResult<Vec<u8>>;

    /// List keys starting with a prefix, sorted
    fn list(&self, prefix: &str) -> BackendResult<Vec<String>>;

    /// Remove a key
    fn delete(&self, key: &str) -> BackendResult<()>;

    /// Check if a key exists
    fn exists(&self, key: &str) -> BackendResult<bool>;

    /// Human-readable address of this backend
    fn location(&self) -> String;

    /// Stream an object.
    ///
    /// The default buffers the whole object; backends with cheap random
    /// access override it.
    fn reader(&self, key: &str) -> BackendResult<Box<dyn Read + Send>> {
        Ok(Box::new(Cursor::new(self.get(key)?)))
    }

    /// Store whatever `write` produces under a key, replacing it atomically
    ///
    /// The default collects the output in memory; backends with a
    /// filesystem stage it beside the key instead.
    fn put_stream(
        &self,
        key: &str,
        write: &mut dyn FnMut(&mut dyn Write) -> io::Result<()>,
    ) -> BackendResult<()> {
        let mut data = Vec::new();
        write(&mut data).map_err(|e| BackendError::io(key, e))?;
        self.put(key, &data)
    }

    /// Store a local file under a key
    fn put_file(&self, key: &str, path: &Path) -> BackendResult<()> {
        let mut data = Vec::new();
        File::open(path)
            .and_then(|mut f| f.read_to_end(&mut data))
            .map_err(|e| BackendError::io(key, e))?;
        self.put(key, &data)
    }
}

/// Reject keys that could escape a flat namespace
pub fn validate_key(key: &str) -> BackendResult<()> {
    if key.is_empty()
        || key.contains('/')
        || key.contains('\\')
        || key.starts_with('.')
        || key.contains('\0')
    {
        return Err(BackendError::InvalidKey(key.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key() {
        assert!(validate_key("KQ7MZA.arcd").is_ok());
        assert!(validate_key("../etc/passwd").is_err());
        assert!(validate_key("a/b").is_err());
        assert!(validate_key(".hidden").is_err());
        assert!(validate_key("").is_err());
    }
}
