//! Content hashing for archived files
//!
//! Hashes are SHA-256, rendered algorithm-tagged: `sha256:<64 lowercase hex>`.
//! The tag keeps manifests self-describing if the algorithm ever changes.

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::{ArcdError, ArcdResult};

const HASH_PREFIX: &str = "sha256:";

/// Algorithm-tagged digest of a file's bytes
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    /// Hash an in-memory buffer
    pub fn of_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self::from_digest(hasher)
    }

    /// Hash everything a reader yields
    pub fn of_reader<R: Read>(reader: &mut R) -> io::Result<Self> {
        let mut hasher = Sha256::new();
        let mut buffer = [0u8; 64 * 1024];

        loop {
            let read = reader.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }

        Ok(Self::from_digest(hasher))
    }

    /// Hash a file on disk
    pub fn of_file(path: &Path) -> ArcdResult<Self> {
        let file = File::open(path).map_err(|e| ArcdError::io_error_at_path(path, e))?;
        let mut reader = BufReader::new(file);
        Self::of_reader(&mut reader).map_err(|e| ArcdError::io_error_at_path(path, e))
    }

    /// Parse a tagged hash string
    pub fn parse(formatted: &str) -> Option<Self> {
        let hex = formatted.strip_prefix(HASH_PREFIX)?;
        if hex.len() != 64 || !hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()) {
            return None;
        }
        Some(Self(formatted.to_string()))
    }

    /// Tagged string form
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form for tables
    pub fn short(&self) -> &str {
        let end = (HASH_PREFIX.len() + 12).min(self.0.len());
        &self.0[HASH_PREFIX.len()..end]
    }

    fn from_digest(hasher: Sha256) -> Self {
        Self(format!("{}{:x}", HASH_PREFIX, hasher.finalize()))
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for ContentHash {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("invalid content hash '{}'", value))
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.0
    }
}

/// Writer that hashes everything passing through it
pub struct HashingWriter<W: Write> {
    inner: W,
    hasher: Sha256,
    written: u64,
}

impl<W: Write> HashingWriter<W> {
    /// Wrap a writer
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            written: 0,
        }
    }

    /// Finish, returning the inner writer, the hash and the byte count
    pub fn finish(self) -> (W, ContentHash, u64) {
        (self.inner, ContentHash::from_digest(self.hasher), self.written)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Reader that hashes everything read through it
pub struct HashingReader<R: Read> {
    inner: R,
    hasher: Sha256,
    read: u64,
}

impl<R: Read> HashingReader<R> {
    /// Wrap a reader
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            read: 0,
        }
    }

    /// Bytes read so far
    pub fn bytes_read(&self) -> u64 {
        self.read
    }

    /// Finish, returning the hash and the byte count
    pub fn finish(self) -> (ContentHash, u64) {
        (ContentHash::from_digest(self.hasher), self.read)
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.read += n as u64;
        Ok(n)
    }
}

/// Hash many files on a fixed pool of worker threads.
///
/// Completion order is irrelevant: results come back sorted by key so that
/// anything built from them is deterministic.
pub fn hash_files_parallel(
    items: Vec<(String, PathBuf)>,
    workers: usize,
) -> Vec<(String, ArcdResult<ContentHash>)> {
    let workers = workers.max(1).min(items.len().max(1));
    let next = AtomicUsize::new(0);
    let results = Mutex::new(Vec::with_capacity(items.len()));

    thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| loop {
                let i = next.fetch_add(1, Ordering::Relaxed);
                let Some((key, path)) = items.get(i) else {
                    break;
                };
                let hash = ContentHash::of_file(path);
                results
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .push((key.clone(), hash));
            });
        }
    });

    let mut results = results
        .into_inner()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    results.sort_by(|a, b| a.0.cmp(&b.0));
    results
}
