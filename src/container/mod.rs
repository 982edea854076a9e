//! Archive container
//!
//! Packs files into a bundle and streams them back out. The bundle format is
//! opaque to the rest of the crate beyond a lossless round-trip of path,
//! bytes, mode and mtime.

mod tarball;

use std::io::{Read, Write};
use std::path::PathBuf;

pub use tarball::TarContainer;

use crate::errors::ArcdResult;
use crate::manifest::ContentHash;

/// A source file to place in a bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackEntry {
    /// Virtual path inside the bundle
    pub path: String,
    /// File on the local filesystem
    pub source: PathBuf,
    /// Unix permission bits
    pub mode: u32,
    /// Modification time, seconds since the epoch
    pub modified: i64,
}

/// What was actually written for one entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedEntry {
    pub path: String,
    pub hash: ContentHash,
    pub size: u64,
}

/// One file streamed out of a bundle
pub struct ContainerEntry<'a> {
    pub path: String,
    pub mode: u32,
    pub modified: i64,
    pub size: u64,
    pub reader: &'a mut dyn Read,
}

/// Whether to keep streaming after an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    Continue,
    Stop,
}

/// Archive container collaborator
pub trait ArchiveContainer: Send + Sync {
    /// Pack entries in the given order, reporting the bytes actually stored
    fn pack(&self, entries: &[PackEntry], out: &mut dyn Write) -> ArcdResult<Vec<PackedEntry>>;

    /// Stream every regular file in a bundle to a visitor.
    ///
    /// A damaged container stops the stream with an error; entries already
    /// visited stay visited.
    fn unpack(
        &self,
        input: Box<dyn Read + Send>,
        visit: &mut dyn FnMut(ContainerEntry<'_>) -> ArcdResult<Visit>,
    ) -> ArcdResult<()>;

    /// Copy a bundle, substituting the bytes of some entries and keeping
    /// the input's compression
    fn rewrite(
        &self,
        input: Box<dyn Read + Send>,
        replacements: &dyn Fn(&str) -> Option<Vec<u8>>,
        out: &mut dyn Write,
    ) -> ArcdResult<()>;
}
