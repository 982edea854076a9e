//! Tar bundles
//!
//! Entries are written in the order given with normalized headers (uid/gid 0,
//! owner root, integer mtime, source mode) so the same files always produce
//! the same bytes. Bundles are plain tar unless compression is enabled; a
//! plain tar keeps damage to one file's bytes from spreading to the next.
//! Readers detect gzip by its magic bytes, so both kinds read the same way,
//! and a rewrite keeps the compression of the bundle it copies.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{Archive, Builder, EntryType, Header};

use super::{ArchiveContainer, ContainerEntry, PackEntry, PackedEntry, Visit};
use crate::errors::{ArcdError, ArcdResult};
use crate::manifest::HashingReader;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Tar container, optionally gzip-compressed
#[derive(Debug, Clone, Copy, Default)]
pub struct TarContainer {
    compress: bool,
}

impl TarContainer {
    pub fn new(compress: bool) -> Self {
        Self { compress }
    }

    fn tar_error(context: impl Into<String>, e: io::Error) -> ArcdError {
        ArcdError::io_error(context, e)
    }

    fn normalized_header(size: u64, mode: u32, modified: i64) -> ArcdResult<Header> {
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_size(size);
        header.set_mode(mode & 0o7777);
        header.set_mtime(modified.max(0) as u64);
        header.set_uid(0);
        header.set_gid(0);
        header
            .set_username("root")
            .and_then(|_| header.set_groupname("root"))
            .map_err(|e| Self::tar_error("Failed to set tar owner", e))?;
        Ok(header)
    }

    fn pack_into<W: Write>(
        entries: &[PackEntry],
        writer: W,
    ) -> ArcdResult<(W, Vec<PackedEntry>)> {
        let mut builder = Builder::new(writer);
        let mut packed = Vec::with_capacity(entries.len());

        for entry in entries {
            let file = File::open(&entry.source)
                .map_err(|e| ArcdError::io_error_at_path(&entry.source, e))?;
            let size = file
                .metadata()
                .map_err(|e| ArcdError::io_error_at_path(&entry.source, e))?
                .len();

            let mut header = Self::normalized_header(size, entry.mode, entry.modified)?;
            let mut reader = HashingReader::new(file.take(size));
            builder
                .append_data(&mut header, &entry.path, &mut reader)
                .map_err(|e| {
                    Self::tar_error(format!("Failed to add {} to bundle", entry.path), e)
                })?;

            let (hash, read) = reader.finish();
            if read != size {
                return Err(ArcdError::io_error(
                    format!("{} changed while being packed", entry.path),
                    io::Error::new(io::ErrorKind::UnexpectedEof, "file shrank"),
                ));
            }
            packed.push(PackedEntry {
                path: entry.path.clone(),
                hash,
                size,
            });
        }

        let writer = builder
            .into_inner()
            .map_err(|e| Self::tar_error("Failed to finish bundle", e))?;
        Ok((writer, packed))
    }

    /// Buffer a reader and report whether it starts with the gzip magic
    fn sniff(input: Box<dyn Read + Send>) -> ArcdResult<(Box<dyn Read + Send>, bool)> {
        let mut buffered = BufReader::new(input);
        let head = buffered
            .fill_buf()
            .map_err(|e| Self::tar_error("Failed to read bundle", e))?;
        let compressed = head.starts_with(&GZIP_MAGIC);
        Ok((Box::new(buffered), compressed))
    }

    /// Wrap a reader, decompressing if needed
    fn open(input: Box<dyn Read + Send>) -> ArcdResult<Box<dyn Read + Send>> {
        let (buffered, compressed) = Self::sniff(input)?;
        if compressed {
            Ok(Box::new(GzDecoder::new(buffered)))
        } else {
            Ok(buffered)
        }
    }

    fn rewrite_into<W: Write>(
        &self,
        input: Box<dyn Read + Send>,
        replacements: &dyn Fn(&str) -> Option<Vec<u8>>,
        writer: W,
    ) -> ArcdResult<W> {
        let mut builder = Builder::new(writer);

        self.unpack(input, &mut |entry| {
            let mut header = Self::normalized_header(entry.size, entry.mode, entry.modified)?;
            let result = match replacements(&entry.path) {
                Some(bytes) => {
                    header.set_size(bytes.len() as u64);
                    builder.append_data(&mut header, &entry.path, &bytes[..])
                }
                None => builder.append_data(&mut header, &entry.path, entry.reader),
            };
            result.map_err(|e| {
                Self::tar_error(format!("Failed to rewrite {} into bundle", entry.path), e)
            })?;
            Ok(Visit::Continue)
        })?;

        builder
            .into_inner()
            .map_err(|e| Self::tar_error("Failed to finish rewritten bundle", e))
    }

    fn entry_path(entry: &tar::Entry<'_, impl Read>) -> ArcdResult<String> {
        let path = entry
            .path()
            .map_err(|e| Self::tar_error("Unreadable entry path in bundle", e))?;
        path.to_str()
            .map(|s| s.to_string())
            .ok_or_else(|| ArcdError::corrupt(format!("Non UTF-8 entry path: {}", path.display())))
    }
}

impl ArchiveContainer for TarContainer {
    fn pack(&self, entries: &[PackEntry], out: &mut dyn Write) -> ArcdResult<Vec<PackedEntry>> {
        if self.compress {
            let encoder = GzEncoder::new(out, Compression::default());
            let (encoder, packed) = Self::pack_into(entries, encoder)?;
            encoder
                .finish()
                .map_err(|e| Self::tar_error("Failed to finish compressed bundle", e))?;
            Ok(packed)
        } else {
            let (_, packed) = Self::pack_into(entries, out)?;
            Ok(packed)
        }
    }

    fn unpack(
        &self,
        input: Box<dyn Read + Send>,
        visit: &mut dyn FnMut(ContainerEntry<'_>) -> ArcdResult<Visit>,
    ) -> ArcdResult<()> {
        let mut archive = Archive::new(Self::open(input)?);
        let entries = archive
            .entries()
            .map_err(|e| ArcdError::corrupt(format!("Unreadable bundle: {}", e)))?;

        for entry in entries {
            let mut entry =
                entry.map_err(|e| ArcdError::corrupt(format!("Damaged bundle entry: {}", e)))?;
            if entry.header().entry_type() != EntryType::Regular {
                continue;
            }

            let path = Self::entry_path(&entry)?;
            let header = entry.header();
            let mode = header.mode().unwrap_or(0o644);
            let modified = header.mtime().unwrap_or(0) as i64;
            let size = entry.size();

            let next = visit(ContainerEntry {
                path,
                mode,
                modified,
                size,
                reader: &mut entry,
            })?;
            if next == Visit::Stop {
                break;
            }
        }
        Ok(())
    }

    fn rewrite(
        &self,
        input: Box<dyn Read + Send>,
        replacements: &dyn Fn(&str) -> Option<Vec<u8>>,
        out: &mut dyn Write,
    ) -> ArcdResult<()> {
        let (input, compressed) = Self::sniff(input)?;
        if compressed {
            let encoder = GzEncoder::new(out, Compression::default());
            self.rewrite_into(input, replacements, encoder)?
                .finish()
                .map_err(|e| Self::tar_error("Failed to finish rewritten bundle", e))?;
        } else {
            self.rewrite_into(input, replacements, out)?
                .flush()
                .map_err(|e| Self::tar_error("Failed to flush rewritten bundle", e))?;
        }
        Ok(())
    }
}
