//! Store journal
//!
//! Each record is framed as:
//!
//! ```text
//! | length (u32 LE) | payload (JSON, length bytes) | crc32 of payload (u32 LE) |
//! ```
//!
//! Every append is followed by fsync; a record is committed once its fsync
//! returns. A partial record at the tail is an append that never committed
//! and is ignored. Damage anywhere before the tail is corruption.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{ArcdError, ArcdResult};
use crate::manifest::compute_checksum;
use crate::observability::{log_event_with_fields, Event};

/// Largest payload accepted when reading
const MAX_RECORD_LEN: u32 = 16 * 1024 * 1024;

/// One committed mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum JournalRecord {
    /// Mark a volume destroyed and drop its copies, as one unit
    Destroy { txn: Uuid, label: String, at: String },
    /// Clear a volume's destroyed status
    Reactivate { txn: Uuid, label: String, at: String },
}

impl JournalRecord {
    pub fn label(&self) -> &str {
        match self {
            JournalRecord::Destroy { label, .. } | JournalRecord::Reactivate { label, .. } => label,
        }
    }

    pub fn txn(&self) -> Uuid {
        match self {
            JournalRecord::Destroy { txn, .. } | JournalRecord::Reactivate { txn, .. } => *txn,
        }
    }
}

/// Append-only journal file
#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
    file: File,
}

impl Journal {
    /// Open or create the journal for appending
    pub fn open(path: &Path) -> ArcdResult<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| ArcdError::io_error_at_path(path, e).into_fatal())?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    /// Append a record and fsync it
    pub fn append(&mut self, record: &JournalRecord) -> ArcdResult<()> {
        let payload = serde_json::to_vec(record).map_err(|e| {
            ArcdError::store_corrupt(format!("Failed to encode journal record: {}", e))
        })?;

        let mut frame = Vec::with_capacity(payload.len() + 8);
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&payload);
        frame.extend_from_slice(&compute_checksum(&payload).to_le_bytes());

        self.file
            .write_all(&frame)
            .and_then(|_| self.file.sync_all())
            .map_err(|e| ArcdError::io_error_at_path(&self.path, e).into_fatal())?;

        let txn = record.txn().to_string();
        log_event_with_fields(
            Event::JournalAppend,
            &[("label", record.label()), ("txn", txn.as_str())],
        );
        Ok(())
    }

    /// Empty the journal after a checkpoint
    pub fn truncate(&mut self) -> ArcdResult<()> {
        self.file
            .set_len(0)
            .and_then(|_| self.file.sync_all())
            .map_err(|e| ArcdError::io_error_at_path(&self.path, e).into_fatal())
    }

    /// Read every committed record
    pub fn read_all(path: &Path) -> ArcdResult<Vec<JournalRecord>> {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ArcdError::io_error_at_path(path, e).into_fatal()),
        };
        Self::decode(&data, path)
    }

    fn decode(data: &[u8], path: &Path) -> ArcdResult<Vec<JournalRecord>> {
        let mut records = Vec::new();
        let mut reader = data;

        while !reader.is_empty() {
            let offset = data.len() - reader.len();
            match Self::next_frame(&mut reader) {
                Ok(Some(payload)) => {
                    let record = serde_json::from_slice(payload).map_err(|e| {
                        Self::corruption(path, offset, &format!("undecodable record: {}", e))
                    })?;
                    records.push(record);
                }
                Ok(None) => {
                    // Torn tail: the append never completed
                    break;
                }
                Err(reason) => {
                    if reader.is_empty() {
                        break;
                    }
                    return Err(Self::corruption(path, offset, reason));
                }
            }
        }

        Ok(records)
    }

    /// Split off one frame. `Ok(None)` means the data ends mid-frame.
    fn next_frame<'a>(reader: &mut &'a [u8]) -> Result<Option<&'a [u8]>, &'static str> {
        let mut len_bytes = [0u8; 4];
        if reader.read_exact(&mut len_bytes).is_err() {
            *reader = &[];
            return Ok(None);
        }
        let len = u32::from_le_bytes(len_bytes);
        if len > MAX_RECORD_LEN {
            return Err("record length out of range");
        }

        let len = len as usize;
        if reader.len() < len + 4 {
            *reader = &[];
            return Ok(None);
        }
        let (payload, rest) = reader.split_at(len);
        let (crc_bytes, rest) = rest.split_at(4);
        *reader = rest;

        let stored = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        if stored != compute_checksum(payload) {
            return Err("checksum mismatch");
        }
        Ok(Some(payload))
    }

    fn corruption(path: &Path, offset: usize, reason: &str) -> ArcdError {
        let offset = offset.to_string();
        log_event_with_fields(
            Event::JournalCorruption,
            &[("offset", offset.as_str()), ("reason", reason)],
        );
        ArcdError::store_corrupt(format!(
            "Journal {} damaged at offset {}: {}",
            path.display(),
            offset,
            reason
        ))
    }
}
