//! RaptorQ repair data
//!
//! At build time each file's bytes are split into source symbols and a
//! number of RaptorQ repair symbols is kept, together with a CRC32 of every
//! source symbol. To repair a damaged copy, the damaged bytes are split the
//! same way, symbols whose CRC no longer matches are thrown away, and the
//! survivors plus the repair symbols are decoded. A repair only counts if
//! the result hashes to the manifest's content hash.
//!
//! Repair data for a volume is stored as `<LABEL>.repair.arcd`:
//!
//! ```json
//! {
//!   "format_version": 1,
//!   "label": "KQ7MZA",
//!   "files": {
//!     "docs/a.txt": {
//!       "hash": "sha256:...", "size": 5000, "symbol_size": 1024,
//!       "symbol_crcs": [...], "packets": [{"esi": 5, "data": "<base64>"}]
//!     }
//!   }
//! }
//! ```

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use raptorq::{Decoder, Encoder, EncodingPacket, ObjectTransmissionInformation, PayloadId};
use serde::{Deserialize, Serialize};

use crate::errors::{ArcdError, ArcdResult};
use crate::manifest::{compute_checksum, ContentHash};

pub const REPAIR_FORMAT_VERSION: u8 = 1;

/// Largest source symbol count of a single RaptorQ source block
pub const MAX_SOURCE_SYMBOLS: u64 = 56_403;

const SYMBOL_ALIGNMENT: u8 = 8;

/// One stored repair symbol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairPacket {
    pub esi: u32,
    /// Base64 symbol bytes
    pub data: String,
}

/// Repair data for one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRepair {
    pub hash: ContentHash,
    pub size: u64,
    pub symbol_size: u16,
    /// CRC32 of each source symbol, zero padded to the symbol size
    pub symbol_crcs: Vec<u32>,
    pub packets: Vec<RepairPacket>,
}

fn transmission_info(size: u64, symbol_size: u16) -> ObjectTransmissionInformation {
    ObjectTransmissionInformation::new(size, symbol_size, 1, 1, SYMBOL_ALIGNMENT)
}

impl FileRepair {
    /// Number of source symbols
    pub fn source_symbols(&self) -> usize {
        self.symbol_crcs.len()
    }

    /// Reconstruct the original bytes from a damaged copy
    pub fn repair(&self, damaged: &[u8]) -> ArcdResult<Vec<u8>> {
        let size = self.size as usize;
        let mut data = damaged[..damaged.len().min(size)].to_vec();
        data.resize(size, 0);

        let oti = transmission_info(self.size, self.symbol_size);
        let encoder = Encoder::new(&data, oti);
        let mut decoder = Decoder::new(oti);

        let mut intact = 0usize;
        for packet in encoder.get_encoded_packets(0) {
            let esi = packet.payload_id().encoding_symbol_id() as usize;
            if self.symbol_crcs.get(esi) != Some(&compute_checksum(packet.data())) {
                continue;
            }
            intact += 1;
            if let Some(decoded) = decoder.decode(packet) {
                return self.accept(decoded);
            }
        }

        for stored in &self.packets {
            let bytes = STANDARD.decode(&stored.data).map_err(|e| {
                ArcdError::corrupt(format!("Repair packet {} undecodable: {}", stored.esi, e))
            })?;
            let packet = EncodingPacket::new(PayloadId::new(0, stored.esi), bytes);
            if let Some(decoded) = decoder.decode(packet) {
                return self.accept(decoded);
            }
        }

        Err(ArcdError::corrupt(format!(
            "Not enough intact symbols to repair: {} of {} source symbols intact, {} repair symbols",
            intact,
            self.source_symbols(),
            self.packets.len()
        )))
    }

    fn accept(&self, decoded: Vec<u8>) -> ArcdResult<Vec<u8>> {
        if ContentHash::of_bytes(&decoded) != self.hash {
            return Err(ArcdError::corrupt(
                "Repaired bytes do not match the recorded content hash",
            ));
        }
        Ok(decoded)
    }
}

/// Produces repair data at build time
#[derive(Debug, Clone, Copy)]
pub struct RepairEncoder {
    symbol_size: u16,
    ratio_bps: u32,
    max_file_bytes: u64,
}

impl RepairEncoder {
    pub fn new(symbol_size: u16, ratio_bps: u32, max_file_bytes: u64) -> Self {
        Self {
            symbol_size,
            ratio_bps,
            max_file_bytes,
        }
    }

    /// Whether a file of this size gets repair data
    pub fn accepts(&self, size: u64) -> bool {
        size > 0
            && size <= self.max_file_bytes
            && self.ratio_bps > 0
            && size.div_ceil(u64::from(self.symbol_size)) <= MAX_SOURCE_SYMBOLS
    }

    /// Encode one file; `None` when the file is empty, too large, or no
    /// repair symbols are wanted
    pub fn encode(&self, data: &[u8]) -> Option<FileRepair> {
        let size = data.len() as u64;
        if !self.accepts(size) {
            return None;
        }
        let source_symbols = size.div_ceil(u64::from(self.symbol_size));
        let repair_symbols = (source_symbols * u64::from(self.ratio_bps)).div_ceil(10_000).max(1);

        let encoder = Encoder::new(data, transmission_info(size, self.symbol_size));
        let mut symbol_crcs = vec![0u32; source_symbols as usize];
        let mut packets = Vec::with_capacity(repair_symbols as usize);

        for packet in encoder.get_encoded_packets(repair_symbols as u32) {
            let esi = packet.payload_id().encoding_symbol_id();
            match symbol_crcs.get_mut(esi as usize) {
                Some(crc) => *crc = compute_checksum(packet.data()),
                None => packets.push(RepairPacket {
                    esi,
                    data: STANDARD.encode(packet.data()),
                }),
            }
        }

        Some(FileRepair {
            hash: ContentHash::of_bytes(data),
            size,
            symbol_size: self.symbol_size,
            symbol_crcs,
            packets,
        })
    }
}

/// Repair data for a whole volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairData {
    pub format_version: u8,
    pub label: String,
    pub files: BTreeMap<String, FileRepair>,
}

impl RepairData {
    pub fn new(label: &str) -> Self {
        Self {
            format_version: REPAIR_FORMAT_VERSION,
            label: label.to_string(),
            files: BTreeMap::new(),
        }
    }

    pub fn get(&self, path: &str) -> Option<&FileRepair> {
        self.files.get(path)
    }

    pub fn to_json(&self) -> ArcdResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| {
            ArcdError::manifest(format!("Failed to encode repair data for {}: {}", self.label, e))
        })
    }

    pub fn from_json(data: &[u8]) -> ArcdResult<Self> {
        let repair: Self = serde_json::from_slice(data)
            .map_err(|e| ArcdError::manifest(format!("Failed to parse repair data: {}", e)))?;
        if repair.format_version != REPAIR_FORMAT_VERSION {
            return Err(ArcdError::manifest(format!(
                "Unsupported repair data version {}",
                repair.format_version
            )));
        }
        Ok(repair)
    }
}
