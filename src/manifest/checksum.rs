//! CRC32 tags for manifests, journal frames and repair symbols
//!
//! Manifests carry the tag as `crc32:` followed by eight lowercase hex
//! digits. Content identity is SHA-256; CRC32 only catches media damage.

const TAG: &str = "crc32:";

pub fn compute_checksum(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Renders a checksum in its tagged form.
///
/// ```
/// use arcdiscvist::manifest::format_checksum;
/// assert_eq!(format_checksum(0xDEADBEEF), "crc32:deadbeef");
/// ```
pub fn format_checksum(checksum: u32) -> String {
    format!("{TAG}{checksum:08x}")
}

/// Reads a tagged checksum; anything but exactly eight hex digits is `None`.
pub fn parse_checksum(tagged: &str) -> Option<u32> {
    tagged
        .strip_prefix(TAG)
        .filter(|hex| hex.len() == 8 && hex.bytes().all(|b| b.is_ascii_hexdigit()))
        .and_then(|hex| u32::from_str_radix(hex, 16).ok())
}
