//! Volume manifests and content hashing
//!
//! # Volume Layout
//!
//! Every volume, wherever it lives, is a set of keys sharing its label:
//!
//! ```text
//! <LABEL>.arcd          bundle (tar, optionally gzip)
//! <LABEL>.meta.arcd     manifest JSON, doubles as the discovery marker
//! <LABEL>.repair.arcd   RaptorQ repair data (optional)
//! ```
//!
//! Keys with a `.gpg` suffix are encrypted at rest and need an external
//! decryption step before this crate can read them.

mod checksum;
mod hash;
#[allow(clippy::module_inception)]
mod manifest;

pub use checksum::{compute_checksum, format_checksum, parse_checksum};
pub use hash::{hash_files_parallel, ContentHash, HashingReader, HashingWriter};
pub use manifest::{ManifestEntry, VolumeManifest, MANIFEST_FORMAT_VERSION};

/// Suffix of the manifest key
pub const MANIFEST_SUFFIX: &str = ".meta.arcd";
/// Suffix of the bundle key
pub const BUNDLE_SUFFIX: &str = ".arcd";
/// Suffix of the repair data key
pub const REPAIR_SUFFIX: &str = ".repair.arcd";
/// Suffix marking encrypted-at-rest keys
pub const ENCRYPTED_SUFFIX: &str = ".gpg";

/// Key of a volume's bundle
pub fn bundle_key(label: &str) -> String {
    format!("{}{}", label, BUNDLE_SUFFIX)
}

/// Key of a volume's manifest
pub fn manifest_key(label: &str) -> String {
    format!("{}{}", label, MANIFEST_SUFFIX)
}

/// Key of a volume's repair data
pub fn repair_key(label: &str) -> String {
    format!("{}{}", label, REPAIR_SUFFIX)
}

/// Extract the label from a manifest key, noting whether it is encrypted
pub fn label_from_manifest_key(key: &str) -> Option<(&str, bool)> {
    let (stem, encrypted) = match key.strip_suffix(ENCRYPTED_SUFFIX) {
        Some(stem) => (stem, true),
        None => (key, false),
    };
    let label = stem.strip_suffix(MANIFEST_SUFFIX)?;
    if label.is_empty() || label.contains('/') || label.contains('.') {
        return None;
    }
    Some((label, encrypted))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_names() {
        assert_eq!(bundle_key("KQ7MZA"), "KQ7MZA.arcd");
        assert_eq!(manifest_key("KQ7MZA"), "KQ7MZA.meta.arcd");
        assert_eq!(repair_key("KQ7MZA"), "KQ7MZA.repair.arcd");
    }

    #[test]
    fn test_label_from_manifest_key() {
        assert_eq!(label_from_manifest_key("KQ7MZA.meta.arcd"), Some(("KQ7MZA", false)));
        assert_eq!(
            label_from_manifest_key("KQ7MZA.meta.arcd.gpg"),
            Some(("KQ7MZA", true))
        );
        assert_eq!(label_from_manifest_key("KQ7MZA.arcd"), None);
        assert_eq!(label_from_manifest_key("KQ7MZA.repair.arcd"), None);
        assert_eq!(label_from_manifest_key(".meta.arcd"), None);
    }
}
