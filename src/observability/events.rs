//! Observable lifecycle events
//!
//! Events are explicit and typed so that log consumers can rely on a fixed
//! vocabulary.

use std::fmt;

/// Observable events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Configuration
    /// Configuration loaded
    ConfigLoaded,

    // Store
    /// Store opened and journal replayed
    StoreOpened,
    /// Journal record appended and fsynced
    JournalAppend,
    /// Journal records replayed over the snapshot
    JournalReplay,
    /// Snapshot written and journal truncated
    StoreCheckpoint,
    /// Journal tail damaged (FATAL)
    JournalCorruption,

    // Discovery
    /// Volume located during discovery
    VolumeDiscovered,
    /// Encrypted volume seen but not readable
    VolumeEncrypted,

    // Reconcile
    /// Volume manifest merged into the index
    VolumeIndexed,
    /// Destroyed volume seen during discovery
    DestroyedVolumeSeen,
    /// Divergent content for one path
    IntegrityConflict,

    // Build
    /// Bundle published at the destination
    BundlePublished,
    /// Partial bundle removed after failure
    BundleDiscarded,

    // Restore
    /// Waiting for an operator to present a volume
    MediumRequested,
    /// Volume became available
    MediumAvailable,
    /// Volume skipped or timed out
    MediumSkipped,
    /// Restored file failed hash verification
    RestoreHashMismatch,

    // Verify
    /// File bytes regenerated from repair data
    FileRepaired,
    /// File failed verification
    FileCorrupt,

    // Destroy
    /// Volume marked destroyed and removed from the index
    VolumeDestroyed,
    /// Destroyed status cleared
    VolumeReactivated,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::ConfigLoaded => "CONFIG_LOADED",

            Event::StoreOpened => "STORE_OPENED",
            Event::JournalAppend => "JOURNAL_APPEND",
            Event::JournalReplay => "JOURNAL_REPLAY",
            Event::StoreCheckpoint => "STORE_CHECKPOINT",
            Event::JournalCorruption => "JOURNAL_CORRUPTION",

            Event::VolumeDiscovered => "VOLUME_DISCOVERED",
            Event::VolumeEncrypted => "VOLUME_ENCRYPTED",

            Event::VolumeIndexed => "VOLUME_INDEXED",
            Event::DestroyedVolumeSeen => "DESTROYED_VOLUME_SEEN",
            Event::IntegrityConflict => "INTEGRITY_CONFLICT",

            Event::BundlePublished => "BUNDLE_PUBLISHED",
            Event::BundleDiscarded => "BUNDLE_DISCARDED",

            Event::MediumRequested => "MEDIUM_REQUESTED",
            Event::MediumAvailable => "MEDIUM_AVAILABLE",
            Event::MediumSkipped => "MEDIUM_SKIPPED",
            Event::RestoreHashMismatch => "RESTORE_HASH_MISMATCH",

            Event::FileRepaired => "FILE_REPAIRED",
            Event::FileCorrupt => "FILE_CORRUPT",

            Event::VolumeDestroyed => "VOLUME_DESTROYED",
            Event::VolumeReactivated => "VOLUME_REACTIVATED",
        }
    }

    /// Returns true if this event indicates a fatal condition
    pub fn is_fatal(&self) -> bool {
        matches!(self, Event::JournalCorruption)
    }

    /// Returns true if this event needs operator attention
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            Event::IntegrityConflict
                | Event::DestroyedVolumeSeen
                | Event::VolumeEncrypted
                | Event::MediumSkipped
                | Event::RestoreHashMismatch
                | Event::FileCorrupt
                | Event::BundleDiscarded
        )
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names_are_upper_snake() {
        let events = [
            Event::ConfigLoaded,
            Event::StoreOpened,
            Event::JournalAppend,
            Event::JournalReplay,
            Event::StoreCheckpoint,
            Event::JournalCorruption,
            Event::VolumeDiscovered,
            Event::VolumeEncrypted,
            Event::VolumeIndexed,
            Event::DestroyedVolumeSeen,
            Event::IntegrityConflict,
            Event::BundlePublished,
            Event::BundleDiscarded,
            Event::MediumRequested,
            Event::MediumAvailable,
            Event::MediumSkipped,
            Event::RestoreHashMismatch,
            Event::FileRepaired,
            Event::FileCorrupt,
            Event::VolumeDestroyed,
            Event::VolumeReactivated,
        ];

        for event in events {
            let s = event.as_str();
            assert!(!s.is_empty());
            assert!(s
                .chars()
                .all(|c| c.is_ascii_uppercase() || c == '_'));
        }
    }

    #[test]
    fn test_only_journal_corruption_is_fatal() {
        assert!(Event::JournalCorruption.is_fatal());
        assert!(!Event::IntegrityConflict.is_fatal());
        assert!(Event::IntegrityConflict.is_warning());
    }
}
