//! Named abort points for durability tests
//!
//! When `ARCD_CRASH_POINT` names a point, reaching it aborts the process on
//! the spot. Nothing unwinds and no destructor runs, so the store and the
//! destination are left as a power cut would leave them.
//!
//! ```bash
//! ARCD_CRASH_POINT=destroy_after_journal arcd destroyed KQ7MZA
//! ```

use std::sync::OnceLock;

const ENV_VAR: &str = "ARCD_CRASH_POINT";

fn armed_point() -> Option<&'static str> {
    static ARMED: OnceLock<Option<String>> = OnceLock::new();
    ARMED.get_or_init(|| std::env::var(ENV_VAR).ok()).as_deref()
}

/// Whether the process is armed to abort at `name`
pub fn crash_point_enabled(name: &str) -> bool {
    armed_point() == Some(name)
}

/// Abort here if armed for `name`
#[inline]
pub fn maybe_crash(name: &str) {
    if !crash_point_enabled(name) {
        return;
    }
    eprintln!("[CRASH] {}={}", ENV_VAR, name);
    std::process::abort();
}

pub mod points {
    /// Destroy record is in the journal, snapshot untouched
    pub const DESTROY_AFTER_JOURNAL: &str = "destroy_after_journal";
    /// New snapshot in place, journal not yet emptied
    pub const CHECKPOINT_BEFORE_JOURNAL_TRUNCATE: &str = "checkpoint_before_journal_truncate";
    /// Temporary snapshot written but not renamed
    pub const SNAPSHOT_BEFORE_RENAME: &str = "snapshot_before_rename";
    /// Bundle and manifest staged under hidden names
    pub const BUILD_BEFORE_PUBLISH: &str = "build_before_publish";
    /// First requested volume extracted
    pub const RESTORE_AFTER_FIRST_VOLUME: &str = "restore_after_first_volume";

    pub const ALL: [&str; 5] = [
        DESTROY_AFTER_JOURNAL,
        CHECKPOINT_BEFORE_JOURNAL_TRUNCATE,
        SNAPSHOT_BEFORE_RENAME,
        BUILD_BEFORE_PUBLISH,
        RESTORE_AFTER_FIRST_VOLUME,
    ];
}
