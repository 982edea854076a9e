//! Content index subsystem
//!
//! The content index is derived state: a mirror of what the volume
//! manifests say, never a source of truth.
//!
//! # Design Principles
//!
//! - Derived state: rebuildable by replaying manifests in label order
//! - Deterministic: BTreeMap iteration order everywhere
//! - Additive reconcile: a volume that is simply absent keeps its copies

mod content;
mod glob;
mod indexer;
mod path;

pub use content::{
    Child, ChildKind, ContentIndex, DissentingClaim, FileEntry, IntegrityConflict, RecordOutcome,
    RemovalSummary, VolumeUsage,
};
pub use glob::GlobPattern;
pub use indexer::{reconcile_volumes, Indexer, ReconcileReport, VolumeIndexed};
pub use path::{basename, is_within, normalize_path};
