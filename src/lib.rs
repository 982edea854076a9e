//! arcdiscvist - an archive spread across offline volumes
//!
//! Files are packed onto volumes (optical discs, removable drives, remote
//! buckets) that are mostly not attached. A local content index records
//! which volumes hold which version of every path, so that:
//! - `build` knows which files still need copies
//! - `restore` asks for as few volumes as possible
//! - `verify` checks volumes against their manifests and repairs damage
//!
//! The index is a cache: discarding it and running `index` against every
//! volume reproduces it.

pub mod backend;
pub mod build;
pub mod cli;
pub mod config;
pub mod container;
pub mod crash_point;
pub mod errors;
pub mod index;
pub mod manifest;
pub mod observability;
pub mod repair;
pub mod restore;
pub mod store;
pub mod verify;
pub mod volume;
