//! CLI module for arcdiscvist
//!
//! Provides the `arcd` command-line interface:
//! - list / find: browse the content index
//! - build: write a new volume
//! - restore: bring paths back, prompting for volumes
//! - verify: check attached volumes and repair what can be repaired
//! - index: reconcile the index against attached volumes
//! - volumes / destroyed / reactivate: manage the registry

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{run, run_command};
pub use errors::{exit_status, CliError, CliResult};
pub use io::{format_size, parse_size};
