//! CLI argument definitions using clap
//!
//! Commands:
//! - arcd list [path]
//! - arcd find <pattern>
//! - arcd build <destination> <path...> [-c N]
//! - arcd restore <path...> [--to DIR]
//! - arcd verify [label...]
//! - arcd index [--rebuild]
//! - arcd volumes [label]
//! - arcd destroyed <label>
//! - arcd reactivate <label>

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

use super::io::parse_size;
use crate::volume::Medium;

/// arcdiscvist - an archive spread across offline volumes
#[derive(Parser, Debug)]
#[command(name = "arcd")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Emit command reports as JSON on stdout
    #[arg(long, global = true)]
    pub json: bool,

    /// Log more (-v info, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the immediate children of an archived directory
    List {
        /// Virtual directory (default: the root)
        path: Option<String>,
    },

    /// Find archived paths matching a glob
    Find {
        /// Glob; matched against whole paths if it contains `/`, else basenames
        pattern: String,
    },

    /// Write a new volume with files that need more copies
    Build {
        /// Directory, image path, or `remote:<name>`
        destination: String,

        /// Subtrees of the source root to consider
        #[arg(required = true)]
        paths: Vec<String>,

        /// Copies each file should end up with
        #[arg(short = 'c', long = "copies")]
        copies: Option<usize>,

        /// Medium of the destination (rewritable, write-once, remote)
        #[arg(long)]
        medium: Option<Medium>,

        /// Volume capacity, e.g. 4.7G or 25000000000
        #[arg(long, value_parser = parse_size)]
        size: Option<u64>,

        /// Keep packing smaller files once one does not fit
        #[arg(long)]
        pack_small: bool,

        /// gzip the bundle
        #[arg(long)]
        compress: bool,
    },

    /// Restore archived paths, asking for volumes as needed
    Restore {
        /// Virtual paths (files or directories)
        #[arg(required = true)]
        paths: Vec<String>,

        /// Target directory
        #[arg(long, default_value = ".")]
        to: PathBuf,

        /// Seconds to wait for each requested volume
        #[arg(long)]
        timeout: Option<u64>,

        /// Do not prompt; wait for volumes to appear
        #[arg(long)]
        yes: bool,
    },

    /// Verify attached volumes against their manifests
    Verify {
        /// Labels to verify (default: every attached volume)
        labels: Vec<String>,
    },

    /// Record every attached volume in the index
    Index {
        /// Discard the content index first and rebuild it from the volumes
        #[arg(long)]
        rebuild: bool,
    },

    /// Show known volumes, or the files on one volume
    Volumes {
        label: Option<String>,
    },

    /// Mark a volume destroyed and drop its copies
    Destroyed {
        label: String,
    },

    /// Bring a destroyed volume back
    Reactivate {
        label: String,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
