//! Configuration file loading
//!
//! The configuration is a single JSON object. Only `state_dir` is required;
//! every other field has a default.
//!
//! ```json
//! {
//!   "state_dir": "/var/lib/arcdiscvist",
//!   "source_root": "/srv/archive",
//!   "volume_roots": [{ "path": "/media", "medium": "write-once" }],
//!   "remotes": [{ "name": "offsite", "path": "/mnt/offsite-bucket" }],
//!   "min_copies": 2
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{ArcdError, ArcdResult};
use crate::volume::Medium;

/// File name looked up in the working directory
pub const LOCAL_CONFIG_NAME: &str = "arcdiscvist.json";

/// A directory searched for volume manifests
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeRoot {
    /// Mount point or directory holding volumes
    pub path: PathBuf,

    /// Medium assumed for volumes found here
    #[serde(default = "default_root_medium")]
    pub medium: Medium,
}

/// A remote endpoint reachable through an object-store backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteConfig {
    /// Name used in `remote:<name>` destinations
    pub name: String,

    /// Directory the object store is mirrored to
    pub path: PathBuf,
}

/// Configuration file structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the index store (required)
    pub state_dir: PathBuf,

    /// Root of the virtual hierarchy on the source machine
    #[serde(default = "default_source_root")]
    pub source_root: PathBuf,

    /// Directories scanned for attached volumes
    #[serde(default)]
    pub volume_roots: Vec<VolumeRoot>,

    /// Individual volume directories supplied by hand
    #[serde(default)]
    pub manual_locations: Vec<PathBuf>,

    /// Remote endpoints
    #[serde(default)]
    pub remotes: Vec<RemoteConfig>,

    /// Minimum copies each path should have (default 1)
    #[serde(default = "default_min_copies")]
    pub min_copies: usize,

    /// Length of generated volume labels (default 6)
    #[serde(default = "default_label_length")]
    pub label_length: usize,

    /// Worker threads used for hashing (default 4)
    #[serde(default = "default_hash_workers")]
    pub hash_workers: usize,

    /// Capacity of a new volume in bytes (unlimited if absent)
    #[serde(default)]
    pub volume_size_bytes: Option<u64>,

    /// Keep packing smaller files after one does not fit
    #[serde(default)]
    pub pack_small: bool,

    /// gzip-compress bundles
    #[serde(default)]
    pub compress: bool,

    /// Repair overhead in basis points (default 1000 = 10%)
    #[serde(default = "default_repair_ratio_bps")]
    pub repair_ratio_bps: u32,

    /// RaptorQ symbol size in bytes (default 1024)
    #[serde(default = "default_repair_symbol_size")]
    pub repair_symbol_size: u16,

    /// Files larger than this carry no repair data (default 32MB)
    #[serde(default = "default_max_repair_file_bytes")]
    pub max_repair_file_bytes: u64,

    /// Seconds to wait for a requested volume (default 600)
    #[serde(default = "default_prompt_timeout_secs")]
    pub prompt_timeout_secs: u64,

    /// Milliseconds between availability checks (default 1000)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Directory names never descended into
    #[serde(default = "default_ignore_directories")]
    pub ignore_directories: Vec<String>,

    /// File names never archived
    #[serde(default = "default_ignore_files")]
    pub ignore_files: Vec<String>,

    /// File name prefixes never archived
    #[serde(default = "default_ignore_prefixes")]
    pub ignore_prefixes: Vec<String>,
}

fn default_root_medium() -> Medium {
    Medium::Rewritable
}
fn default_source_root() -> PathBuf {
    PathBuf::from(".")
}
fn default_min_copies() -> usize {
    1
}
fn default_label_length() -> usize {
    6
}
fn default_hash_workers() -> usize {
    4
}
fn default_repair_ratio_bps() -> u32 {
    1000
}
fn default_repair_symbol_size() -> u16 {
    1024
}
fn default_max_repair_file_bytes() -> u64 {
    32 * 1024 * 1024
} // 32MB
fn default_prompt_timeout_secs() -> u64 {
    600
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_ignore_directories() -> Vec<String> {
    vec!["arcdiscvist".to_string(), "@eaDir".to_string()]
}
fn default_ignore_files() -> Vec<String> {
    vec!["Thumbs.db".to_string()]
}
fn default_ignore_prefixes() -> Vec<String> {
    vec!["arcdiscvist-".to_string()]
}

impl Config {
    /// Configuration with defaults for everything but the state directory
    pub fn with_state_dir(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            source_root: default_source_root(),
            volume_roots: Vec::new(),
            manual_locations: Vec::new(),
            remotes: Vec::new(),
            min_copies: default_min_copies(),
            label_length: default_label_length(),
            hash_workers: default_hash_workers(),
            volume_size_bytes: None,
            pack_small: false,
            compress: false,
            repair_ratio_bps: default_repair_ratio_bps(),
            repair_symbol_size: default_repair_symbol_size(),
            max_repair_file_bytes: default_max_repair_file_bytes(),
            prompt_timeout_secs: default_prompt_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            ignore_directories: default_ignore_directories(),
            ignore_files: default_ignore_files(),
            ignore_prefixes: default_ignore_prefixes(),
        }
    }

    /// Load configuration from file
    pub fn load(path: &Path) -> ArcdResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            ArcdError::config(format!("Failed to read config {}: {}", path.display(), e))
        })?;

        Self::from_json(&content)
    }

    /// Parse and validate configuration JSON
    pub fn from_json(content: &str) -> ArcdResult<Self> {
        let config: Config = serde_json::from_str(content)
            .map_err(|e| ArcdError::config(format!("Invalid config JSON: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Locate and load the configuration.
    ///
    /// An explicit path wins; otherwise the working directory, the user's
    /// home and `/etc` are searched in that order.
    pub fn discover(explicit: Option<&Path>) -> ArcdResult<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        let candidates = Self::search_paths();
        for candidate in &candidates {
            if candidate.is_file() {
                return Self::load(candidate);
            }
        }

        Err(ArcdError::config(format!(
            "No config file found. Searched: {}",
            candidates
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )))
    }

    fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(LOCAL_CONFIG_NAME)];
        if let Some(home) = std::env::var_os("HOME") {
            paths.push(PathBuf::from(home).join(".arcdiscvist").join("config.json"));
        }
        paths.push(PathBuf::from("/etc/arcdiscvist/config.json"));
        paths
    }

    /// Validate configuration
    pub fn validate(&self) -> ArcdResult<()> {
        if self.state_dir.as_os_str().is_empty() {
            return Err(ArcdError::config("state_dir must not be empty"));
        }

        if self.min_copies == 0 {
            return Err(ArcdError::config("min_copies must be >= 1"));
        }

        if self.label_length < 4 || self.label_length > 16 {
            return Err(ArcdError::config(format!(
                "label_length must be between 4 and 16, got {}",
                self.label_length
            )));
        }

        if self.hash_workers == 0 {
            return Err(ArcdError::config("hash_workers must be > 0"));
        }

        if self.repair_symbol_size == 0 || self.repair_symbol_size % 8 != 0 {
            return Err(ArcdError::config(format!(
                "repair_symbol_size must be a positive multiple of 8, got {}",
                self.repair_symbol_size
            )));
        }

        if self.poll_interval_ms == 0 {
            return Err(ArcdError::config("poll_interval_ms must be > 0"));
        }

        let mut names: Vec<&str> = self.remotes.iter().map(|r| r.name.as_str()).collect();
        names.sort_unstable();
        if names.windows(2).any(|w| w[0] == w[1]) {
            return Err(ArcdError::config("remote names must be unique"));
        }

        Ok(())
    }

    /// How long to wait for a requested volume
    pub fn prompt_timeout(&self) -> Duration {
        Duration::from_secs(self.prompt_timeout_secs)
    }

    /// Delay between availability checks
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Look up a remote by name
    pub fn remote(&self, name: &str) -> Option<&RemoteConfig> {
        self.remotes.iter().find(|r| r.name == name)
    }
}
