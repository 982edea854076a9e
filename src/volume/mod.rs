//! Volume identities, registry and discovery
//!
//! A volume is one physical or remote storage unit holding a bundle and its
//! manifest. The registry remembers every label ever issued; discovery finds
//! the subset that happens to be reachable right now.

mod discovery;
mod label;
mod registry;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use discovery::{DiscoveredVolume, Discovery, DiscoveryReport};
pub use label::{generate_label, validate_label, LABEL_ALPHABET, MAX_LABEL_ATTEMPTS};
pub use registry::{Volume, VolumeRegistry, VolumeStatus};

/// Physical kind of a volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Medium {
    /// SD cards, removable drives, plain directories
    Rewritable,
    /// Optical discs; written once through a burn image
    WriteOnce,
    /// Object storage reached through a backend
    Remote,
}

impl Medium {
    pub fn as_str(&self) -> &'static str {
        match self {
            Medium::Rewritable => "rewritable",
            Medium::WriteOnce => "write-once",
            Medium::Remote => "remote",
        }
    }

    /// Whether stored bundles may be rewritten in place
    pub fn is_rewritable(&self) -> bool {
        matches!(self, Medium::Rewritable)
    }
}

impl fmt::Display for Medium {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Medium {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rewritable" => Ok(Medium::Rewritable),
            "write-once" => Ok(Medium::WriteOnce),
            "remote" => Ok(Medium::Remote),
            other => Err(format!(
                "unknown medium '{}' (expected rewritable, write-once or remote)",
                other
            )),
        }
    }
}
