//! Volume verification
//!
//! Recomputes the content hash of every file a volume's manifest lists and
//! compares it with the recorded hash. Damaged files are repaired from the
//! volume's repair data when possible. Verification only reports: nothing
//! is removed from the content index.

mod verifier;

use serde::Serialize;

pub use verifier::Verifier;

use crate::errors::{ArcdError, ArcdResult, ItemFailure};

/// State of one checked file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum FileState {
    Ok,
    Repaired,
    Corrupt { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileCheck {
    pub path: String,
    #[serde(flatten)]
    pub state: FileState,
}

/// Overall status of a volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum VerifyStatus {
    Ok,
    /// Damage found and fully repaired
    Repaired { files: usize },
    /// Some files could not be recovered
    Corrupt { unrecoverable: Vec<String> },
}

impl VerifyStatus {
    pub fn label(&self) -> String {
        match self {
            VerifyStatus::Ok => "OK".to_string(),
            VerifyStatus::Repaired { files } => format!("REPAIRED({})", files),
            VerifyStatus::Corrupt { .. } => "CORRUPT".to_string(),
        }
    }
}

/// Verification result for one volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolumeVerification {
    pub label: String,
    pub location: String,
    pub status: VerifyStatus,
    pub files: Vec<FileCheck>,
    /// Whether repaired bytes were written back to the volume
    pub rewritten: bool,
}

/// Verification result for a set of volumes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    pub volumes: Vec<VolumeVerification>,
    /// Requested volumes that could not be verified at all
    pub failures: Vec<ItemFailure>,
}

impl VerifyReport {
    /// Error if any volume is corrupt or could not be checked
    pub fn into_result(self) -> ArcdResult<Self> {
        let corrupt: Vec<&str> = self
            .volumes
            .iter()
            .filter(|v| matches!(v.status, VerifyStatus::Corrupt { .. }))
            .map(|v| v.label.as_str())
            .collect();
        if !corrupt.is_empty() {
            return Err(ArcdError::corrupt(format!(
                "Corrupt volumes: {}",
                corrupt.join(", ")
            )));
        }
        if !self.failures.is_empty() {
            return Err(ArcdError::partial_failure(
                self.failures.len(),
                self.volumes.len() + self.failures.len(),
            ));
        }
        Ok(self)
    }
}
