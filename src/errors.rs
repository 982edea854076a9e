//! Archive error types
//!
//! Errors follow the structured model used throughout the crate:
//! - Codes in ARCD_CATEGORY_NAME format
//! - Explicit severity (ERROR or FATAL)
//! - Optional underlying I/O error as source
//!
//! FATAL errors are structural (unwritable destination, locked or damaged
//! store, bad configuration) and abort the running command immediately.
//! ERROR severity covers per-item failures that are collected into batch
//! reports instead of aborting.

use std::fmt;
use std::io;
use std::path::Path;

use serde::Serialize;

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Operation failed, remaining work may continue
    Error,
    /// Structural failure, command must abort
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Archive error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArcdErrorCode {
    /// Path or volume label absent
    NotFound,
    /// Same path claimed with divergent content by different volumes
    IntegrityConflict,
    /// Required volume not currently discoverable
    Unavailable,
    /// Verification failure
    Corrupt,
    /// Multi-item operation failed for some items
    PartialFailure,
    /// I/O failure
    Io,
    /// Manifest unreadable or checksum mismatch
    Manifest,
    /// Store lock held by another process
    StoreLocked,
    /// Persisted store unreadable
    StoreCorrupt,
    /// Configuration invalid
    Config,
    /// Operation cancelled by the caller
    Cancelled,
    /// Virtual path rejected by normalization
    InvalidPath,
    /// Volume label malformed
    InvalidLabel,
}

impl ArcdErrorCode {
    /// Returns the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ArcdErrorCode::NotFound => "ARCD_NOT_FOUND",
            ArcdErrorCode::IntegrityConflict => "ARCD_INTEGRITY_CONFLICT",
            ArcdErrorCode::Unavailable => "ARCD_UNAVAILABLE",
            ArcdErrorCode::Corrupt => "ARCD_CORRUPT",
            ArcdErrorCode::PartialFailure => "ARCD_PARTIAL_FAILURE",
            ArcdErrorCode::Io => "ARCD_IO",
            ArcdErrorCode::Manifest => "ARCD_MANIFEST",
            ArcdErrorCode::StoreLocked => "ARCD_STORE_LOCKED",
            ArcdErrorCode::StoreCorrupt => "ARCD_STORE_CORRUPT",
            ArcdErrorCode::Config => "ARCD_CONFIG",
            ArcdErrorCode::Cancelled => "ARCD_CANCELLED",
            ArcdErrorCode::InvalidPath => "ARCD_INVALID_PATH",
            ArcdErrorCode::InvalidLabel => "ARCD_INVALID_LABEL",
        }
    }

    pub const ALL: [ArcdErrorCode; 13] = [
        ArcdErrorCode::NotFound,
        ArcdErrorCode::IntegrityConflict,
        ArcdErrorCode::Unavailable,
        ArcdErrorCode::Corrupt,
        ArcdErrorCode::PartialFailure,
        ArcdErrorCode::Io,
        ArcdErrorCode::Manifest,
        ArcdErrorCode::StoreLocked,
        ArcdErrorCode::StoreCorrupt,
        ArcdErrorCode::Config,
        ArcdErrorCode::Cancelled,
        ArcdErrorCode::InvalidPath,
        ArcdErrorCode::InvalidLabel,
    ];

    /// Inverse of [`as_str`](Self::as_str)
    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == code)
    }

    /// Returns the severity level for this error code
    pub fn severity(&self) -> Severity {
        match self {
            ArcdErrorCode::StoreLocked
            | ArcdErrorCode::StoreCorrupt
            | ArcdErrorCode::Config => Severity::Fatal,
            _ => Severity::Error,
        }
    }
}

impl fmt::Display for ArcdErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Archive error with full context
#[derive(Debug)]
pub struct ArcdError {
    code: ArcdErrorCode,
    message: String,
    /// I/O failures at a build destination are promoted to FATAL
    fatal: bool,
    source: Option<io::Error>,
}

impl ArcdError {
    fn new(code: ArcdErrorCode, message: impl Into<String>, source: Option<io::Error>) -> Self {
        Self {
            code,
            message: message.into(),
            fatal: code.severity() == Severity::Fatal,
            source,
        }
    }

    /// Path or label absent
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::new(ArcdErrorCode::NotFound, format!("Not found: {}", what.into()), None)
    }

    /// Divergent content for one path
    pub fn integrity_conflict(message: impl Into<String>) -> Self {
        Self::new(ArcdErrorCode::IntegrityConflict, message, None)
    }

    /// Volume not reachable right now
    pub fn unavailable(label: &str) -> Self {
        Self::new(
            ArcdErrorCode::Unavailable,
            format!("Volume {} is not currently available", label),
            None,
        )
    }

    /// Volume content failed verification
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::new(ArcdErrorCode::Corrupt, message, None)
    }

    /// Some items of a batch failed
    pub fn partial_failure(failed: usize, total: usize) -> Self {
        Self::new(
            ArcdErrorCode::PartialFailure,
            format!("{} of {} items failed", failed, total),
            None,
        )
    }

    /// Every item of a batch failed the same way
    pub fn uniform_failure(code: ArcdErrorCode, message: impl Into<String>) -> Self {
        Self::new(code, message, None)
    }

    /// I/O failure with context
    pub fn io_error(message: impl Into<String>, source: io::Error) -> Self {
        Self::new(ArcdErrorCode::Io, message, Some(source))
    }

    /// I/O failure at a specific path
    pub fn io_error_at_path(path: &Path, source: io::Error) -> Self {
        Self::io_error(format!("I/O error at {}", path.display()), source)
    }

    /// Manifest failure
    pub fn manifest(message: impl Into<String>) -> Self {
        Self::new(ArcdErrorCode::Manifest, message, None)
    }

    /// Store lock is held elsewhere
    pub fn store_locked(path: &Path) -> Self {
        Self::new(
            ArcdErrorCode::StoreLocked,
            format!(
                "Index store at {} is locked by another process",
                path.display()
            ),
            None,
        )
    }

    /// Store snapshot or journal unreadable
    pub fn store_corrupt(message: impl Into<String>) -> Self {
        Self::new(ArcdErrorCode::StoreCorrupt, message, None)
    }

    /// Configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ArcdErrorCode::Config, message, None)
    }

    /// Caller cancelled
    pub fn cancelled() -> Self {
        Self::new(ArcdErrorCode::Cancelled, "Operation cancelled", None)
    }

    /// Rejected virtual path
    pub fn invalid_path(path: &str, reason: &str) -> Self {
        Self::new(
            ArcdErrorCode::InvalidPath,
            format!("Invalid path '{}': {}", path, reason),
            None,
        )
    }

    /// Rejected volume label
    pub fn invalid_label(label: &str) -> Self {
        Self::new(
            ArcdErrorCode::InvalidLabel,
            format!("Invalid volume label '{}'", label),
            None,
        )
    }

    /// Append detail to the message
    pub fn with_detail(mut self, detail: &str) -> Self {
        self.message.push_str(detail);
        self
    }

    /// Promote this error to FATAL.
    ///
    /// Used for destination and store I/O, where continuing is meaningless.
    pub fn into_fatal(mut self) -> Self {
        self.fatal = true;
        self
    }

    /// Returns the error code
    pub fn code(&self) -> ArcdErrorCode {
        self.code
    }

    /// Returns the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the severity of this error
    pub fn severity(&self) -> Severity {
        if self.fatal {
            Severity::Fatal
        } else {
            Severity::Error
        }
    }

    /// Returns whether this error must abort the running command
    pub fn is_fatal(&self) -> bool {
        self.fatal
    }
}

impl fmt::Display for ArcdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity(), self.code, self.message)?;
        if let Some(ref source) = self.source {
            write!(f, " (caused by: {})", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for ArcdError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Result type for archive operations
pub type ArcdResult<T> = Result<T, ArcdError>;

/// One failed item in a batch report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    /// Path or label the failure concerns
    pub item: String,
    /// Error code string
    pub code: &'static str,
    pub reason: String,
}

impl ItemFailure {
    pub fn new(item: impl Into<String>, error: &ArcdError) -> Self {
        Self {
            item: item.into(),
            code: error.code().as_str(),
            reason: error.message().to_string(),
        }
    }
}

impl fmt::Display for ItemFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({})", self.item, self.reason, self.code)
    }
}
