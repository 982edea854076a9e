//! Errors surfaced by `arcd`
//!
//! Archive errors keep their `ARCD_*` code, which also picks the exit
//! status. Failing to write a report is `ARCD_CLI_IO_ERROR` or
//! `ARCD_CLI_OUTPUT_ERROR`.

use std::io;

use thiserror::Error;

use crate::errors::{ArcdError, ArcdErrorCode};

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{}: {}", .0.code().as_str(), render_archive(.0))]
    Archive(#[from] ArcdError),

    #[error("ARCD_CLI_IO_ERROR: {0}")]
    Io(#[from] io::Error),

    #[error("ARCD_CLI_OUTPUT_ERROR: JSON error: {0}")]
    Output(#[from] serde_json::Error),
}

fn render_archive(error: &ArcdError) -> String {
    match std::error::Error::source(error) {
        Some(cause) => format!("{} (caused by: {})", error.message(), cause),
        None => error.message().to_string(),
    }
}

/// Exit status for an archive error code
pub fn exit_status(code: ArcdErrorCode) -> i32 {
    match code {
        ArcdErrorCode::IntegrityConflict => 3,
        ArcdErrorCode::Unavailable => 4,
        ArcdErrorCode::Corrupt => 5,
        ArcdErrorCode::PartialFailure => 6,
        ArcdErrorCode::NotFound | ArcdErrorCode::InvalidPath | ArcdErrorCode::InvalidLabel => 7,
        ArcdErrorCode::Cancelled => 130,
        ArcdErrorCode::Io
        | ArcdErrorCode::Manifest
        | ArcdErrorCode::StoreLocked
        | ArcdErrorCode::StoreCorrupt
        | ArcdErrorCode::Config => 1,
    }
}

impl CliError {
    pub fn code_str(&self) -> &'static str {
        match self {
            CliError::Archive(e) => e.code().as_str(),
            CliError::Io(_) => "ARCD_CLI_IO_ERROR",
            CliError::Output(_) => "ARCD_CLI_OUTPUT_ERROR",
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Archive(e) => exit_status(e.code()),
            CliError::Io(_) | CliError::Output(_) => 1,
        }
    }
}
