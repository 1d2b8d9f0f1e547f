//! Error types for the verification pipeline
//!
//! Storage errors are split by recovery strategy: a connectivity failure
//! means the ledger handle has to be replaced before retrying, anything
//! else is retried on the same handle.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failure reported by a [`crate::ledger::Ledger`] implementation
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The underlying connection is gone and must be re-established
    #[error("ledger connection lost: {0}")]
    Connectivity(String),
    /// Any other backend failure (constraint, busy, malformed row, ...)
    #[error("ledger backend error: {0}")]
    Backend(String),
}

impl LedgerError {
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity(_))
    }
}

impl From<rusqlite::Error> for LedgerError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        match &err {
            rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
                ErrorCode::CannotOpen
                | ErrorCode::SystemIoFailure
                | ErrorCode::NotADatabase
                | ErrorCode::ReadOnly
                | ErrorCode::DatabaseCorrupt => Self::Connectivity(err.to_string()),
                _ => Self::Backend(err.to_string()),
            },
            rusqlite::Error::InvalidPath(_) => Self::Connectivity(err.to_string()),
            _ => Self::Backend(err.to_string()),
        }
    }
}

/// Failure of the external verification program itself (not a FAIL verdict)
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("failed to launch `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("verifier argument template has no `{{path}}` placeholder")]
    MissingPathPlaceholder,
}

/// Per-file failure that skips the file for the current pass
#[derive(Debug, Error)]
pub enum FileError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("could not verify {}: {source}", path.display())]
    Verifier {
        path: PathBuf,
        #[source]
        source: VerifyError,
    },
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl FileError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
