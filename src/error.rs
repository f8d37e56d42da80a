//! Error types for crewsheet.
//!
//! Every variant maps to exactly one [`ErrorKind`]. Entry points match on the
//! kind to decide how a failure is surfaced; library code only propagates.

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("header {0:?} not found")]
    MissingHeader(String),

    #[error("sheet not found: {0}")]
    SheetNotFound(String),

    #[error("folder not found: {0}")]
    FolderNotFound(String),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("sheet {0} has no data")]
    EmptySheet(String),

    #[error("job {key} is held by {owner} until {until}")]
    LeaseHeld {
        key: String,
        owner: String,
        until: DateTime<Utc>,
    },

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Coarse classification used by entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Wrong argument shape or bad configuration. Never retried.
    Validation,
    /// Expected sheet, header, folder or data is missing.
    Structural,
    /// Another invocation owns the job.
    Conflict,
    /// The durable store failed.
    Storage,
    /// Anything else.
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) | Error::Config(_) => ErrorKind::Validation,
            Error::MissingHeader(_)
            | Error::SheetNotFound(_)
            | Error::FolderNotFound(_)
            | Error::FileNotFound(_)
            | Error::EmptySheet(_) => ErrorKind::Structural,
            Error::LeaseHeld { .. } => ErrorKind::Conflict,
            Error::Storage(_) | Error::Io(_) => ErrorKind::Storage,
            Error::Serde(_) | Error::Other(_) => ErrorKind::Internal,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Structural => "structural",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Storage => "storage",
            ErrorKind::Internal => "internal",
        };
        write!(f, "{s}")
    }
}

pub type Result<T> = std::result::Result<T, Error>;
