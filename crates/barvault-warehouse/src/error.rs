use std::path::PathBuf;

use thiserror::Error;

/// Reasons a serialized document is refused before it reaches disk.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntegrityError {
    #[error("serialized document is empty")]
    Empty,

    #[error("unbalanced '{delimiter}' delimiters")]
    Unbalanced { delimiter: char },

    #[error("unterminated string literal")]
    UnterminatedString,

    #[error("serialized form contains more than one top-level document")]
    ConcatenatedDocuments,

    #[error("duplicate top-level section '{0}'")]
    DuplicateSection(String),

    #[error("malformed document: {0}")]
    Malformed(String),
}

/// Failures reported by the crash-safe writer once its retries are spent.
#[derive(Error, Debug)]
pub enum WriteError {
    #[error("corruption prevented for {path}: {source}")]
    CorruptionPrevented {
        path: PathBuf,
        #[source]
        source: IntegrityError,
    },

    #[error("verification failed for {path}: expected checksum {expected}, found {actual}")]
    VerificationFailed {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("i/o error writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("writer is shut down")]
    ShutDown,

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl WriteError {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::CorruptionPrevented { .. } => "write.corruption_prevented",
            Self::VerificationFailed { .. } => "write.verification_failed",
            Self::Io { .. } => "write.io",
            Self::ShutDown => "write.shut_down",
            Self::Serialization(_) => "write.serialization",
        }
    }
}

/// Errors surfaced by document stores.
#[derive(Error, Debug)]
pub enum WarehouseError {
    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Write(#[from] WriteError),

    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    #[error("invalid key '{key}': {reason}")]
    InvalidKey { key: String, reason: &'static str },

    #[error("storage task failed: {0}")]
    Task(String),
}
