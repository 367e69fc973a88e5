//! Crate-wide error taxonomy.

use thiserror::Error;

/// One stable kind per recoverable failure mode, each carrying a one-line
/// English message. Candidate-level numerical failures are caught and
/// discarded by the caller (fitter); everything else propagates.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("schema violation: {0}")]
    SchemaViolation(String),

    #[error("numerical failure: {0}")]
    NumericalFailure(String),

    #[error("memory-mapped pool is full: {0}")]
    StorageFull(String),

    #[error("operation was cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("{0} has not been fitted yet")]
    NotFitted(String),

    #[error("fingerprint mismatch: cached artifact is incompatible with the new input: {0}")]
    FingerprintMismatch(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::IoError(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub fn schema(msg: impl Into<String>) -> Self {
        Error::SchemaViolation(msg.into())
    }

    pub fn numerical(msg: impl Into<String>) -> Self {
        Error::NumericalFailure(msg.into())
    }
}
