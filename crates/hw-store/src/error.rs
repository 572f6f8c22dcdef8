//! Store error types.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by store backends.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid domain name: {0}")]
    InvalidDomain(String),

    #[error("corrupt entry {key}: {message}")]
    Corrupt { key: String, message: String },

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store directory {0} is locked by another process")]
    Locked(PathBuf),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<StoreError> for hw_common::Error {
    fn from(err: StoreError) -> Self {
        hw_common::Error::StoreUnavailable(err.to_string())
    }
}
