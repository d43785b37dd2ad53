//! The closed error-kind enumeration from `spec.md` §7.

use crate::oid::Oid;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Invalid URL, missing password, contradictory settings. Fatal at
    /// startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Wrong password on open, or a sealed box failed to unwrap on read.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// I/O, network, or protocol error from the storage backend.
    #[error("backend error: {0}")]
    Backend(String),

    /// Envelope version/type invalid, truncated object, size mismatch,
    /// malformed snapshot/directory entry.
    #[error("corrupt object {oid}: {reason}")]
    Corrupt { oid: String, reason: String },

    /// Restoration path escape attempt.
    #[error("unsafe path in stored entry: {0}")]
    UnsafePath(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn corrupt(oid: Oid, reason: impl Into<String>) -> Self {
        Error::Corrupt {
            oid: oid.to_hex(),
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Error::Backend(value.to_string())
    }
}

impl From<object_store::Error> for Error {
    fn from(value: object_store::Error) -> Self {
        Error::Backend(value.to_string())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(value: rusqlite::Error) -> Self {
        Error::Backend(format!("metadata cache: {value}"))
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(value: tokio::task::JoinError) -> Self {
        Error::Backend(format!("task join failed: {value}"))
    }
}
