//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend for an identifier could not be constructed.
    #[error("storage {id:?} not found: {reason}")]
    NotFound {
        /// The identifier that failed to resolve.
        id: String,
        /// Why construction failed.
        reason: String,
    },

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An offset or length was negative or not representable.
    #[error("invalid argument {name}: {value}")]
    InvalidArgument {
        /// The argument name (`offset`, `length`).
        name: &'static str,
        /// The rejected value, as given by the caller.
        value: String,
    },

    /// Attempted to read beyond the end of storage.
    ///
    /// Backends may produce this internally; the dispatcher treats the
    /// range as absent data instead of surfacing it.
    #[error("read beyond end of storage: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: u64,
        /// The current storage size.
        size: u64,
    },

    /// The stored representation is not one this backend could have written.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// Encryption or decryption failed.
    #[error("encryption error: {0}")]
    Encryption(String),

    /// The backend kind does not implement this operation.
    #[error("operation {0} is not supported by this backend")]
    Unsupported(&'static str),
}

/// Coarse classification of a [`StorageError`], matching the uniform contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The identifier's backend could not be constructed.
    NotFound,
    /// The underlying operation failed.
    Io,
    /// The caller passed a malformed offset or length.
    InvalidArgument,
}

impl StorageError {
    /// Returns the contract-level kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::NotFound { .. } => ErrorKind::NotFound,
            StorageError::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            StorageError::Io(_)
            | StorageError::ReadPastEnd { .. }
            | StorageError::Corrupted(_)
            | StorageError::Encryption(_)
            | StorageError::Unsupported(_) => ErrorKind::Io,
        }
    }

    pub(crate) fn invalid_argument(name: &'static str, value: impl ToString) -> Self {
        StorageError::InvalidArgument {
            name,
            value: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        let not_found = StorageError::NotFound {
            id: "tree".into(),
            reason: "no such device".into(),
        };
        assert_eq!(not_found.kind(), ErrorKind::NotFound);
        assert_eq!(
            StorageError::invalid_argument("offset", -1).kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(
            StorageError::Encryption("authentication failed".into()).kind(),
            ErrorKind::Io
        );
        assert_eq!(
            StorageError::Io(io::Error::new(io::ErrorKind::Other, "disk")).kind(),
            ErrorKind::Io
        );
    }

    #[test]
    fn error_display() {
        let err = StorageError::invalid_argument("length", -4);
        assert_eq!(err.to_string(), "invalid argument length: -4");

        let err = StorageError::NotFound {
            id: "data".into(),
            reason: "permission denied".into(),
        };
        assert!(err.to_string().contains("\"data\""));
        assert!(err.to_string().contains("permission denied"));
    }
}
