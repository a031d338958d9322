//! Error types for the relay.

use std::net::SocketAddr;
use thiserror::Error;

/// Result type for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;

/// Errors that can occur while relaying a replication stream.
#[derive(Error, Debug)]
pub enum RelayError {
    /// The remote transport faulted.
    #[error("transport error: {0}")]
    Transport(String),

    /// Reading from or writing to the replication stream failed.
    #[error("replication stream error: {0}")]
    Io(#[from] std::io::Error),

    /// The feed refused to open a replication stream.
    #[error("cannot open replication stream: {0}")]
    Replicate(String),

    /// A feed key was malformed.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// The listener could not be bound.
    #[error("cannot bind {addr}: {source}")]
    Bind {
        /// The requested address.
        addr: SocketAddr,
        /// The underlying error.
        source: std::io::Error,
    },

    /// The server is already relaying its maximum number of connections.
    #[error("connection limit reached")]
    ConnectionLimit,
}

impl RelayError {
    /// Returns true if this error came from the remote side of a connection.
    pub fn is_transport(&self) -> bool {
        matches!(self, RelayError::Transport(_))
    }
}

impl From<axum::Error> for RelayError {
    fn from(err: axum::Error) -> Self {
        RelayError::Transport(err.to_string())
    }
}
