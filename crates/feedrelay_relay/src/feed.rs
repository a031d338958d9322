//! The feed seam: what the relay needs from an append-only log.

use crate::error::RelayError;
use std::fmt;
use std::io;
use std::str::FromStr;
use tokio::io::{AsyncRead, AsyncWrite};

/// Length of a feed's public key in bytes.
pub const KEY_LENGTH: usize = 32;

/// A feed's public identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FeedKey([u8; KEY_LENGTH]);

impl FeedKey {
    /// Wraps raw key bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Returns the raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }

    /// Returns the key as 64 lowercase hex characters.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for FeedKey {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| RelayError::InvalidKey(e.to_string()))?;
        let bytes: [u8; KEY_LENGTH] = bytes.try_into().map_err(|v: Vec<u8>| {
            RelayError::InvalidKey(format!(
                "expected {KEY_LENGTH} bytes, got {}",
                v.len()
            ))
        })?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for FeedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for FeedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form keeps log lines readable.
        write!(f, "FeedKey({}..)", &self.to_hex()[..8])
    }
}

/// An append-only log that can replicate with peers.
///
/// The relay never looks inside the log. It only asks for a fresh
/// replication stream per connection and copies bytes in both directions.
pub trait Feed: Send + Sync + 'static {
    /// The byte stream carrying the replication protocol.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// The feed's public key.
    fn key(&self) -> FeedKey;

    /// Opens a new replication stream.
    ///
    /// `is_initiator` is false for inbound connections (responder role).
    ///
    /// # Errors
    ///
    /// Returns an error if the feed cannot replicate right now.
    fn replicate(&self, is_initiator: bool) -> io::Result<Self::Stream>;
}
