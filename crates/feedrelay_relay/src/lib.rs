//! # FeedRelay Relay
//!
//! Bridges replication streams of an append-only feed to remote peers.
//!
//! This crate provides:
//! - The [`Feed`] seam: a key plus fresh replication streams on demand
//! - [`bridge`]: a bidirectional, backpressured byte splice
//! - [`RelayServer`]: `GET /key` and a WebSocket endpoint at `GET /`
//!
//! # Connection lifecycle
//!
//! Every inbound WebSocket gets its own responder-mode replication stream.
//! Bytes flow both ways until either side ends, then both are closed.
//! Connections never share state, so one failing does not affect another.
//!
//! ```rust,ignore
//! use feedrelay_relay::{RelayServer, ServerConfig};
//!
//! let config = ServerConfig::default().with_max_connections(16);
//! RelayServer::new(config, Arc::new(feed)).serve().await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod feed;
mod relay;
mod server;
mod transport;

pub use config::ServerConfig;
pub use error::{RelayError, RelayResult};
pub use feed::{Feed, FeedKey, KEY_LENGTH};
pub use relay::{bridge, BridgeStats, ClosedBy, Relay};
pub use server::{KeyResponse, RelayServer};
pub use transport::{ChannelTransport, WsTransport};
