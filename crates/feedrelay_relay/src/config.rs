//! Server configuration.

use std::net::SocketAddr;

/// Configuration for the relay server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent replication connections.
    pub max_connections: usize,
    /// Largest chunk read from a replication stream per transport message.
    pub max_chunk: usize,
}

impl ServerConfig {
    /// Creates a new server configuration.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            max_connections: 64,
            max_chunk: 64 * 1024,
        }
    }

    /// Sets the maximum concurrent connections.
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets the maximum chunk size forwarded per message.
    pub fn with_max_chunk(mut self, size: usize) -> Self {
        self.max_chunk = size.max(1);
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], 9000)))
    }
}
