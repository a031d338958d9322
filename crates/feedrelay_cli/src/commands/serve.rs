//! Serve command implementation.

use super::StorageKind;
use feedrelay_relay::{FeedKey, RelayServer, ServerConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Options of the serve command.
#[derive(Debug, Clone)]
pub struct ServeOptions {
    /// Address to listen on.
    pub bind: SocketAddr,
    /// Document whose lines become the feed's entries.
    pub file: PathBuf,
    /// Storage kind.
    pub storage: StorageKind,
    /// Directory for device storage.
    pub data_dir: Option<PathBuf>,
    /// Feed key; random when absent.
    pub key: Option<FeedKey>,
    /// Concurrent replication connection limit.
    pub max_connections: usize,
}

/// Runs the serve command until the process is stopped.
pub async fn run(options: ServeOptions) -> Result<(), Box<dyn std::error::Error>> {
    let key = super::key_or_random(options.key);
    let feed = super::load_feed(
        &options.file,
        options.storage,
        options.data_dir.as_deref(),
        key,
    )
    .await?;
    if feed.is_empty() {
        warn!(file = %options.file.display(), "document has no lines; serving an empty feed");
    }
    info!(file = %options.file.display(), entries = feed.len(), "feed ready");

    let config = ServerConfig::new(options.bind).with_max_connections(options.max_connections);
    RelayServer::new(config, Arc::new(feed)).serve().await?;
    Ok(())
}
