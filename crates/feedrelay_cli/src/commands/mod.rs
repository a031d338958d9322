//! CLI command implementations.

pub mod inspect;
pub mod keygen;
pub mod serve;

use crate::feed::DocumentFeed;
use clap::ValueEnum;
use feedrelay_relay::FeedKey;
use feedrelay_storage::{
    BackendFactory, DeviceFactory, Dispatcher, EncryptionKey, KeyedFactory, MemoryFactory,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Storage a feed is kept in, selected with `--storage`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageKind {
    /// Process memory; gone on exit.
    Memory,
    /// Encrypted files under `--data-dir`.
    Device,
    /// Page-per-record key/value emulation.
    Keyed,
}

/// The feed type every command works with.
pub type AnyFeed = DocumentFeed<Box<dyn BackendFactory>>;

/// Builds the storage for `kind`.
///
/// Device files are sealed with a key generated for this run.
pub fn open_storage(
    kind: StorageKind,
    data_dir: Option<&Path>,
) -> Result<Dispatcher<Box<dyn BackendFactory>>, Box<dyn std::error::Error>> {
    let factory: Box<dyn BackendFactory> = match kind {
        StorageKind::Memory => Box::new(MemoryFactory),
        StorageKind::Keyed => Box::new(KeyedFactory::default()),
        StorageKind::Device => {
            let root: PathBuf = data_dir
                .ok_or("--data-dir is required for device storage")?
                .to_path_buf();
            Box::new(DeviceFactory::new(root, EncryptionKey::generate()))
        }
    };
    Ok(Dispatcher::new(factory))
}

/// Loads `file` into a fresh feed on the selected storage.
pub async fn load_feed(
    file: &Path,
    kind: StorageKind,
    data_dir: Option<&Path>,
    key: FeedKey,
) -> Result<AnyFeed, Box<dyn std::error::Error>> {
    let text = tokio::fs::read_to_string(file)
        .await
        .map_err(|e| format!("cannot read {}: {e}", file.display()))?;
    let storage = Arc::new(open_storage(kind, data_dir)?);
    Ok(DocumentFeed::from_document(key, storage, &text).await?)
}

/// Returns `key`, or a random one.
pub fn key_or_random(key: Option<FeedKey>) -> FeedKey {
    key.unwrap_or_else(|| FeedKey::from_bytes(rand::random()))
}
