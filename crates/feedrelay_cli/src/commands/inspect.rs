//! Inspect command implementation.

use super::{AnyFeed, StorageKind};
use feedrelay_relay::{Feed, FeedKey};
use feedrelay_storage::{Operation, Store};
use serde::Serialize;
use std::path::Path;

/// Feed inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Feed key as hex.
    pub key: String,
    /// Storage kind.
    pub storage: String,
    /// Number of entries.
    pub entries: u64,
    /// Total payload bytes.
    pub bytes: u64,
    /// Operations the storage kind really performs.
    pub implemented: Vec<String>,
    /// Operations that are accepted and ignored.
    pub stubbed: Vec<String>,
    /// The first entry, lossily decoded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first: Option<String>,
    /// Per-store sizes.
    pub stores: Vec<StoreStats>,
}

/// Size of one store.
#[derive(Debug, Serialize)]
pub struct StoreStats {
    /// Store identifier.
    pub name: String,
    /// Size in bytes; absent when the kind cannot report it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub len: Option<u64>,
}

/// Runs the inspect command.
pub async fn run(
    file: &Path,
    storage: StorageKind,
    data_dir: Option<&Path>,
    key: Option<FeedKey>,
    format: &str,
) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let feed = super::load_feed(file, storage, data_dir, super::key_or_random(key)).await?;
    let result = collect(&feed).await?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        "text" => print_text(&result),
        other => return Err(format!("unknown format: {other}").into()),
    }
    Ok(result)
}

async fn collect(feed: &AnyFeed) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let dispatcher = feed.storage();
    let capabilities = dispatcher.capabilities();
    let (implemented, stubbed): (Vec<Operation>, Vec<Operation>) = Operation::ALL
        .into_iter()
        .partition(|op| capabilities.is_implemented(*op));

    let mut stores = Vec::with_capacity(Store::ALL.len());
    for store in Store::ALL {
        stores.push(StoreStats {
            name: store.name().to_string(),
            len: dispatcher.len(store.name()).await?,
        });
    }

    let first = feed
        .get(0)
        .await?
        .map(|entry| String::from_utf8_lossy(&entry).into_owned());

    Ok(InspectResult {
        key: feed.key().to_hex(),
        storage: dispatcher.kind().to_string(),
        entries: feed.len(),
        bytes: feed.byte_len(),
        implemented: implemented.iter().map(ToString::to_string).collect(),
        stubbed: stubbed.iter().map(ToString::to_string).collect(),
        first,
        stores,
    })
}

fn print_text(result: &InspectResult) {
    println!("Feed Inspection");
    println!("===============");
    println!("Key:       {}", result.key);
    println!("Storage:   {}", result.storage);
    println!("Entries:   {}", result.entries);
    println!("Bytes:     {}", result.bytes);
    if let Some(first) = &result.first {
        println!("First:     {first}");
    }
    println!();
    println!("Implemented: {}", result.implemented.join(", "));
    println!("Stubbed:     {}", result.stubbed.join(", "));
    println!();
    println!("Stores:");
    for store in &result.stores {
        match store.len {
            Some(len) => println!("  {:<10} {len} bytes", store.name),
            None => println!("  {:<10} (size unknown)", store.name),
        }
    }
}
