//! A demo feed whose entries are the lines of a text document.
//!
//! Entries are persisted through a [`Dispatcher`]:
//!
//! - `data` holds the entry payloads back to back
//! - `oplog` holds one 16-byte record per entry (payload offset and length,
//!   little-endian)
//! - `bitfield` holds one byte per entry, set once the entry is stored
//!
//! Each replication stream replays the entries present when it was opened
//! as length-prefixed frames (`u32` big-endian length, then the payload),
//! then discards whatever the peer sends until it hangs up.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use feedrelay_relay::{Feed, FeedKey};
use feedrelay_storage::{BackendFactory, Dispatcher, StorageResult, Store};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::sync::Mutex;
use tracing::{debug, info};

const OPLOG_RECORD: u64 = 16;
const STREAM_BUFFER: usize = 64 * 1024;

/// An append-only feed stored through a [`Dispatcher`].
pub struct DocumentFeed<F> {
    key: FeedKey,
    storage: Arc<Dispatcher<F>>,
    append: Mutex<()>,
    entries: AtomicU64,
    bytes: AtomicU64,
}

impl<F: BackendFactory + 'static> DocumentFeed<F> {
    /// Creates an empty feed, discarding whatever the stores held before.
    ///
    /// Kinds that cannot truncate keep their old bytes; they are never read
    /// because the feed starts counting from zero.
    pub async fn create(key: FeedKey, storage: Arc<Dispatcher<F>>) -> StorageResult<Self> {
        for store in Store::ALL {
            storage.truncate(store.name(), 0u64).await?;
        }
        Ok(Self {
            key,
            storage,
            append: Mutex::new(()),
            entries: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
        })
    }

    /// Creates a feed holding one entry per line of `text`.
    pub async fn from_document(
        key: FeedKey,
        storage: Arc<Dispatcher<F>>,
        text: &str,
    ) -> StorageResult<Self> {
        let feed = Self::create(key, storage).await?;
        for line in text.lines() {
            feed.append(line.as_bytes()).await?;
        }
        info!(
            entries = feed.len(),
            bytes = feed.byte_len(),
            kind = %feed.storage.kind(),
            "document loaded"
        );
        Ok(feed)
    }

    /// Appends an entry and returns its index.
    pub async fn append(&self, entry: &[u8]) -> StorageResult<u64> {
        let _serial = self.append.lock().await;
        let index = self.entries.load(Ordering::SeqCst);
        let offset = self.bytes.load(Ordering::SeqCst);

        self.storage
            .write(Store::Data.name(), offset, Bytes::copy_from_slice(entry))
            .await?;

        let mut record = BytesMut::with_capacity(OPLOG_RECORD as usize);
        record.put_u64_le(offset);
        record.put_u64_le(entry.len() as u64);
        self.storage
            .write(Store::Oplog.name(), index * OPLOG_RECORD, record.freeze())
            .await?;
        self.storage
            .write(Store::Bitfield.name(), index, vec![1u8])
            .await?;

        self.bytes.fetch_add(entry.len() as u64, Ordering::SeqCst);
        self.entries.fetch_add(1, Ordering::SeqCst);
        debug!(index, len = entry.len(), "entry appended");
        Ok(index)
    }

    /// Reads entry `index`, or `None` past the end.
    pub async fn get(&self, index: u64) -> StorageResult<Option<Bytes>> {
        if index >= self.len() {
            return Ok(None);
        }
        read_entry(&self.storage, index).await
    }

    /// Number of entries.
    pub fn len(&self) -> u64 {
        self.entries.load(Ordering::SeqCst)
    }

    /// Returns true if the feed has no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total payload bytes.
    pub fn byte_len(&self) -> u64 {
        self.bytes.load(Ordering::SeqCst)
    }

    /// The storage the feed writes through.
    pub fn storage(&self) -> &Arc<Dispatcher<F>> {
        &self.storage
    }
}

async fn read_entry<F: BackendFactory>(
    storage: &Dispatcher<F>,
    index: u64,
) -> StorageResult<Option<Bytes>> {
    let mut record = storage
        .read(Store::Oplog.name(), index * OPLOG_RECORD, OPLOG_RECORD)
        .await?;
    if record.len() < OPLOG_RECORD as usize {
        return Ok(None);
    }
    let offset = record.get_u64_le();
    let len = record.get_u64_le();
    storage.read(Store::Data.name(), offset, len).await.map(Some)
}

/// Sends entries `0..upto` as frames, draining the peer concurrently.
async fn replay<F: BackendFactory>(
    storage: Arc<Dispatcher<F>>,
    upto: u64,
    stream: DuplexStream,
) -> io::Result<u64> {
    let (mut reader, mut writer) = tokio::io::split(stream);

    let send = async {
        for index in 0..upto {
            let entry = read_entry(&storage, index)
                .await
                .map_err(io::Error::other)?
                .unwrap_or_default();
            let len = u32::try_from(entry.len()).map_err(io::Error::other)?;
            let mut frame = BytesMut::with_capacity(4 + entry.len());
            frame.put_u32(len);
            frame.extend_from_slice(&entry);
            writer.write_all(&frame).await?;
        }
        writer.flush().await?;
        Ok::<_, io::Error>(upto)
    };
    let mut discard = tokio::io::sink();
    let drain = tokio::io::copy(&mut reader, &mut discard);

    let (sent, drained) = tokio::join!(send, drain);
    if let Ok(n) = drained {
        debug!(bytes = n, "peer input discarded");
    }
    sent
}

impl<F: BackendFactory + 'static> Feed for DocumentFeed<F> {
    type Stream = DuplexStream;

    fn key(&self) -> FeedKey {
        self.key
    }

    fn replicate(&self, is_initiator: bool) -> io::Result<DuplexStream> {
        let runtime = tokio::runtime::Handle::try_current().map_err(io::Error::other)?;
        let (ours, theirs) = tokio::io::duplex(STREAM_BUFFER);
        let storage = Arc::clone(&self.storage);
        let upto = self.len();

        runtime.spawn(async move {
            match replay(storage, upto, theirs).await {
                Ok(sent) => debug!(entries = sent, "replay finished"),
                Err(e) => debug!(error = %e, "replay aborted"),
            }
        });
        debug!(is_initiator, entries = upto, "replication stream opened");
        Ok(ours)
    }
}
