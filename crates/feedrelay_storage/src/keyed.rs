//! Key-indexed database storage backend.
//!
//! Emulates a browser-style key/value database: bytes are cut into fixed-size
//! pages and every page is a separate record keyed by `(identifier, page)`.
//! One [`KeyValueStore`] is shared by every backend a [`KeyedFactory`]
//! creates, just as one database holds every file of a feed.
//!
//! The record layout cannot answer size queries or shrink cheaply, so this
//! kind implements only `write` and `read`; see the capability matrix.

use crate::backend::{clip, range_end, zeroed, BackendFactory, RandomAccess};
use crate::capability::BackendKind;
use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Default page size in bytes.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

type PageKey = (String, u64);

/// A shared, ordered key/value store holding pages of many identifiers.
#[derive(Debug, Clone, Default)]
pub struct KeyValueStore {
    records: Arc<RwLock<BTreeMap<PageKey, Vec<u8>>>>,
}

impl KeyValueStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of page records across all identifiers.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.records.read().len()
    }

    /// Returns the number of page records stored for `id`.
    #[must_use]
    pub fn pages_of(&self, id: &str) -> usize {
        self.records
            .read()
            .range((id.to_string(), 0)..=(id.to_string(), u64::MAX))
            .count()
    }
}

/// A storage backend that keeps one record per page in a [`KeyValueStore`].
#[derive(Debug)]
pub struct KeyedBackend {
    id: String,
    store: KeyValueStore,
    page_size: usize,
}

impl KeyedBackend {
    /// Creates a backend for `id` over `store` with the default page size.
    #[must_use]
    pub fn new(id: impl Into<String>, store: KeyValueStore) -> Self {
        Self::with_page_size(id, store, DEFAULT_PAGE_SIZE)
    }

    /// Creates a backend with a custom page size.
    ///
    /// # Panics
    ///
    /// Panics if `page_size` is zero.
    #[must_use]
    pub fn with_page_size(id: impl Into<String>, store: KeyValueStore, page_size: usize) -> Self {
        assert!(page_size > 0, "page size must be non-zero");
        Self {
            id: id.into(),
            store,
            page_size,
        }
    }

    fn key(&self, page: u64) -> PageKey {
        (self.id.clone(), page)
    }

    /// One past the last byte ever written for this identifier.
    fn extent(&self, records: &BTreeMap<PageKey, Vec<u8>>) -> u64 {
        records
            .range(self.key(0)..=self.key(u64::MAX))
            .next_back()
            .map(|((_, page), bytes)| page * self.page_size as u64 + bytes.len() as u64)
            .unwrap_or(0)
    }
}

#[async_trait]
impl RandomAccess for KeyedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Keyed
    }

    async fn write(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        range_end(offset, data.len())?;
        let page_size = self.page_size as u64;
        let mut records = self.store.records.write();

        let mut written = 0usize;
        while written < data.len() {
            let position = offset + written as u64;
            let page = position / page_size;
            let in_page = (position % page_size) as usize;
            let chunk = (self.page_size - in_page).min(data.len() - written);

            let record = records.entry(self.key(page)).or_default();
            if record.len() < in_page + chunk {
                record.resize(in_page + chunk, 0);
            }
            record[in_page..in_page + chunk].copy_from_slice(&data[written..written + chunk]);
            written += chunk;
        }
        Ok(())
    }

    async fn read(&mut self, offset: u64, len: u64) -> StorageResult<Bytes> {
        let page_size = self.page_size as u64;
        let records = self.store.records.read();

        let Some((start, end)) = clip(offset, len, self.extent(&records)) else {
            return Ok(Bytes::new());
        };

        let mut out = zeroed(end - start)?;
        let mut position = start;
        while position < end {
            let page = position / page_size;
            let in_page = (position % page_size) as usize;
            let chunk = (page_size - in_page as u64).min(end - position) as usize;
            let at = (position - start) as usize;

            if let Some(record) = records.get(&self.key(page)) {
                let available = record.len().saturating_sub(in_page).min(chunk);
                out[at..at + available].copy_from_slice(&record[in_page..in_page + available]);
            }
            position += chunk as u64;
        }
        Ok(Bytes::from(out))
    }
}

/// Creates [`KeyedBackend`]s sharing one [`KeyValueStore`].
#[derive(Debug, Clone, Default)]
pub struct KeyedFactory {
    store: KeyValueStore,
    page_size: Option<usize>,
}

impl KeyedFactory {
    /// Creates a factory over `store`.
    #[must_use]
    pub fn new(store: KeyValueStore) -> Self {
        Self {
            store,
            page_size: None,
        }
    }

    /// Sets the page size of created backends.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    /// Returns the shared store.
    #[must_use]
    pub fn store(&self) -> &KeyValueStore {
        &self.store
    }
}

#[async_trait]
impl BackendFactory for KeyedFactory {
    fn kind(&self) -> BackendKind {
        BackendKind::Keyed
    }

    async fn create(&self, id: &str) -> StorageResult<Box<dyn RandomAccess>> {
        let page_size = self.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        Ok(Box::new(KeyedBackend::with_page_size(
            id,
            self.store.clone(),
            page_size,
        )))
    }
}
