//! In-memory storage backend.

use crate::backend::{clip, grow, range_end, BackendFactory, RandomAccess};
use crate::capability::BackendKind;
use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;

/// An in-memory storage backend.
///
/// This backend stores all data in a growable buffer and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral feeds that don't need persistence
///
/// Writes past the end zero-fill the gap; `truncate` both shrinks and
/// zero-extends.
///
/// # Example
///
/// ```rust
/// # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
/// use feedrelay_storage::{InMemoryBackend, RandomAccess};
///
/// let mut backend = InMemoryBackend::new();
/// backend.write(0, b"test data").await.unwrap();
/// assert_eq!(backend.len().await.unwrap(), 9);
/// # });
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    data: Vec<u8>,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new in-memory backend with pre-existing data.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Returns a copy of all data in the backend.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.clone()
    }
}

#[async_trait]
impl RandomAccess for InMemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn write(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        let end = range_end(offset, data.len())?;
        grow(&mut self.data, end)?;
        let start = offset as usize;
        self.data[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    async fn read(&mut self, offset: u64, len: u64) -> StorageResult<Bytes> {
        match clip(offset, len, self.data.len() as u64) {
            Some((start, end)) => Ok(Bytes::copy_from_slice(
                &self.data[start as usize..end as usize],
            )),
            None => Ok(Bytes::new()),
        }
    }

    async fn truncate(&mut self, len: u64) -> StorageResult<()> {
        if len <= self.data.len() as u64 {
            self.data.truncate(len as usize);
            return Ok(());
        }
        grow(&mut self.data, len)
    }

    async fn len(&mut self) -> StorageResult<u64> {
        Ok(self.data.len() as u64)
    }

    async fn is_empty(&mut self) -> StorageResult<bool> {
        Ok(self.data.is_empty())
    }
}

/// Creates a fresh [`InMemoryBackend`] per identifier.
#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryFactory;

#[async_trait]
impl BackendFactory for MemoryFactory {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn create(&self, _id: &str) -> StorageResult<Box<dyn RandomAccess>> {
        Ok(Box::new(InMemoryBackend::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use proptest::prelude::*;

    #[tokio::test]
    async fn memory_new_is_empty() {
        let mut backend = InMemoryBackend::new();
        assert_eq!(backend.len().await.unwrap(), 0);
        assert!(backend.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn memory_write_and_read() {
        let mut backend = InMemoryBackend::new();
        backend.write(0, b"hello").await.unwrap();
        backend.write(5, b" world").await.unwrap();

        assert_eq!(&backend.read(0, 11).await.unwrap()[..], b"hello world");
        assert_eq!(&backend.read(6, 5).await.unwrap()[..], b"world");
    }

    #[tokio::test]
    async fn memory_overwrite_in_place() {
        let mut backend = InMemoryBackend::with_data(b"hello world".to_vec());
        backend.write(0, b"HELLO").await.unwrap();
        assert_eq!(backend.data(), b"HELLO world");
    }

    #[tokio::test]
    async fn memory_write_past_end_zero_fills() {
        let mut backend = InMemoryBackend::new();
        backend.write(4, &[9, 9]).await.unwrap();
        assert_eq!(backend.data(), vec![0, 0, 0, 0, 9, 9]);
    }

    #[tokio::test]
    async fn memory_read_past_end_is_empty() {
        let mut backend = InMemoryBackend::with_data(b"hello".to_vec());
        assert!(backend.read(10, 5).await.unwrap().is_empty());
        assert!(backend.read(5, 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn memory_read_overhanging_is_clipped() {
        let mut backend = InMemoryBackend::with_data(b"hello".to_vec());
        assert_eq!(&backend.read(3, 10).await.unwrap()[..], b"lo");
    }

    #[tokio::test]
    async fn memory_truncate_partial() {
        let mut backend = InMemoryBackend::with_data(b"hello world".to_vec());
        backend.truncate(5).await.unwrap();
        assert_eq!(backend.len().await.unwrap(), 5);
        assert_eq!(&backend.read(0, 11).await.unwrap()[..], b"hello");
    }

    #[tokio::test]
    async fn memory_truncate_grows_with_zeros() {
        let mut backend = InMemoryBackend::with_data(vec![1, 2]);
        backend.truncate(4).await.unwrap();
        assert_eq!(backend.data(), vec![1, 2, 0, 0]);
    }

    #[tokio::test]
    async fn memory_extreme_offsets_are_errors() {
        let mut backend = InMemoryBackend::with_data(vec![1, 2]);

        let err = backend.write(u64::MAX, &[1]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        let err = backend.truncate(u64::MAX).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);

        assert_eq!(backend.data(), vec![1, 2]);
    }

    #[tokio::test]
    async fn memory_sync_is_unsupported() {
        let mut backend = InMemoryBackend::new();
        assert!(backend.sync_all().await.is_err());
    }

    fn block_on<F: std::future::Future>(f: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(f)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn memory_matches_model(
            writes in prop::collection::vec((0u64..256, prop::collection::vec(any::<u8>(), 0..64)), 1..16),
            read_offset in 0u64..512,
            read_len in 0u64..512,
        ) {
            let (actual, model) = block_on(async {
                let mut backend = InMemoryBackend::new();
                let mut model: Vec<u8> = Vec::new();
                for (offset, data) in &writes {
                    backend.write(*offset, data).await.unwrap();
                    if data.is_empty() {
                        continue;
                    }
                    let end = *offset as usize + data.len();
                    if end > model.len() {
                        model.resize(end, 0);
                    }
                    model[*offset as usize..end].copy_from_slice(data);
                }
                let actual = backend.read(read_offset, read_len).await.unwrap();
                (actual, model)
            });

            let start = (read_offset as usize).min(model.len());
            let end = (read_offset.saturating_add(read_len) as usize).min(model.len());
            prop_assert_eq!(&actual[..], &model[start..end]);
        }
    }
}
