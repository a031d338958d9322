//! Storage backend trait definitions.

use crate::capability::BackendKind;
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use std::io;

/// A random-access byte store for a single identifier.
///
/// Backends are **opaque byte stores**. The feed that writes through them
/// owns all interpretation of the bytes; a backend only knows offsets.
///
/// # Invariants
///
/// - `write` extends the store when `offset + data.len()` passes the end;
///   any gap between the old end and `offset` reads back as zeros
/// - `read` returns the bytes in `[offset, offset + len)` clipped to the
///   written extent, and an empty buffer when nothing was written there
/// - only the operations marked implemented in the kind's
///   [`Capabilities`](crate::Capabilities) row are ever called by the
///   dispatcher; the rest keep the default `Unsupported` body
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For tests and ephemeral feeds
/// - [`super::DeviceBackend`] - Encrypted-at-rest device file
/// - [`super::KeyedBackend`] - Page-per-key database emulation
#[async_trait]
pub trait RandomAccess: Send {
    /// The backend kind, used to look up its capability row.
    fn kind(&self) -> BackendKind;

    /// Writes `data` at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying resource fails.
    async fn write(&mut self, offset: u64, data: &[u8]) -> StorageResult<()>;

    /// Reads up to `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying resource fails. A range beyond the
    /// written extent is not an error.
    async fn read(&mut self, offset: u64, len: u64) -> StorageResult<Bytes>;

    /// Resizes the store to exactly `len` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the truncation fails.
    async fn truncate(&mut self, _len: u64) -> StorageResult<()> {
        Err(StorageError::Unsupported("truncate"))
    }

    /// Returns the current size of the store in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    async fn len(&mut self) -> StorageResult<u64> {
        Err(StorageError::Unsupported("len"))
    }

    /// Returns whether the store holds no bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    async fn is_empty(&mut self) -> StorageResult<bool> {
        Ok(self.len().await? == 0)
    }

    /// Flushes buffered data to the underlying resource.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    async fn sync_all(&mut self) -> StorageResult<()> {
        Err(StorageError::Unsupported("sync_all"))
    }
}

/// Constructs backends of one kind, one per identifier.
///
/// Construction may perform real I/O (opening a device file); a failure
/// leaves the identifier unresolved in the registry.
#[async_trait]
pub trait BackendFactory: Send + Sync {
    /// The kind of every backend this factory creates.
    fn kind(&self) -> BackendKind;

    /// Creates the backend for `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying resource is unavailable.
    async fn create(&self, id: &str) -> StorageResult<Box<dyn RandomAccess>>;
}

/// Lets the backend kind be chosen at runtime (`Box<dyn BackendFactory>`).
#[async_trait]
impl<F: BackendFactory + ?Sized> BackendFactory for Box<F> {
    fn kind(&self) -> BackendKind {
        (**self).kind()
    }

    async fn create(&self, id: &str) -> StorageResult<Box<dyn RandomAccess>> {
        (**self).create(id).await
    }
}

/// Clips `[offset, offset + len)` to `[0, extent)`.
///
/// Returns `None` when no byte of the range lies inside the extent.
pub(crate) fn clip(offset: u64, len: u64, extent: u64) -> Option<(u64, u64)> {
    if offset >= extent || len == 0 {
        return None;
    }
    let end = offset.saturating_add(len).min(extent);
    Some((offset, end))
}

/// One past the last byte of a `len`-byte write at `offset`.
///
/// A range whose end does not fit in a `u64` is an invalid offset.
pub(crate) fn range_end(offset: u64, len: usize) -> StorageResult<u64> {
    offset
        .checked_add(len as u64)
        .ok_or_else(|| StorageError::invalid_argument("offset", format!("{offset} + {len}")))
}

fn out_of_memory(len: u64) -> StorageError {
    StorageError::Io(io::Error::new(
        io::ErrorKind::OutOfMemory,
        format!("cannot allocate {len} bytes"),
    ))
}

/// Zero-extends `buf` to `len` bytes; allocation failure is an error.
pub(crate) fn grow(buf: &mut Vec<u8>, len: u64) -> StorageResult<()> {
    let target = usize::try_from(len).map_err(|_| out_of_memory(len))?;
    if target > buf.len() {
        buf.try_reserve_exact(target - buf.len())
            .map_err(|_| out_of_memory(len))?;
        buf.resize(target, 0);
    }
    Ok(())
}

/// Allocates `len` zeroed bytes; allocation failure is an error.
pub(crate) fn zeroed(len: u64) -> StorageResult<Vec<u8>> {
    let mut buf = Vec::new();
    grow(&mut buf, len)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_inside_extent() {
        assert_eq!(clip(2, 3, 10), Some((2, 5)));
    }

    #[test]
    fn clip_overhanging_range() {
        assert_eq!(clip(8, 10, 10), Some((8, 10)));
        assert_eq!(clip(0, u64::MAX, 4), Some((0, 4)));
    }

    #[test]
    fn clip_absent_range() {
        assert_eq!(clip(10, 5, 10), None);
        assert_eq!(clip(0, 0, 10), None);
        assert_eq!(clip(0, 5, 0), None);
    }

    #[test]
    fn range_end_rejects_overflow() {
        assert_eq!(range_end(10, 5).unwrap(), 15);
        assert_eq!(range_end(u64::MAX, 0).unwrap(), u64::MAX);
        let err = range_end(u64::MAX, 1).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidArgument);
    }

    #[test]
    fn oversized_growth_is_an_error() {
        let mut buf = vec![1, 2];
        grow(&mut buf, 4).unwrap();
        assert_eq!(buf, [1, 2, 0, 0]);

        let err = grow(&mut buf, u64::MAX).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Io);
        assert_eq!(buf.len(), 4);
        assert!(zeroed(u64::MAX).is_err());
    }

    #[tokio::test]
    async fn boxed_factory_forwards() {
        let factory: Box<dyn BackendFactory> = Box::new(crate::MemoryFactory);
        assert_eq!(factory.kind(), BackendKind::Memory);

        let mut backend = factory.create("boxed").await.unwrap();
        backend.write(0, b"ab").await.unwrap();
        assert_eq!(&backend.read(0, 2).await.unwrap()[..], b"ab");
    }
}
