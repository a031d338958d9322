//! The uniform storage operation contract.
//!
//! [`Dispatcher`] exposes the same seven asynchronous operations for every
//! backend kind. Each call first looks up the kind's row in the capability
//! matrix: implemented operations resolve the backend through the
//! [`StorageRegistry`] and run against it, stubbed operations return the
//! empty shape of their result without materializing anything.

use crate::backend::BackendFactory;
use crate::capability::{BackendKind, Capabilities, Operation, Support};
use crate::error::{StorageError, StorageResult};
use crate::registry::{BackendHandle, StorageRegistry};
use bytes::Bytes;
use std::fmt;
use tracing::{error, trace};

/// A caller-supplied offset or length.
///
/// Anything convertible to `u64` qualifies; negative and out-of-range
/// values are rejected with [`StorageError::InvalidArgument`].
pub trait ByteIndex: TryInto<u64> + Copy + fmt::Display {}

impl<T: TryInto<u64> + Copy + fmt::Display> ByteIndex for T {}

fn coerce<T: ByteIndex>(name: &'static str, value: T) -> StorageResult<u64> {
    value
        .try_into()
        .map_err(|_| StorageError::invalid_argument(name, value))
}

/// Dispatches contract operations by identifier.
///
/// # Example
///
/// ```rust
/// # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
/// use feedrelay_storage::{Dispatcher, MemoryFactory};
///
/// let storage = Dispatcher::new(MemoryFactory);
/// storage.write("data", 0, vec![1, 2, 3]).await.unwrap();
/// assert_eq!(&storage.read("data", 0, 3).await.unwrap()[..], &[1, 2, 3]);
/// assert_eq!(storage.len("data").await.unwrap(), Some(3));
/// # });
/// ```
pub struct Dispatcher<F> {
    registry: StorageRegistry<F>,
    capabilities: Capabilities,
}

impl<F: BackendFactory> Dispatcher<F> {
    /// Creates a dispatcher with a fresh registry over `factory`.
    pub fn new(factory: F) -> Self {
        Self::with_registry(StorageRegistry::new(factory))
    }

    /// Creates a dispatcher over an existing registry.
    pub fn with_registry(registry: StorageRegistry<F>) -> Self {
        let capabilities = registry.kind().capabilities();
        Self {
            registry,
            capabilities,
        }
    }

    /// The backend kind behind this dispatcher.
    pub fn kind(&self) -> BackendKind {
        self.registry.kind()
    }

    /// The capability row this dispatcher follows.
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// The underlying registry.
    pub fn registry(&self) -> &StorageRegistry<F> {
        &self.registry
    }

    async fn resolve(&self, id: &str, op: Operation) -> StorageResult<BackendHandle> {
        self.registry
            .resolve(id)
            .await
            .map_err(|e| self.report(id, op, e))
    }

    fn report(&self, id: &str, op: Operation, err: StorageError) -> StorageError {
        error!(id, op = %op, kind = %self.kind(), error = %err, "storage operation failed");
        err
    }

    fn stubbed(&self, id: &str, op: Operation) -> bool {
        let stubbed = self.capabilities.support(op) == Support::Stubbed;
        if stubbed {
            trace!(id, op = %op, kind = %self.kind(), "stubbed operation");
        }
        stubbed
    }

    /// Writes `data` at `offset`, extending the store if needed.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a bad offset, `NotFound` if the backend cannot
    /// be constructed, `Io` if the write fails.
    pub async fn write<O: ByteIndex>(
        &self,
        id: &str,
        offset: O,
        data: impl Into<Bytes>,
    ) -> StorageResult<()> {
        let offset = coerce("offset", offset)?;
        let data = data.into();
        if self.stubbed(id, Operation::Write) {
            return Ok(());
        }

        let handle = self.resolve(id, Operation::Write).await?;
        let mut backend = handle.lock().await;
        backend
            .write(offset, &data)
            .await
            .map_err(|e| self.report(id, Operation::Write, e))
    }

    /// Reads up to `len` bytes at `offset`.
    ///
    /// Bytes beyond the written extent are absent: the result is shorter
    /// than `len`, and empty when nothing was ever written there.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a bad offset or length, `NotFound` if the
    /// backend cannot be constructed, `Io` if the read fails.
    pub async fn read<O: ByteIndex, L: ByteIndex>(
        &self,
        id: &str,
        offset: O,
        len: L,
    ) -> StorageResult<Bytes> {
        let offset = coerce("offset", offset)?;
        let len = coerce("length", len)?;
        if self.stubbed(id, Operation::Read) {
            return Ok(Bytes::new());
        }

        let handle = self.resolve(id, Operation::Read).await?;
        let mut backend = handle.lock().await;
        match backend.read(offset, len).await {
            Ok(bytes) => Ok(bytes),
            Err(StorageError::ReadPastEnd { .. }) => Ok(Bytes::new()),
            Err(e) => Err(self.report(id, Operation::Read, e)),
        }
    }

    /// Accepts a delete request.
    ///
    /// No backend kind can free a byte range, so this succeeds immediately
    /// and has no effect. Callers must not rely on it to release storage.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a bad offset or length.
    pub async fn delete<O: ByteIndex, L: ByteIndex>(
        &self,
        id: &str,
        offset: O,
        len: L,
    ) -> StorageResult<()> {
        coerce("offset", offset)?;
        coerce("length", len)?;
        if self.stubbed(id, Operation::Delete) {
            return Ok(());
        }
        // Every kind stubs delete; reaching here means the matrix changed
        // without a backend method to back it.
        Err(self.report(id, Operation::Delete, StorageError::Unsupported("delete")))
    }

    /// Resizes the store to exactly `len` bytes.
    ///
    /// For kinds that stub truncate this succeeds without touching the
    /// store; its true size is unchanged.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a bad length, `NotFound` if the backend cannot
    /// be constructed, `Io` if the truncation fails.
    pub async fn truncate<L: ByteIndex>(&self, id: &str, len: L) -> StorageResult<()> {
        let len = coerce("length", len)?;
        if self.stubbed(id, Operation::Truncate) {
            return Ok(());
        }

        let handle = self.resolve(id, Operation::Truncate).await?;
        let mut backend = handle.lock().await;
        backend
            .truncate(len)
            .await
            .map_err(|e| self.report(id, Operation::Truncate, e))
    }

    /// Returns the store's length, or `None` when the kind cannot tell.
    ///
    /// `None` means unknown, never zero.
    ///
    /// # Errors
    ///
    /// `NotFound` if the backend cannot be constructed, `Io` if the query
    /// fails.
    pub async fn len(&self, id: &str) -> StorageResult<Option<u64>> {
        if self.stubbed(id, Operation::Len) {
            return Ok(None);
        }

        let handle = self.resolve(id, Operation::Len).await?;
        let mut backend = handle.lock().await;
        backend
            .len()
            .await
            .map(Some)
            .map_err(|e| self.report(id, Operation::Len, e))
    }

    /// Returns whether the store is empty, or `None` when the kind cannot
    /// tell.
    ///
    /// # Errors
    ///
    /// `NotFound` if the backend cannot be constructed, `Io` if the query
    /// fails.
    pub async fn is_empty(&self, id: &str) -> StorageResult<Option<bool>> {
        if self.stubbed(id, Operation::IsEmpty) {
            return Ok(None);
        }

        let handle = self.resolve(id, Operation::IsEmpty).await?;
        let mut backend = handle.lock().await;
        backend
            .is_empty()
            .await
            .map(Some)
            .map_err(|e| self.report(id, Operation::IsEmpty, e))
    }

    /// Flushes the store.
    ///
    /// Every current kind stubs this, so it completes immediately.
    ///
    /// # Errors
    ///
    /// `NotFound` if the backend cannot be constructed, `Io` if the flush
    /// fails.
    pub async fn sync_all(&self, id: &str) -> StorageResult<()> {
        if self.stubbed(id, Operation::SyncAll) {
            return Ok(());
        }

        let handle = self.resolve(id, Operation::SyncAll).await?;
        let mut backend = handle.lock().await;
        backend
            .sync_all()
            .await
            .map_err(|e| self.report(id, Operation::SyncAll, e))
    }
}

impl<F> fmt::Debug for Dispatcher<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}
