//! Identifier to backend registry.

use crate::backend::{BackendFactory, RandomAccess};
use crate::capability::BackendKind;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard, OnceCell};
use tracing::{debug, warn};

/// A shared reference to the single backend instance of one identifier.
///
/// Cloning the handle does not clone the backend; every clone locks the
/// same instance.
#[derive(Clone)]
pub struct BackendHandle {
    id: Arc<str>,
    kind: BackendKind,
    backend: Arc<AsyncMutex<Box<dyn RandomAccess>>>,
}

impl BackendHandle {
    fn new(id: &str, backend: Box<dyn RandomAccess>) -> Self {
        Self {
            id: Arc::from(id),
            kind: backend.kind(),
            backend: Arc::new(AsyncMutex::new(backend)),
        }
    }

    /// The identifier this backend serves.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The backend kind.
    #[must_use]
    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    /// Waits for exclusive access to the backend.
    pub async fn lock(&self) -> MutexGuard<'_, Box<dyn RandomAccess>> {
        self.backend.lock().await
    }

    /// Returns true if both handles refer to the same backend instance.
    #[must_use]
    pub fn same_instance(&self, other: &BackendHandle) -> bool {
        Arc::ptr_eq(&self.backend, &other.backend)
    }
}

impl fmt::Debug for BackendHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendHandle")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}

/// One identifier's construction state.
#[derive(Default)]
struct Slot {
    cell: OnceCell<BackendHandle>,
    /// Set when construction failed; callers already waiting on this slot
    /// get the same error instead of constructing again.
    failure: Mutex<Option<String>>,
}

/// Owns the identifier to backend mapping.
///
/// # Invariants
///
/// - At most one backend is ever constructed per identifier, even when many
///   tasks resolve the same new identifier at once: they all wait on one
///   construction and observe the same instance
/// - A failed construction is reported to every caller waiting on it and
///   leaves no entry behind; the next `resolve` tries again
/// - Constructed entries are never evicted
pub struct StorageRegistry<F> {
    factory: F,
    entries: Mutex<HashMap<String, Arc<Slot>>>,
    constructed: AtomicUsize,
}

impl<F: BackendFactory> StorageRegistry<F> {
    /// Creates an empty registry constructing backends with `factory`.
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            entries: Mutex::new(HashMap::new()),
            constructed: AtomicUsize::new(0),
        }
    }

    /// The kind of every backend in this registry.
    pub fn kind(&self) -> BackendKind {
        self.factory.kind()
    }

    /// Returns the factory.
    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Returns the backend for `id`, constructing it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if the backend could not be
    /// constructed.
    pub async fn resolve(&self, id: &str) -> StorageResult<BackendHandle> {
        let slot = {
            let mut entries = self.entries.lock();
            Arc::clone(entries.entry(id.to_string()).or_default())
        };

        let handle = slot
            .cell
            .get_or_try_init(|| async {
                let failed = slot.failure.lock().clone();
                if let Some(reason) = failed {
                    return Err(StorageError::NotFound {
                        id: id.to_string(),
                        reason,
                    });
                }

                debug!(id, kind = %self.factory.kind(), "constructing backend");
                match self.factory.create(id).await {
                    Ok(backend) => {
                        self.constructed.fetch_add(1, Ordering::SeqCst);
                        Ok(BackendHandle::new(id, backend))
                    }
                    Err(e) => {
                        warn!(id, error = %e, "backend construction failed");
                        let reason = e.to_string();
                        *slot.failure.lock() = Some(reason.clone());
                        self.forget(id, &slot);
                        Err(StorageError::NotFound {
                            id: id.to_string(),
                            reason,
                        })
                    }
                }
            })
            .await?;

        Ok(handle.clone())
    }

    /// Drops the entry for `id` if it is still `slot`.
    fn forget(&self, id: &str, slot: &Arc<Slot>) {
        let mut entries = self.entries.lock();
        if entries
            .get(id)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            entries.remove(id);
        }
    }

    /// Returns true if `id` has a constructed backend.
    pub fn contains(&self, id: &str) -> bool {
        self.entries
            .lock()
            .get(id)
            .is_some_and(|slot| slot.cell.initialized())
    }

    /// Returns the number of constructed backends.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|slot| slot.cell.initialized())
            .count()
    }

    /// Returns true if no backend has been constructed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the identifiers with constructed backends, sorted.
    pub fn identifiers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .entries
            .lock()
            .iter()
            .filter(|(_, slot)| slot.cell.initialized())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Total successful constructions over the registry's lifetime.
    pub fn constructed(&self) -> usize {
        self.constructed.load(Ordering::SeqCst)
    }
}

impl<F> fmt::Debug for StorageRegistry<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageRegistry")
            .field("entries", &self.entries.lock().len())
            .field("constructed", &self.constructed.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryBackend, MemoryFactory};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    /// Counts constructions, sleeps during each, and can be told to fail.
    #[derive(Default)]
    struct SlowFactory {
        attempts: AtomicUsize,
        created: AtomicUsize,
        fail: AtomicBool,
    }

    #[async_trait]
    impl BackendFactory for SlowFactory {
        fn kind(&self) -> BackendKind {
            BackendKind::Memory
        }

        async fn create(&self, _id: &str) -> StorageResult<Box<dyn RandomAccess>> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.fail.load(Ordering::SeqCst) {
                return Err(StorageError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "device unavailable",
                )));
            }
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(InMemoryBackend::new()))
        }
    }

    #[tokio::test]
    async fn resolve_is_idempotent() {
        let registry = StorageRegistry::new(MemoryFactory);
        let first = registry.resolve("tree").await.unwrap();
        let second = registry.resolve("tree").await.unwrap();

        assert!(first.same_instance(&second));
        assert_eq!(first.id(), "tree");
        assert_eq!(registry.constructed(), 1);
    }

    #[tokio::test]
    async fn identifiers_get_distinct_backends() {
        let registry = StorageRegistry::new(MemoryFactory);
        let tree = registry.resolve("tree").await.unwrap();
        let data = registry.resolve("data").await.unwrap();

        assert!(!tree.same_instance(&data));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.identifiers(), vec!["data".to_string(), "tree".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_resolution_constructs_once() {
        let registry = Arc::new(StorageRegistry::new(SlowFactory::default()));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.resolve("data").await.unwrap() })
            })
            .collect();

        let mut handles = Vec::new();
        for task in tasks {
            handles.push(task.await.unwrap());
        }

        assert_eq!(registry.factory().created.load(Ordering::SeqCst), 1);
        assert!(handles.iter().all(|h| h.same_instance(&handles[0])));
    }

    #[tokio::test]
    async fn failed_construction_can_be_retried() {
        let registry = StorageRegistry::new(SlowFactory::default());
        registry.factory().fail.store(true, Ordering::SeqCst);

        let err = registry.resolve("bitfield").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { ref id, .. } if id == "bitfield"));
        assert!(!registry.contains("bitfield"));
        assert!(registry.is_empty());

        registry.factory().fail.store(false, Ordering::SeqCst);
        registry.resolve("bitfield").await.unwrap();
        assert!(registry.contains("bitfield"));
        assert_eq!(registry.constructed(), 1);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_failure() {
        let registry = StorageRegistry::new(SlowFactory::default());
        registry.factory().fail.store(true, Ordering::SeqCst);

        let results =
            futures::future::join_all((0..8).map(|_| registry.resolve("oplog"))).await;

        assert_eq!(registry.factory().attempts.load(Ordering::SeqCst), 1);
        for result in &results {
            let err = result.as_ref().unwrap_err();
            assert!(matches!(err, StorageError::NotFound { reason, .. } if reason == "I/O error: device unavailable"));
        }

        // Nothing is left behind for the failed identifier.
        assert!(registry.entries.lock().is_empty());

        registry.resolve("oplog").await.unwrap_err();
        assert_eq!(registry.factory().attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_identifiers_leave_no_entry() {
        let registry = StorageRegistry::new(SlowFactory::default());
        registry.factory().fail.store(true, Ordering::SeqCst);
        for id in ["a", "b", "c"] {
            registry.resolve(id).await.unwrap_err();
        }
        assert!(registry.entries.lock().is_empty());
        assert_eq!(format!("{registry:?}"), "StorageRegistry { entries: 0, constructed: 0 }");

        registry.factory().fail.store(false, Ordering::SeqCst);
        registry.resolve("b").await.unwrap();
        assert_eq!(registry.entries.lock().len(), 1);
    }

    #[tokio::test]
    async fn handle_locks_shared_backend() {
        let registry = StorageRegistry::new(MemoryFactory);
        let writer = registry.resolve("oplog").await.unwrap();
        writer.lock().await.write(0, b"abc").await.unwrap();

        let reader = registry.resolve("oplog").await.unwrap();
        let bytes = reader.lock().await.read(0, 3).await.unwrap();
        assert_eq!(&bytes[..], b"abc");
        assert_eq!(reader.kind(), BackendKind::Memory);
    }
}
