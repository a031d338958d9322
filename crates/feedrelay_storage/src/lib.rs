//! # FeedRelay Storage
//!
//! Random-access storage for append-only feeds.
//!
//! A feed persists its bytes through one of several interchangeable backend
//! kinds. Every kind is driven through the same seven-operation contract
//! ([`Dispatcher`]), even though the kinds differ in what they can really
//! do; those differences are declared up front in the capability matrix
//! ([`BackendKind::capabilities`]).
//!
//! ## Design Principles
//!
//! - Backends are opaque byte stores addressed by offset
//! - One backend instance per identifier, created lazily by the
//!   [`StorageRegistry`] and never constructed twice
//! - An operation a kind cannot perform is a documented stub: it succeeds
//!   immediately, changes nothing and returns an empty result
//! - Reading data that was never written yields an empty buffer, not an error
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For tests and ephemeral feeds
//! - [`DeviceBackend`] - Device file encrypted at rest with AES-256-GCM
//! - [`KeyedBackend`] - Page-per-record key/value database emulation
//!
//! ## Example
//!
//! ```rust
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! use feedrelay_storage::{Dispatcher, KeyedFactory, Store};
//!
//! let storage = Dispatcher::new(KeyedFactory::default());
//! storage.write(Store::Data.name(), 0, &b"hello world"[..]).await.unwrap();
//! let data = storage.read(Store::Data.name(), 6, 5).await.unwrap();
//! assert_eq!(&data[..], b"world");
//!
//! // The keyed kind cannot report its size.
//! assert_eq!(storage.len(Store::Data.name()).await.unwrap(), None);
//! # });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod capability;
mod cipher;
mod device;
mod dispatcher;
mod error;
mod keyed;
mod memory;
mod registry;
mod store;

pub use backend::{BackendFactory, RandomAccess};
pub use capability::{BackendKind, Capabilities, Operation, Support};
pub use cipher::{EncryptionKey, BLOCK_OVERHEAD, KEY_SIZE, NONCE_SIZE, TAG_SIZE};
pub use device::{DeviceBackend, DeviceFactory, BLOCK_SIZE, MAX_LENGTH, SEALED_BLOCK_SIZE};
pub use dispatcher::{ByteIndex, Dispatcher};
pub use error::{ErrorKind, StorageError, StorageResult};
pub use keyed::{KeyValueStore, KeyedBackend, KeyedFactory, DEFAULT_PAGE_SIZE};
pub use memory::{InMemoryBackend, MemoryFactory};
pub use registry::{BackendHandle, StorageRegistry};
pub use store::Store;
