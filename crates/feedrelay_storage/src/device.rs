//! Encrypted device-file storage backend.
//!
//! Each identifier maps to one file under a root directory. The plaintext is
//! cut into [`BLOCK_SIZE`] blocks and every block is sealed on its own (see
//! [`crate::cipher`]), so a random-access write only rewrites the blocks it
//! touches. On disk, block `i` starts at `i * SEALED_BLOCK_SIZE`; only the
//! final block may be shorter than a full block.

use crate::backend::{clip, range_end, zeroed, BackendFactory, RandomAccess};
use crate::capability::BackendKind;
use crate::cipher::{BlockCipher, EncryptionKey, BLOCK_OVERHEAD};
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};
use tracing::debug;

/// Plaintext bytes per block.
pub const BLOCK_SIZE: usize = 4096;
/// On-disk bytes of a full block.
pub const SEALED_BLOCK_SIZE: usize = BLOCK_SIZE + BLOCK_OVERHEAD;
/// Largest logical length whose sealed blocks stay addressable in a file.
pub const MAX_LENGTH: u64 = (u64::MAX / SEALED_BLOCK_SIZE as u64) * BLOCK_SIZE as u64;

/// A device-file storage backend, encrypted at rest.
///
/// # Durability
///
/// Writes go straight to the file; nothing is buffered in the backend.
/// The backend does not answer size queries or flush requests (see the
/// capability matrix); it tracks its logical length only to place blocks.
pub struct DeviceBackend {
    path: PathBuf,
    file: File,
    cipher: BlockCipher,
    length: u64,
    #[cfg(test)]
    fail_block: Option<u64>,
}

impl DeviceBackend {
    /// Opens or creates a device file at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created, or if its
    /// size could not have been produced by this backend.
    pub async fn open(path: &Path, key: &EncryptionKey) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .await?;

        let physical = file.metadata().await?.len();
        let length = logical_length(physical)?;
        debug!(path = %path.display(), length, "opened device file");

        Ok(Self {
            path: path.to_path_buf(),
            file,
            cipher: BlockCipher::new(key)?,
            length,
            #[cfg(test)]
            fail_block: None,
        })
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the logical (plaintext) length.
    #[must_use]
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Plaintext length of block `index` at the current logical length.
    fn block_len(&self, index: u64) -> usize {
        let start = index * BLOCK_SIZE as u64;
        if start >= self.length {
            0
        } else {
            (self.length - start).min(BLOCK_SIZE as u64) as usize
        }
    }

    async fn read_block(&mut self, index: u64) -> StorageResult<Vec<u8>> {
        let plain_len = self.block_len(index);
        if plain_len == 0 {
            return Ok(Vec::new());
        }
        let mut sealed = vec![0u8; plain_len + BLOCK_OVERHEAD];
        self.file
            .seek(SeekFrom::Start(index * SEALED_BLOCK_SIZE as u64))
            .await?;
        self.file.read_exact(&mut sealed).await?;
        self.cipher.open(index, &sealed)
    }

    async fn write_block(&mut self, index: u64, plaintext: &[u8]) -> StorageResult<()> {
        #[cfg(test)]
        if self.fail_block == Some(index) {
            return Err(StorageError::Io(std::io::Error::other("no space left on device")));
        }
        let sealed = self.cipher.seal(index, plaintext)?;
        self.file
            .seek(SeekFrom::Start(index * SEALED_BLOCK_SIZE as u64))
            .await?;
        self.file.write_all(&sealed).await?;
        self.file.flush().await?;
        Ok(())
    }
}

impl std::fmt::Debug for DeviceBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceBackend")
            .field("path", &self.path)
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}

/// Derives the plaintext length from the file size.
fn logical_length(physical: u64) -> StorageResult<u64> {
    let sealed = SEALED_BLOCK_SIZE as u64;
    let full = physical / sealed;
    let rest = physical % sealed;
    if rest == 0 {
        return Ok(full * BLOCK_SIZE as u64);
    }
    if rest <= BLOCK_OVERHEAD as u64 {
        return Err(StorageError::Corrupted(format!(
            "device file size {physical} ends in a partial block header"
        )));
    }
    Ok(full * BLOCK_SIZE as u64 + rest - BLOCK_OVERHEAD as u64)
}

#[async_trait]
impl RandomAccess for DeviceBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Device
    }

    async fn write(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        let block = BLOCK_SIZE as u64;
        let end = range_end(offset, data.len())?;
        if end > MAX_LENGTH {
            return Err(StorageError::invalid_argument(
                "offset",
                format!("range ends at {end}, past the device limit {MAX_LENGTH}"),
            ));
        }
        let new_length = self.length.max(end);

        // Blocks between the old end and `offset` are rewritten as zeros so
        // every block but the last stays full.
        let first = offset.min(self.length) / block;
        let last = (end - 1) / block;

        for index in first..=last {
            let block_start = index * block;
            let mut plain = self.read_block(index).await?;
            let target_len = (new_length - block_start).min(block) as usize;
            if plain.len() < target_len {
                plain.resize(target_len, 0);
            }

            let copy_from = offset.max(block_start);
            let copy_to = end.min(block_start + block);
            if copy_from < copy_to {
                let src = (copy_from - offset) as usize..(copy_to - offset) as usize;
                let dst = (copy_from - block_start) as usize..(copy_to - block_start) as usize;
                plain[dst].copy_from_slice(&data[src]);
            }
            self.write_block(index, &plain).await?;
            // Sealed blocks are on disk, so a later failure must not hide them.
            self.length = self.length.max(block_start + plain.len() as u64);
        }

        Ok(())
    }

    async fn read(&mut self, offset: u64, len: u64) -> StorageResult<Bytes> {
        let Some((start, end)) = clip(offset, len, self.length) else {
            return Ok(Bytes::new());
        };
        let block = BLOCK_SIZE as u64;

        let mut out = zeroed(end - start)?;
        for index in start / block..=(end - 1) / block {
            let plain = self.read_block(index).await?;
            let block_start = index * block;
            let from = start.max(block_start);
            let to = end.min(block_start + block);
            let at = (from - start) as usize;
            out[at..at + (to - from) as usize].copy_from_slice(
                &plain[(from - block_start) as usize..(to - block_start) as usize],
            );
        }
        Ok(Bytes::from(out))
    }

    async fn truncate(&mut self, len: u64) -> StorageResult<()> {
        if len == self.length {
            return Ok(());
        }
        if len > self.length {
            // Writing the last byte zero-fills the gap.
            return self.write(len - 1, &[0]).await;
        }

        let index = len / BLOCK_SIZE as u64;
        let keep = (len % BLOCK_SIZE as u64) as usize;
        let mut physical = index * SEALED_BLOCK_SIZE as u64;
        if keep > 0 {
            let mut plain = self.read_block(index).await?;
            plain.truncate(keep);
            self.write_block(index, &plain).await?;
            physical += (keep + BLOCK_OVERHEAD) as u64;
        }
        self.file.set_len(physical).await?;
        self.length = len;
        Ok(())
    }
}

/// Opens one [`DeviceBackend`] per identifier under a root directory.
#[derive(Debug, Clone)]
pub struct DeviceFactory {
    root: PathBuf,
    key: EncryptionKey,
}

impl DeviceFactory {
    /// Creates a factory storing files under `root`, sealed with `key`.
    pub fn new(root: impl Into<PathBuf>, key: EncryptionKey) -> Self {
        Self {
            root: root.into(),
            key,
        }
    }

    /// Returns the path the file for `id` lives at.
    #[must_use]
    pub fn path_for(&self, id: &str) -> PathBuf {
        self.root.join(file_name(id))
    }
}

#[async_trait]
impl BackendFactory for DeviceFactory {
    fn kind(&self) -> BackendKind {
        BackendKind::Device
    }

    async fn create(&self, id: &str) -> StorageResult<Box<dyn RandomAccess>> {
        tokio::fs::create_dir_all(&self.root).await?;
        let backend = DeviceBackend::open(&self.path_for(id), &self.key).await?;
        Ok(Box::new(backend))
    }
}

/// Maps an identifier to a file name, escaping anything but `[A-Za-z0-9_-]`
/// as `%XX` so distinct identifiers never share a file.
fn file_name(id: &str) -> String {
    let mut name = String::with_capacity(id.len());
    for byte in id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            name.push(byte as char);
        } else {
            name.push_str(&format!("%{byte:02X}"));
        }
    }
    if name.is_empty() {
        name.push('%');
    }
    name
}
