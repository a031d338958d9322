//! Block encryption for data at rest.
//!
//! ## Security Model
//!
//! - Each block is sealed independently with a fresh random nonce
//! - Sealed block: `nonce (12 bytes) || ciphertext || tag (16 bytes)`
//! - AES-256-GCM, with the block index as associated data so a block
//!   copied to another position fails authentication
//! - Keys are never stored; they are provided by the application

use crate::error::{StorageError, StorageResult};
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;
/// Size of GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;
/// Size of GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;
/// Bytes a sealed block carries on top of its plaintext.
pub const BLOCK_OVERHEAD: usize = NONCE_SIZE + TAG_SIZE;

/// Encryption key for device backends.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    bytes: [u8; KEY_SIZE],
}

impl EncryptionKey {
    /// Creates a key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes slice is not exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> StorageResult<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(StorageError::Encryption(format!(
                "invalid key size: expected {KEY_SIZE}, got {}",
                bytes.len()
            )));
        }
        let mut key_bytes = [0u8; KEY_SIZE];
        key_bytes.copy_from_slice(bytes);
        Ok(Self { bytes: key_bytes })
    }

    /// Generates a random key.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Returns the key as a byte slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Seals and opens numbered blocks with one key.
#[derive(Clone)]
pub(crate) struct BlockCipher {
    aead: Aes256Gcm,
}

impl BlockCipher {
    pub(crate) fn new(key: &EncryptionKey) -> StorageResult<Self> {
        let aead = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| StorageError::Encryption(e.to_string()))?;
        Ok(Self { aead })
    }

    /// Encrypts `plaintext` as block number `index`.
    pub(crate) fn seal(&self, index: u64, plaintext: &[u8]) -> StorageResult<Vec<u8>> {
        let mut nonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);

        let aad = index.to_le_bytes();
        let ciphertext = self
            .aead
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: &aad,
                },
            )
            .map_err(|_| StorageError::Encryption(format!("failed to seal block {index}")))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Decrypts a block produced by [`seal`](Self::seal) for the same `index`.
    pub(crate) fn open(&self, index: u64, sealed: &[u8]) -> StorageResult<Vec<u8>> {
        if sealed.len() < BLOCK_OVERHEAD {
            return Err(StorageError::Encryption("ciphertext too short".to_string()));
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);
        let aad = index.to_le_bytes();
        self.aead
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: &aad,
                },
            )
            .map_err(|_| StorageError::Encryption(format!("authentication failed for block {index}")))
    }
}
