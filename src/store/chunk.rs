//! Fingerprint chunk production.
//!
//! Every 16-byte window of a submission is run through AES-128 with
//! the process secret before it touches storage. The transform is
//! deterministic (single-block, no IV): identical plaintext always
//! produces the identical chunk, which is what makes matching work.
//! What it buys is adversarial-collision resistance: without the
//! secret, a caller cannot craft "random" submissions that land in a
//! chosen victim's bucket to force eviction or spoof matches.

use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes128;
use thiserror::Error;

/// Width of a fingerprint chunk in bytes.
pub const CHUNK_BYTES: usize = 16;

/// Errors from the obfuscation layer.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The persisted secret does not have a valid AES-128 key length.
    #[error("process secret has invalid length for AES-128")]
    InvalidSecret,
}

/// An obfuscated 16-byte window, split for storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintChunk {
    bytes: [u8; CHUNK_BYTES],
    prefix_len: usize,
}

impl FingerprintChunk {
    /// The bucket-selecting prefix.
    pub fn prefix(&self) -> &[u8] {
        &self.bytes[..self.prefix_len]
    }

    /// The stored fingerprint body.
    pub fn trailing(&self) -> &[u8] {
        &self.bytes[self.prefix_len..]
    }

    /// Storage key for this chunk's bucket.
    ///
    /// The prefix bytes are folded little-endian into an integer and
    /// offset by one so that key zero never occurs.
    pub fn bucket_key(&self) -> u64 {
        let mut k: u64 = 0;
        for (i, b) in self.prefix().iter().take(8).enumerate() {
            k |= u64::from(*b) << (8 * i);
        }
        k.wrapping_add(1)
    }
}

/// Keyed deterministic block transform over submission windows.
pub struct Obfuscator {
    cipher: Aes128,
    prefix_len: usize,
}

impl Obfuscator {
    /// Creates an obfuscator from the process secret.
    ///
    /// Fails if the secret is not exactly 16 bytes; nothing can be
    /// checked or stored without the obfuscation layer.
    pub fn new(secret: &[u8], prefix_len: usize) -> Result<Self, CryptoError> {
        let cipher = Aes128::new_from_slice(secret).map_err(|_| CryptoError::InvalidSecret)?;
        Ok(Self { cipher, prefix_len })
    }

    /// Obfuscates one 16-byte window into a fingerprint chunk.
    pub fn fingerprint(&self, window: &[u8; CHUNK_BYTES]) -> FingerprintChunk {
        let mut block = (*window).into();
        self.cipher.encrypt_block(&mut block);
        FingerprintChunk {
            bytes: block.into(),
            prefix_len: self.prefix_len,
        }
    }

    /// Prefix length this obfuscator splits chunks at.
    pub fn prefix_len(&self) -> usize {
        self.prefix_len
    }
}
