//! Process secret management.
//!
//! The uniqueness index obfuscates every submission window with a
//! single 128-bit secret before using it as a storage key. The secret
//! is created lazily on first use, persisted forever, and never
//! rotated: rotating it would orphan every fingerprint already stored.
//!
//! Creation goes through the backend's atomic create-if-absent
//! primitive, so concurrent first-time callers cannot race a second
//! secret into existence. Once a process has read the secret it keeps
//! using the same value for its whole lifetime.

use crate::store::{SecretRecord, StorageBackend, StorageError};
use std::sync::{Arc, OnceLock};

/// Lazily creates, then caches, the process secret.
pub struct SecretKeyManager {
    backend: Arc<dyn StorageBackend>,
    cached: OnceLock<Vec<u8>>,
}

impl SecretKeyManager {
    /// Creates a manager backed by the given store.
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            cached: OnceLock::new(),
        }
    }

    /// Returns the secret bytes, creating the record if absent.
    ///
    /// The length of the returned bytes is whatever was persisted;
    /// validation happens where the cipher is keyed.
    pub fn get(&self) -> Result<Vec<u8>, StorageError> {
        if let Some(secret) = self.cached.get() {
            return Ok(secret.clone());
        }
        let record = self.backend.obtain_secret(&mut SecretRecord::generate)?;
        // Two threads may reach here together; both read the same
        // persisted record, so whichever initializes the cache wins
        // with the same value.
        Ok(self.cached.get_or_init(|| record.secret).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBackend;

    #[test]
    fn test_secret_is_16_bytes_and_stable() {
        let backend = Arc::new(MemoryBackend::new());
        let manager = SecretKeyManager::new(backend.clone());

        let first = manager.get().unwrap();
        let second = manager.get().unwrap();
        assert_eq!(first.len(), 16);
        assert_eq!(first, second);
    }

    #[test]
    fn test_managers_share_one_persisted_secret() {
        let backend = Arc::new(MemoryBackend::new());
        let a = SecretKeyManager::new(backend.clone());
        let b = SecretKeyManager::new(backend);

        assert_eq!(a.get().unwrap(), b.get().unwrap());
    }
}
