//! Best-effort "have we ever seen these bytes before?" index.
//!
//! Two machines that boot with the same starting entropy will emit the
//! same "random" streams. This store catches that: every 16-byte
//! window of a submission is obfuscated with the process secret,
//! split into a bucket-selecting prefix and a stored body, and checked
//! against everything previously recorded.
//!
//! Why 128-bit windows? The check is effectively a birthday attack
//! against the store's own contents; comparing 128-bit chunks keeps
//! the pairwise collision odds near 2^-64 and the overall false
//! positive rate under 1-in-2^60.
//!
//! Storage is deliberately economical: a unique submission records
//! only its first and last windows. Any future submission overlapping
//! either endpoint by a full window still matches, at two writes
//! instead of one per window.

mod backend;
mod bucket;
mod chunk;
mod redb;

pub use backend::{
    BatchFetch, BucketFetch, BucketKey, MemoryBackend, SecretRecord, StorageBackend, StorageError,
    UsageCount,
};
pub use bucket::{Bucket, Entry};
pub use chunk::{CryptoError, FingerprintChunk, Obfuscator, CHUNK_BYTES};
pub use self::redb::RedbBackend;

use crate::secret::SecretKeyManager;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Minimum submission length the store will index.
pub const MIN_CHECK_BYTES: usize = CHUNK_BYTES;

/// Errors from a uniqueness check.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The submission is shorter than one fingerprint window.
    #[error("submission must be at least {MIN_CHECK_BYTES} bytes, got {0}")]
    InputTooShort(usize),

    /// The persistence layer failed; no result was produced.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The obfuscation cipher could not be keyed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Tuning knobs for the uniqueness index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Database file path (used by the redb backend).
    pub path: PathBuf,
    /// Chunk bytes used as the bucket key. Fixed per deployment:
    /// changing it orphans every stored fingerprint.
    pub prefix_bytes: usize,
    /// Bucket capacity before the oldest half is evicted.
    pub max_entries_per_bucket: usize,
    /// Submissions are truncated to this many bytes before windowing,
    /// bounding lookups and storage per request.
    pub max_check_bytes: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("rng-sanity.redb"),
            // Four prefix bytes spread production load over 2^32
            // buckets; one byte is enough to force collisions on a
            // development database.
            prefix_bytes: 4,
            max_entries_per_bucket: 100,
            max_check_bytes: 64,
        }
    }
}

impl StoreConfig {
    /// Validates the configuration parameters.
    pub fn validate(&self) -> Result<(), crate::config::ConfigError> {
        use crate::config::ConfigError;
        if self.prefix_bytes == 0 || self.prefix_bytes >= CHUNK_BYTES {
            return Err(ConfigError::InvalidPrefixBytes(self.prefix_bytes));
        }
        if self.max_entries_per_bucket < 2 {
            return Err(ConfigError::InvalidBucketCapacity(
                self.max_entries_per_bucket,
            ));
        }
        if self.max_check_bytes < MIN_CHECK_BYTES {
            return Err(ConfigError::InvalidCheckBytes(self.max_check_bytes));
        }
        Ok(())
    }
}

/// Result of a uniqueness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// No window of the submission was seen before; its endpoints are
    /// now recorded.
    Unique,
    /// A window matched a stored fingerprint.
    Duplicate {
        /// The matched entry as it was stored before the refresh, so
        /// the caller can see the original sighting's owner and time.
        entry: Entry,
        /// Index of the first submission window that matched; the
        /// matching plaintext is `bytes[window..window + 16]`.
        window: usize,
    },
}

impl CheckOutcome {
    /// True for [`CheckOutcome::Unique`].
    pub fn is_unique(&self) -> bool {
        matches!(self, Self::Unique)
    }
}

/// Sharded, encrypted, bounded-capacity index of seen fingerprints.
pub struct UniquenessStore {
    backend: Arc<dyn StorageBackend>,
    secrets: SecretKeyManager,
    config: StoreConfig,
}

impl UniquenessStore {
    /// Creates a store over the given backend.
    pub fn new(backend: Arc<dyn StorageBackend>, config: StoreConfig) -> Self {
        let secrets = SecretKeyManager::new(backend.clone());
        Self {
            backend,
            secrets,
            config,
        }
    }

    /// Checks `bytes` against everything seen before and records it.
    ///
    /// Scans windows in index order; the first match wins. On a match
    /// the stored entry is refreshed (same fingerprint, fresh
    /// timestamp, owner cleared) so it neither ages out of its bucket
    /// nor keeps notifying the original owner on every re-submission.
    /// On a miss, only the first and last windows are recorded under
    /// the caller's id and tag.
    ///
    /// Partial writes are possible if the process dies mid-call (the
    /// two endpoint writes are independent transactions); repeating
    /// the call is safe and converges.
    pub fn check_and_record(
        &self,
        bytes: &[u8],
        user_id: &str,
        tag: &str,
    ) -> Result<CheckOutcome, StoreError> {
        if bytes.len() < MIN_CHECK_BYTES {
            return Err(StoreError::InputTooShort(bytes.len()));
        }
        let bytes = &bytes[..bytes.len().min(self.config.max_check_bytes)];

        let secret = self.secrets.get()?;
        let obfuscator = Obfuscator::new(&secret, self.config.prefix_bytes)?;

        let chunks: Vec<FingerprintChunk> = bytes
            .windows(CHUNK_BYTES)
            .map(|w| {
                let mut window = [0u8; CHUNK_BYTES];
                window.copy_from_slice(w);
                obfuscator.fingerprint(&window)
            })
            .collect();

        // One round trip for every distinct bucket touched.
        let mut keys: Vec<BucketKey> = chunks.iter().map(FingerprintChunk::bucket_key).collect();
        keys.sort_unstable();
        keys.dedup();
        let fetched = self.backend.fetch_buckets(&keys).into_buckets()?;
        let buckets: HashMap<BucketKey, Bucket> = keys
            .into_iter()
            .zip(fetched)
            .filter_map(|(k, b)| b.map(|bucket| (k, bucket)))
            .collect();

        for (i, chunk) in chunks.iter().enumerate() {
            let hit = buckets
                .get(&chunk.bucket_key())
                .and_then(|b| b.find(chunk.trailing()));
            if let Some(entry) = hit {
                let matched = entry.clone();
                tracing::debug!(window = i, "submission matched a stored fingerprint");
                self.write(chunk, "", "")?;
                return Ok(CheckOutcome::Duplicate {
                    entry: matched,
                    window: i,
                });
            }
        }

        self.write(&chunks[0], user_id, tag)?;
        if chunks.len() > 1 {
            self.write(&chunks[chunks.len() - 1], user_id, tag)?;
        }
        tracing::trace!(windows = chunks.len(), "submission recorded as unique");
        Ok(CheckOutcome::Unique)
    }

    /// Writes one fingerprint into its bucket transactionally.
    fn write(&self, chunk: &FingerprintChunk, user_id: &str, tag: &str) -> Result<(), StoreError> {
        let entry = Entry {
            trailing: chunk.trailing().to_vec(),
            time: chrono::Utc::now().timestamp(),
            user_id: user_id.to_owned(),
            tag: tag.to_owned(),
        };
        let max = self.config.max_entries_per_bucket;
        self.backend
            .update_bucket(chunk.bucket_key(), &mut |bucket| {
                bucket.upsert(entry.clone(), max);
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_store() -> UniquenessStore {
        UniquenessStore::new(Arc::new(MemoryBackend::new()), StoreConfig::default())
    }

    fn bytes(n: usize, seed: u8) -> Vec<u8> {
        (0..n).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
    }

    #[test]
    fn test_rejects_short_input() {
        let store = memory_store();
        assert!(matches!(
            store.check_and_record(&[0u8; 15], "", ""),
            Err(StoreError::InputTooShort(15))
        ));
    }

    #[test]
    fn test_first_unique_then_duplicate() {
        let store = memory_store();
        let b = bytes(32, 1);

        assert!(store.check_and_record(&b, "alice", "vm-3").unwrap().is_unique());

        match store.check_and_record(&b, "bob", "").unwrap() {
            CheckOutcome::Duplicate { entry, window } => {
                // First window matches first; its stored owner is the
                // original submitter.
                assert_eq!(window, 0);
                assert_eq!(entry.user_id, "alice");
                assert_eq!(entry.tag, "vm-3");
            }
            CheckOutcome::Unique => panic!("resubmission reported unique"),
        }
    }

    #[test]
    fn test_duplicate_entry_matches_window_fingerprint() {
        let config = StoreConfig::default();
        let backend = Arc::new(MemoryBackend::new());
        let store = UniquenessStore::new(backend.clone(), config.clone());
        let b = bytes(40, 9);

        store.check_and_record(&b, "", "").unwrap();
        let outcome = store.check_and_record(&b, "", "").unwrap();

        // Recompute the expected fingerprint of the matched window.
        let secret = SecretKeyManager::new(backend).get().unwrap();
        let obfuscator = Obfuscator::new(&secret, config.prefix_bytes).unwrap();
        match outcome {
            CheckOutcome::Duplicate { entry, window } => {
                let mut w = [0u8; CHUNK_BYTES];
                w.copy_from_slice(&b[window..window + CHUNK_BYTES]);
                assert_eq!(entry.trailing, obfuscator.fingerprint(&w).trailing());
            }
            CheckOutcome::Unique => panic!("resubmission reported unique"),
        }
    }

    #[test]
    fn test_overlap_with_endpoint_detected() {
        let store = memory_store();
        let original = bytes(48, 5);

        store.check_and_record(&original, "", "").unwrap();

        // A new submission sharing the original's final 16 bytes.
        let mut overlapping = original[32..48].to_vec();
        overlapping.extend_from_slice(&bytes(24, 200));
        let outcome = store.check_and_record(&overlapping, "", "").unwrap();
        assert!(matches!(outcome, CheckOutcome::Duplicate { window: 0, .. }));
    }

    #[test]
    fn test_interior_windows_not_recorded() {
        let store = memory_store();
        let original = bytes(48, 77);

        store.check_and_record(&original, "", "").unwrap();

        // Interior-only material (no overlap with either endpoint
        // window) was deliberately not stored.
        let interior = original[8..24].to_vec();
        assert!(store.check_and_record(&interior, "", "").unwrap().is_unique());
    }

    #[test]
    fn test_refresh_clears_owner_and_keeps_count() {
        let backend = Arc::new(MemoryBackend::new());
        let store = UniquenessStore::new(backend.clone(), StoreConfig::default());
        let b = bytes(16, 42); // single window: one fingerprint

        store.check_and_record(&b, "alice", "tag").unwrap();
        store.check_and_record(&b, "bob", "other").unwrap();

        // The refreshed entry lost its owner, so a third submission
        // reports a match with no one to notify.
        match store.check_and_record(&b, "carol", "").unwrap() {
            CheckOutcome::Duplicate { entry, .. } => {
                assert!(entry.user_id.is_empty());
                assert!(entry.tag.is_empty());
            }
            CheckOutcome::Unique => panic!("resubmission reported unique"),
        }
    }

    #[test]
    fn test_truncates_oversized_submissions() {
        let store = memory_store();

        let mut long = bytes(64, 3);
        long.extend_from_slice(&bytes(64, 111));

        store.check_and_record(&long, "", "").unwrap();

        // The recorded endpoints come from the truncated prefix: its
        // last window ends at byte 64, not at the true end.
        let tail = long[long.len() - 16..].to_vec();
        assert!(store.check_and_record(&tail, "", "").unwrap().is_unique());

        let truncated_tail = long[64 - 16..64].to_vec();
        assert!(!store
            .check_and_record(&truncated_tail, "", "")
            .unwrap()
            .is_unique());
    }

    #[test]
    fn test_storage_fault_aborts_whole_check() {
        struct FaultyBackend;
        impl StorageBackend for FaultyBackend {
            fn fetch_buckets(&self, keys: &[BucketKey]) -> BatchFetch {
                BatchFetch::new(
                    keys.iter()
                        .enumerate()
                        .map(|(i, _)| {
                            if i == 0 {
                                Ok(None)
                            } else {
                                Err(StorageError::Backend("unreachable shard".into()))
                            }
                        })
                        .collect(),
                )
            }
            fn update_bucket(
                &self,
                _: BucketKey,
                _: &mut dyn FnMut(&mut Bucket),
            ) -> Result<(), StorageError> {
                Ok(())
            }
            fn obtain_secret(
                &self,
                generate: &mut dyn FnMut() -> SecretRecord,
            ) -> Result<SecretRecord, StorageError> {
                Ok(generate())
            }
            fn add_usage(&self, _: &str, _: i64) -> Result<(), StorageError> {
                Ok(())
            }
            fn usage_counts(&self) -> Result<Vec<UsageCount>, StorageError> {
                Ok(Vec::new())
            }
        }

        let store = UniquenessStore::new(Arc::new(FaultyBackend), StoreConfig::default());
        let result = store.check_and_record(&bytes(32, 8), "", "");
        assert!(matches!(result, Err(StoreError::Storage(_))));
    }
}
