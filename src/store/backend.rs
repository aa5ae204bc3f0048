//! Storage backend abstraction.
//!
//! The uniqueness index talks to its persistent store through this
//! trait, allowing the same engine to run against the embedded
//! database in production and an in-memory map in tests. The contract
//! each implementation must honor:
//!
//! - `update_bucket` applies its closure inside a transaction that is
//!   serialized per bucket key: two concurrent writers never both see
//!   the pre-write state and lose an update.
//! - `obtain_secret` is an atomic create-if-absent: at most one secret
//!   record can ever come into existence, no matter how many callers
//!   race on first use.
//! - Fetching a key that was never written is an absence, not an error.

use super::bucket::Bucket;
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

/// Integer key addressing one bucket.
pub type BucketKey = u64;

/// Errors from the persistence layer.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// The backend itself failed (I/O, corruption, transaction fault).
    #[error("storage backend failure: {0}")]
    Backend(String),
    /// A stored record could not be decoded.
    #[error("failed to decode stored record: {0}")]
    Codec(String),
}

/// The process secret, persisted next to the buckets it protects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretRecord {
    /// 16 secret bytes used to key the obfuscation cipher.
    pub secret: Vec<u8>,
    /// Unix seconds at creation.
    pub creation_time: i64,
}

impl SecretRecord {
    /// Draws a fresh 16-byte secret from the OS entropy source.
    pub fn generate() -> Self {
        let mut secret = vec![0u8; 16];
        OsRng.fill_bytes(&mut secret);
        Self {
            secret,
            creation_time: chrono::Utc::now().timestamp(),
        }
    }
}

/// One usage counter, labelled by outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageCount {
    /// Outcome label, e.g. `Success` or `Fail_Nonunique`.
    pub label: String,
    /// Accumulated count.
    pub count: i64,
}

/// Per-key result of a batched bucket fetch.
///
/// Absence is modelled as `Ok(None)`; only a genuine backend fault for
/// that key is an `Err`.
pub type BucketFetch = Result<Option<Bucket>, StorageError>;

/// Result of fetching many buckets in one round trip.
#[derive(Debug)]
pub struct BatchFetch {
    results: Vec<BucketFetch>,
}

impl BatchFetch {
    /// Wraps per-key results, in the same order as the requested keys.
    pub fn new(results: Vec<BucketFetch>) -> Self {
        Self { results }
    }

    /// Normalizes the batch: missing keys become `None`, but any
    /// per-key fault fails the whole fetch with the first error.
    pub fn into_buckets(self) -> Result<Vec<Option<Bucket>>, StorageError> {
        self.results.into_iter().collect()
    }
}

/// Persistent key-value store for buckets, the secret and counters.
pub trait StorageBackend: Send + Sync {
    /// Fetches the buckets for `keys` in one round trip.
    ///
    /// The returned batch has one result per requested key, in order.
    fn fetch_buckets(&self, keys: &[BucketKey]) -> BatchFetch;

    /// Atomically reads, mutates and persists one bucket.
    ///
    /// A key that was never written presents as an empty bucket.
    fn update_bucket(
        &self,
        key: BucketKey,
        apply: &mut dyn FnMut(&mut Bucket),
    ) -> Result<(), StorageError>;

    /// Returns the secret record, creating it atomically if absent.
    ///
    /// `generate` is only invoked when no record exists, inside the
    /// same transaction that persists its result.
    fn obtain_secret(
        &self,
        generate: &mut dyn FnMut() -> SecretRecord,
    ) -> Result<SecretRecord, StorageError>;

    /// Adds `count` to the usage counter for `label`.
    fn add_usage(&self, label: &str, count: i64) -> Result<(), StorageError>;

    /// Returns all usage counters.
    fn usage_counts(&self) -> Result<Vec<UsageCount>, StorageError>;
}

/// In-memory backend for tests and the one-shot CLI path.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    buckets: Mutex<HashMap<BucketKey, Bucket>>,
    secret: Mutex<Option<SecretRecord>>,
    usage: Mutex<HashMap<String, i64>>,
}

impl MemoryBackend {
    /// Creates an empty in-memory backend.
    pub fn new() -> Self {
        Self::default()
    }
}

/// Converts a poisoned-lock failure into a backend error.
fn lock_failed<T>(_: std::sync::PoisonError<T>) -> StorageError {
    StorageError::Backend("in-memory state lock poisoned".into())
}

impl StorageBackend for MemoryBackend {
    fn fetch_buckets(&self, keys: &[BucketKey]) -> BatchFetch {
        match self.buckets.lock() {
            Ok(buckets) => {
                BatchFetch::new(keys.iter().map(|k| Ok(buckets.get(k).cloned())).collect())
            }
            Err(e) => {
                let err = lock_failed(e);
                BatchFetch::new(keys.iter().map(|_| Err(err.clone())).collect())
            }
        }
    }

    fn update_bucket(
        &self,
        key: BucketKey,
        apply: &mut dyn FnMut(&mut Bucket),
    ) -> Result<(), StorageError> {
        let mut buckets = self.buckets.lock().map_err(lock_failed)?;
        apply(buckets.entry(key).or_default());
        Ok(())
    }

    fn obtain_secret(
        &self,
        generate: &mut dyn FnMut() -> SecretRecord,
    ) -> Result<SecretRecord, StorageError> {
        let mut secret = self.secret.lock().map_err(lock_failed)?;
        Ok(secret.get_or_insert_with(generate).clone())
    }

    fn add_usage(&self, label: &str, count: i64) -> Result<(), StorageError> {
        let mut usage = self.usage.lock().map_err(lock_failed)?;
        *usage.entry(label.to_owned()).or_insert(0) += count;
        Ok(())
    }

    fn usage_counts(&self) -> Result<Vec<UsageCount>, StorageError> {
        let usage = self.usage.lock().map_err(lock_failed)?;
        let mut counts: Vec<UsageCount> = usage
            .iter()
            .map(|(label, count)| UsageCount {
                label: label.clone(),
                count: *count,
            })
            .collect();
        counts.sort_by(|a, b| a.label.cmp(&b.label));
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::bucket::Entry;

    fn entry(tail: u8) -> Entry {
        Entry {
            trailing: vec![tail; 12],
            time: 1,
            user_id: String::new(),
            tag: String::new(),
        }
    }

    #[test]
    fn test_missing_buckets_are_absent_not_errors() {
        let backend = MemoryBackend::new();
        let buckets = backend.fetch_buckets(&[1, 2, 3]).into_buckets().unwrap();
        assert_eq!(buckets, vec![None, None, None]);
    }

    #[test]
    fn test_update_then_fetch_round_trip() {
        let backend = MemoryBackend::new();
        backend
            .update_bucket(42, &mut |b| b.upsert(entry(9), 100))
            .unwrap();

        let buckets = backend.fetch_buckets(&[41, 42]).into_buckets().unwrap();
        assert!(buckets[0].is_none());
        assert_eq!(buckets[1].as_ref().map(Bucket::len), Some(1));
    }

    #[test]
    fn test_batch_normalization_surfaces_first_error() {
        let batch = BatchFetch::new(vec![
            Ok(Some(Bucket::default())),
            Ok(None),
            Err(StorageError::Backend("disk on fire".into())),
            Err(StorageError::Backend("also bad".into())),
        ]);
        let err = batch.into_buckets().unwrap_err();
        assert!(matches!(err, StorageError::Backend(msg) if msg == "disk on fire"));
    }

    #[test]
    fn test_secret_created_once() {
        let backend = MemoryBackend::new();
        let mut calls = 0;
        let first = backend
            .obtain_secret(&mut || {
                calls += 1;
                SecretRecord::generate()
            })
            .unwrap();
        let second = backend
            .obtain_secret(&mut || {
                calls += 1;
                SecretRecord::generate()
            })
            .unwrap();

        assert_eq!(calls, 1);
        assert_eq!(first, second);
        assert_eq!(first.secret.len(), 16);
    }

    #[test]
    fn test_usage_accumulates() {
        let backend = MemoryBackend::new();
        backend.add_usage("Success", 1).unwrap();
        backend.add_usage("Success", 2).unwrap();
        backend.add_usage("Fail_Nonunique", 1).unwrap();

        let counts = backend.usage_counts().unwrap();
        assert_eq!(
            counts,
            vec![
                UsageCount {
                    label: "Fail_Nonunique".into(),
                    count: 1
                },
                UsageCount {
                    label: "Success".into(),
                    count: 3
                },
            ]
        );
    }
}
