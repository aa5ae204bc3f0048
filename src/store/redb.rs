//! Embedded persistent backend on redb.
//!
//! Buckets, the process secret and the usage counters live in three
//! tables of one redb database file. redb's single-writer transactions
//! give the per-bucket atomicity the store contract requires, and make
//! the secret bootstrap a genuine create-if-absent: the existence
//! check and the insert commit together or not at all.

use super::backend::{
    BatchFetch, BucketFetch, BucketKey, SecretRecord, StorageBackend, StorageError, UsageCount,
};
use super::bucket::Bucket;
use redb::{Database, ReadableTable, TableDefinition};
use std::path::Path;

const BUCKETS: TableDefinition<u64, &[u8]> = TableDefinition::new("buckets");
const SECRETS: TableDefinition<u64, &[u8]> = TableDefinition::new("secrets");
const USAGE: TableDefinition<&str, i64> = TableDefinition::new("usage");

/// Fixed key of the single secret record in the secrets table.
const SECRET_SLOT: u64 = 0;

/// Backend storing all state in a single redb database file.
pub struct RedbBackend {
    db: Database,
}

impl RedbBackend {
    /// Opens (or creates) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = Database::create(path.as_ref())?;
        tracing::info!(path = %path.as_ref().display(), "opened uniqueness database");
        Ok(Self { db })
    }

    fn fetch_one(table: &impl ReadableTable<u64, &'static [u8]>, key: BucketKey) -> BucketFetch {
        match table.get(key)? {
            Some(guard) => {
                let bucket = bincode::deserialize(guard.value())
                    .map_err(|e| StorageError::Codec(e.to_string()))?;
                Ok(Some(bucket))
            }
            None => Ok(None),
        }
    }
}

impl StorageBackend for RedbBackend {
    fn fetch_buckets(&self, keys: &[BucketKey]) -> BatchFetch {
        let results = match self.db.begin_read() {
            Ok(txn) => match txn.open_table(BUCKETS) {
                Ok(table) => keys.iter().map(|k| Self::fetch_one(&table, *k)).collect(),
                // A database that has never seen a write has no bucket
                // table yet; every key is simply absent.
                Err(redb::TableError::TableDoesNotExist(_)) => {
                    keys.iter().map(|_| Ok(None)).collect()
                }
                Err(e) => {
                    let err = StorageError::from(e);
                    keys.iter().map(|_| Err(err.clone())).collect()
                }
            },
            Err(e) => {
                let err = StorageError::from(e);
                keys.iter().map(|_| Err(err.clone())).collect()
            }
        };
        BatchFetch::new(results)
    }

    fn update_bucket(
        &self,
        key: BucketKey,
        apply: &mut dyn FnMut(&mut Bucket),
    ) -> Result<(), StorageError> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(BUCKETS)?;
            let mut bucket = match table.get(key)? {
                Some(guard) => bincode::deserialize(guard.value())
                    .map_err(|e| StorageError::Codec(e.to_string()))?,
                None => Bucket::default(),
            };
            apply(&mut bucket);
            let encoded =
                bincode::serialize(&bucket).map_err(|e| StorageError::Codec(e.to_string()))?;
            table.insert(key, encoded.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    fn obtain_secret(
        &self,
        generate: &mut dyn FnMut() -> SecretRecord,
    ) -> Result<SecretRecord, StorageError> {
        let txn = self.db.begin_write()?;
        let record = {
            let mut table = txn.open_table(SECRETS)?;
            let existing = match table.get(SECRET_SLOT)? {
                Some(guard) => Some(
                    bincode::deserialize(guard.value())
                        .map_err(|e| StorageError::Codec(e.to_string()))?,
                ),
                None => None,
            };
            match existing {
                Some(record) => record,
                None => {
                    let record = generate();
                    let encoded = bincode::serialize(&record)
                        .map_err(|e| StorageError::Codec(e.to_string()))?;
                    table.insert(SECRET_SLOT, encoded.as_slice())?;
                    tracing::info!("created process secret");
                    record
                }
            }
        };
        txn.commit()?;
        Ok(record)
    }

    fn add_usage(&self, label: &str, count: i64) -> Result<(), StorageError> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(USAGE)?;
            let current = table.get(label)?.map(|g| g.value()).unwrap_or(0);
            table.insert(label, current + count)?;
        }
        txn.commit()?;
        Ok(())
    }

    fn usage_counts(&self) -> Result<Vec<UsageCount>, StorageError> {
        let txn = self.db.begin_read()?;
        let table = match txn.open_table(USAGE) {
            Ok(table) => table,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut counts = Vec::new();
        for item in table.iter()? {
            let (label, count) = item?;
            counts.push(UsageCount {
                label: label.value().to_owned(),
                count: count.value(),
            });
        }
        Ok(counts)
    }
}

impl From<redb::DatabaseError> for StorageError {
    fn from(e: redb::DatabaseError) -> Self {
        Self::Backend(e.to_string())
    }
}

impl From<redb::TransactionError> for StorageError {
    fn from(e: redb::TransactionError) -> Self {
        Self::Backend(e.to_string())
    }
}

impl From<redb::TableError> for StorageError {
    fn from(e: redb::TableError) -> Self {
        Self::Backend(e.to_string())
    }
}

impl From<redb::StorageError> for StorageError {
    fn from(e: redb::StorageError) -> Self {
        Self::Backend(e.to_string())
    }
}

impl From<redb::CommitError> for StorageError {
    fn from(e: redb::CommitError) -> Self {
        Self::Backend(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::bucket::Entry;

    fn entry(tail: u8) -> Entry {
        Entry {
            trailing: vec![tail; 12],
            time: 7,
            user_id: "u".into(),
            tag: "t".into(),
        }
    }

    #[test]
    fn test_fresh_database_has_no_buckets() {
        let dir = tempfile::tempdir().unwrap();
        let backend = RedbBackend::open(dir.path().join("store.redb")).unwrap();

        let buckets = backend.fetch_buckets(&[1, 2]).into_buckets().unwrap();
        assert_eq!(buckets, vec![None, None]);
        assert!(backend.usage_counts().unwrap().is_empty());
    }

    #[test]
    fn test_buckets_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.redb");

        {
            let backend = RedbBackend::open(&path).unwrap();
            backend
                .update_bucket(5, &mut |b| b.upsert(entry(1), 100))
                .unwrap();
        }

        let backend = RedbBackend::open(&path).unwrap();
        let buckets = backend.fetch_buckets(&[5]).into_buckets().unwrap();
        assert_eq!(buckets[0].as_ref().map(Bucket::len), Some(1));
        assert_eq!(
            buckets[0].as_ref().and_then(|b| b.find(&[1u8; 12])),
            Some(&entry(1))
        );
    }

    #[test]
    fn test_secret_stable_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.redb");

        let first = {
            let backend = RedbBackend::open(&path).unwrap();
            backend.obtain_secret(&mut SecretRecord::generate).unwrap()
        };

        let backend = RedbBackend::open(&path).unwrap();
        let second = backend.obtain_secret(&mut SecretRecord::generate).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_usage_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = RedbBackend::open(dir.path().join("store.redb")).unwrap();

        backend.add_usage("Success", 1).unwrap();
        backend.add_usage("Success", 1).unwrap();

        let counts = backend.usage_counts().unwrap();
        assert_eq!(counts.len(), 1);
        assert_eq!(counts[0].label, "Success");
        assert_eq!(counts[0].count, 2);
    }
}
