//! Bucket and entry records for the uniqueness index.
//!
//! A bucket holds every previously seen fingerprint whose obfuscated
//! prefix hashed to the same storage key, oldest first. Buckets are
//! the unit of storage-level mutual exclusion: all mutation happens
//! inside a single backend transaction per bucket key.

use serde::{Deserialize, Serialize};

/// One previously seen fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Fingerprint body: the obfuscated chunk minus its prefix.
    pub trailing: Vec<u8>,
    /// Unix seconds of the first sighting, refreshed on re-sighting.
    pub time: i64,
    /// Caller id recorded at first sighting, cleared on refresh.
    pub user_id: String,
    /// Caller tag recorded at first sighting, cleared on refresh.
    pub tag: String,
}

/// An ordered list of entries sharing one bucket key, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    /// Entries in insertion order.
    pub entries: Vec<Entry>,
}

impl Bucket {
    /// Finds the entry with the given fingerprint body, if any.
    pub fn find(&self, trailing: &[u8]) -> Option<&Entry> {
        self.entries.iter().find(|e| e.trailing == trailing)
    }

    /// Inserts or refreshes an entry, evicting on overflow.
    ///
    /// Any existing entry with the same `trailing` is removed first,
    /// so a re-sighting moves to the back of the list with the new
    /// timestamp instead of duplicating. If the bucket then exceeds
    /// `max_entries`, the oldest half is dropped in one sweep.
    pub fn upsert(&mut self, entry: Entry, max_entries: usize) {
        self.entries.retain(|e| e.trailing != entry.trailing);
        self.entries.push(entry);
        if self.entries.len() > max_entries {
            let keep_from = self.entries.len() / 2;
            tracing::debug!(
                dropped = keep_from,
                kept = self.entries.len() - keep_from,
                "bucket overflow, evicting oldest entries"
            );
            self.entries.drain(..keep_from);
        }
    }

    /// Number of entries currently held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the bucket holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
