//! Outcome counters.
//!
//! Every submission increments a labelled counter (`Success`,
//! `Fail_<reason>`, `Fail_Nonunique`) in the same backend that holds
//! the buckets. Counting is fire-and-forget: a failed increment is
//! logged and dropped rather than failing the submission it was
//! counting.

use crate::store::{StorageBackend, UsageCount};
use std::sync::Arc;

/// Sink for outcome counts.
pub trait UsageRecorder: Send + Sync {
    /// Adds `count` to the counter for `label`.
    fn record(&self, label: &str, count: i64);
}

/// Recorder persisting counters through the storage backend.
pub struct PersistentUsage {
    backend: Arc<dyn StorageBackend>,
}

impl PersistentUsage {
    /// Creates a recorder over the given backend.
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Returns all counters, for the usage endpoint.
    pub fn counts(&self) -> Result<Vec<UsageCount>, crate::store::StorageError> {
        self.backend.usage_counts()
    }
}

impl UsageRecorder for PersistentUsage {
    fn record(&self, label: &str, count: i64) {
        if let Err(e) = self.backend.add_usage(label, count) {
            tracing::warn!(label, error = %e, "failed to record usage");
        }
    }
}

/// Recorder that drops everything, for tests and one-shot checks.
#[derive(Debug, Default)]
pub struct NullUsage;

impl UsageRecorder for NullUsage {
    fn record(&self, _label: &str, _count: i64) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBackend;

    #[test]
    fn test_counts_accumulate_by_label() {
        let backend = Arc::new(MemoryBackend::new());
        let usage = PersistentUsage::new(backend);

        usage.record("Success", 1);
        usage.record("Success", 1);
        usage.record("Fail_Repeated", 1);

        let counts = usage.counts().unwrap();
        assert_eq!(counts.len(), 2);
        assert!(counts
            .iter()
            .any(|c| c.label == "Success" && c.count == 2));
    }
}
