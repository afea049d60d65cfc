//! Offset acknowledgement back to the inbound source.

use std::collections::HashSet;

use parking_lot::Mutex;
use tracing::debug;

use crate::record::ConnectRecord;

/// Acknowledges records as definitively handled.
///
/// Called with a singleton when the transform chain drops a record, and
/// with a whole batch when the sink accepts one. Implementations must be
/// idempotent (a replaced worker's in-flight commit can race its
/// successor) and must tolerate out-of-order commits.
pub trait OffsetManager: Send + Sync {
    fn commit(&self, records: &[ConnectRecord]);
}

/// Offset manager backed by an in-process set of acked record ids.
///
/// Stands in for a broker-backed manager in tests and local runs; the
/// id set makes the idempotence contract observable.
#[derive(Debug, Default)]
pub struct InMemoryOffsetManager {
    acked: Mutex<HashSet<String>>,
}

impl InMemoryOffsetManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct records acked so far.
    pub fn committed_count(&self) -> usize {
        self.acked.lock().len()
    }

    /// Whether a specific record id has been acked.
    pub fn is_committed(&self, id: &str) -> bool {
        self.acked.lock().contains(id)
    }
}

impl OffsetManager for InMemoryOffsetManager {
    fn commit(&self, records: &[ConnectRecord]) {
        if records.is_empty() {
            return;
        }
        let mut acked = self.acked.lock();
        for record in records {
            acked.insert(record.id().to_string());
        }
        debug!(count = records.len(), total = acked.len(), "offsets committed");
    }
}
