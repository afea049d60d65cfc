//! The per-record failure sink.
//!
//! Every record that leaves the pipeline without being delivered passes
//! through an [`ErrorHandler`]: transform failures, sink failures,
//! backpressure drops, executor rejections, and lifecycle drains. The
//! handler owns the retry/DLQ/drop decision; the pipeline never commits a
//! failed record itself.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::emit;
use crate::error::RecordFailure;
use crate::metrics::events::{FailureStage, RecordFailed};
use crate::record::{epoch_millis, ConnectRecord};

/// Sink for records that failed somewhere in the pipeline.
///
/// Must return promptly; long-running recovery belongs on the handler's
/// own tasks, not the worker loop.
pub trait ErrorHandler: Send + Sync {
    fn handle(&self, record: ConnectRecord, failure: RecordFailure);
}

/// Error handler that logs the failure and drops the record.
///
/// The default for deployments without a dead-letter target: at-least-once
/// delivery degrades to at-most-once for the failed record only.
#[derive(Debug, Default)]
pub struct LogErrorHandler;

impl ErrorHandler for LogErrorHandler {
    fn handle(&self, record: ConnectRecord, failure: RecordFailure) {
        error!(
            runner = %record.runner(),
            record = record.id(),
            error = %failure,
            "record failed, dropping"
        );
        emit!(RecordFailed {
            stage: failure.stage(),
            runner: record.runner().to_string(),
        });
    }
}

/// A failed record as captured by the dead-letter queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedRecord {
    pub runner: String,
    pub record_id: String,
    pub stage: FailureStage,
    pub reason: String,
    pub failed_at_ms: u64,
}

impl FailedRecord {
    fn capture(record: &ConnectRecord, failure: &RecordFailure) -> Self {
        Self {
            runner: record.runner().to_string(),
            record_id: record.id().to_string(),
            stage: failure.stage(),
            reason: failure.to_string(),
            failed_at_ms: epoch_millis(),
        }
    }
}

/// Error handler that retains failures in memory for later inspection.
///
/// The in-process equivalent of a durable dead-letter queue; useful in
/// tests and embedders that flush entries to their own store.
#[derive(Debug, Default)]
pub struct MemoryDeadLetterQueue {
    entries: Mutex<Vec<FailedRecord>>,
}

impl MemoryDeadLetterQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the captured failures.
    pub fn entries(&self) -> Vec<FailedRecord> {
        self.entries.lock().clone()
    }

    /// Number of captured failures.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True if nothing has failed yet.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl ErrorHandler for MemoryDeadLetterQueue {
    fn handle(&self, record: ConnectRecord, failure: RecordFailure) {
        error!(
            runner = %record.runner(),
            record = record.id(),
            error = %failure,
            "record failed, dead-lettering"
        );
        emit!(RecordFailed {
            stage: failure.stage(),
            runner: record.runner().to_string(),
        });
        self.entries.lock().push(FailedRecord::capture(&record, &failure));
    }
}
