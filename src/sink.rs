//! The sink delivery seam.

use async_trait::async_trait;

use crate::error::BoxError;
use crate::record::ConnectRecord;

/// A delivery target for one runner.
///
/// The push stage hands a whole batch to `put` in a single call; an error
/// fails the entire batch and routes every record to the error handler.
/// Implementations are free to retry internally, but must eventually
/// return so the stage's window feedback stays live.
#[async_trait]
pub trait SinkTask: Send + Sync {
    /// Deliver a batch of records.
    async fn put(&self, records: &[ConnectRecord]) -> Result<(), BoxError>;
}
