//! Event records and runner identity.
//!
//! A [`ConnectRecord`] is the unit of transport through the pipeline: an
//! opaque payload plus enough metadata to route it to its runner's queues
//! and to acknowledge it against the inbound source once it has been
//! definitively handled.

use std::collections::HashMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Identifier for a runner (a subscription-to-target binding).
///
/// Every per-runner resource (queues, workers, metrics, executor) is
/// keyed by this name.
///
/// # Examples
///
/// ```
/// use squall::RunnerName;
///
/// let name = RunnerName::new("orders-to-webhook");
/// assert_eq!(name.as_str(), "orders-to-webhook");
/// ```
#[derive(Debug, Clone, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunnerName(String);

impl RunnerName {
    /// Create a runner name from any string-like value.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the underlying identifier string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunnerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for RunnerName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RunnerName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for RunnerName {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// An event record flowing through the pipeline.
///
/// The core never inspects the payload; it transports the record from the
/// event queue through the transform chain to the sink, and uses `id` to
/// acknowledge it with the offset manager.
#[derive(Debug, Clone)]
pub struct ConnectRecord {
    /// The runner this record belongs to. Routing key for every queue.
    runner: RunnerName,
    /// Source-assigned identity, opaque to the core but stable enough for
    /// the offset manager to ack idempotently.
    id: String,
    /// Opaque event payload.
    payload: Bytes,
    /// Milliseconds since the Unix epoch at which the record entered the
    /// staging area.
    timestamp_ms: u64,
    /// Pass-through metadata (source partition, trace ids, ...).
    extensions: HashMap<String, String>,
}

impl ConnectRecord {
    /// Create a record with the current timestamp and no extensions.
    pub fn new(runner: impl Into<RunnerName>, id: impl Into<String>, payload: Bytes) -> Self {
        Self {
            runner: runner.into(),
            id: id.into(),
            payload,
            timestamp_ms: epoch_millis(),
            extensions: HashMap::new(),
        }
    }

    /// Attach a metadata extension, returning the record.
    pub fn with_extension(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extensions.insert(key.into(), value.into());
        self
    }

    /// The runner this record is bound to.
    pub fn runner(&self) -> &RunnerName {
        &self.runner
    }

    /// Source-assigned record identity.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The opaque payload.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Replace the payload, keeping identity and routing. Transform chains
    /// use this to emit a rewritten record that still acks the original.
    pub fn with_payload(mut self, payload: Bytes) -> Self {
        self.payload = payload;
        self
    }

    /// Milliseconds since the Unix epoch when the record was staged.
    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    /// Pass-through metadata.
    pub fn extensions(&self) -> &HashMap<String, String> {
        &self.extensions
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub(crate) fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
