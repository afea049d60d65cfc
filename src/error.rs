//! Error types for the squall runtime core.

use snafu::prelude::*;

use crate::record::RunnerName;

/// Boxed error type used at collaborator seams (transform engines, sinks).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Why a record left the pipeline without being delivered.
///
/// Every variant is routed to the [`ErrorHandler`](crate::ErrorHandler);
/// none of them commits the record.
#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub))]
pub enum RecordFailure {
    /// The transform chain returned an error for this record.
    #[snafu(display("transform failed: {message}"))]
    Transform { message: String },

    /// The sink rejected the batch containing this record.
    #[snafu(display("sink delivery failed: {message}"))]
    Sink { message: String },

    /// The target queue stayed full past the offer timeout.
    #[snafu(display("target queue full after {waited_ms}ms, record dropped"))]
    Backpressure { waited_ms: u64 },

    /// The push executor's queue was full; the batch was never submitted.
    #[snafu(display("push executor queue full, batch rejected"))]
    ExecutorRejected,

    /// The runner was deleted while records were still queued.
    #[snafu(display("runner removed with records still queued"))]
    RunnerRemoved,
}

impl RecordFailure {
    /// The pipeline stage this failure is attributed to, for metrics and
    /// dead-letter records.
    pub fn stage(&self) -> crate::metrics::events::FailureStage {
        use crate::metrics::events::FailureStage;
        match self {
            RecordFailure::Transform { .. } => FailureStage::Transform,
            RecordFailure::Sink { .. } => FailureStage::Sink,
            RecordFailure::Backpressure { .. } => FailureStage::Queue,
            RecordFailure::ExecutorRejected => FailureStage::Executor,
            RecordFailure::RunnerRemoved => FailureStage::Lifecycle,
        }
    }
}

/// Errors from [`CirculatorContext`](crate::CirculatorContext) operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ContextError {
    /// The runner has no registered bundle.
    #[snafu(display("runner '{runner}' is not registered"))]
    UnknownRunner { runner: RunnerName },
}

/// Errors from configuration parsing and validation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Window bounds are inconsistent.
    #[snafu(display("invalid window bounds: {message}"))]
    WindowBounds { message: String },

    /// A queue was configured with zero capacity.
    #[snafu(display("queue '{queue}' must have capacity of at least 1"))]
    ZeroQueueCapacity { queue: String },

    /// The push executor was configured with zero workers.
    #[snafu(display("executor must have at least 1 worker"))]
    ZeroExecutorWorkers,

    /// Failed to parse YAML configuration.
    #[snafu(display("failed to parse YAML: {source}"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read a configuration file.
    #[snafu(display("failed to read configuration file: {source}"))]
    ReadFile { source: std::io::Error },
}

/// Top-level runtime errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum RuntimeError {
    /// Configuration rejected at startup.
    #[snafu(display("configuration error: {source}"))]
    Config { source: ConfigError },

    /// Context operation failed.
    #[snafu(display("context error: {source}"))]
    Context { source: ContextError },

    /// The lifecycle control channel is closed; the runtime has shut down.
    #[snafu(display("runtime control channel closed"))]
    ControlClosed,
}

impl From<ConfigError> for RuntimeError {
    fn from(source: ConfigError) -> Self {
        RuntimeError::Config { source }
    }
}

impl From<ContextError> for RuntimeError {
    fn from(source: ContextError) -> Self {
        RuntimeError::Context { source }
    }
}
