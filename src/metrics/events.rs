//! Internal events for squall metrics emission.
//!
//! Each event struct represents a measurable occurrence in the pipeline.
//! All metrics carry a `runner` label so multi-runner deployments can be
//! observed per binding.

use metrics::{counter, gauge};
use tracing::trace;

use crate::rate::Stage;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

/// Stage at which a record failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStage {
    Transform,
    Queue,
    Executor,
    Sink,
    Lifecycle,
}

impl FailureStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureStage::Transform => "transform",
            FailureStage::Queue => "queue",
            FailureStage::Executor => "executor",
            FailureStage::Sink => "sink",
            FailureStage::Lifecycle => "lifecycle",
        }
    }
}

/// Records that came out of the transform chain and were forwarded
/// downstream.
pub struct RecordsTransformed {
    pub count: u64,
    pub runner: String,
}

impl InternalEvent for RecordsTransformed {
    fn emit(self) {
        trace!(count = self.count, runner = %self.runner, "Records transformed");
        counter!("squall_records_transformed_total", "runner" => self.runner)
            .increment(self.count);
    }
}

/// Records the transform chain intentionally dropped (acked, not forwarded).
pub struct RecordsFiltered {
    pub count: u64,
    pub runner: String,
}

impl InternalEvent for RecordsFiltered {
    fn emit(self) {
        trace!(count = self.count, runner = %self.runner, "Records filtered");
        counter!("squall_records_filtered_total", "runner" => self.runner).increment(self.count);
    }
}

/// Records delivered to the sink and committed.
pub struct RecordsDelivered {
    pub count: u64,
    pub runner: String,
}

impl InternalEvent for RecordsDelivered {
    fn emit(self) {
        trace!(count = self.count, runner = %self.runner, "Records delivered");
        counter!("squall_records_delivered_total", "runner" => self.runner).increment(self.count);
    }
}

/// A record left the pipeline through the error handler.
pub struct RecordFailed {
    pub stage: FailureStage,
    pub runner: String,
}

impl InternalEvent for RecordFailed {
    fn emit(self) {
        trace!(stage = self.stage.as_str(), runner = %self.runner, "Record failed");
        counter!("squall_records_failed_total", "stage" => self.stage.as_str(), "runner" => self.runner)
            .increment(1);
    }
}

/// Offsets acknowledged to the inbound source.
pub struct OffsetsCommitted {
    pub count: u64,
    pub runner: String,
}

impl InternalEvent for OffsetsCommitted {
    fn emit(self) {
        trace!(count = self.count, runner = %self.runner, "Offsets committed");
        counter!("squall_offsets_committed_total", "runner" => self.runner).increment(self.count);
    }
}

/// A stage published a new congestion window.
pub struct WindowPublished {
    pub stage: Stage,
    pub runner: String,
    pub cwnd: u32,
    pub ssthresh: u32,
}

impl InternalEvent for WindowPublished {
    fn emit(self) {
        trace!(
            stage = self.stage.as_str(),
            runner = %self.runner,
            cwnd = self.cwnd,
            ssthresh = self.ssthresh,
            "Window published"
        );
        gauge!("squall_cwnd", "stage" => self.stage.as_str(), "runner" => self.runner.clone())
            .set(self.cwnd as f64);
        gauge!("squall_ssthresh", "stage" => self.stage.as_str(), "runner" => self.runner)
            .set(self.ssthresh as f64);
    }
}

/// Depth of a per-runner record queue, sampled by its consuming worker.
pub struct QueueDepth {
    pub queue: &'static str,
    pub runner: String,
    pub depth: usize,
}

impl InternalEvent for QueueDepth {
    fn emit(self) {
        gauge!("squall_queue_depth", "queue" => self.queue, "runner" => self.runner)
            .set(self.depth as f64);
    }
}
