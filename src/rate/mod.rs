//! Congestion-window rate estimation.
//!
//! Both pipeline stages self-regulate with a TCP-Reno-inspired scheme: a
//! congestion window (`cwnd`) bounds the next batch size, a slow-start
//! threshold (`ssthresh`) switches growth from doubling to linear, and the
//! downstream stage's window acts as a receiver window (`rwnd`) clamp on
//! the transform stage. After every batch, success or failure, a worker
//! feeds an [`EstimateMetrics`] snapshot to the estimator and publishes the
//! returned [`RunnerMetrics`] for its next iteration.

mod reno;

pub use reno::RenoEstimator;

use serde::{Deserialize, Serialize};

use crate::record::RunnerName;

/// Which pipeline stage a metrics value belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Inbound events through the transform chain into the target queue.
    Transform,
    /// Target queue through the sink, with offset commit.
    Push,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Transform => "transform",
            Stage::Push => "push",
        }
    }
}

/// Clamp bounds applied to every computed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowBounds {
    /// Floor for cwnd and ssthresh; at least 1.
    pub min: u32,
    /// Ceiling for cwnd.
    pub max: u32,
}

impl WindowBounds {
    pub(crate) fn clamp_cwnd(&self, cwnd: u32) -> u32 {
        cwnd.clamp(self.min, self.max)
    }

    pub(crate) fn clamp_ssthresh(&self, ssthresh: u32) -> u32 {
        ssthresh.max(self.min)
    }
}

/// The published window state of one stage of one runner.
///
/// A stage reads its own metrics at the top of every iteration to size the
/// next take; the transform stage additionally reads the push stage's
/// metrics as its receiver window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerMetrics {
    pub runner: RunnerName,
    pub stage: Stage,
    /// Maximum batch size the stage may take on its next iteration.
    pub cwnd: u32,
    /// Slow-start threshold.
    pub ssthresh: u32,
}

impl RunnerMetrics {
    /// Fresh metrics for a newly registered runner.
    pub fn initial(runner: RunnerName, stage: Stage, initial_cwnd: u32, initial_ssthresh: u32) -> Self {
        Self {
            runner,
            stage,
            cwnd: initial_cwnd,
            ssthresh: initial_ssthresh,
        }
    }

    /// This stage's window as seen by the stage feeding it.
    pub fn receiver_window(&self) -> u32 {
        self.cwnd
    }
}

/// Snapshot of one finished batch, handed to the estimator.
#[derive(Debug, Clone)]
pub struct EstimateMetrics {
    pub runner: RunnerName,
    pub stage: Stage,
    /// Records the batch actually carried (forwarded or delivered).
    pub batch_size: usize,
    /// The window the batch ran under. The transform stage pre-scales this
    /// by the transform-chain fan-out.
    pub cwnd: u32,
    /// The threshold the batch ran under.
    pub ssthresh: u32,
    /// Downstream receiver window; transform stage only.
    pub rwnd: Option<u32>,
    /// Batch start, milliseconds since the Unix epoch.
    pub start_timestamp_ms: u64,
    /// Batch end, milliseconds since the Unix epoch.
    pub end_timestamp_ms: u64,
    /// Free slots in the push executor's queue when the batch finished.
    pub queue_remaining: usize,
    /// Total slots in the push executor's queue.
    pub queue_capacity: usize,
    /// True if the batch failed (transform join failure, sink error,
    /// executor rejection).
    pub error: bool,
}

impl EstimateMetrics {
    /// An error-batch snapshot: no size, no timing, just the window state
    /// the failure happened under.
    pub fn for_error(runner: RunnerName, stage: Stage, cwnd: u32, ssthresh: u32) -> Self {
        Self {
            runner,
            stage,
            batch_size: 0,
            cwnd,
            ssthresh,
            rwnd: None,
            start_timestamp_ms: 0,
            end_timestamp_ms: 0,
            queue_remaining: 0,
            queue_capacity: 0,
            error: true,
        }
    }

    /// Elapsed batch time in milliseconds, floored at 1 so throughput is
    /// always defined.
    pub fn elapsed_ms(&self) -> u64 {
        self.end_timestamp_ms
            .saturating_sub(self.start_timestamp_ms)
            .max(1)
    }

    /// Observed throughput in records per second.
    pub fn tps(&self) -> u64 {
        (self.batch_size as u64 * 1000) / self.elapsed_ms()
    }
}

/// Computes the next window state from a finished batch.
///
/// Implementations must be pure: same input, same output, no I/O.
pub trait RateEstimator: Send + Sync {
    fn compute(&self, metrics: EstimateMetrics) -> RunnerMetrics;
}
