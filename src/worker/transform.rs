//! Stage 1: event queue → transform chain → target queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::emit;
use crate::error::RecordFailure;
use crate::metrics::events::{QueueDepth, RecordsFiltered, RecordsTransformed, WindowPublished};
use crate::rate::{EstimateMetrics, RunnerMetrics, Stage};
use crate::record::{epoch_millis, ConnectRecord, RunnerName};
use crate::transform::TransformEngine;

use super::{idle, WorkerDeps, IDLE_BACKOFF};

/// What the transform chain did with one record.
///
/// Keeping the three cases distinct is what separates an intentional
/// filter (committed) from a failure (dead-lettered, uncommitted).
enum TransformOutcome {
    Produced(ConnectRecord),
    Dropped(ConnectRecord),
    Failed(ConnectRecord, String),
}

/// The per-runner transform stage worker.
pub(crate) struct TransformWorker {
    runner: RunnerName,
    deps: WorkerDeps,
    shutdown: CancellationToken,
}

impl TransformWorker {
    pub fn new(runner: RunnerName, deps: WorkerDeps, shutdown: CancellationToken) -> Self {
        Self { runner, deps, shutdown }
    }

    pub async fn run(self) {
        info!(runner = %self.runner, "transform worker started");
        let empty_wait = Duration::from_millis(self.deps.ctx.config().transform.empty_wait_ms);
        let no_engine_wait =
            Duration::from_millis(self.deps.ctx.config().transform.no_engine_wait_ms);

        while !self.shutdown.is_cancelled() {
            // Window metrics vanish when the runner is removed; park until
            // the lifecycle manager cancels us.
            let Some(window) = self.deps.ctx.transform_metrics(&self.runner) else {
                if !idle(&self.shutdown, IDLE_BACKOFF).await {
                    break;
                }
                continue;
            };

            let records = self
                .deps
                .ctx
                .take_event_records(&self.runner, window.cwnd as usize);
            emit!(QueueDepth {
                queue: "event",
                runner: self.runner.to_string(),
                depth: self.deps.ctx.event_queue_depth(&self.runner),
            });
            if records.is_empty() {
                if !idle(&self.shutdown, empty_wait).await {
                    break;
                }
                continue;
            }

            let engines = self.deps.ctx.transform_engines();
            let Some(engine) = engines.get(&self.runner).cloned() else {
                // The bundle vanished between the take and the snapshot;
                // the taken records missed the deregistration drain.
                warn!(
                    runner = %self.runner,
                    batch = records.len(),
                    "no transform engine for taken batch, dead-lettering"
                );
                for record in records {
                    self.deps.errors.handle(record, RecordFailure::RunnerRemoved);
                }
                if !idle(&self.shutdown, no_engine_wait).await {
                    break;
                }
                continue;
            };

            self.process_batch(records, engine, window).await;
        }
        info!(runner = %self.runner, "transform worker stopped");
    }

    async fn process_batch(
        &self,
        records: Vec<ConnectRecord>,
        engine: Arc<dyn TransformEngine>,
        window: RunnerMetrics,
    ) {
        let started_ms = epoch_millis();
        let batch_len = records.len();

        // Fan the batch out across the blocking pool; the chain is
        // synchronous and may be CPU-heavy.
        let mut tasks: JoinSet<TransformOutcome> = JoinSet::new();
        for record in records {
            let engine = engine.clone();
            tasks.spawn_blocking(move || match engine.transform(&record) {
                Ok(Some(out)) => TransformOutcome::Produced(out),
                Ok(None) => TransformOutcome::Dropped(record),
                Err(e) => TransformOutcome::Failed(record, e.to_string()),
            });
        }

        let mut forwarded: Vec<ConnectRecord> = Vec::with_capacity(batch_len);
        let mut filtered = 0u64;
        let mut join_failure: Option<String> = None;

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(TransformOutcome::Produced(record)) => forwarded.push(record),
                Ok(TransformOutcome::Dropped(record)) => {
                    // Filtered by design: definitively handled, so acked.
                    self.deps.offsets.commit(std::slice::from_ref(&record));
                    filtered += 1;
                }
                Ok(TransformOutcome::Failed(record, message)) => {
                    error!(
                        runner = %self.runner,
                        record = record.id(),
                        error = %message,
                        "transform failed"
                    );
                    self.deps
                        .errors
                        .handle(record, RecordFailure::Transform { message });
                }
                Err(join_err) => {
                    // A chain panicked. The record inside the task is gone
                    // and stays uncommitted, so the source may redeliver.
                    join_failure = Some(join_err.to_string());
                }
            }
        }

        if filtered > 0 {
            emit!(RecordsFiltered {
                count: filtered,
                runner: self.runner.to_string(),
            });
        }

        if let Some(message) = join_failure {
            self.fail_batch(forwarded, message, &window);
            return;
        }

        let forwarded_len = forwarded.len();
        if forwarded_len > 0 {
            let overflow = self.deps.ctx.offer_target_records(forwarded).await;
            self.route_overflow(overflow);
            emit!(RecordsTransformed {
                count: forwarded_len as u64,
                runner: self.runner.to_string(),
            });
        }

        // One inbound record can become transform_size downstream records;
        // scale the window the estimator reasons about accordingly.
        let max_fanout = self.deps.ctx.config().transform.max_fanout;
        let fanout = engine.transform_size().clamp(1, max_fanout.max(1)) as u32;
        let rwnd = self
            .deps
            .ctx
            .push_metrics(&self.runner)
            .map(|m| m.receiver_window());

        let estimate = EstimateMetrics {
            runner: self.runner.clone(),
            stage: Stage::Transform,
            batch_size: forwarded_len,
            cwnd: window.cwnd.saturating_mul(fanout),
            ssthresh: window.ssthresh,
            rwnd,
            start_timestamp_ms: started_ms,
            end_timestamp_ms: epoch_millis(),
            queue_remaining: self.deps.ctx.executor_remaining_capacity(&self.runner),
            queue_capacity: self.deps.ctx.executor_queue_capacity(&self.runner),
            error: false,
        };
        self.publish(self.deps.estimator.compute(estimate));

        debug!(
            runner = %self.runner,
            batch = batch_len,
            forwarded = forwarded_len,
            filtered,
            "transform batch complete"
        );
    }

    /// Batch-level failure: error feedback, and the records that were
    /// produced but never offered downstream go to the error handler.
    /// Records already on the target queue are left alone.
    fn fail_batch(&self, not_forwarded: Vec<ConnectRecord>, message: String, window: &RunnerMetrics) {
        error!(runner = %self.runner, error = %message, "transform batch failed");
        let estimate = EstimateMetrics::for_error(
            self.runner.clone(),
            Stage::Transform,
            window.cwnd,
            window.ssthresh,
        );
        self.publish(self.deps.estimator.compute(estimate));

        for record in not_forwarded {
            self.deps.errors.handle(
                record,
                RecordFailure::Transform {
                    message: message.clone(),
                },
            );
        }
    }

    fn route_overflow(&self, overflow: crate::context::TargetOverflow) {
        if overflow.is_empty() {
            return;
        }
        let waited_ms = self.deps.ctx.config().queue.offer_timeout_ms;
        warn!(
            runner = %self.runner,
            backpressure = overflow.backpressure.len(),
            unrouted = overflow.unrouted.len(),
            "target queue overflow"
        );
        for record in overflow.backpressure {
            self.deps
                .errors
                .handle(record, RecordFailure::Backpressure { waited_ms });
        }
        for record in overflow.unrouted {
            self.deps.errors.handle(record, RecordFailure::RunnerRemoved);
        }
    }

    fn publish(&self, metrics: RunnerMetrics) {
        emit!(WindowPublished {
            stage: Stage::Transform,
            runner: self.runner.to_string(),
            cwnd: metrics.cwnd,
            ssthresh: metrics.ssthresh,
        });
        self.deps.ctx.publish_transform_metrics(metrics);
    }
}
