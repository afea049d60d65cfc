//! Stage 2: target queue → sink delivery → offset commit.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::emit;
use crate::error::RecordFailure;
use crate::metrics::events::{OffsetsCommitted, QueueDepth, RecordsDelivered, WindowPublished};
use crate::rate::{EstimateMetrics, RunnerMetrics, Stage};
use crate::record::{epoch_millis, ConnectRecord, RunnerName};

use super::{idle, WorkerDeps, IDLE_BACKOFF};

/// The per-runner push stage worker.
///
/// The loop itself never touches the sink: each batch becomes one job on
/// the runner's bounded executor, and the loop moves straight on to the
/// next take. Backpressure is the executor queue: when it is full the
/// batch is treated as an error batch instead of blocking the loop.
pub(crate) struct PushWorker {
    runner: RunnerName,
    deps: WorkerDeps,
    shutdown: CancellationToken,
}

impl PushWorker {
    pub fn new(runner: RunnerName, deps: WorkerDeps, shutdown: CancellationToken) -> Self {
        Self { runner, deps, shutdown }
    }

    pub async fn run(self) {
        info!(runner = %self.runner, "push worker started");
        let empty_wait = Duration::from_millis(self.deps.ctx.config().push.empty_wait_ms);

        while !self.shutdown.is_cancelled() {
            let Some(window) = self.deps.ctx.push_metrics(&self.runner) else {
                if !idle(&self.shutdown, IDLE_BACKOFF).await {
                    break;
                }
                continue;
            };

            let records = self
                .deps
                .ctx
                .take_target_records(&self.runner, window.cwnd as usize);
            emit!(QueueDepth {
                queue: "target",
                runner: self.runner.to_string(),
                depth: self.deps.ctx.target_queue_depth(&self.runner),
            });
            if records.is_empty() {
                if !idle(&self.shutdown, empty_wait).await {
                    break;
                }
                continue;
            }

            let Some(sink) = self.deps.ctx.sink(&self.runner) else {
                // Bundle vanished between the take and the snapshot; the
                // taken records missed the deregistration drain.
                for record in records {
                    self.deps.errors.handle(record, RecordFailure::RunnerRemoved);
                }
                if !idle(&self.shutdown, empty_wait).await {
                    break;
                }
                continue;
            };

            let started_ms = epoch_millis();
            let job = {
                let runner = self.runner.clone();
                let deps = self.deps.clone();
                let window = window.clone();
                let records = records.clone();
                async move {
                    deliver_batch(runner, deps, sink, records, window, started_ms).await;
                }
            };

            if self.deps.ctx.submit_push_job(&self.runner, job).is_err() {
                // Queue full: congestion at the sink. Error feedback plus
                // dead-letter, the batch was never submitted.
                warn!(
                    runner = %self.runner,
                    batch = records.len(),
                    "push executor rejected batch"
                );
                let estimate = EstimateMetrics::for_error(
                    self.runner.clone(),
                    Stage::Push,
                    window.cwnd,
                    window.ssthresh,
                );
                self.publish(self.deps.estimator.compute(estimate));
                for record in records {
                    self.deps.errors.handle(record, RecordFailure::ExecutorRejected);
                }
            }
        }
        info!(runner = %self.runner, "push worker stopped");
    }

    fn publish(&self, metrics: RunnerMetrics) {
        publish_push(&self.deps, &self.runner, metrics);
    }
}

/// Runs on the push executor: deliver, commit, publish feedback.
async fn deliver_batch(
    runner: RunnerName,
    deps: WorkerDeps,
    sink: std::sync::Arc<dyn crate::sink::SinkTask>,
    records: Vec<ConnectRecord>,
    window: RunnerMetrics,
    started_ms: u64,
) {
    match sink.put(&records).await {
        Ok(()) => {
            deps.offsets.commit(&records);
            emit!(RecordsDelivered {
                count: records.len() as u64,
                runner: runner.to_string(),
            });
            emit!(OffsetsCommitted {
                count: records.len() as u64,
                runner: runner.to_string(),
            });

            let estimate = EstimateMetrics {
                runner: runner.clone(),
                stage: Stage::Push,
                batch_size: records.len(),
                cwnd: window.cwnd,
                ssthresh: window.ssthresh,
                rwnd: None,
                start_timestamp_ms: started_ms,
                end_timestamp_ms: epoch_millis(),
                queue_remaining: deps.ctx.executor_remaining_capacity(&runner),
                queue_capacity: deps.ctx.executor_queue_capacity(&runner),
                error: false,
            };
            publish_push(&deps, &runner, deps.estimator.compute(estimate));

            debug!(runner = %runner, batch = records.len(), "batch delivered");
        }
        Err(e) => {
            error!(runner = %runner, batch = records.len(), error = %e, "sink delivery failed");
            let estimate = EstimateMetrics::for_error(
                runner.clone(),
                Stage::Push,
                window.cwnd,
                window.ssthresh,
            );
            publish_push(&deps, &runner, deps.estimator.compute(estimate));

            let message = e.to_string();
            for record in records {
                deps.errors.handle(
                    record,
                    RecordFailure::Sink {
                        message: message.clone(),
                    },
                );
            }
        }
    }
}

fn publish_push(deps: &WorkerDeps, runner: &RunnerName, metrics: RunnerMetrics) {
    emit!(WindowPublished {
        stage: Stage::Push,
        runner: runner.to_string(),
        cwnd: metrics.cwnd,
        ssthresh: metrics.ssthresh,
    });
    deps.ctx.publish_push_metrics(metrics);
}
