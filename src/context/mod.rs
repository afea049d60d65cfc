//! The Circulator Context: broker of all per-runner shared resources.
//!
//! The context is the single owner of every per-runner bundle: queues,
//! transform engine, sink, push executor, and the published window metrics
//! of both stages. Workers hold only a [`RunnerName`] and look their
//! bundle up every iteration, so a lifecycle replacement is observed on
//! the next loop without coordination. Reads are snapshots, writes are
//! atomic cell replacements, and no lock is ever held across an await or
//! a collaborator call.

mod executor;
mod queue;

pub(crate) use executor::ExecutorFull;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use snafu::OptionExt;
use tracing::{debug, info};

use crate::config::RuntimeConfig;
use crate::error::{ContextError, UnknownRunnerSnafu};
use crate::rate::{RunnerMetrics, Stage};
use crate::record::{ConnectRecord, RunnerName};
use crate::runner::TargetRunnerConfig;
use crate::sink::SinkTask;
use crate::transform::TransformEngine;

use executor::TaskExecutor;
use queue::RecordQueue;

/// Everything one runner owns.
struct RunnerBundle {
    event_queue: RecordQueue,
    target_queue: RecordQueue,
    engine: RwLock<Arc<dyn TransformEngine>>,
    sink: RwLock<Arc<dyn SinkTask>>,
    executor: TaskExecutor,
    transform_metrics: RwLock<RunnerMetrics>,
    push_metrics: RwLock<RunnerMetrics>,
}

/// Records a target-queue offer could not place.
#[derive(Debug, Default)]
pub struct TargetOverflow {
    /// Records whose queue stayed full past the offer timeout.
    pub backpressure: Vec<ConnectRecord>,
    /// Records whose runner has no bundle (removed mid-flight).
    pub unrouted: Vec<ConnectRecord>,
}

impl TargetOverflow {
    pub fn is_empty(&self) -> bool {
        self.backpressure.is_empty() && self.unrouted.is_empty()
    }
}

/// Queues drained out of a deleted runner's bundle.
#[derive(Debug, Default)]
pub struct DrainedRecords {
    pub event: Vec<ConnectRecord>,
    pub target: Vec<ConnectRecord>,
}

impl DrainedRecords {
    pub fn len(&self) -> usize {
        self.event.len() + self.target.len()
    }

    pub fn is_empty(&self) -> bool {
        self.event.is_empty() && self.target.is_empty()
    }
}

/// Broker of per-runner queues, engines, sinks, executors, and metrics.
///
/// Bundle creation spawns executor workers, so the context must live
/// inside a tokio runtime.
pub struct CirculatorContext {
    config: RuntimeConfig,
    runners: RwLock<HashMap<RunnerName, Arc<RunnerBundle>>>,
}

impl CirculatorContext {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            runners: RwLock::new(HashMap::new()),
        }
    }

    fn bundle(&self, runner: &RunnerName) -> Option<Arc<RunnerBundle>> {
        self.runners.read().get(runner).cloned()
    }

    /// Create or refresh a runner's bundle.
    ///
    /// A new runner gets fresh queues, a fresh executor, and initial
    /// window metrics. An existing runner keeps its queues, executor, and
    /// windows; only the engine and sink cells are replaced, so queued
    /// records survive an update. Returns true when the bundle was
    /// created.
    pub fn install_runner(&self, config: &TargetRunnerConfig) -> bool {
        let runner = config.keys.runner_name.clone();
        if let Some(bundle) = self.bundle(&runner) {
            *bundle.engine.write() = config.transform.clone();
            *bundle.sink.write() = config.sink.clone();
            info!(runner = %runner, "runner bundle refreshed");
            return false;
        }

        let tuning = self.config.tuning_for(&runner);
        let window = &self.config.window;
        let bundle = Arc::new(RunnerBundle {
            event_queue: RecordQueue::new(tuning.event_queue_capacity),
            target_queue: RecordQueue::new(tuning.target_queue_capacity),
            engine: RwLock::new(config.transform.clone()),
            sink: RwLock::new(config.sink.clone()),
            executor: TaskExecutor::new(tuning.executor_workers, tuning.executor_queue_capacity),
            transform_metrics: RwLock::new(RunnerMetrics::initial(
                runner.clone(),
                Stage::Transform,
                window.initial_cwnd,
                window.initial_ssthresh,
            )),
            push_metrics: RwLock::new(RunnerMetrics::initial(
                runner.clone(),
                Stage::Push,
                window.initial_cwnd,
                window.initial_ssthresh,
            )),
        });

        self.runners.write().insert(runner.clone(), bundle);
        info!(runner = %runner, "runner bundle created");
        true
    }

    /// Remove a runner's bundle, draining both queues.
    ///
    /// After this returns, metrics getters for the runner yield `None`
    /// and its workers idle until their lifecycle manager cancels them.
    pub fn deregister_runner(&self, runner: &RunnerName) -> Option<DrainedRecords> {
        let bundle = self.runners.write().remove(runner)?;
        let drained = DrainedRecords {
            event: bundle.event_queue.drain(),
            target: bundle.target_queue.drain(),
        };
        info!(
            runner = %runner,
            drained = drained.len(),
            "runner bundle released"
        );
        Some(drained)
    }

    /// Enqueue inbound records onto their runners' event queues, waiting
    /// for capacity. Returns records whose runner is not registered.
    pub async fn offer_event_records(&self, records: Vec<ConnectRecord>) -> Vec<ConnectRecord> {
        let mut unrouted = Vec::new();
        for (runner, group) in group_by_runner(records) {
            match self.bundle(&runner) {
                Some(bundle) => {
                    let rejected = bundle.event_queue.offer_wait(group).await;
                    unrouted.extend(rejected);
                }
                None => unrouted.extend(group),
            }
        }
        unrouted
    }

    /// Enqueue inbound records for one specific runner, failing fast when
    /// the runner is not registered. The checked entry point for source
    /// adapters bound to a single runner.
    pub async fn offer_runner_records(
        &self,
        runner: &RunnerName,
        records: Vec<ConnectRecord>,
    ) -> Result<(), ContextError> {
        let bundle = self.bundle(runner).context(UnknownRunnerSnafu { runner: runner.clone() })?;
        let rejected = bundle.event_queue.offer_wait(records).await;
        debug_assert!(rejected.is_empty(), "offer_wait only rejects on queue teardown");
        Ok(())
    }

    /// Remove up to `max` records from a runner's event queue. Empty when
    /// nothing is queued or the runner is gone; never blocks.
    pub fn take_event_records(&self, runner: &RunnerName, max: usize) -> Vec<ConnectRecord> {
        match self.bundle(runner) {
            Some(bundle) => bundle.event_queue.take(max),
            None => Vec::new(),
        }
    }

    /// Append transformed records to their runners' target queues,
    /// blocking up to the configured offer timeout per queue. Records that
    /// still do not fit come back in the overflow for the caller to route
    /// to the error handler.
    pub async fn offer_target_records(&self, records: Vec<ConnectRecord>) -> TargetOverflow {
        let timeout = Duration::from_millis(self.config.queue.offer_timeout_ms);
        let mut overflow = TargetOverflow::default();
        for (runner, group) in group_by_runner(records) {
            match self.bundle(&runner) {
                Some(bundle) => {
                    let rejected = bundle.target_queue.offer(group, timeout).await;
                    overflow.backpressure.extend(rejected);
                }
                None => overflow.unrouted.extend(group),
            }
        }
        overflow
    }

    /// Remove up to `max` records from a runner's target queue.
    pub fn take_target_records(&self, runner: &RunnerName, max: usize) -> Vec<ConnectRecord> {
        match self.bundle(runner) {
            Some(bundle) => bundle.target_queue.take(max),
            None => Vec::new(),
        }
    }

    /// Latest transform-stage window, or `None` once the runner is removed.
    pub fn transform_metrics(&self, runner: &RunnerName) -> Option<RunnerMetrics> {
        self.bundle(runner).map(|b| b.transform_metrics.read().clone())
    }

    /// Latest push-stage window, or `None` once the runner is removed.
    pub fn push_metrics(&self, runner: &RunnerName) -> Option<RunnerMetrics> {
        self.bundle(runner).map(|b| b.push_metrics.read().clone())
    }

    /// Atomically replace the transform-stage window. Ignored when the
    /// runner has been removed in the meantime.
    pub fn publish_transform_metrics(&self, metrics: RunnerMetrics) {
        match self.bundle(&metrics.runner) {
            Some(bundle) => *bundle.transform_metrics.write() = metrics,
            None => debug!(runner = %metrics.runner, "dropping metrics for removed runner"),
        }
    }

    /// Atomically replace the push-stage window.
    pub fn publish_push_metrics(&self, metrics: RunnerMetrics) {
        match self.bundle(&metrics.runner) {
            Some(bundle) => *bundle.push_metrics.write() = metrics,
            None => debug!(runner = %metrics.runner, "dropping metrics for removed runner"),
        }
    }

    /// Snapshot of every runner's current transform engine.
    pub fn transform_engines(&self) -> HashMap<RunnerName, Arc<dyn TransformEngine>> {
        self.runners
            .read()
            .iter()
            .map(|(name, bundle)| (name.clone(), bundle.engine.read().clone()))
            .collect()
    }

    /// Snapshot of every runner's current sink.
    pub fn sinks(&self) -> HashMap<RunnerName, Arc<dyn SinkTask>> {
        self.runners
            .read()
            .iter()
            .map(|(name, bundle)| (name.clone(), bundle.sink.read().clone()))
            .collect()
    }

    /// The current sink for one runner.
    pub fn sink(&self, runner: &RunnerName) -> Option<Arc<dyn SinkTask>> {
        self.bundle(runner).map(|b| b.sink.read().clone())
    }

    /// Queue a delivery job on the runner's push executor without
    /// blocking. `Err` means the executor queue is full (or the runner is
    /// gone) and the batch was not submitted.
    pub(crate) fn submit_push_job<F>(&self, runner: &RunnerName, job: F) -> Result<(), ExecutorFull>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        match self.bundle(runner) {
            Some(bundle) => bundle.executor.try_submit(job),
            None => Err(ExecutorFull),
        }
    }

    /// Free slots in the runner's push executor queue.
    pub fn executor_remaining_capacity(&self, runner: &RunnerName) -> usize {
        self.bundle(runner)
            .map(|b| b.executor.remaining_capacity())
            .unwrap_or(0)
    }

    /// Total slots in the runner's push executor queue.
    pub fn executor_queue_capacity(&self, runner: &RunnerName) -> usize {
        self.bundle(runner)
            .map(|b| b.executor.queue_capacity())
            .unwrap_or(0)
    }

    /// Current depth of the runner's event queue.
    pub fn event_queue_depth(&self, runner: &RunnerName) -> usize {
        self.bundle(runner).map(|b| b.event_queue.len()).unwrap_or(0)
    }

    /// Current depth of the runner's target queue.
    pub fn target_queue_depth(&self, runner: &RunnerName) -> usize {
        self.bundle(runner).map(|b| b.target_queue.len()).unwrap_or(0)
    }

    /// Names of all registered runners.
    pub fn runner_names(&self) -> Vec<RunnerName> {
        self.runners.read().keys().cloned().collect()
    }

    /// Whether a runner currently has a bundle.
    pub fn contains_runner(&self, runner: &RunnerName) -> bool {
        self.runners.read().contains_key(runner)
    }

    /// The configured wait intervals and clamps.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }
}

fn group_by_runner(records: Vec<ConnectRecord>) -> Vec<(RunnerName, Vec<ConnectRecord>)> {
    // Order within a runner must be preserved; a Vec of groups keeps the
    // first-seen runner ordering deterministic as well.
    let mut groups: Vec<(RunnerName, Vec<ConnectRecord>)> = Vec::new();
    for record in records {
        match groups.iter_mut().find(|(name, _)| *name == *record.runner()) {
            Some((_, group)) => group.push(record),
            None => groups.push((record.runner().clone(), vec![record])),
        }
    }
    groups
}
