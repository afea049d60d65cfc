//! Per-stage worker lifecycle management.
//!
//! Each stage (transform, push) has its own manager: a map of
//! `RunnerName → WorkerHandle` mutated only by a single-writer control
//! loop fed through an mpsc channel, so add/update/delete are serialized
//! without a lock shared with the worker loops. The invariant it
//! maintains: for every live runner, exactly one worker per stage.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::rate::Stage;
use crate::record::RunnerName;

/// A running stage worker: its cancellation token and task handle.
pub(crate) struct WorkerHandle {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn new(shutdown: CancellationToken, task: JoinHandle<()>) -> Self {
        Self { shutdown, task }
    }

    /// Signal shutdown and wait up to `timeout` for the worker to finish.
    /// Returns false when the worker had to be abandoned; its task keeps
    /// running detached until its in-flight work completes.
    pub async fn stop(self, timeout: Duration) -> bool {
        self.shutdown.cancel();
        match tokio::time::timeout(timeout, self.task).await {
            Ok(Ok(())) => true,
            Ok(Err(join_err)) => {
                error!(error = %join_err, "worker task panicked during shutdown");
                true
            }
            Err(_) => false,
        }
    }
}

/// Spawns a stage's worker for one runner.
pub(crate) type WorkerSpawner = Box<dyn Fn(RunnerName) -> WorkerHandle + Send>;

/// Owns the worker map for one stage.
pub(crate) struct StageManager {
    stage: Stage,
    workers: HashMap<RunnerName, WorkerHandle>,
    spawner: WorkerSpawner,
    join_timeout: Duration,
}

impl StageManager {
    pub fn new(stage: Stage, spawner: WorkerSpawner, join_timeout: Duration) -> Self {
        Self {
            stage,
            workers: HashMap::new(),
            spawner,
            join_timeout,
        }
    }

    /// Start a worker for the runner, replacing (and stopping) any
    /// existing one first. Covers both add and update.
    pub async fn start_worker(&mut self, runner: &RunnerName) {
        if let Some(old) = self.workers.remove(runner) {
            if !old.stop(self.join_timeout).await {
                warn!(
                    runner = %runner,
                    stage = self.stage.as_str(),
                    "worker did not stop in time, abandoning and starting replacement"
                );
            }
        }
        let handle = (self.spawner)(runner.clone());
        self.workers.insert(runner.clone(), handle);
        debug!(runner = %runner, stage = self.stage.as_str(), "worker started");
    }

    /// Stop and remove the runner's worker, if any.
    pub async fn stop_worker(&mut self, runner: &RunnerName) {
        if let Some(handle) = self.workers.remove(runner) {
            if !handle.stop(self.join_timeout).await {
                warn!(
                    runner = %runner,
                    stage = self.stage.as_str(),
                    "worker did not stop in time, abandoning"
                );
            }
            debug!(runner = %runner, stage = self.stage.as_str(), "worker stopped");
        }
    }

    /// Stop every worker; used on runtime shutdown.
    pub async fn stop_all(&mut self) {
        let runners: Vec<RunnerName> = self.workers.keys().cloned().collect();
        for runner in runners {
            self.stop_worker(&runner).await;
        }
    }

    pub fn has_worker(&self, runner: &RunnerName) -> bool {
        self.workers.contains_key(runner)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

/// A lifecycle command for one stage.
pub(crate) enum StageCommand {
    /// Start (or replace) the runner's worker.
    Start(RunnerName),
    /// Stop and remove the runner's worker.
    Stop(RunnerName),
    /// Report whether the runner has a live worker.
    Query(RunnerName, oneshot::Sender<bool>),
}

/// Handle to a stage's control loop.
pub(crate) struct StageControl {
    tx: mpsc::Sender<(StageCommand, oneshot::Sender<()>)>,
    task: JoinHandle<()>,
}

impl StageControl {
    /// Spawn the control loop for a stage. Cancelling `shutdown` stops
    /// every worker of the stage and exits the loop.
    pub fn spawn(
        stage: Stage,
        spawner: WorkerSpawner,
        join_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<(StageCommand, oneshot::Sender<()>)>(64);
        let task = tokio::spawn(async move {
            let mut manager = StageManager::new(stage, spawner, join_timeout);
            loop {
                tokio::select! {
                    biased;

                    _ = shutdown.cancelled() => {
                        info!(stage = stage.as_str(), "stage shutting down");
                        manager.stop_all().await;
                        break;
                    }

                    command = rx.recv() => {
                        let Some((command, ack)) = command else { break };
                        match command {
                            StageCommand::Start(runner) => manager.start_worker(&runner).await,
                            StageCommand::Stop(runner) => manager.stop_worker(&runner).await,
                            StageCommand::Query(runner, reply) => {
                                let _ = reply.send(manager.has_worker(&runner));
                            }
                        }
                        let _ = ack.send(());
                    }
                }
            }
        });
        Self { tx, task }
    }

    /// Send a command and wait for the control loop to apply it. Silently
    /// returns when the loop has already shut down.
    pub async fn apply(&self, command: StageCommand) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send((command, ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Whether a runner currently has a live worker on this stage.
    pub async fn has_worker(&self, runner: &RunnerName) -> bool {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.apply(StageCommand::Query(runner.clone(), reply_tx)).await;
        reply_rx.await.unwrap_or(false)
    }

    /// Wait for the control loop itself to finish after shutdown.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            error!(error = %e, "stage control loop panicked");
        }
    }
}
