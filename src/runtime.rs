//! Runtime wiring: context, stages, and the lifecycle control loop.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{DrainPolicy, RuntimeConfig};
use crate::context::CirculatorContext;
use crate::error::{RecordFailure, RuntimeError};
use crate::handler::ErrorHandler;
use crate::lifecycle::{StageCommand, StageControl, WorkerHandle, WorkerSpawner};
use crate::offset::OffsetManager;
use crate::rate::{RateEstimator, Stage};
use crate::record::{ConnectRecord, RunnerName};
use crate::runner::{RunnerConfigObserver, RunnerEvent, TargetRunnerListener};
use crate::worker::{PushWorker, TransformWorker, WorkerDeps};

struct ControlMessage {
    event: RunnerEvent,
    ack: Option<oneshot::Sender<()>>,
}

/// The per-runner execution core of an event-bridge runtime.
///
/// Owns the [`CirculatorContext`] and both stage lifecycles. Lifecycle
/// notifications, whether from the initial observer enumeration or from
/// [`TargetRunnerListener`] callbacks, are applied by a single control
/// loop, so configuration changes are serialized against each other while
/// workers keep flowing traffic.
///
/// # Example
///
/// ```ignore
/// let runtime = BridgeRuntime::start(
///     RuntimeConfig::default(),
///     Arc::new(StaticRunnerSet::new(configs)),
///     Arc::new(RenoEstimator::new(bounds)),
///     offsets,
///     errors,
/// )
/// .await?;
///
/// runtime.offer_event_records(records).await;
/// runtime.shutdown().await;
/// ```
pub struct BridgeRuntime {
    ctx: Arc<CirculatorContext>,
    control: mpsc::Sender<ControlMessage>,
    control_task: JoinHandle<()>,
    shutdown: CancellationToken,
}

impl BridgeRuntime {
    /// Validate the configuration, spawn both stages, and start a worker
    /// pair for every runner the observer reports.
    pub async fn start(
        config: RuntimeConfig,
        observer: Arc<dyn RunnerConfigObserver>,
        estimator: Arc<dyn RateEstimator>,
        offsets: Arc<dyn OffsetManager>,
        errors: Arc<dyn ErrorHandler>,
    ) -> Result<Self, RuntimeError> {
        config.validate()?;

        let shutdown = CancellationToken::new();
        let ctx = Arc::new(CirculatorContext::new(config.clone()));
        let deps = WorkerDeps {
            ctx: ctx.clone(),
            estimator,
            offsets,
            errors: errors.clone(),
        };
        let join_timeout = config.shutdown.worker_join_timeout();

        let transform_stage = StageControl::spawn(
            Stage::Transform,
            transform_spawner(deps.clone(), shutdown.clone()),
            join_timeout,
            shutdown.clone(),
        );
        let push_stage = StageControl::spawn(
            Stage::Push,
            push_spawner(deps.clone(), shutdown.clone()),
            join_timeout,
            shutdown.clone(),
        );

        let (control_tx, control_rx) = mpsc::channel(64);
        let control_task = tokio::spawn(control_loop(
            ctx.clone(),
            transform_stage,
            push_stage,
            errors,
            config.shutdown.drain_policy,
            control_rx,
            shutdown.clone(),
        ));

        let runtime = Self {
            ctx,
            control: control_tx,
            control_task,
            shutdown,
        };

        for runner_config in observer.target_runner_configs() {
            runtime.apply(RunnerEvent::Add(runner_config)).await?;
        }

        Ok(runtime)
    }

    /// Apply a lifecycle event and wait until both stages have acted on it.
    pub async fn apply(&self, event: RunnerEvent) -> Result<(), RuntimeError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.control
            .send(ControlMessage {
                event,
                ack: Some(ack_tx),
            })
            .await
            .map_err(|_| RuntimeError::ControlClosed)?;
        ack_rx.await.map_err(|_| RuntimeError::ControlClosed)
    }

    /// Post a lifecycle event without waiting for it to be applied.
    pub fn notify(&self, event: RunnerEvent) {
        let message = ControlMessage { event, ack: None };
        if let Err(e) = self.control.try_send(message) {
            warn!(error = %e, "lifecycle notification dropped, control queue full or closed");
        }
    }

    /// The shared broker, for source adapters and introspection.
    pub fn context(&self) -> &Arc<CirculatorContext> {
        &self.ctx
    }

    /// Enqueue inbound records; see
    /// [`CirculatorContext::offer_event_records`].
    pub async fn offer_event_records(&self, records: Vec<ConnectRecord>) -> Vec<ConnectRecord> {
        self.ctx.offer_event_records(records).await
    }

    /// Stop every worker on both stages and the control loop itself.
    pub async fn shutdown(self) {
        info!("runtime shutting down");
        self.shutdown.cancel();
        if let Err(e) = self.control_task.await {
            error!(error = %e, "control loop panicked during shutdown");
        }
        info!("runtime shut down");
    }
}

impl TargetRunnerListener for BridgeRuntime {
    fn on_add_target_runner(&self, config: crate::runner::TargetRunnerConfig) {
        self.notify(RunnerEvent::Add(config));
    }

    fn on_update_target_runner(&self, config: crate::runner::TargetRunnerConfig) {
        self.notify(RunnerEvent::Update(config));
    }

    fn on_delete_target_runner(&self, config: crate::runner::TargetRunnerConfig) {
        self.notify(RunnerEvent::Delete(config));
    }
}

fn transform_spawner(deps: WorkerDeps, parent: CancellationToken) -> WorkerSpawner {
    Box::new(move |runner: RunnerName| {
        let token = parent.child_token();
        let worker = TransformWorker::new(runner, deps.clone(), token.clone());
        WorkerHandle::new(token, tokio::spawn(worker.run()))
    })
}

fn push_spawner(deps: WorkerDeps, parent: CancellationToken) -> WorkerSpawner {
    Box::new(move |runner: RunnerName| {
        let token = parent.child_token();
        let worker = PushWorker::new(runner, deps.clone(), token.clone());
        WorkerHandle::new(token, tokio::spawn(worker.run()))
    })
}

#[allow(clippy::too_many_arguments)]
async fn control_loop(
    ctx: Arc<CirculatorContext>,
    transform_stage: StageControl,
    push_stage: StageControl,
    errors: Arc<dyn ErrorHandler>,
    drain_policy: DrainPolicy,
    mut rx: mpsc::Receiver<ControlMessage>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => break,

            message = rx.recv() => {
                let Some(ControlMessage { event, ack }) = message else { break };
                debug!(runner = %event.runner_name(), kind = event.kind(), "applying runner event");
                apply_event(&ctx, &transform_stage, &push_stage, &errors, drain_policy, event).await;
                if let Some(ack) = ack {
                    let _ = ack.send(());
                }
            }
        }
    }

    // The stage loops observe the same token; wait for them to stop
    // their workers before reporting shutdown complete.
    transform_stage.join().await;
    push_stage.join().await;
}

async fn apply_event(
    ctx: &Arc<CirculatorContext>,
    transform_stage: &StageControl,
    push_stage: &StageControl,
    errors: &Arc<dyn ErrorHandler>,
    drain_policy: DrainPolicy,
    event: RunnerEvent,
) {
    match event {
        RunnerEvent::Add(config) | RunnerEvent::Update(config) => {
            let runner = config.runner_name().clone();
            // Bundle first so the fresh workers find their queues and
            // windows on their first iteration.
            ctx.install_runner(&config);
            transform_stage.apply(StageCommand::Start(runner.clone())).await;
            push_stage.apply(StageCommand::Start(runner)).await;
        }
        RunnerEvent::Delete(config) => {
            let runner = config.runner_name().clone();
            // Workers first: nothing may start a new batch for the runner
            // once delete returns. In-flight executor jobs are allowed to
            // finish and commit.
            transform_stage.apply(StageCommand::Stop(runner.clone())).await;
            push_stage.apply(StageCommand::Stop(runner.clone())).await;

            let Some(drained) = ctx.deregister_runner(&runner) else {
                warn!(runner = %runner, "delete for unknown runner ignored");
                return;
            };
            if drained.is_empty() {
                return;
            }
            match drain_policy {
                DrainPolicy::DeadLetter => {
                    info!(
                        runner = %runner,
                        count = drained.len(),
                        "dead-lettering records drained from deleted runner"
                    );
                    for record in drained.event.into_iter().chain(drained.target) {
                        errors.handle(record, RecordFailure::RunnerRemoved);
                    }
                }
                DrainPolicy::Discard => {
                    warn!(
                        runner = %runner,
                        count = drained.len(),
                        "discarding records drained from deleted runner"
                    );
                }
            }
        }
    }
}
