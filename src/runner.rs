//! Runner configuration aggregates and lifecycle notifications.

use std::fmt;
use std::sync::Arc;

use crate::record::RunnerName;
use crate::sink::SinkTask;
use crate::transform::TransformEngine;

/// Subscription identity of a runner.
///
/// The core consumes only `runner_name`; the source binding is carried for
/// collaborators (source adapters, offset managers) that key on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeRunnerKeys {
    pub runner_name: RunnerName,
    /// The inbound subscription this runner drains (topic, rule, bus name).
    pub source: String,
}

impl SubscribeRunnerKeys {
    pub fn new(runner_name: impl Into<RunnerName>, source: impl Into<String>) -> Self {
        Self {
            runner_name: runner_name.into(),
            source: source.into(),
        }
    }
}

/// Full configuration of one runner binding.
///
/// The transform chain and sink arrive ready-built: constructing them from
/// declarative config is the bootstrap's job, and the core only transports
/// them into the runner's bundle.
#[derive(Clone)]
pub struct TargetRunnerConfig {
    pub keys: SubscribeRunnerKeys,
    pub transform: Arc<dyn TransformEngine>,
    pub sink: Arc<dyn SinkTask>,
}

impl TargetRunnerConfig {
    pub fn new(
        keys: SubscribeRunnerKeys,
        transform: Arc<dyn TransformEngine>,
        sink: Arc<dyn SinkTask>,
    ) -> Self {
        Self { keys, transform, sink }
    }

    /// The runner this configuration belongs to.
    pub fn runner_name(&self) -> &RunnerName {
        &self.keys.runner_name
    }
}

impl fmt::Debug for TargetRunnerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetRunnerConfig")
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}

/// A lifecycle notification for one runner.
#[derive(Debug, Clone)]
pub enum RunnerEvent {
    Add(TargetRunnerConfig),
    Update(TargetRunnerConfig),
    Delete(TargetRunnerConfig),
}

impl RunnerEvent {
    /// The runner the event applies to.
    pub fn runner_name(&self) -> &RunnerName {
        match self {
            RunnerEvent::Add(cfg) | RunnerEvent::Update(cfg) | RunnerEvent::Delete(cfg) => {
                cfg.runner_name()
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RunnerEvent::Add(_) => "add",
            RunnerEvent::Update(_) => "update",
            RunnerEvent::Delete(_) => "delete",
        }
    }
}

/// Source of the configured runner set at startup.
///
/// After startup, changes arrive through [`TargetRunnerListener`]
/// callbacks instead.
pub trait RunnerConfigObserver: Send + Sync {
    fn target_runner_configs(&self) -> Vec<TargetRunnerConfig>;
}

/// Callbacks a configuration observer invokes on the runtime.
///
/// Implementations are fire-and-forget: the runtime turns each call into a
/// [`RunnerEvent`] on its control channel and applies it asynchronously.
pub trait TargetRunnerListener {
    fn on_add_target_runner(&self, config: TargetRunnerConfig);
    fn on_update_target_runner(&self, config: TargetRunnerConfig);
    fn on_delete_target_runner(&self, config: TargetRunnerConfig);
}

/// A fixed runner set; the common observer for embedders that wire
/// runners programmatically and push changes through the listener.
#[derive(Default)]
pub struct StaticRunnerSet {
    configs: Vec<TargetRunnerConfig>,
}

impl StaticRunnerSet {
    pub fn new(configs: Vec<TargetRunnerConfig>) -> Self {
        Self { configs }
    }

    /// An empty set: every runner arrives through listener callbacks.
    pub fn empty() -> Self {
        Self::default()
    }
}

impl RunnerConfigObserver for StaticRunnerSet {
    fn target_runner_configs(&self) -> Vec<TargetRunnerConfig> {
        self.configs.clone()
    }
}
