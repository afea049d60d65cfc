//! Runtime configuration.
//!
//! All knobs that shape the two pipeline stages: congestion-window bounds,
//! worker wait intervals, queue and executor capacities, and shutdown
//! behavior. Sections deserialize from YAML with defaults, so an empty
//! document is a valid configuration.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use snafu::ResultExt;

use crate::error::{ConfigError, ReadFileSnafu, WindowBoundsSnafu, YamlParseSnafu, ZeroQueueCapacitySnafu};
use crate::rate::WindowBounds;
use crate::record::RunnerName;

/// Top-level runtime configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Congestion-window bounds and initial values.
    #[serde(default)]
    pub window: WindowConfig,
    /// Transform stage timing.
    #[serde(default)]
    pub transform: TransformConfig,
    /// Push stage timing.
    #[serde(default)]
    pub push: PushConfig,
    /// Per-runner push executor sizing.
    #[serde(default)]
    pub executor: ExecutorConfig,
    /// Per-runner queue sizing.
    #[serde(default)]
    pub queue: QueueConfig,
    /// Worker shutdown behavior.
    #[serde(default)]
    pub shutdown: ShutdownConfig,
    /// Per-runner overrides, keyed by runner name.
    #[serde(default)]
    pub runners: HashMap<String, RunnerTuning>,
}

impl RuntimeConfig {
    /// Parse a configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml).context(YamlParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).context(ReadFileSnafu)?;
        Self::from_yaml(&raw)
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.window.validate()?;
        if self.executor.workers == 0 {
            return Err(ConfigError::ZeroExecutorWorkers);
        }
        if self.executor.queue_capacity == 0 {
            return ZeroQueueCapacitySnafu { queue: "executor" }.fail();
        }
        if self.queue.event_capacity == 0 {
            return ZeroQueueCapacitySnafu { queue: "event" }.fail();
        }
        if self.queue.target_capacity == 0 {
            return ZeroQueueCapacitySnafu { queue: "target" }.fail();
        }
        for (name, tuning) in &self.runners {
            tuning.validate(name)?;
        }
        Ok(())
    }

    /// Effective tuning for one runner, with overrides applied over the
    /// global defaults.
    pub fn tuning_for(&self, runner: &RunnerName) -> EffectiveTuning {
        let overrides = self.runners.get(runner.as_str());
        EffectiveTuning {
            event_queue_capacity: overrides
                .and_then(|t| t.event_queue_capacity)
                .unwrap_or(self.queue.event_capacity),
            target_queue_capacity: overrides
                .and_then(|t| t.target_queue_capacity)
                .unwrap_or(self.queue.target_capacity),
            executor_workers: overrides
                .and_then(|t| t.executor_workers)
                .unwrap_or(self.executor.workers),
            executor_queue_capacity: overrides
                .and_then(|t| t.executor_queue_capacity)
                .unwrap_or(self.executor.queue_capacity),
        }
    }
}

/// Congestion-window configuration for both stages.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WindowConfig {
    /// Starting congestion window for a fresh runner (default: 1).
    #[serde(default = "default_initial_cwnd")]
    pub initial_cwnd: u32,
    /// Starting slow-start threshold for a fresh runner (default: 64).
    #[serde(default = "default_initial_ssthresh")]
    pub initial_ssthresh: u32,
    /// Lower clamp for cwnd and ssthresh (default: 1).
    #[serde(default = "default_min_cwnd")]
    pub min_cwnd: u32,
    /// Upper clamp for cwnd (default: 1024).
    #[serde(default = "default_max_cwnd")]
    pub max_cwnd: u32,
}

impl WindowConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.min_cwnd == 0 {
            return WindowBoundsSnafu { message: "min_cwnd must be at least 1".to_string() }.fail();
        }
        if self.max_cwnd < self.min_cwnd {
            return WindowBoundsSnafu {
                message: format!(
                    "max_cwnd ({}) must not be below min_cwnd ({})",
                    self.max_cwnd, self.min_cwnd
                ),
            }
            .fail();
        }
        if self.initial_cwnd < self.min_cwnd || self.initial_cwnd > self.max_cwnd {
            return WindowBoundsSnafu {
                message: format!(
                    "initial_cwnd ({}) outside [{}, {}]",
                    self.initial_cwnd, self.min_cwnd, self.max_cwnd
                ),
            }
            .fail();
        }
        if self.initial_ssthresh < self.min_cwnd {
            return WindowBoundsSnafu {
                message: format!(
                    "initial_ssthresh ({}) below min_cwnd ({})",
                    self.initial_ssthresh, self.min_cwnd
                ),
            }
            .fail();
        }
        Ok(())
    }

    /// The clamp bounds as used by the estimator.
    pub fn bounds(&self) -> WindowBounds {
        WindowBounds {
            min: self.min_cwnd,
            max: self.max_cwnd,
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            initial_cwnd: default_initial_cwnd(),
            initial_ssthresh: default_initial_ssthresh(),
            min_cwnd: default_min_cwnd(),
            max_cwnd: default_max_cwnd(),
        }
    }
}

/// Transform stage timing and fan-out limits.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransformConfig {
    /// Wait after an empty event-queue take, in milliseconds (default: 1000).
    #[serde(default = "default_empty_wait_ms")]
    pub empty_wait_ms: u64,
    /// Wait when no transform engine is registered yet (default: 3000).
    #[serde(default = "default_no_engine_wait_ms")]
    pub no_engine_wait_ms: u64,
    /// Upper clamp on the transform-chain fan-out multiplier applied to
    /// cwnd before estimation (default: 16).
    #[serde(default = "default_max_fanout")]
    pub max_fanout: usize,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            empty_wait_ms: default_empty_wait_ms(),
            no_engine_wait_ms: default_no_engine_wait_ms(),
            max_fanout: default_max_fanout(),
        }
    }
}

/// Push stage timing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PushConfig {
    /// Wait after an empty target-queue take, in milliseconds (default: 1000).
    #[serde(default = "default_empty_wait_ms")]
    pub empty_wait_ms: u64,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            empty_wait_ms: default_empty_wait_ms(),
        }
    }
}

/// Push executor sizing (per runner).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutorConfig {
    /// Concurrent sink calls per runner (default: 4).
    #[serde(default = "default_executor_workers")]
    pub workers: usize,
    /// Pending-batch queue slots per runner (default: 64).
    #[serde(default = "default_executor_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workers: default_executor_workers(),
            queue_capacity: default_executor_queue_capacity(),
        }
    }
}

/// Record queue sizing (per runner).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueueConfig {
    /// Inbound event queue capacity (default: 1024).
    #[serde(default = "default_queue_capacity")]
    pub event_capacity: usize,
    /// Transform-to-push target queue capacity (default: 1024).
    #[serde(default = "default_queue_capacity")]
    pub target_capacity: usize,
    /// How long a target-queue offer may block before overflowing to the
    /// error handler, in milliseconds (default: 1000).
    #[serde(default = "default_offer_timeout_ms")]
    pub offer_timeout_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            event_capacity: default_queue_capacity(),
            target_capacity: default_queue_capacity(),
            offer_timeout_ms: default_offer_timeout_ms(),
        }
    }
}

/// Shutdown behavior.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShutdownConfig {
    /// How long to wait for a worker to stop before abandoning it, in
    /// milliseconds (default: 5000).
    #[serde(default = "default_worker_join_timeout_ms")]
    pub worker_join_timeout_ms: u64,
    /// What happens to records still queued when a runner is deleted
    /// (default: dead_letter).
    #[serde(default)]
    pub drain_policy: DrainPolicy,
}

impl ShutdownConfig {
    /// Worker join timeout as a [`Duration`].
    pub fn worker_join_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_join_timeout_ms)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            worker_join_timeout_ms: default_worker_join_timeout_ms(),
            drain_policy: DrainPolicy::default(),
        }
    }
}

/// What to do with records still queued when their runner is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainPolicy {
    /// Route drained records to the error handler.
    #[default]
    DeadLetter,
    /// Drop drained records, logging the count.
    Discard,
}

/// Per-runner overrides for queue and executor sizing.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunnerTuning {
    pub event_queue_capacity: Option<usize>,
    pub target_queue_capacity: Option<usize>,
    pub executor_workers: Option<usize>,
    pub executor_queue_capacity: Option<usize>,
}

impl RunnerTuning {
    fn validate(&self, runner: &str) -> Result<(), ConfigError> {
        let zero = |v: Option<usize>| v == Some(0);
        if zero(self.event_queue_capacity) || zero(self.target_queue_capacity) {
            return ZeroQueueCapacitySnafu { queue: format!("runners.{runner}") }.fail();
        }
        if zero(self.executor_queue_capacity) {
            return ZeroQueueCapacitySnafu { queue: format!("runners.{runner}.executor") }.fail();
        }
        if self.executor_workers == Some(0) {
            return Err(ConfigError::ZeroExecutorWorkers);
        }
        Ok(())
    }
}

/// Resolved sizing for one runner after overrides.
#[derive(Debug, Clone, Copy)]
pub struct EffectiveTuning {
    pub event_queue_capacity: usize,
    pub target_queue_capacity: usize,
    pub executor_workers: usize,
    pub executor_queue_capacity: usize,
}

fn default_initial_cwnd() -> u32 {
    1
}

fn default_initial_ssthresh() -> u32 {
    64
}

fn default_min_cwnd() -> u32 {
    1
}

fn default_max_cwnd() -> u32 {
    1024
}

fn default_empty_wait_ms() -> u64 {
    1000
}

fn default_no_engine_wait_ms() -> u64 {
    3000
}

fn default_max_fanout() -> usize {
    16
}

fn default_executor_workers() -> usize {
    4
}

fn default_executor_queue_capacity() -> usize {
    64
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_offer_timeout_ms() -> u64 {
    1000
}

fn default_worker_join_timeout_ms() -> u64 {
    5000
}
