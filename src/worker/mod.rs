//! Long-running per-runner stage workers.
//!
//! Each runner owns one [`TransformWorker`] and one [`PushWorker`]. A
//! worker is a plain loop on its own task: it re-reads its window metrics
//! and bundle through the context every iteration, so lifecycle changes
//! take effect at the next loop boundary, and it parks on cancellable
//! waits so shutdown interrupts any idle period.

mod push;
mod transform;

pub(crate) use push::PushWorker;
pub(crate) use transform::TransformWorker;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::context::CirculatorContext;
use crate::handler::ErrorHandler;
use crate::offset::OffsetManager;
use crate::rate::RateEstimator;

/// Wait before re-probing when a runner's metrics are gone (removed or
/// not yet installed).
pub(crate) const IDLE_BACKOFF: Duration = Duration::from_millis(100);

/// Shared dependencies of both stage workers.
#[derive(Clone)]
pub(crate) struct WorkerDeps {
    pub ctx: Arc<CirculatorContext>,
    pub estimator: Arc<dyn RateEstimator>,
    pub offsets: Arc<dyn OffsetManager>,
    pub errors: Arc<dyn ErrorHandler>,
}

/// Sleep for `wait`, waking early on shutdown. Returns false when the
/// worker should exit.
pub(crate) async fn idle(shutdown: &CancellationToken, wait: Duration) -> bool {
    shutdown
        .run_until_cancelled(tokio::time::sleep(wait))
        .await
        .is_some()
}
