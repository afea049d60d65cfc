//! TCP-Reno-style window computation.

use tracing::trace;

use super::{EstimateMetrics, RateEstimator, RunnerMetrics, WindowBounds};

/// Fraction of executor-queue capacity below which the window is halved:
/// remaining ≤ capacity / PRESSURE_DIVISOR counts as downstream pressure.
const PRESSURE_DIVISOR: usize = 4;

/// The default estimator: slow start, congestion avoidance, multiplicative
/// decrease on error, with receiver-window and queue-pressure clamps.
#[derive(Debug, Clone, Copy)]
pub struct RenoEstimator {
    bounds: WindowBounds,
}

impl RenoEstimator {
    pub fn new(bounds: WindowBounds) -> Self {
        Self { bounds }
    }

    fn compute_success(&self, m: &EstimateMetrics) -> u32 {
        // Slow start doubles up to the threshold; past it, additive increase.
        let mut next = if m.cwnd < m.ssthresh {
            (m.cwnd.saturating_mul(2)).min(m.ssthresh)
        } else {
            m.cwnd.saturating_add(1)
        };

        // Downstream executor queue filling up is an early congestion signal.
        if m.queue_capacity > 0 && m.queue_remaining <= m.queue_capacity / PRESSURE_DIVISOR {
            next /= 2;
        }

        // Never outrun the receiving stage.
        if let Some(rwnd) = m.rwnd {
            next = next.min(rwnd);
        }

        self.bounds.clamp_cwnd(next)
    }
}

impl RateEstimator for RenoEstimator {
    fn compute(&self, m: EstimateMetrics) -> RunnerMetrics {
        if m.error {
            // Congestion event: collapse the window, halve the threshold.
            let ssthresh = self.bounds.clamp_ssthresh(m.cwnd / 2);
            return RunnerMetrics {
                runner: m.runner,
                stage: m.stage,
                cwnd: self.bounds.min,
                ssthresh,
            };
        }

        trace!(
            runner = %m.runner,
            stage = m.stage.as_str(),
            batch = m.batch_size,
            tps = m.tps(),
            "batch throughput observed"
        );

        let cwnd = self.compute_success(&m);
        RunnerMetrics {
            runner: m.runner,
            stage: m.stage,
            cwnd,
            ssthresh: self.bounds.clamp_ssthresh(m.ssthresh),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate::Stage;
    use crate::record::RunnerName;

    const BOUNDS: WindowBounds = WindowBounds { min: 1, max: 1024 };

    fn success(cwnd: u32, ssthresh: u32) -> EstimateMetrics {
        EstimateMetrics {
            runner: RunnerName::new("r1"),
            stage: Stage::Push,
            batch_size: cwnd as usize,
            cwnd,
            ssthresh,
            rwnd: None,
            start_timestamp_ms: 1_000,
            end_timestamp_ms: 1_050,
            queue_remaining: 64,
            queue_capacity: 64,
            error: false,
        }
    }

    #[test]
    fn test_slow_start_doubles_up_to_threshold() {
        let estimator = RenoEstimator::new(BOUNDS);

        let m = estimator.compute(success(1, 64));
        assert_eq!(m.cwnd, 2);

        let m = estimator.compute(success(40, 64));
        assert_eq!(m.cwnd, 64, "doubling is capped at ssthresh");
    }

    #[test]
    fn test_congestion_avoidance_adds_one() {
        let estimator = RenoEstimator::new(BOUNDS);
        let m = estimator.compute(success(64, 64));
        assert_eq!(m.cwnd, 65);
        assert_eq!(m.ssthresh, 64);
    }

    #[test]
    fn test_error_collapses_window_and_halves_threshold() {
        let estimator = RenoEstimator::new(BOUNDS);
        let m = estimator.compute(EstimateMetrics::for_error(
            RunnerName::new("r1"),
            Stage::Push,
            40,
            64,
        ));
        assert_eq!(m.cwnd, 1);
        assert_eq!(m.ssthresh, 20);
    }

    #[test]
    fn test_error_threshold_floors_at_min() {
        let estimator = RenoEstimator::new(BOUNDS);
        let m = estimator.compute(EstimateMetrics::for_error(
            RunnerName::new("r1"),
            Stage::Push,
            1,
            1,
        ));
        assert_eq!(m.cwnd, 1);
        assert_eq!(m.ssthresh, 1);
    }

    #[test]
    fn test_queue_pressure_halves_window() {
        let estimator = RenoEstimator::new(BOUNDS);
        let mut m = success(64, 64);
        m.queue_remaining = 16; // exactly 25% free
        let out = estimator.compute(m);
        assert_eq!(out.cwnd, 32, "65 proposed, halved by pressure");
    }

    #[test]
    fn test_rwnd_clamps_window() {
        let estimator = RenoEstimator::new(BOUNDS);
        let mut m = success(8, 64);
        m.stage = Stage::Transform;
        m.rwnd = Some(3);
        let out = estimator.compute(m);
        assert_eq!(out.cwnd, 3, "16 proposed, clamped to receiver window");
    }

    #[test]
    fn test_rwnd_above_proposal_is_ignored() {
        let estimator = RenoEstimator::new(BOUNDS);
        let mut m = success(8, 64);
        m.stage = Stage::Transform;
        m.rwnd = Some(512);
        let out = estimator.compute(m);
        assert_eq!(out.cwnd, 16);
    }

    #[test]
    fn test_window_stays_within_bounds() {
        let estimator = RenoEstimator::new(WindowBounds { min: 2, max: 16 });

        let grown = estimator.compute(success(16, 8));
        assert_eq!(grown.cwnd, 16, "additive increase clamped at max");

        let collapsed = estimator.compute(EstimateMetrics::for_error(
            RunnerName::new("r1"),
            Stage::Transform,
            16,
            8,
        ));
        assert_eq!(collapsed.cwnd, 2, "error collapse clamped at min");
        assert!(collapsed.ssthresh >= 2);
    }

    /// Six successful batches from cwnd=1, ssthresh=4 walk the canonical
    /// Reno trajectory: 1 → 2 → 4 → 5 → 6 → 7 → 8.
    #[test]
    fn test_slow_start_hands_over_to_congestion_avoidance() {
        let estimator = RenoEstimator::new(BOUNDS);
        let mut cwnd = 1;
        let ssthresh = 4;
        let mut seen = vec![cwnd];

        for _ in 0..6 {
            let m = estimator.compute(success(cwnd, ssthresh));
            cwnd = m.cwnd;
            seen.push(cwnd);
        }

        assert_eq!(seen, vec![1, 2, 4, 5, 6, 7, 8]);
    }

    /// The estimator is a pure function of its input.
    #[test]
    fn test_compute_is_deterministic() {
        let estimator = RenoEstimator::new(BOUNDS);
        let a = estimator.compute(success(13, 21));
        let b = estimator.compute(success(13, 21));
        assert_eq!(a, b);
    }
}
