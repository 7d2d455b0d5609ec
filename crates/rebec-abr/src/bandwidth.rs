use std::sync::Arc;

use parking_lot::Mutex;

use crate::ewma::Ewma;

/// Conservative bandwidth estimator over observed request throughput.
///
/// Two EWMAs run in parallel: a fast one that reacts quickly to drops and a
/// slow one that smooths recoveries. The reported estimate is the minimum of
/// the two, so the engine adapts down fast and up slow.
#[derive(Clone, Debug)]
pub struct BandwidthEstimator {
    fast_ewma: Ewma,
    slow_ewma: Ewma,
    bytes_sampled: u64,
}

impl BandwidthEstimator {
    const FAST_HALF_LIFE_SECS: f64 = 2.0;
    const SLOW_HALF_LIFE_SECS: f64 = 10.0;
    /// Responses smaller than this are dominated by connection overhead and
    /// would only add noise.
    const MIN_CHUNK_BYTES: u64 = 16_000;
    /// No estimate is reported before this many bytes have been sampled.
    const MIN_TOTAL_BYTES: u64 = 150_000;
    const MIN_DURATION_MS: f64 = 0.5;

    pub fn new() -> Self {
        Self {
            fast_ewma: Ewma::new(Self::FAST_HALF_LIFE_SECS),
            slow_ewma: Ewma::new(Self::SLOW_HALF_LIFE_SECS),
            bytes_sampled: 0,
        }
    }

    /// Feed one completed request: `duration_ms` wall time, `bytes` received.
    pub fn add_sample(&mut self, duration_ms: f64, bytes: u64) {
        if bytes < Self::MIN_CHUNK_BYTES {
            return;
        }
        let duration_ms = duration_ms.max(Self::MIN_DURATION_MS);
        let bandwidth = bytes as f64 * 8000.0 / duration_ms;
        let weight = duration_ms / 1000.0;
        self.fast_ewma.add_sample(weight, bandwidth);
        self.slow_ewma.add_sample(weight, bandwidth);
        self.bytes_sampled = self.bytes_sampled.saturating_add(bytes);
    }

    /// Current estimate in bits per second; `None` until enough data has
    /// been sampled.
    pub fn get_estimate(&self) -> Option<f64> {
        if self.bytes_sampled < Self::MIN_TOTAL_BYTES {
            return None;
        }
        Some(
            self.fast_ewma
                .estimate()
                .min(self.slow_ewma.estimate()),
        )
    }

    /// Forget all history. Used after an emergency starvation re-estimate:
    /// samples taken before an active congestion event are no longer
    /// trustworthy.
    pub fn reset(&mut self) {
        self.fast_ewma = Ewma::new(Self::FAST_HALF_LIFE_SECS);
        self.slow_ewma = Ewma::new(Self::SLOW_HALF_LIFE_SECS);
        self.bytes_sampled = 0;
    }
}

impl Default for BandwidthEstimator {
    fn default() -> Self {
        Self::new()
    }
}

/// Bandwidth is a device/network property, not a per-content one: one
/// estimator per media type is shared across selection contexts and survives
/// Period changes.
pub type SharedBandwidthEstimator = Arc<Mutex<BandwidthEstimator>>;

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn no_estimate_below_byte_threshold() {
        let mut est = BandwidthEstimator::new();
        est.add_sample(1000.0, 100_000);
        assert_eq!(est.get_estimate(), None, "100kB sampled is below gate");
        est.add_sample(1000.0, 100_000);
        assert!(est.get_estimate().is_some(), "200kB sampled crosses gate");
    }

    #[test]
    fn tiny_chunks_are_ignored() {
        let mut est = BandwidthEstimator::new();
        for _ in 0..100 {
            est.add_sample(10.0, 10_000);
        }
        assert_eq!(est.get_estimate(), None);
    }

    #[test]
    fn estimate_is_min_of_both_ewmas() {
        let mut est = BandwidthEstimator::new();
        // Stable phase then a sharp drop: fast EWMA falls below slow.
        for _ in 0..10 {
            est.add_sample(1000.0, 1_000_000);
        }
        for _ in 0..3 {
            est.add_sample(1000.0, 100_000);
        }
        let reported = est.get_estimate().unwrap();
        assert!(reported <= est.fast_ewma.estimate());
        assert!(reported <= est.slow_ewma.estimate());
    }

    #[rstest]
    #[case(1000.0, 500_000, 4_000_000.0)]
    #[case(500.0, 250_000, 4_000_000.0)]
    #[case(2000.0, 2_000_000, 8_000_000.0)]
    fn single_rate_converges(
        #[case] duration_ms: f64,
        #[case] bytes: u64,
        #[case] expected_bps: f64,
    ) {
        let mut est = BandwidthEstimator::new();
        for _ in 0..20 {
            est.add_sample(duration_ms, bytes);
        }
        let got = est.get_estimate().unwrap();
        assert!(
            (got - expected_bps).abs() / expected_bps < 0.05,
            "expected ~{expected_bps}, got {got}"
        );
    }

    #[test]
    fn reset_clears_history_and_gate() {
        let mut est = BandwidthEstimator::new();
        for _ in 0..5 {
            est.add_sample(1000.0, 500_000);
        }
        assert!(est.get_estimate().is_some());
        est.reset();
        assert_eq!(est.get_estimate(), None);
    }
}
