/// Exponentially-weighted moving average with half-life parametrization.
///
/// Samples carry an explicit weight (typically the duration they cover in
/// seconds); the estimate is corrected for the startup bias of an empty
/// average.
#[derive(Clone, Debug)]
pub(crate) struct Ewma {
    alpha: f64,
    last_estimate: f64,
    total_weight: f64,
}

impl Ewma {
    pub(crate) fn new(half_life: f64) -> Self {
        Self {
            alpha: f64::exp(0.5_f64.ln() / half_life.max(0.001)),
            last_estimate: 0.0,
            total_weight: 0.0,
        }
    }

    pub(crate) fn add_sample(&mut self, weight: f64, value: f64) {
        let adj_alpha = self.alpha.powf(weight.max(0.0));
        self.last_estimate = value * (1.0 - adj_alpha) + adj_alpha * self.last_estimate;
        self.total_weight += weight.max(0.0);
    }

    /// Bias-corrected estimate; `0.0` before any sample.
    pub(crate) fn estimate(&self) -> f64 {
        if self.total_weight <= 0.0 {
            0.0
        } else {
            let zero_factor = 1.0 - self.alpha.powf(self.total_weight);
            self.last_estimate / zero_factor.max(1e-6)
        }
    }

    pub(crate) fn has_samples(&self) -> bool {
        self.total_weight > 0.0
    }
}
