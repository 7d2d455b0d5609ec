/// Tunables of the adaptive representation selector.
///
/// Defaults reflect conservative streaming-client behavior: adapt down fast,
/// up slow. Fields with a `low_latency_` twin are picked per context
/// depending on its low-latency flag.
#[derive(Clone, Debug)]
pub struct AbrConfig {
    /// Buffer gap (seconds) at or below which starvation mode is entered.
    pub starvation_gap: f64,
    /// Buffer gap (seconds) at or above which starvation mode is left.
    /// Kept above `starvation_gap` to prevent flapping.
    pub out_of_starvation_gap: f64,
    pub low_latency_starvation_gap: f64,
    pub low_latency_out_of_starvation_gap: f64,
    /// Within this many seconds of the end of content, starvation mode is
    /// never entered (and is force-exited).
    pub starvation_duration_delta: f64,
    /// Multiplier applied to the bandwidth estimate while starved.
    pub starvation_factor: f64,
    /// Multiplier applied to the bandwidth estimate in regular conditions.
    pub regular_factor: f64,
    pub low_latency_starvation_factor: f64,
    pub low_latency_regular_factor: f64,
    /// Buffer gap (seconds) above which buffer-based estimates are allowed.
    pub buffer_based_enable_gap: f64,
    /// Buffer gap (seconds) at or below which buffer-based estimates are
    /// disabled again. Together with `buffer_based_enable_gap` this forms a
    /// hysteresis band.
    pub buffer_based_disable_gap: f64,
    /// Guess-based choosing is only consulted when playing within this many
    /// seconds of the live edge of dynamic low-latency content.
    pub near_live_window: f64,
}

impl Default for AbrConfig {
    fn default() -> Self {
        Self {
            starvation_gap: 5.0,
            out_of_starvation_gap: 7.0,
            low_latency_starvation_gap: 0.5,
            low_latency_out_of_starvation_gap: 1.0,
            starvation_duration_delta: 0.1,
            starvation_factor: 0.72,
            regular_factor: 0.8,
            low_latency_starvation_factor: 0.72,
            low_latency_regular_factor: 0.8,
            buffer_based_enable_gap: 10.0,
            buffer_based_disable_gap: 5.0,
            near_live_window: 40.0,
        }
    }
}

impl AbrConfig {
    pub(crate) fn starvation_gap_for(&self, low_latency: bool) -> f64 {
        if low_latency {
            self.low_latency_starvation_gap
        } else {
            self.starvation_gap
        }
    }

    pub(crate) fn out_of_starvation_gap_for(&self, low_latency: bool) -> f64 {
        if low_latency {
            self.low_latency_out_of_starvation_gap
        } else {
            self.out_of_starvation_gap
        }
    }

    pub(crate) fn starvation_factor_for(&self, low_latency: bool) -> f64 {
        if low_latency {
            self.low_latency_starvation_factor
        } else {
            self.starvation_factor
        }
    }

    pub(crate) fn regular_factor_for(&self, low_latency: bool) -> f64 {
        if low_latency {
            self.low_latency_regular_factor
        } else {
            self.regular_factor
        }
    }
}
