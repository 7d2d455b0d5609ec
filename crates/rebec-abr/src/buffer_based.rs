use std::time::Duration;

use tracing::error;
use web_time::Instant;

use crate::types::{MaintainabilityScore, ScoreConfidence};

/// Input of one buffer-based estimation cycle.
#[derive(Clone, Copy, Debug)]
pub struct BufferBasedObservation {
    /// Seconds of media buffered ahead of the playback position.
    pub buffer_gap: f64,
    /// Bitrate of the Representation currently being loaded, if any.
    pub current_bitrate: Option<u32>,
    /// Maintainability score of that Representation, if tracked.
    pub current_score: Option<MaintainabilityScore>,
    /// Playback rate. `0.0` (paused/frozen) leaves the score unscaled: a
    /// stopped clock drains nothing and must not penalize the score.
    pub speed: f64,
}

/// BOLA-derived chooser mapping buffer depth to a sustainable bitrate.
///
/// For each bitrate a minimum buffer level is precomputed from a fixed
/// monotonic mapping; playback below the current bitrate's level (or a bad
/// high-confidence score) forces a downgrade, and raising again is blocked
/// for an exponentially-backed-off window to dampen oscillation.
#[derive(Clone, Debug)]
pub struct BufferBasedChooser {
    /// Ascending, duplicates allowed.
    bitrates: Vec<u32>,
    /// Minimum buffer level per bitrate, safety margin included.
    buffer_levels: Vec<f64>,
    block_raise_delay: Duration,
    last_downgrade_at: Option<Instant>,
}

impl BufferBasedChooser {
    /// Safety margin added on top of every computed buffer level.
    const LEVEL_MARGIN_SECS: f64 = 4.0;
    /// Score below which an upgrade is never attempted.
    const UPGRADE_SCORE_THRESHOLD: f64 = 1.15;
    /// A downgrade within `block_raise_delay + this` of the previous one is
    /// considered part of the same instability episode.
    const REPEAT_DOWNGRADE_WINDOW: Duration = Duration::from_secs(9);
    const MIN_BLOCK_RAISE_DELAY: Duration = Duration::from_secs(6);
    const MAX_BLOCK_RAISE_DELAY: Duration = Duration::from_secs(15);

    pub fn new(mut bitrates: Vec<u32>) -> Self {
        bitrates.sort_unstable();
        let buffer_levels = compute_buffer_levels(&bitrates)
            .into_iter()
            .map(|level| level + Self::LEVEL_MARGIN_SECS)
            .collect();
        Self {
            bitrates,
            buffer_levels,
            block_raise_delay: Self::MIN_BLOCK_RAISE_DELAY,
            last_downgrade_at: None,
        }
    }

    /// Bitrate suggested for the given observation.
    pub fn get_estimate(&mut self, observation: &BufferBasedObservation, now: Instant) -> u32 {
        let Some(lowest) = self.bitrates.first().copied() else {
            return 0;
        };
        let Some(current_bitrate) = observation.current_bitrate else {
            return lowest;
        };
        // Last match wins for duplicated bitrates.
        let Some(current_index) = self
            .bitrates
            .iter()
            .rposition(|b| *b == current_bitrate)
        else {
            error!(
                current_bitrate,
                "ABR buffer-based: current bitrate absent from level table"
            );
            return lowest;
        };

        let scaled_score = observation.current_score.map(|s| {
            if observation.speed == 0.0 {
                s.score
            } else {
                s.score / observation.speed
            }
        });
        let confidence = observation.current_score.map(|s| s.confidence);

        let unsustainable_score = scaled_score.is_some_and(|s| s < 1.0)
            && confidence == Some(ScoreConfidence::High);
        if observation.buffer_gap < self.buffer_levels[current_index] || unsustainable_score {
            self.note_downgrade(now);
            let new_index = (0..current_index)
                .rev()
                .find(|i| self.buffer_levels[*i] <= observation.buffer_gap)
                .unwrap_or(0);
            return self.bitrates[new_index];
        }

        let raise_blocked = self
            .last_downgrade_at
            .is_some_and(|t| now.duration_since(t) < self.block_raise_delay);
        let score_allows_raise = scaled_score.is_some_and(|s| s >= Self::UPGRADE_SCORE_THRESHOLD)
            && confidence == Some(ScoreConfidence::High);
        if raise_blocked || !score_allows_raise {
            return current_bitrate;
        }

        let current_level = self.buffer_levels[current_index];
        let next = (current_index + 1..self.bitrates.len())
            .find(|i| self.buffer_levels[*i] > current_level);
        match next {
            Some(i) if observation.buffer_gap > self.buffer_levels[i] => self.bitrates[i],
            _ => current_bitrate,
        }
    }

    fn note_downgrade(&mut self, now: Instant) {
        let repeat = self.last_downgrade_at.is_some_and(|t| {
            now.duration_since(t) < self.block_raise_delay + Self::REPEAT_DOWNGRADE_WINDOW
        });
        self.block_raise_delay = if repeat {
            (self.block_raise_delay * 2).min(Self::MAX_BLOCK_RAISE_DELAY)
        } else {
            (self.block_raise_delay / 2).max(Self::MIN_BLOCK_RAISE_DELAY)
        };
        self.last_downgrade_at = Some(now);
    }
}

/// BOLA buffer-level mapping: minimum buffer depth at which each bitrate in
/// an ascending list becomes the utility-optimal choice.
///
/// Degenerate inputs (fewer than two distinct bitrates) map everything to
/// level zero.
fn compute_buffer_levels(bitrates: &[u32]) -> Vec<f64> {
    if bitrates.len() < 2 || bitrates.first() == bitrates.last() {
        return vec![0.0; bitrates.len()];
    }
    let base = f64::from(bitrates[0]);
    let utilities: Vec<f64> = bitrates
        .iter()
        .map(|b| (f64::from(*b) / base).ln() + 1.0)
        .collect();
    let gp = (utilities[utilities.len() - 1] - 1.0) / (bitrates.len() as f64 * 2.0 + 10.0);
    let vp = 1.0 / gp;

    let mut levels = Vec::with_capacity(bitrates.len());
    levels.push(0.0);
    for i in 1..bitrates.len() {
        let (bi, bp) = (f64::from(bitrates[i]), f64::from(bitrates[i - 1]));
        if bitrates[i] == bitrates[i - 1] {
            levels.push(levels[i - 1]);
            continue;
        }
        let level = vp * (gp + (bi * utilities[i - 1] - bp * utilities[i]) / (bi - bp));
        levels.push(level);
    }
    levels
}
