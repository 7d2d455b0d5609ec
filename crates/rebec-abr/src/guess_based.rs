use std::time::Duration;

use tracing::debug;
use web_time::Instant;

use crate::last_estimate::{AlgorithmType, LastEstimate};
use crate::network::estimate_request_bandwidth;
use crate::types::{
    MaintainabilityScore, PlaybackObservation, Representation, RequestInfo, ScoreConfidence,
};

/// Opportunistic "step and verify" chooser for constrained live/low-latency
/// playback.
///
/// When the safe algorithms have settled, it tries one Representation step
/// above their choice and watches whether the network keeps up; a failed
/// guess is rolled back and blocks further guessing for an exponentially
/// growing cooldown.
#[derive(Clone, Debug, Default)]
pub struct GuessBasedChooser {
    consecutive_wrong_guesses: u32,
    block_guesses_until: Option<Instant>,
    last_maintainable_bitrate: Option<u32>,
}

impl GuessBasedChooser {
    /// Minimum buffer ahead before a guess is attempted.
    const GUESS_MIN_BUFFER_GAP: f64 = 2.5;
    /// Scaled score required to step up.
    const GUESS_SCORE_THRESHOLD: f64 = 1.01;
    /// Cooldown grows by this much per consecutive wrong guess.
    const COOLDOWN_STEP: Duration = Duration::from_secs(15);
    const MAX_COOLDOWN: Duration = Duration::from_secs(120);
    /// Extra wall time a segment request may take beyond its media duration
    /// before the guess is considered failed.
    const REQUEST_BUDGET_FACTOR: f64 = 1.3;
    const REQUEST_BUDGET_PADDING_SECS: f64 = 1.0;

    pub fn new() -> Self {
        Self::default()
    }

    /// Speculative Representation to load, or `None` when guessing stands
    /// down and the regular arbitration result should be used.
    #[allow(clippy::too_many_arguments)]
    pub fn get_guess(
        &mut self,
        representations: &[Representation],
        observation: &PlaybackObservation,
        current_representation: &Representation,
        incoming_best_bitrate: u32,
        requests: &[&RequestInfo],
        score: Option<MaintainabilityScore>,
        last_estimate: Option<&LastEstimate>,
        now: Instant,
    ) -> Option<Representation> {
        let Some(prev) = last_estimate else {
            return None;
        };
        let last_chosen = &prev.representation;

        if incoming_best_bitrate > last_chosen.bitrate {
            // Another algorithm is already proposing better: the guess loop
            // has nothing to add, and a surpassed guess counts as proven.
            if prev.algorithm == AlgorithmType::GuessBased {
                self.last_maintainable_bitrate = Some(last_chosen.bitrate);
                self.consecutive_wrong_guesses = 0;
            }
            return None;
        }

        if prev.algorithm != AlgorithmType::GuessBased {
            // Not currently guessing. Starting one needs a score to verify
            // against later.
            let score = score?;
            if self.can_guess_higher(observation, score, now) {
                return next_higher(representations, current_representation);
            }
            return None;
        }

        // Currently guessing: `last_chosen` is the active guess.
        if self.is_guess_validated(last_chosen, incoming_best_bitrate, score) {
            self.last_maintainable_bitrate = Some(last_chosen.bitrate);
            self.consecutive_wrong_guesses = 0;
        }

        if current_representation.id != last_chosen.id {
            // The guess has not been reached yet; keep proposing it.
            return Some(last_chosen.clone());
        }

        if self.should_stop_guess(current_representation, score, observation.buffer_gap, requests, now)
        {
            self.consecutive_wrong_guesses += 1;
            let cooldown =
                (Self::COOLDOWN_STEP * self.consecutive_wrong_guesses).min(Self::MAX_COOLDOWN);
            self.block_guesses_until = Some(now + cooldown);
            debug!(
                wrong_guesses = self.consecutive_wrong_guesses,
                cooldown_secs = cooldown.as_secs(),
                guessed_bitrate = current_representation.bitrate,
                "ABR guess: aborting unsustainable guess"
            );
            return Some(next_lower(representations, current_representation));
        }

        match score {
            Some(score) if self.can_guess_higher(observation, score, now) => {
                next_higher(representations, current_representation)
                    .or_else(|| Some(current_representation.clone()))
            }
            _ => Some(current_representation.clone()),
        }
    }

    fn can_guess_higher(
        &self,
        observation: &PlaybackObservation,
        score: MaintainabilityScore,
        now: Instant,
    ) -> bool {
        let in_cooldown = self.block_guesses_until.is_some_and(|until| now < until);
        observation.buffer_gap >= Self::GUESS_MIN_BUFFER_GAP
            && !in_cooldown
            && score.confidence == ScoreConfidence::High
            && score.score / observation.speed > Self::GUESS_SCORE_THRESHOLD
    }

    fn is_guess_validated(
        &self,
        guess: &Representation,
        incoming_best_bitrate: u32,
        score: Option<MaintainabilityScore>,
    ) -> bool {
        if score.is_some_and(|s| s.confidence == ScoreConfidence::High && s.score > 1.5) {
            return true;
        }
        incoming_best_bitrate >= guess.bitrate
            && self
                .last_maintainable_bitrate
                .is_none_or(|b| b < guess.bitrate)
    }

    fn should_stop_guess(
        &self,
        guessed: &Representation,
        score: Option<MaintainabilityScore>,
        buffer_gap: f64,
        requests: &[&RequestInfo],
        now: Instant,
    ) -> bool {
        if score.is_some_and(|s| s.score < 1.01) {
            return true;
        }
        if buffer_gap < 0.6 && score.is_none_or(|s| s.score < 1.2) {
            return true;
        }
        for request in requests {
            let content = &request.content;
            if content.segment.is_init || content.representation.id != guessed.id {
                continue;
            }
            let elapsed = now
                .saturating_duration_since(request.request_timestamp)
                .as_secs_f64();
            let budget = content.segment.duration * Self::REQUEST_BUDGET_FACTOR
                + Self::REQUEST_BUDGET_PADDING_SECS;
            if elapsed > budget {
                return true;
            }
            if let Some(bandwidth) = estimate_request_bandwidth(request) {
                if bandwidth < f64::from(guessed.bitrate) * 0.8 {
                    return true;
                }
            }
        }
        false
    }
}

/// First Representation strictly above `current` in bitrate, in an
/// ascending-sorted pool.
fn next_higher(
    representations: &[Representation],
    current: &Representation,
) -> Option<Representation> {
    representations
        .iter()
        .find(|r| r.bitrate > current.bitrate)
        .cloned()
}

/// Closest Representation strictly below `current` in bitrate; `current`
/// itself when it is already the lowest.
fn next_lower(representations: &[Representation], current: &Representation) -> Representation {
    representations
        .iter()
        .rev()
        .find(|r| r.bitrate < current.bitrate)
        .cloned()
        .unwrap_or_else(|| current.clone())
}
