use tracing::debug;

use crate::ewma::Ewma;
use crate::types::{MaintainabilityScore, Representation, ScoreConfidence};

/// History kept for the Representation currently being loaded.
#[derive(Clone, Debug)]
struct CurrentScore {
    representation: Representation,
    ewma: Ewma,
    loaded_segments: u32,
    loaded_duration: f64,
}

/// Tracks how "maintainable" the currently-loading Representation is: the
/// EWMA of segment-duration over request-duration. A score above `1.0` means
/// segments download faster than they play.
///
/// Only one Representation is tracked at a time; switching Representations
/// discards the previous history.
#[derive(Clone, Debug, Default)]
pub struct RepresentationScoreCalculator {
    current: Option<CurrentScore>,
    last_stable: Option<Representation>,
}

impl RepresentationScoreCalculator {
    const SCORE_HALF_LIFE: f64 = 5.0;
    const HIGH_CONFIDENCE_SEGMENTS: u32 = 5;
    const HIGH_CONFIDENCE_DURATION_SECS: f64 = 10.0;

    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one completed segment request for `representation`.
    pub fn add_sample(
        &mut self,
        representation: &Representation,
        request_duration_secs: f64,
        segment_duration_secs: f64,
    ) {
        if request_duration_secs <= 0.0 || segment_duration_secs <= 0.0 {
            return;
        }
        let ratio = segment_duration_secs / request_duration_secs;

        let same_representation = self
            .current
            .as_ref()
            .is_some_and(|c| c.representation.id == representation.id);
        if !same_representation {
            self.current = Some(CurrentScore {
                representation: representation.clone(),
                ewma: Ewma::new(Self::SCORE_HALF_LIFE),
                loaded_segments: 0,
                loaded_duration: 0.0,
            });
        }
        let current = self
            .current
            .as_mut()
            .expect("current score initialized above");
        current.ewma.add_sample(request_duration_secs, ratio);
        current.loaded_segments += 1;
        current.loaded_duration += segment_duration_secs;

        let estimate = current.ewma.estimate();
        let differs_from_stable = self
            .last_stable
            .as_ref()
            .is_none_or(|s| s.id != representation.id);
        if estimate > 1.0 && differs_from_stable {
            debug!(
                id = %representation.id,
                bitrate = representation.bitrate,
                estimate,
                "ABR score: new last-stable representation"
            );
            self.last_stable = Some(representation.clone());
        }
    }

    /// Score for `representation`, or `None` if it is not the one currently
    /// tracked.
    pub fn get_estimate(&self, representation: &Representation) -> Option<MaintainabilityScore> {
        let current = self.current.as_ref()?;
        if current.representation.id != representation.id || !current.ewma.has_samples() {
            return None;
        }
        let confidence = if current.loaded_segments >= Self::HIGH_CONFIDENCE_SEGMENTS
            && current.loaded_duration >= Self::HIGH_CONFIDENCE_DURATION_SECS
        {
            ScoreConfidence::High
        } else {
            ScoreConfidence::Low
        };
        Some(MaintainabilityScore {
            score: current.ewma.estimate(),
            confidence,
        })
    }

    /// Last Representation known to have sustained a score above `1.0`.
    pub fn last_stable_representation(&self) -> Option<&Representation> {
        self.last_stable.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn rep(id: &str, bitrate: u32) -> Representation {
        Representation::new(id.to_owned(), bitrate)
    }

    #[test]
    fn no_estimate_before_samples() {
        let calc = RepresentationScoreCalculator::new();
        assert_eq!(calc.get_estimate(&rep("a", 100)), None);
    }

    #[test]
    fn estimate_only_for_tracked_representation() {
        let mut calc = RepresentationScoreCalculator::new();
        calc.add_sample(&rep("a", 100), 2.0, 4.0);
        assert!(calc.get_estimate(&rep("a", 100)).is_some());
        assert_eq!(calc.get_estimate(&rep("b", 200)), None);
    }

    #[test]
    fn switching_representation_discards_history() {
        let mut calc = RepresentationScoreCalculator::new();
        for _ in 0..6 {
            calc.add_sample(&rep("a", 100), 2.0, 4.0);
        }
        calc.add_sample(&rep("b", 200), 2.0, 4.0);
        let score = calc.get_estimate(&rep("b", 200)).unwrap();
        assert_eq!(score.confidence, ScoreConfidence::Low, "fresh EWMA");
        assert_eq!(calc.get_estimate(&rep("a", 100)), None);
    }

    #[rstest]
    #[case(4, 12.0, ScoreConfidence::Low)] // too few segments
    #[case(5, 8.0, ScoreConfidence::Low)] // too little duration
    #[case(5, 10.0, ScoreConfidence::High)]
    fn confidence_requires_segments_and_duration(
        #[case] segments: u32,
        #[case] total_duration: f64,
        #[case] expected: ScoreConfidence,
    ) {
        let mut calc = RepresentationScoreCalculator::new();
        let r = rep("a", 100);
        let seg_duration = total_duration / f64::from(segments);
        for _ in 0..segments {
            calc.add_sample(&r, seg_duration / 2.0, seg_duration);
        }
        assert_eq!(calc.get_estimate(&r).unwrap().confidence, expected);
    }

    #[test]
    fn last_stable_tracks_score_above_one() {
        let mut calc = RepresentationScoreCalculator::new();
        let good = rep("good", 200);
        let bad = rep("bad", 400);

        calc.add_sample(&good, 1.0, 4.0);
        assert_eq!(calc.last_stable_representation(), Some(&good));

        // A representation that downloads slower than realtime never becomes
        // stable; the previous one is remembered.
        calc.add_sample(&bad, 8.0, 4.0);
        assert_eq!(calc.last_stable_representation(), Some(&good));
    }

    #[test]
    fn score_reflects_duration_ratio() {
        let mut calc = RepresentationScoreCalculator::new();
        let r = rep("a", 100);
        for _ in 0..10 {
            calc.add_sample(&r, 2.0, 4.0);
        }
        let score = calc.get_estimate(&r).unwrap().score;
        assert!((score - 2.0).abs() < 0.05, "score {score} should be ~2.0");
    }
}
