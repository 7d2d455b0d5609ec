use tracing::{debug, info};
use web_time::Instant;

use crate::bandwidth::BandwidthEstimator;
use crate::config::AbrConfig;
use crate::ewma::Ewma;
use crate::types::{PlaybackObservation, ProgressSample, Representation, RequestInfo};

/// Output of one bandwidth analysis cycle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NetworkEstimate {
    /// Raw bandwidth estimate in bits per second, when one exists.
    pub bandwidth_estimate: Option<f64>,
    /// Bitrate ceiling the bandwidth-based algorithm should select under.
    pub bitrate_chosen: f64,
}

/// Turns playback state, pending requests and the long-term bandwidth
/// estimate into a bitrate ceiling.
///
/// Carries a hysteretic starvation-mode state machine: when the buffer is
/// critically low the analyzer stops trusting long-term history and attempts
/// an emergency re-estimate from the progress of the single request the
/// player is waiting on.
#[derive(Clone, Debug)]
pub struct NetworkAnalyzer {
    config: AbrConfig,
    low_latency: bool,
    initial_bitrate: f64,
    in_starvation_mode: bool,
}

impl NetworkAnalyzer {
    /// Predicted rebuffering beyond this triggers an emergency estimate.
    const EMERGENCY_REBUFFER_SECS: f64 = 2.0;
    /// Hardest reduction applied to the current bitrate when a request
    /// overruns without usable progress data.
    const OVERRUN_REDUCTION_CAP: f64 = 0.7;

    pub fn new(initial_bitrate: f64, low_latency: bool, config: AbrConfig) -> Self {
        Self {
            config,
            low_latency,
            initial_bitrate,
            in_starvation_mode: false,
        }
    }

    pub fn in_starvation_mode(&self) -> bool {
        self.in_starvation_mode
    }

    /// Produce the bitrate ceiling for the current cycle.
    ///
    /// May reset `estimator` when an emergency starvation re-estimate fires,
    /// since history predating an active congestion event is stale.
    pub fn get_bandwidth_estimate(
        &mut self,
        observation: &PlaybackObservation,
        estimator: &mut BandwidthEstimator,
        current_representation: Option<&Representation>,
        requests: &[&RequestInfo],
        last_estimated_bitrate: Option<f64>,
        now: Instant,
    ) -> NetworkEstimate {
        self.update_starvation_mode(observation);

        if self.in_starvation_mode {
            if let Some(emergency) = self.estimate_starvation_mode_bitrate(
                observation,
                current_representation,
                requests,
                last_estimated_bitrate,
                now,
            ) {
                info!(
                    bandwidth = emergency,
                    "ABR network: emergency estimate, resetting bandwidth history"
                );
                estimator.reset();
                return NetworkEstimate {
                    bandwidth_estimate: Some(emergency),
                    bitrate_chosen: scale_for_speed(emergency, observation.speed),
                };
            }
        }

        let factor = if self.in_starvation_mode {
            self.config.starvation_factor_for(self.low_latency)
        } else {
            self.config.regular_factor_for(self.low_latency)
        };
        let bandwidth_estimate = estimator.get_estimate();
        let bitrate_chosen = match (bandwidth_estimate, last_estimated_bitrate) {
            (Some(estimate), _) => estimate * factor,
            (None, Some(last)) => last * factor,
            (None, None) => self.initial_bitrate,
        };
        NetworkEstimate {
            bandwidth_estimate,
            bitrate_chosen: scale_for_speed(bitrate_chosen, observation.speed),
        }
    }

    /// Whether switching to `bitrate` should preempt in-flight requests.
    pub fn is_urgent(
        &self,
        bitrate: f64,
        current_representation: Option<&Representation>,
        requests: &[&RequestInfo],
        observation: &PlaybackObservation,
        now: Instant,
    ) -> bool {
        let Some(current) = current_representation else {
            return true;
        };
        let current_bitrate = f64::from(current.bitrate);
        if bitrate == current_bitrate {
            return false;
        }
        if bitrate > current_bitrate {
            // Don't additionally stress the network while starved.
            return !self.in_starvation_mode;
        }
        self.should_directly_switch_to_low_bitrate(observation, requests, now)
    }

    fn update_starvation_mode(&mut self, observation: &PlaybackObservation) {
        let gap = observation.buffer_gap;
        let delta = self.config.starvation_duration_delta;
        // End of content is whichever bound comes first: the declared
        // duration or the reachable edge.
        let content_end = observation.maximum_position.min(observation.duration);
        let remaining_content = content_end - observation.position.wanted();
        if self.in_starvation_mode {
            if gap >= self.config.out_of_starvation_gap_for(self.low_latency)
                || gap + delta > remaining_content
            {
                info!("ABR network: leaving starvation mode");
                self.in_starvation_mode = false;
            }
        } else if gap.is_finite()
            && gap <= self.config.starvation_gap_for(self.low_latency)
            && gap + delta < remaining_content
        {
            info!(buffer_gap = gap, "ABR network: entering starvation mode");
            self.in_starvation_mode = true;
        }
    }

    /// Emergency bandwidth estimate from the single pending request covering
    /// the next needed position. `None` when conditions are too ambiguous to
    /// act on.
    fn estimate_starvation_mode_bitrate(
        &self,
        observation: &PlaybackObservation,
        current_representation: Option<&Representation>,
        requests: &[&RequestInfo],
        last_estimated_bitrate: Option<f64>,
        now: Instant,
    ) -> Option<f64> {
        let next_needed_position = observation.position.wanted() + observation.buffer_gap;
        let concerned = concerned_requests(requests, next_needed_position);
        // Zero or several matching requests: too ambiguous.
        let [request] = concerned.as_slice() else {
            return None;
        };

        if let (Some(last_progress), Some(bandwidth)) =
            (request.progress.last(), estimate_request_bandwidth(request))
        {
            if let Some(remaining_time) = estimate_remaining_time(last_progress, bandwidth) {
                let progress_age =
                    now.saturating_duration_since(last_progress.timestamp).as_secs_f64();
                // Only trust the prediction while progress is still fresh
                // relative to it.
                if progress_age <= remaining_time {
                    let expected_rebuffering =
                        remaining_time - observation.buffer_gap / observation.speed;
                    if expected_rebuffering > Self::EMERGENCY_REBUFFER_SECS {
                        return Some(bandwidth);
                    }
                }
            }
        }

        // No usable progress signal: fall back to request overrun detection.
        let segment_duration = request.content.segment.duration;
        let elapsed = now
            .saturating_duration_since(request.request_timestamp)
            .as_secs_f64();
        let reasonable_elapsed =
            elapsed <= (segment_duration * 1.5 + 2.0) / observation.speed;
        let current = current_representation?;
        if reasonable_elapsed {
            return None;
        }
        let reduced = f64::from(current.bitrate)
            * Self::OVERRUN_REDUCTION_CAP.min(segment_duration / elapsed);
        // Only act when this is more pessimistic than what we already had.
        if last_estimated_bitrate.is_none_or(|last| reduced < last) {
            debug!(
                reduced_bitrate = reduced,
                elapsed_secs = elapsed,
                "ABR network: request overrun, reducing bitrate"
            );
            Some(reduced)
        } else {
            None
        }
    }

    /// When lowering quality, whether to abandon the in-flight request for
    /// the old quality instead of letting it finish.
    fn should_directly_switch_to_low_bitrate(
        &self,
        observation: &PlaybackObservation,
        requests: &[&RequestInfo],
        now: Instant,
    ) -> bool {
        if self.low_latency {
            return true;
        }
        let next_needed_position = observation.position.wanted() + observation.buffer_gap;
        let Some(next_request) = requests.iter().find(|r| {
            let segment = r.content.segment;
            segment.duration > 0.0 && segment.time + segment.duration > next_needed_position
        }) else {
            return true;
        };
        let Some(last_progress) = next_request.progress.last() else {
            return true;
        };
        let Some(bandwidth) = estimate_request_bandwidth(next_request) else {
            return true;
        };
        let Some(remaining_time) = estimate_remaining_time(last_progress, bandwidth) else {
            return true;
        };
        let progress_age =
            now.saturating_duration_since(last_progress.timestamp).as_secs_f64();
        if progress_age > remaining_time * 1.2 {
            return true;
        }
        let expected_rebuffering =
            remaining_time - observation.buffer_gap / observation.speed;
        // The old request finishes with comfortable margin: let it complete.
        expected_rebuffering > -1.5
    }
}

/// Pending requests whose segment contains `needed_position`.
fn concerned_requests<'a>(
    requests: &[&'a RequestInfo],
    needed_position: f64,
) -> Vec<&'a RequestInfo> {
    requests
        .iter()
        .filter(|r| {
            let segment = r.content.segment;
            segment.duration > 0.0
                && segment.time <= needed_position
                && needed_position < segment.time + segment.duration
        })
        .copied()
        .collect()
}

/// Fast bandwidth estimate (bits/s) over one request's progress samples.
///
/// A short-half-life EWMA over consecutive sample deltas; needs at least two
/// samples.
pub(crate) fn estimate_request_bandwidth(request: &RequestInfo) -> Option<f64> {
    if request.progress.len() < 2 {
        return None;
    }
    let mut ewma = Ewma::new(2.0);
    for pair in request.progress.windows(2) {
        let bytes = pair[1].size.saturating_sub(pair[0].size);
        let elapsed = pair[1]
            .timestamp
            .saturating_duration_since(pair[0].timestamp)
            .as_secs_f64();
        if elapsed <= 0.0 {
            continue;
        }
        ewma.add_sample(elapsed, bytes as f64 * 8.0 / elapsed);
    }
    ewma.has_samples().then(|| ewma.estimate())
}

/// Seconds the request is predicted to still need, from its last progress
/// sample and a bandwidth estimate. `None` when the total size is unknown.
fn estimate_remaining_time(progress: &ProgressSample, bandwidth: f64) -> Option<f64> {
    let total_size = progress.total_size?;
    let remaining_bits = total_size.saturating_sub(progress.size) as f64 * 8.0;
    Some((remaining_bits / bandwidth).max(0.0))
}

/// Faster playback drains the buffer faster; require proportionally more
/// headroom.
fn scale_for_speed(bitrate: f64, speed: f64) -> f64 {
    if speed > 1.0 {
        bitrate / speed
    } else {
        bitrate
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rstest::rstest;

    use super::*;
    use crate::types::{PositionInfo, RequestContent, SegmentInfo};

    fn analyzer() -> NetworkAnalyzer {
        NetworkAnalyzer::new(500_000.0, false, AbrConfig::default())
    }

    fn obs(buffer_gap: f64, position: f64, maximum_position: f64) -> PlaybackObservation {
        PlaybackObservation {
            buffer_gap,
            position: PositionInfo {
                last: position,
                pending: None,
            },
            speed: 1.0,
            duration: f64::INFINITY,
            maximum_position,
        }
    }

    fn request(
        rep_bitrate: u32,
        segment_time: f64,
        segment_duration: f64,
        started: Instant,
    ) -> RequestInfo {
        RequestInfo {
            request_timestamp: started,
            content: RequestContent {
                representation: Representation::new("r", rep_bitrate),
                segment: SegmentInfo {
                    time: segment_time,
                    duration: segment_duration,
                    is_init: false,
                },
            },
            progress: Vec::new(),
        }
    }

    fn slow_progress(request: &mut RequestInfo, start: Instant) {
        // ~80 kbit/s over 2 samples, 1MB total: many seconds remaining.
        request.progress = vec![
            ProgressSample {
                size: 10_000,
                total_size: Some(1_000_000),
                timestamp: start + Duration::from_secs(1),
                duration_ms: 1000.0,
            },
            ProgressSample {
                size: 20_000,
                total_size: Some(1_000_000),
                timestamp: start + Duration::from_secs(2),
                duration_ms: 2000.0,
            },
        ];
    }

    #[test]
    fn starvation_mode_is_hysteretic() {
        let mut analyzer = analyzer();
        let mut estimator = BandwidthEstimator::new();
        let now = Instant::now();
        let run = |a: &mut NetworkAnalyzer, e: &mut BandwidthEstimator, gap: f64| {
            a.get_bandwidth_estimate(&obs(gap, 0.0, 1000.0), e, None, &[], None, now);
        };

        run(&mut analyzer, &mut estimator, 8.0);
        assert!(!analyzer.in_starvation_mode());
        run(&mut analyzer, &mut estimator, 4.0);
        assert!(analyzer.in_starvation_mode());
        // Between thresholds: stays in.
        run(&mut analyzer, &mut estimator, 6.0);
        assert!(analyzer.in_starvation_mode());
        run(&mut analyzer, &mut estimator, 7.5);
        assert!(!analyzer.in_starvation_mode());
        // Between thresholds again: stays out.
        run(&mut analyzer, &mut estimator, 6.0);
        assert!(!analyzer.in_starvation_mode());
    }

    #[test]
    fn no_starvation_near_end_of_content() {
        let mut analyzer = analyzer();
        let mut estimator = BandwidthEstimator::new();
        // 2s of buffer but only 2s of content left.
        analyzer.get_bandwidth_estimate(
            &obs(2.0, 998.0, 1000.0),
            &mut estimator,
            None,
            &[],
            None,
            Instant::now(),
        );
        assert!(!analyzer.in_starvation_mode());
    }

    #[test]
    fn no_starvation_near_declared_duration() {
        let mut analyzer = analyzer();
        let mut estimator = BandwidthEstimator::new();
        // Unbounded reachable edge, but the content itself ends in 2s.
        let mut observation = obs(2.0, 998.0, f64::INFINITY);
        observation.duration = 1000.0;
        analyzer.get_bandwidth_estimate(
            &observation,
            &mut estimator,
            None,
            &[],
            None,
            Instant::now(),
        );
        assert!(!analyzer.in_starvation_mode());
    }

    #[test]
    fn falls_back_to_initial_bitrate() {
        let mut analyzer = analyzer();
        let mut estimator = BandwidthEstimator::new();
        let got = analyzer.get_bandwidth_estimate(
            &obs(20.0, 0.0, 1000.0),
            &mut estimator,
            None,
            &[],
            None,
            Instant::now(),
        );
        assert_eq!(got.bandwidth_estimate, None);
        assert_eq!(got.bitrate_chosen, 500_000.0);
    }

    #[test]
    fn regular_factor_applied_to_estimate() {
        let mut analyzer = analyzer();
        let mut estimator = BandwidthEstimator::new();
        for _ in 0..10 {
            estimator.add_sample(1000.0, 500_000); // 4 Mbit/s
        }
        let got = analyzer.get_bandwidth_estimate(
            &obs(20.0, 0.0, 1000.0),
            &mut estimator,
            None,
            &[],
            None,
            Instant::now(),
        );
        let estimate = got.bandwidth_estimate.unwrap();
        assert!((got.bitrate_chosen - estimate * 0.8).abs() < 1.0);
    }

    #[rstest]
    #[case(2.0, 2_000_000.0)] // twice as fast: half the ceiling
    #[case(1.0, 4_000_000.0)] // normal speed untouched
    #[case(0.5, 4_000_000.0)] // slow-motion does not inflate the ceiling
    fn ceiling_scaled_for_fast_playback(#[case] speed: f64, #[case] expected: f64) {
        let got = scale_for_speed(4_000_000.0, speed);
        assert_eq!(got, expected);
    }

    #[test]
    fn emergency_estimate_resets_estimator() {
        let mut analyzer = analyzer();
        let mut estimator = BandwidthEstimator::new();
        for _ in 0..10 {
            estimator.add_sample(1000.0, 1_000_000); // 8 Mbit/s history
        }
        assert!(estimator.get_estimate().is_some());

        let start = Instant::now();
        let mut req = request(4_000_000, 3.0, 4.0, start);
        slow_progress(&mut req, start);
        let now = start + Duration::from_secs(2);

        // 1s of buffer, request for the next needed segment crawling along:
        // predicted rebuffering far exceeds 2s.
        let got = analyzer.get_bandwidth_estimate(
            &obs(1.0, 2.5, 1000.0),
            &mut estimator,
            Some(&req.content.representation.clone()),
            &[&req],
            Some(8_000_000.0),
            now,
        );
        let emergency = got.bandwidth_estimate.unwrap();
        assert!(emergency < 200_000.0, "progress implies ~80kbit/s, got {emergency}");
        assert_eq!(
            estimator.get_estimate(),
            None,
            "history must be discarded after an emergency estimate"
        );
    }

    #[test]
    fn ambiguous_concerned_requests_ignored() {
        let mut analyzer = analyzer();
        let mut estimator = BandwidthEstimator::new();
        let start = Instant::now();
        let mut req_a = request(4_000_000, 3.0, 4.0, start);
        let mut req_b = request(4_000_000, 3.0, 4.0, start);
        slow_progress(&mut req_a, start);
        slow_progress(&mut req_b, start);

        let got = analyzer.get_bandwidth_estimate(
            &obs(1.0, 2.5, 1000.0),
            &mut estimator,
            Some(&req_a.content.representation.clone()),
            &[&req_a, &req_b],
            None,
            start + Duration::from_secs(2),
        );
        // Two overlapping requests: no emergency path, initial bitrate wins.
        assert_eq!(got.bitrate_chosen, 500_000.0);
    }

    #[test]
    fn overrun_without_progress_reduces_bitrate() {
        let mut analyzer = analyzer();
        let mut estimator = BandwidthEstimator::new();
        let start = Instant::now();
        let req = request(4_000_000, 3.0, 4.0, start);
        let current = req.content.representation.clone();
        // 4s segment, 20s elapsed, no progress events at all.
        let now = start + Duration::from_secs(20);

        let got = analyzer.get_bandwidth_estimate(
            &obs(1.0, 2.5, 1000.0),
            &mut estimator,
            Some(&current),
            &[&req],
            Some(8_000_000.0),
            now,
        );
        let reduced = got.bandwidth_estimate.unwrap();
        // bitrate * min(0.7, 4/20) = 4M * 0.2
        assert!((reduced - 800_000.0).abs() < 1000.0, "got {reduced}");
    }

    #[test]
    fn overrun_reduction_skipped_when_less_pessimistic() {
        let mut analyzer = analyzer();
        let mut estimator = BandwidthEstimator::new();
        let start = Instant::now();
        let req = request(4_000_000, 3.0, 4.0, start);
        let current = req.content.representation.clone();

        let got = analyzer.get_bandwidth_estimate(
            &obs(1.0, 2.5, 1000.0),
            &mut estimator,
            Some(&current),
            &[&req],
            Some(100_000.0), // already more pessimistic than the reduction
            start + Duration::from_secs(20),
        );
        assert_eq!(got.bandwidth_estimate, None);
    }

    #[test]
    fn urgent_when_nothing_loaded_yet() {
        let analyzer = analyzer();
        assert!(analyzer.is_urgent(
            1000.0,
            None,
            &[],
            &obs(10.0, 0.0, 1000.0),
            Instant::now()
        ));
    }

    #[test]
    fn not_urgent_when_bitrate_unchanged() {
        let analyzer = analyzer();
        let current = Representation::new("r", 1000);
        assert!(!analyzer.is_urgent(
            1000.0,
            Some(&current),
            &[],
            &obs(10.0, 0.0, 1000.0),
            Instant::now()
        ));
    }

    #[test]
    fn raise_not_urgent_while_starved() {
        let mut analyzer = analyzer();
        let mut estimator = BandwidthEstimator::new();
        let current = Representation::new("r", 1000);
        let observation = obs(2.0, 0.0, 1000.0);
        analyzer.get_bandwidth_estimate(
            &observation,
            &mut estimator,
            Some(&current),
            &[],
            None,
            Instant::now(),
        );
        assert!(analyzer.in_starvation_mode());
        assert!(!analyzer.is_urgent(2000.0, Some(&current), &[], &observation, Instant::now()));
    }

    #[test]
    fn raise_urgent_when_healthy() {
        let analyzer = analyzer();
        let current = Representation::new("r", 1000);
        assert!(analyzer.is_urgent(
            2000.0,
            Some(&current),
            &[],
            &obs(20.0, 0.0, 1000.0),
            Instant::now()
        ));
    }

    #[test]
    fn lower_not_urgent_when_request_finishes_in_time() {
        let analyzer = analyzer();
        let current = Representation::new("r", 4_000_000);
        let start = Instant::now();
        let mut req = request(4_000_000, 10.0, 4.0, start);
        // Fast progress: 800kB of 1MB done at ~8Mbit/s, well under a second
        // left against a 10s buffer.
        req.progress = vec![
            ProgressSample {
                size: 400_000,
                total_size: Some(1_000_000),
                timestamp: start + Duration::from_millis(400),
                duration_ms: 400.0,
            },
            ProgressSample {
                size: 800_000,
                total_size: Some(1_000_000),
                timestamp: start + Duration::from_millis(800),
                duration_ms: 800.0,
            },
        ];
        let urgent = analyzer.is_urgent(
            1_000_000.0,
            Some(&current),
            &[&req],
            &obs(10.0, 0.0, 1000.0),
            start + Duration::from_millis(900),
        );
        assert!(!urgent);
    }

    #[test]
    fn lower_urgent_without_pending_request_data() {
        let analyzer = analyzer();
        let current = Representation::new("r", 4_000_000);
        assert!(analyzer.is_urgent(
            1_000_000.0,
            Some(&current),
            &[],
            &obs(10.0, 0.0, 1000.0),
            Instant::now()
        ));
    }

    #[test]
    fn lower_always_urgent_in_low_latency() {
        let analyzer = NetworkAnalyzer::new(500_000.0, true, AbrConfig::default());
        let current = Representation::new("r", 4_000_000);
        let start = Instant::now();
        let mut req = request(4_000_000, 10.0, 4.0, start);
        slow_progress(&mut req, start);
        assert!(analyzer.is_urgent(
            1_000_000.0,
            Some(&current),
            &[&req],
            &obs(10.0, 0.0, 1000.0),
            start + Duration::from_secs(2)
        ));
    }

    #[test]
    fn request_bandwidth_needs_two_samples() {
        let start = Instant::now();
        let mut req = request(1000, 0.0, 4.0, start);
        assert_eq!(estimate_request_bandwidth(&req), None);
        req.progress.push(ProgressSample {
            size: 10_000,
            total_size: Some(100_000),
            timestamp: start + Duration::from_secs(1),
            duration_ms: 1000.0,
        });
        assert_eq!(estimate_request_bandwidth(&req), None);
        req.progress.push(ProgressSample {
            size: 20_000,
            total_size: Some(100_000),
            timestamp: start + Duration::from_secs(2),
            duration_ms: 2000.0,
        });
        // 10kB in 1s = 80 kbit/s.
        let got = estimate_request_bandwidth(&req).unwrap();
        assert!((got - 80_000.0).abs() < 1.0, "got {got}");
    }
}
