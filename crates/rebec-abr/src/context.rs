use std::sync::Arc;

use parking_lot::Mutex;
use rebec_reactive::{CancellationToken, SharedRef};
use tracing::{debug, warn};
use web_time::Instant;

use crate::bandwidth::SharedBandwidthEstimator;
use crate::buffer_based::{BufferBasedChooser, BufferBasedObservation};
use crate::config::AbrConfig;
use crate::error::PendingRequestResult;
use crate::filters::{filter_by_bitrate, filter_by_width};
use crate::guess_based::GuessBasedChooser;
use crate::last_estimate::{AlgorithmType, LastEstimateStorage};
use crate::network::NetworkAnalyzer;
use crate::pending::PendingRequestsStore;
use crate::score::RepresentationScoreCalculator;
use crate::select::select_optimal_representation;
use crate::selector::MediaSettings;
use crate::types::{
    AbrEstimate, MediaType, PlaybackObservation, ProgressSample, Representation, RequestContent,
};

/// Everything one selection context needs that outlives estimation-state
/// rebuilds: the shared per-media-type bandwidth estimator, the live input
/// references and the static context parameters.
pub(crate) struct EstimationEnv {
    pub media_type: MediaType,
    pub low_latency: bool,
    pub is_dynamic: bool,
    pub initial_bitrate: f64,
    pub config: AbrConfig,
    pub estimator: SharedBandwidthEstimator,
    pub representations: SharedRef<Vec<Representation>>,
    pub playback: SharedRef<PlaybackObservation>,
    pub settings: MediaSettings,
}

/// Per-context algorithm state. Rebuilt wholesale on manual-bitrate or pool
/// changes; the bandwidth estimator lives in [`EstimationEnv`] and survives.
pub(crate) struct EstimationState {
    /// Cancelled when this state generation is discarded, detaching the
    /// listeners scoped to it.
    scope: CancellationToken,
    score_calculator: RepresentationScoreCalculator,
    pending: PendingRequestsStore,
    network_analyzer: NetworkAnalyzer,
    buffer_chooser: BufferBasedChooser,
    guess_chooser: GuessBasedChooser,
    last_estimate: LastEstimateStorage,
    /// Buffer-safety toggle of the buffer-based algorithm (hysteresis band).
    allow_buffer_based: bool,
    /// Representation of the last segment confirmed appended to the buffer.
    current_representation: Option<Representation>,
    /// Previous cycle's raw bandwidth estimate, fed back to the analyzer.
    last_estimated_bitrate: Option<f64>,
}

impl EstimationState {
    fn new(env: &EstimationEnv, scope: CancellationToken) -> Self {
        let bitrates: Vec<u32> = env
            .representations
            .get()
            .iter()
            .map(|r| r.bitrate)
            .collect();
        Self {
            scope,
            score_calculator: RepresentationScoreCalculator::new(),
            pending: PendingRequestsStore::new(),
            network_analyzer: NetworkAnalyzer::new(
                env.initial_bitrate,
                env.low_latency,
                env.config.clone(),
            ),
            buffer_chooser: BufferBasedChooser::new(bitrates),
            guess_chooser: GuessBasedChooser::new(),
            last_estimate: LastEstimateStorage::new(),
            allow_buffer_based: false,
            current_representation: None,
            last_estimated_bitrate: None,
        }
    }
}

/// One running estimation loop: holds the state for a single (media type,
/// Period/Adaptation) context and pushes every recomputed estimate into its
/// output reference.
pub(crate) struct ContextEstimator {
    env: EstimationEnv,
    state: Mutex<EstimationState>,
    estimate_ref: SharedRef<Option<AbrEstimate>>,
    cancel: CancellationToken,
}

impl ContextEstimator {
    /// Build the estimator, compute the initial estimate and wire all input
    /// listeners.
    pub(crate) fn spawn(env: EstimationEnv, cancel: CancellationToken) -> Arc<Self> {
        let mut state = EstimationState::new(&env, cancel.child_token());
        let initial = run_arbitration(&env, &mut state, Instant::now());
        let this = Arc::new(Self {
            env,
            state: Mutex::new(state),
            estimate_ref: SharedRef::new(initial),
            cancel,
        });
        this.wire_listeners();
        this
    }

    pub(crate) fn estimate_ref(&self) -> SharedRef<Option<AbrEstimate>> {
        self.estimate_ref.clone()
    }

    fn wire_listeners(self: &Arc<Self>) {
        self.wire_playback_listener();

        // Manual-bitrate and pool changes invalidate the whole estimation
        // state, not just the latest value.
        let weak = Arc::downgrade(self);
        self.env
            .settings
            .manual_bitrate
            .on_update_until(&self.cancel, move |_| {
                if let Some(this) = weak.upgrade() {
                    this.rebuild_state();
                }
            });
        let weak = Arc::downgrade(self);
        self.env
            .representations
            .on_update_until(&self.cancel, move |_| {
                if let Some(this) = weak.upgrade() {
                    this.rebuild_state();
                }
            });

        // Throttles and limits only re-arbitrate.
        for reference in [
            &self.env.settings.min_auto_bitrate,
            &self.env.settings.max_auto_bitrate,
            &self.env.settings.throttle_bitrate,
        ] {
            let weak = Arc::downgrade(self);
            reference.on_update_until(&self.cancel, move |_| {
                if let Some(this) = weak.upgrade() {
                    this.recompute();
                }
            });
        }
        let weak = Arc::downgrade(self);
        self.env
            .settings
            .limit_width
            .on_update_until(&self.cancel, move |_| {
                if let Some(this) = weak.upgrade() {
                    this.recompute();
                }
            });
    }

    /// The playback listener is scoped to the current state generation so a
    /// rebuild can atomically replace it.
    fn wire_playback_listener(self: &Arc<Self>) {
        let scope = self.state.lock().scope.clone();
        let weak = Arc::downgrade(self);
        self.env.playback.on_update_until(&scope, move |_| {
            if let Some(this) = weak.upgrade() {
                this.recompute();
            }
        });
    }

    fn rebuild_state(self: &Arc<Self>) {
        debug!(media_type = ?self.env.media_type, "ABR: rebuilding estimation state");
        {
            let mut state = self.state.lock();
            state.scope.cancel();
            *state = EstimationState::new(&self.env, self.cancel.child_token());
        }
        self.wire_playback_listener();
        self.recompute();
    }

    pub(crate) fn recompute(&self) {
        let estimate = {
            let mut state = self.state.lock();
            run_arbitration(&self.env, &mut state, Instant::now())
        };
        if estimate.is_some() {
            self.estimate_ref.set(estimate);
        } else {
            warn!(
                media_type = ?self.env.media_type,
                "ABR: empty representation pool, keeping previous estimate"
            );
        }
    }

    pub(crate) fn on_request_begin(&self, id: u64, timestamp: Instant, content: RequestContent) {
        report_lifecycle(self.state.lock().pending.add(id, timestamp, content));
    }

    pub(crate) fn on_request_progress(&self, id: u64, progress: ProgressSample) {
        report_lifecycle(self.state.lock().pending.add_progress(id, progress));
    }

    pub(crate) fn on_request_end(&self, id: u64) {
        report_lifecycle(self.state.lock().pending.remove(id));
    }

    /// One completed segment download: feeds the bandwidth estimator and,
    /// for media segments with a known duration, the score calculator.
    pub(crate) fn on_metrics(
        &self,
        duration_ms: f64,
        size: u64,
        segment_duration_secs: Option<f64>,
        content: &RequestContent,
    ) {
        {
            let mut state = self.state.lock();
            self.env.estimator.lock().add_sample(duration_ms, size);
            if !content.segment.is_init {
                if let Some(segment_duration) = segment_duration_secs {
                    state.score_calculator.add_sample(
                        &content.representation,
                        duration_ms / 1000.0,
                        segment_duration,
                    );
                }
            }
        }
        self.recompute();
    }

    pub(crate) fn on_added_segment(&self, representation: &Representation) {
        self.state.lock().current_representation = Some(representation.clone());
        self.recompute();
    }
}

/// Request lifecycle violations are programmer errors: fail loudly in debug
/// builds, degrade to a logged warning in release.
fn report_lifecycle(result: PendingRequestResult<()>) {
    if let Err(err) = result {
        debug_assert!(false, "request lifecycle violation: {err}");
        warn!(%err, "ABR: request lifecycle violation ignored");
    }
}

/// One full arbitration cycle. `None` only for an empty Representation pool.
pub(crate) fn run_arbitration(
    env: &EstimationEnv,
    state: &mut EstimationState,
    now: Instant,
) -> Option<AbrEstimate> {
    let observation = env.playback.get();
    let representations = env.representations.get();

    // Manual mode bypasses every algorithm and never touches their state.
    let manual_bitrate = env.settings.manual_bitrate.get();
    if manual_bitrate >= 0.0 {
        let chosen = select_optimal_representation(&representations, manual_bitrate)?;
        debug!(id = %chosen.id, bitrate = chosen.bitrate, "ABR: manual selection");
        return Some(AbrEstimate {
            representation: chosen,
            bitrate: None,
            urgent: true,
            manual: true,
            known_stable_bitrate: None,
        });
    }
    // Nothing to arbitrate over.
    if representations.len() == 1 {
        return Some(AbrEstimate {
            representation: representations[0].clone(),
            bitrate: None,
            urgent: true,
            manual: false,
            known_stable_bitrate: None,
        });
    }

    let mut pool = filter_by_bitrate(&representations, env.settings.throttle_bitrate.get());
    if let Some(width_limit) = env.settings.limit_width.get() {
        pool = filter_by_width(&pool, width_limit);
    }

    let EstimationState {
        score_calculator,
        pending,
        network_analyzer,
        buffer_chooser,
        guess_chooser,
        last_estimate,
        allow_buffer_based,
        current_representation,
        last_estimated_bitrate,
        ..
    } = state;

    let requests = pending.get_requests();
    let network = network_analyzer.get_bandwidth_estimate(
        &observation,
        &mut env.estimator.lock(),
        current_representation.as_ref(),
        &requests,
        *last_estimated_bitrate,
        now,
    );
    *last_estimated_bitrate = network.bandwidth_estimate;

    let min_auto = env.settings.min_auto_bitrate.get();
    let max_auto = env.settings.max_auto_bitrate.get();
    let wanted_bitrate = network.bitrate_chosen.max(min_auto).min(max_auto);
    let from_bandwidth = select_optimal_representation(&pool, wanted_bitrate)?;

    if observation.buffer_gap > env.config.buffer_based_enable_gap {
        *allow_buffer_based = true;
    } else if observation.buffer_gap <= env.config.buffer_based_disable_gap {
        *allow_buffer_based = false;
    }

    let current_score = current_representation
        .as_ref()
        .and_then(|r| score_calculator.get_estimate(r));

    let buffer_bitrate = buffer_chooser.get_estimate(
        &BufferBasedObservation {
            buffer_gap: observation.buffer_gap,
            current_bitrate: current_representation.as_ref().map(|r| r.bitrate),
            current_score,
            speed: observation.speed,
        },
        now,
    );
    let from_buffer = if *allow_buffer_based && f64::from(buffer_bitrate) > f64::from(from_bandwidth.bitrate)
    {
        select_optimal_representation(&pool, f64::from(buffer_bitrate))
            .filter(|r| r.bitrate > from_bandwidth.bitrate)
    } else {
        None
    };

    let best_so_far = from_buffer.as_ref().unwrap_or(&from_bandwidth);
    let near_live = observation.maximum_position - observation.position.wanted()
        < env.config.near_live_window;
    let guess = if env.low_latency && env.is_dynamic && near_live {
        current_representation.as_ref().and_then(|current| {
            guess_chooser.get_guess(
                &pool,
                &observation,
                current,
                best_so_far.bitrate,
                &requests,
                current_score,
                last_estimate.get(),
                now,
            )
        })
    } else {
        None
    };

    let (winner, algorithm) = match (guess, from_buffer) {
        (Some(guessed), _) => (guessed, AlgorithmType::GuessBased),
        (None, Some(buffered)) => (buffered, AlgorithmType::BufferBased),
        (None, None) => (from_bandwidth, AlgorithmType::Bandwidth),
    };
    let urgent = match algorithm {
        // An aborted guess must drop immediately; a fresh or held guess may
        // let in-flight requests finish.
        AlgorithmType::GuessBased => current_representation
            .as_ref()
            .is_some_and(|current| winner.bitrate < current.bitrate),
        _ => network_analyzer.is_urgent(
            f64::from(winner.bitrate),
            current_representation.as_ref(),
            &requests,
            &observation,
            now,
        ),
    };
    last_estimate.update(winner.clone(), algorithm);

    let known_stable_bitrate = score_calculator.last_stable_representation().map(|r| {
        let bitrate = f64::from(r.bitrate);
        if observation.speed > 0.0 {
            bitrate / observation.speed
        } else {
            bitrate
        }
    });

    debug!(
        media_type = ?env.media_type,
        id = %winner.id,
        bitrate = winner.bitrate,
        algorithm = ?algorithm,
        urgent,
        bandwidth = network.bandwidth_estimate,
        "ABR: new estimate"
    );
    Some(AbrEstimate {
        representation: winner,
        bitrate: network.bandwidth_estimate,
        urgent,
        manual: false,
        known_stable_bitrate,
    })
}
