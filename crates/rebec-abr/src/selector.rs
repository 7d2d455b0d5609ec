use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rebec_reactive::{CancellationToken, SharedRef};
use web_time::Instant;

use crate::bandwidth::{BandwidthEstimator, SharedBandwidthEstimator};
use crate::config::AbrConfig;
use crate::context::{ContextEstimator, EstimationEnv};
use crate::types::{
    AbrEstimate, MediaType, PlaybackObservation, ProgressSample, Representation, RequestContent,
};

/// Externally settable controls for one media type. Every update immediately
/// triggers re-arbitration in all active selection contexts of that type.
///
/// Cloning yields another handle on the same live references.
#[derive(Clone)]
pub struct MediaSettings {
    /// Bitrate forced by the user, in bits per second. Negative means
    /// automatic selection.
    pub manual_bitrate: SharedRef<f64>,
    /// Floor for automatic selection.
    pub min_auto_bitrate: SharedRef<f64>,
    /// Ceiling for automatic selection.
    pub max_auto_bitrate: SharedRef<f64>,
    /// Display width in pixels; Representations wider than needed to fill it
    /// are filtered out.
    pub limit_width: SharedRef<Option<u32>>,
    /// Bitrate ceiling imposed from outside (e.g. a hidden video element).
    pub throttle_bitrate: SharedRef<f64>,
}

impl Default for MediaSettings {
    fn default() -> Self {
        Self {
            manual_bitrate: SharedRef::new(-1.0),
            min_auto_bitrate: SharedRef::new(0.0),
            max_auto_bitrate: SharedRef::new(f64::INFINITY),
            limit_width: SharedRef::new(None),
            throttle_bitrate: SharedRef::new(f64::INFINITY),
        }
    }
}

/// Static description of one selection context (one media type of one
/// Period/Adaptation).
pub struct SelectorContext {
    pub media_type: MediaType,
    /// Candidate pool. Replacing the pool invalidates the whole estimation
    /// state of contexts listening on it.
    pub representations: SharedRef<Vec<Representation>>,
    /// Playback observer: pulled at every estimation cycle, and every push
    /// triggers one.
    pub playback: SharedRef<PlaybackObservation>,
    /// Bitrate assumed before any network data exists, in bits per second.
    pub initial_bitrate: f64,
    pub low_latency: bool,
    /// Live content.
    pub is_dynamic: bool,
}

/// Entry point of the ABR engine.
///
/// Owns one persistent [`BandwidthEstimator`] per media type (bandwidth is a
/// network property and survives Period changes) and the per-media-type
/// [`MediaSettings`]. Each call to [`estimates`](Self::estimates) starts an
/// independent estimation loop.
#[derive(Default)]
pub struct AdaptiveRepresentationSelector {
    config: AbrConfig,
    estimators: Mutex<HashMap<MediaType, SharedBandwidthEstimator>>,
    settings: Mutex<HashMap<MediaType, MediaSettings>>,
}

impl AdaptiveRepresentationSelector {
    pub fn new(config: AbrConfig) -> Self {
        Self {
            config,
            estimators: Mutex::new(HashMap::new()),
            settings: Mutex::new(HashMap::new()),
        }
    }

    /// Settings handle for `media_type`, created on first use.
    pub fn settings(&self, media_type: MediaType) -> MediaSettings {
        self.settings
            .lock()
            .entry(media_type)
            .or_default()
            .clone()
    }

    fn estimator(&self, media_type: MediaType) -> SharedBandwidthEstimator {
        Arc::clone(
            self.estimators
                .lock()
                .entry(media_type)
                .or_insert_with(|| Arc::new(Mutex::new(BandwidthEstimator::new()))),
        )
    }

    /// Start an estimation loop for one context.
    ///
    /// The loop runs until `cancel` is cancelled; its output reference holds
    /// `None` only while the Representation pool is empty. Dropping the
    /// returned handle stops event delivery but leaves already-registered
    /// input listeners to be detached by cancellation.
    pub fn estimates(&self, ctx: SelectorContext, cancel: &CancellationToken) -> EstimateHandle {
        let env = EstimationEnv {
            media_type: ctx.media_type,
            low_latency: ctx.low_latency,
            is_dynamic: ctx.is_dynamic,
            initial_bitrate: ctx.initial_bitrate,
            config: self.config.clone(),
            estimator: self.estimator(ctx.media_type),
            representations: ctx.representations,
            playback: ctx.playback,
            settings: self.settings(ctx.media_type),
        };
        EstimateHandle {
            estimator: ContextEstimator::spawn(env, cancel.clone()),
        }
    }
}

/// Handle on one running estimation loop: exposes the output reference and
/// the request lifecycle inputs the HTTP layer must report.
pub struct EstimateHandle {
    estimator: Arc<ContextEstimator>,
}

impl EstimateHandle {
    /// The live output reference. Last-value-wins: each new value fully
    /// supersedes the previous one.
    pub fn estimate_ref(&self) -> SharedRef<Option<AbrEstimate>> {
        self.estimator.estimate_ref()
    }

    /// Current estimate.
    pub fn estimate(&self) -> Option<AbrEstimate> {
        self.estimator.estimate_ref().get()
    }

    /// A segment request went out. `id` must be unique among in-flight
    /// requests.
    pub fn request_begin(&self, id: u64, timestamp: Instant, content: RequestContent) {
        self.estimator.on_request_begin(id, timestamp, content);
    }

    /// Progress of an in-flight request.
    pub fn request_progress(
        &self,
        id: u64,
        size: u64,
        total_size: Option<u64>,
        timestamp: Instant,
        duration_ms: f64,
    ) {
        self.estimator.on_request_progress(
            id,
            ProgressSample {
                size,
                total_size,
                timestamp,
                duration_ms,
            },
        );
    }

    /// The request finished, failed or was cancelled.
    pub fn request_end(&self, id: u64) {
        self.estimator.on_request_end(id);
    }

    /// Timing of one completed segment download. `segment_duration_secs` is
    /// `None` for init segments, which carry no media time.
    pub fn metrics(
        &self,
        duration_ms: f64,
        size: u64,
        segment_duration_secs: Option<f64>,
        content: &RequestContent,
    ) {
        self.estimator
            .on_metrics(duration_ms, size, segment_duration_secs, content);
    }

    /// A segment of `representation` was confirmed appended to the playback
    /// buffer.
    pub fn added_segment(&self, representation: &Representation) {
        self.estimator.on_added_segment(representation);
    }
}
