use std::sync::Arc;

use web_time::Instant;

/// Media track kind a selection context operates on.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum MediaType {
    Audio,
    Video,
}

/// One fixed-bitrate/resolution encoded variant of a track.
///
/// Representations for a track are known ahead of time; pools handed to the
/// selector should be sorted ascending by bitrate (the engine re-sorts
/// defensively).
#[derive(Clone, Debug)]
pub struct Representation {
    /// Stable identifier, unique within one track.
    pub id: Arc<str>,
    /// Bitrate in bits per second.
    pub bitrate: u32,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl Representation {
    pub fn new(id: impl Into<Arc<str>>, bitrate: u32) -> Self {
        Self {
            id: id.into(),
            bitrate,
            width: None,
            height: None,
        }
    }

    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }
}

impl PartialEq for Representation {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Representation {}

/// Playback position snapshot.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PositionInfo {
    /// Last observed playback position, in seconds.
    pub last: f64,
    /// Position a pending seek will land on, if any.
    pub pending: Option<f64>,
}

impl PositionInfo {
    /// The position the player actually needs data for next.
    pub fn wanted(&self) -> f64 {
        self.pending.unwrap_or(self.last)
    }
}

/// Snapshot of playback state, produced externally at irregular intervals.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlaybackObservation {
    /// Seconds of media buffered ahead of the playback position.
    pub buffer_gap: f64,
    pub position: PositionInfo,
    /// Playback rate. `0.0` means paused/frozen.
    pub speed: f64,
    /// Total content duration in seconds (`f64::INFINITY` for unbounded live).
    pub duration: f64,
    /// Maximum reachable position, in seconds (live edge for dynamic content).
    pub maximum_position: f64,
}

impl Default for PlaybackObservation {
    fn default() -> Self {
        Self {
            buffer_gap: 0.0,
            position: PositionInfo {
                last: 0.0,
                pending: None,
            },
            speed: 1.0,
            duration: f64::INFINITY,
            maximum_position: f64::INFINITY,
        }
    }
}

/// Positioning of one media segment inside the track.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SegmentInfo {
    /// Segment start time, in seconds.
    pub time: f64,
    /// Segment duration, in seconds.
    pub duration: f64,
    /// Initialization segments carry no media time.
    pub is_init: bool,
}

/// What an in-flight request is loading.
#[derive(Clone, Debug)]
pub struct RequestContent {
    pub representation: Representation,
    pub segment: SegmentInfo,
}

/// One progress event of an in-flight request.
#[derive(Clone, Copy, Debug)]
pub struct ProgressSample {
    /// Bytes received so far.
    pub size: u64,
    /// Total expected bytes, when the server announced it.
    pub total_size: Option<u64>,
    pub timestamp: Instant,
    /// Time elapsed since the request began, in milliseconds.
    pub duration_ms: f64,
}

/// An in-flight segment request, owned by the pending-requests store from
/// begin until end.
#[derive(Clone, Debug)]
pub struct RequestInfo {
    pub request_timestamp: Instant,
    pub content: RequestContent,
    pub progress: Vec<ProgressSample>,
}

/// How much the score EWMA can be trusted.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScoreConfidence {
    High,
    Low,
}

/// Maintainability of a Representation: ratio of segment playback duration to
/// its download duration. Above `1.0` means downloadable faster than played.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MaintainabilityScore {
    pub score: f64,
    pub confidence: ScoreConfidence,
}

/// The engine's output: which Representation to load next.
#[derive(Clone, Debug, PartialEq)]
pub struct AbrEstimate {
    pub representation: Representation,
    /// Bandwidth estimate the choice was based on, in bits per second.
    /// `None` when no network data was involved (manual mode, cold start).
    pub bitrate: Option<f64>,
    /// `true` means in-flight requests for the previous choice should be
    /// abandoned immediately; `false` means finish them first.
    pub urgent: bool,
    /// `true` when produced by a manual-bitrate override.
    pub manual: bool,
    /// Bitrate of the last Representation known to be maintainable, adjusted
    /// for playback speed.
    pub known_stable_bitrate: Option<f64>,
}
