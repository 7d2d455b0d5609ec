//! Adaptive-bitrate decision engine for streaming playback.
//!
//! Given continuously arriving network and playback telemetry, this crate
//! decides which encoded quality variant ("Representation") of audio/video
//! should be requested next, trading quality against the risk of rebuffering.
//!
//! Three algorithms compete per estimation cycle — bandwidth-based,
//! buffer-based (BOLA-derived) and guess-based (speculative upgrades for
//! low-latency live) — arbitrated by [`AdaptiveRepresentationSelector`] with
//! the fixed priority guess > buffer > bandwidth.
//!
//! Everything is synchronous: estimation cycles are triggered by pushes into
//! the input references (playback observations, request lifecycle events,
//! setting changes) and the result lands in a [`SharedRef`] the consumer
//! reads or listens on.
//!
//! ## Example
//!
//! ```rust
//! use rebec_abr::{
//!     AdaptiveRepresentationSelector, AbrConfig, MediaType, PlaybackObservation,
//!     Representation, SelectorContext,
//! };
//! use rebec_reactive::{CancellationToken, SharedRef};
//!
//! let selector = AdaptiveRepresentationSelector::new(AbrConfig::default());
//! let pool = SharedRef::new(vec![
//!     Representation::new("low", 500_000),
//!     Representation::new("mid", 1_000_000),
//!     Representation::new("high", 2_000_000),
//! ]);
//! let playback = SharedRef::new(PlaybackObservation::default());
//!
//! let cancel = CancellationToken::new();
//! let handle = selector.estimates(
//!     SelectorContext {
//!         media_type: MediaType::Video,
//!         representations: pool,
//!         playback: playback.clone(),
//!         initial_bitrate: 600_000.0,
//!         low_latency: false,
//!         is_dynamic: false,
//!     },
//!     &cancel,
//! );
//!
//! // No telemetry yet: conservative cold start at the initial bitrate.
//! let estimate = handle.estimate().unwrap();
//! assert_eq!(estimate.representation.bitrate, 500_000);
//! ```
//!
//! [`SharedRef`]: rebec_reactive::SharedRef

#![forbid(unsafe_code)]

mod bandwidth;
mod buffer_based;
mod config;
mod context;
mod error;
mod ewma;
mod filters;
mod guess_based;
mod last_estimate;
mod network;
mod pending;
mod score;
mod select;
mod selector;
mod types;

pub use bandwidth::{BandwidthEstimator, SharedBandwidthEstimator};
pub use buffer_based::{BufferBasedChooser, BufferBasedObservation};
pub use config::AbrConfig;
pub use error::{PendingRequestError, PendingRequestResult};
pub use filters::{filter_by_bitrate, filter_by_width};
pub use guess_based::GuessBasedChooser;
pub use last_estimate::{AlgorithmType, LastEstimate, LastEstimateStorage};
pub use network::{NetworkAnalyzer, NetworkEstimate};
pub use pending::PendingRequestsStore;
pub use score::RepresentationScoreCalculator;
pub use selector::{
    AdaptiveRepresentationSelector, EstimateHandle, MediaSettings, SelectorContext,
};
pub use types::{
    AbrEstimate, MaintainabilityScore, MediaType, PlaybackObservation, PositionInfo,
    ProgressSample, Representation, RequestContent, RequestInfo, ScoreConfidence, SegmentInfo,
};
