//! Match resolution and attendance deduplication over face embeddings.
//!
//! # Architecture
//!
//! Each detected face flows through four stages:
//!
//! 1. [`rollcall_gallery::Gallery::query`]: embedding -> ranked candidates
//! 2. [`Resolver::resolve`]: ranking -> [`MatchOutcome`] (accepted,
//!    unrecognized, or ambiguous)
//! 3. [`Tracker::track`]: K-of-M smoothing per (session, identity) ->
//!    at most one [`AttendanceRecord`] per identity and session
//! 4. [`Dispatcher`]: records -> [`AttendanceSink`] / [`ReviewQueue`] with
//!    retries
//!
//! [`Engine`] wires the stages together and accepts observations either
//! directly ([`Engine::observe`]) or from a channel fed by many cameras
//! ([`Engine::run`]).
//!
//! # Timing
//!
//! Session membership and lateness are decided by observation timestamps,
//! never by arrival time. A session's cutoff is the earlier of its
//! `window_end` and the moment it was closed:
//!
//! ```text
//! window_start          closed_at / window_end
//!      |--------------------------|
//!   OutsideWindow    counted        LateObservation
//! ```

mod config;
mod detector;
mod dispatch;
mod engine;
mod error;
mod resolver;
mod sink;
mod tracker;
mod types;
mod window;


pub use config::{DispatchConfig, EngineConfig, PartialPresence, ResolverConfig, SmoothingConfig};
pub use detector::{BoundingBox, DetectedFace, FaceDetector};
pub use dispatch::{DeliveryFailure, DispatchStats, Dispatcher, FailureReason};
pub use engine::{Engine, EngineStats, ObservationReport};
pub use error::{ConfigError, EngineError, SinkError, TrackError};
pub use resolver::{MatchOutcome, Resolver};
pub use sink::{AttendanceSink, CommitStatus, MemoryReviewQueue, MemorySink, ReviewQueue};
pub use tracker::{SessionSummary, Tracked, Tracker, TrackerStats, Update};
pub use types::{
    AttendanceRecord, MatchCandidate, Observation, RecordKey, RecordStatus, Session, SessionState,
};
pub use window::{Confirmation, Sighting, SightingWindow};
