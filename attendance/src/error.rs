use chrono::{DateTime, Utc};
use rollcall_gallery::GalleryError;
use thiserror::Error;

/// Errors returned by [`crate::Tracker`].
///
/// Unrecognized and ambiguous matches are not errors; they are
/// [`crate::MatchOutcome`] variants.
#[derive(Debug, Error, PartialEq)]
pub enum TrackError {
    #[error("attendance: session not found: {0}")]
    SessionNotFound(String),

    #[error("attendance: session already exists: {0}")]
    SessionExists(String),

    #[error("attendance: late observation for session {session_id} at {observed_at} (cutoff {cutoff})")]
    LateObservation {
        session_id: String,
        observed_at: DateTime<Utc>,
        cutoff: DateTime<Utc>,
    },

    #[error("attendance: session {0} is closed")]
    SessionClosed(String),

    #[error("attendance: session {0} is still open")]
    SessionOpen(String),

    #[error("attendance: observation at {observed_at} precedes session {session_id} start")]
    OutsideWindow {
        session_id: String,
        observed_at: DateTime<Utc>,
    },
}

/// Transient failure talking to a sink or review queue; retried.
#[derive(Debug, Error)]
#[error("attendance: sink unavailable: {0}")]
pub struct SinkError(pub String);

/// Invalid configuration, detected at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("attendance: invalid config: {0}")]
    Invalid(String),

    #[error("attendance: config parse error: {0}")]
    Parse(String),

    #[error("attendance: config read error: {0}")]
    Io(String),

    #[error("attendance: detector dimension {detector} does not match gallery dimension {gallery}")]
    DetectorDimension { detector: usize, gallery: usize },
}

/// Errors returned by [`crate::Engine`].
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Gallery(#[from] GalleryError),

    #[error(transparent)]
    Track(#[from] TrackError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("attendance: face detection failed: {0}")]
    Detect(String),

    #[error("attendance: dispatcher stopped")]
    DispatcherClosed,
}

impl EngineError {
    /// True for the invalid-embedding class of gallery errors.
    pub fn is_invalid_embedding(&self) -> bool {
        matches!(self, Self::Gallery(e) if e.is_invalid_embedding())
    }
}
