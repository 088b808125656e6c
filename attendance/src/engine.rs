use std::sync::Arc;

use chrono::{DateTime, Utc};
use rollcall_gallery::Gallery;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::detector::FaceDetector;
use crate::dispatch::{DeliveryFailure, DispatchStats, Dispatcher};
use crate::error::{ConfigError, EngineError};
use crate::resolver::{MatchOutcome, Resolver};
use crate::sink::{AttendanceSink, ReviewQueue};
use crate::tracker::{SessionSummary, Tracked, Tracker, TrackerStats};
use crate::types::{AttendanceRecord, MatchCandidate, Observation, Session};

/// What happened to one observation.
#[derive(Debug, Clone)]
pub struct ObservationReport {
    pub candidate: MatchCandidate,
    pub outcome: MatchOutcome,
    pub tracked: Tracked,

    /// Records the tracker produced but the dispatcher refused because it
    /// was shut down. They remain available from [`Engine::records`].
    pub undispatched: Vec<AttendanceRecord>,
}

/// Combined counters across the engine's components.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub gallery_version: u64,
    pub active_identities: usize,
    pub tracker: TrackerStats,
    pub dispatch: DispatchStats,
}

/// The identity matching and attendance pipeline.
///
/// Each observation is normalized, ranked against the gallery, resolved into
/// a [`MatchOutcome`], and folded into the session tracker. Records the
/// tracker emits are handed to the [`Dispatcher`], so `observe` never waits
/// on the sink.
///
/// An engine must be created inside a tokio runtime.
pub struct Engine {
    gallery: Arc<Gallery>,
    resolver: Resolver,
    tracker: Tracker,
    dispatcher: Dispatcher,
}

impl Engine {
    /// Creates an engine with an empty gallery.
    pub fn new(
        cfg: EngineConfig,
        sink: Arc<dyn AttendanceSink>,
        review: Arc<dyn ReviewQueue>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<DeliveryFailure>), ConfigError> {
        cfg.validate()?;
        let gallery =
            Gallery::new(cfg.gallery.clone()).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Self::with_gallery(cfg, Arc::new(gallery), sink, review)
    }

    /// Creates an engine over an existing gallery, e.g. one loaded from a
    /// snapshot.
    pub fn with_gallery(
        cfg: EngineConfig,
        gallery: Arc<Gallery>,
        sink: Arc<dyn AttendanceSink>,
        review: Arc<dyn ReviewQueue>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<DeliveryFailure>), ConfigError> {
        cfg.validate()?;
        if gallery.dim() != cfg.gallery.dim {
            return Err(ConfigError::Invalid(format!(
                "gallery dimension {} does not match configured dimension {}",
                gallery.dim(),
                cfg.gallery.dim
            )));
        }
        let resolver = Resolver::new(cfg.resolver)?;
        let tracker = Tracker::new(cfg.smoothing)?;
        let (dispatcher, failures) = Dispatcher::spawn(cfg.dispatch, sink, review);
        info!(
            dim = gallery.dim(),
            identities = gallery.len(),
            "attendance engine started"
        );
        Ok((
            Self {
                gallery,
                resolver,
                tracker,
                dispatcher,
            },
            failures,
        ))
    }

    pub fn gallery(&self) -> &Arc<Gallery> {
        &self.gallery
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    /// Fails unless the detector produces embeddings of the gallery's
    /// dimension.
    pub fn check_detector<D: FaceDetector>(&self, detector: &D) -> Result<(), ConfigError> {
        if detector.dimension() != self.gallery.dim() {
            return Err(ConfigError::DetectorDimension {
                detector: detector.dimension(),
                gallery: self.gallery.dim(),
            });
        }
        Ok(())
    }

    pub fn open_session(&self, session: Session) -> Result<(), EngineError> {
        Ok(self.tracker.open_session(session)?)
    }

    /// Resolves an embedding against the gallery without touching any
    /// session.
    pub fn identify(&self, embedding: &[f32]) -> Result<MatchOutcome, EngineError> {
        let ranking = self.gallery.query_raw(embedding)?;
        Ok(self.resolver.resolve(&ranking))
    }

    /// Processes one observation end to end.
    pub fn observe(&self, obs: &Observation) -> Result<ObservationReport, EngineError> {
        let embedding = self.gallery.embedding(&obs.embedding)?;
        let ranking = self.gallery.query(&embedding);
        let outcome = self.resolver.resolve(&ranking);
        let candidate =
            MatchCandidate::from_ranking(embedding, &ranking, &obs.camera_id, obs.timestamp);

        let tracked = self
            .tracker
            .track(&obs.session_id, &obs.camera_id, obs.timestamp, &outcome)?;
        let undispatched = self.dispatch(tracked.records());
        debug!(
            camera = %obs.camera_id,
            session = %obs.session_id,
            outcome = %outcome,
            "observation processed"
        );
        Ok(ObservationReport {
            candidate,
            outcome,
            tracked,
            undispatched,
        })
    }

    /// Hands every record to the dispatcher, returning those it refused.
    fn dispatch<'a>(
        &self,
        records: impl IntoIterator<Item = &'a AttendanceRecord>,
    ) -> Vec<AttendanceRecord> {
        let mut refused = Vec::new();
        for record in records {
            if let Err(e) = self.dispatcher.send(record.clone()) {
                error!(
                    identity = %record.identity_id,
                    session = %record.session_id,
                    status = %record.status,
                    "record not dispatched: {e}"
                );
                refused.push(record.clone());
            }
        }
        refused
    }

    /// Runs the detector over a frame and observes every face it finds.
    ///
    /// Faces whose embeddings are unusable are skipped; session errors are
    /// returned since they apply to the whole frame.
    pub fn ingest_frame<D: FaceDetector>(
        &self,
        detector: &D,
        camera_id: &str,
        session_id: &str,
        timestamp: DateTime<Utc>,
        frame: &D::Frame,
    ) -> Result<Vec<ObservationReport>, EngineError> {
        let faces = detector.detect_faces(frame).map_err(EngineError::Detect)?;
        let mut reports = Vec::with_capacity(faces.len());
        for face in faces {
            let obs = Observation {
                camera_id: camera_id.to_string(),
                session_id: session_id.to_string(),
                timestamp,
                embedding: face.embedding,
            };
            match self.observe(&obs) {
                Ok(report) => reports.push(report),
                Err(e) if e.is_invalid_embedding() => {
                    warn!(camera = camera_id, "face skipped: {e}");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(reports)
    }

    /// Drains observations from any number of camera feeds until every
    /// sender is dropped. Failed observations are logged and skipped.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<Observation>) {
        let mut processed = 0u64;
        let mut failed = 0u64;
        while let Some(obs) = rx.recv().await {
            match self.observe(&obs) {
                Ok(_) => processed += 1,
                Err(e) => {
                    failed += 1;
                    debug!(camera = %obs.camera_id, session = %obs.session_id, "observation dropped: {e}");
                }
            }
        }
        info!(processed, failed, "observation feed closed");
    }

    /// Closes a session and dispatches any records produced by closing it.
    ///
    /// The session is closed even if the dispatcher has stopped; in that
    /// case the error is returned after every record was offered, and the
    /// records stay available from [`Engine::records`].
    pub fn close_session(
        &self,
        session_id: &str,
        closed_at: DateTime<Utc>,
    ) -> Result<Vec<AttendanceRecord>, EngineError> {
        let records = self.tracker.close_session(session_id, closed_at)?;
        if !self.dispatch(&records).is_empty() {
            return Err(EngineError::DispatcherClosed);
        }
        Ok(records)
    }

    pub fn evict_session(&self, session_id: &str) -> Result<Session, EngineError> {
        Ok(self.tracker.evict_session(session_id)?)
    }

    pub fn records(&self, session_id: &str) -> Result<Vec<AttendanceRecord>, EngineError> {
        Ok(self.tracker.records(session_id)?)
    }

    /// Summarizes the session against the currently active roster.
    pub fn summary(&self, session_id: &str) -> Result<SessionSummary, EngineError> {
        let roster = self.gallery.active_ids();
        Ok(self.tracker.summary(session_id, &roster)?)
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            gallery_version: self.gallery.version(),
            active_identities: self.gallery.active_ids().len(),
            tracker: self.tracker.stats(),
            dispatch: self.dispatcher.stats(),
        }
    }

    /// Stops the dispatcher after every queued record has been delivered or
    /// reported. Records emitted afterwards are returned in
    /// [`ObservationReport::undispatched`].
    pub async fn shutdown(&self) {
        self.dispatcher.shutdown().await;
        info!("attendance engine stopped");
    }
}
