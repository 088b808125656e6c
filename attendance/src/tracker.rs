use std::collections::hash_map::RandomState;
use std::collections::HashMap;
use std::hash::BuildHasher;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{PartialPresence, SmoothingConfig};
use crate::error::{ConfigError, TrackError};
use crate::resolver::MatchOutcome;
use crate::types::{AttendanceRecord, RecordStatus, Session, SessionState};
use crate::window::{Sighting, SightingWindow};

const SHARDS: usize = 16;

/// Per-key effect of one [`Tracker::track`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    /// An accepted sighting was added; the identity is still pending.
    Counted { identity_id: String, hits: usize },

    /// A miss was added for the identity. `ambiguous` is its running
    /// ambiguity count.
    Missed { identity_id: String, ambiguous: usize },

    /// Same camera and timestamp were already counted.
    Duplicate { identity_id: String },

    /// The identity already has a record for this session.
    Settled { identity_id: String },

    /// A record was produced. Emitted exactly once per identity and session.
    Emitted(AttendanceRecord),
}

/// Result of [`Tracker::track`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tracked {
    pub updates: Vec<Update>,
}

impl Tracked {
    pub fn records(&self) -> impl Iterator<Item = &AttendanceRecord> {
        self.updates.iter().filter_map(|u| match u {
            Update::Emitted(rec) => Some(rec),
            _ => None,
        })
    }

    pub fn into_records(self) -> Vec<AttendanceRecord> {
        self.updates
            .into_iter()
            .filter_map(|u| match u {
                Update::Emitted(rec) => Some(rec),
                _ => None,
            })
            .collect()
    }

    /// The confirmed record produced by this call, if any.
    pub fn confirmed(&self) -> Option<&AttendanceRecord> {
        self.records().find(|r| r.status == RecordStatus::Confirmed)
    }

    pub fn is_duplicate(&self) -> bool {
        !self.updates.is_empty()
            && self
                .updates
                .iter()
                .all(|u| matches!(u, Update::Duplicate { .. }))
    }
}

/// Point-in-time copy of the tracker counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrackerStats {
    pub observations: u64,
    pub duplicates: u64,
    pub late: u64,
    pub discarded: u64,
    pub outside_window: u64,
    pub confirmed: u64,
    pub flagged: u64,
    pub rejected: u64,
}

#[derive(Default)]
struct Counters {
    observations: AtomicU64,
    duplicates: AtomicU64,
    late: AtomicU64,
    discarded: AtomicU64,
    outside_window: AtomicU64,
    confirmed: AtomicU64,
    flagged: AtomicU64,
    rejected: AtomicU64,
}

fn bump(c: &AtomicU64) {
    c.fetch_add(1, Ordering::Relaxed);
}

/// Present / absent breakdown of a session against a roster.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub state: SessionState,
    pub total: usize,
    pub present: Vec<String>,
    pub flagged: Vec<String>,
    pub rejected: Vec<String>,
    /// Seen but not yet confirmed. Always empty once the session is closed.
    pub pending: Vec<String>,
    pub absent: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TrackKey {
    session_id: String,
    identity_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Pending,
    Confirmed,
    Flagged,
    Rejected,
}

struct TrackState {
    phase: Phase,
    window: SightingWindow,
    ambiguous: usize,
    first_seen_at: Option<DateTime<Utc>>,
    record: Option<AttendanceRecord>,
}

impl TrackState {
    fn new(m: usize) -> Self {
        Self {
            phase: Phase::Pending,
            window: SightingWindow::new(m),
            ambiguous: 0,
            first_seen_at: None,
            record: None,
        }
    }

    fn saw(&mut self, at: DateTime<Utc>) {
        self.first_seen_at = Some(self.first_seen_at.map_or(at, |f| f.min(at)));
    }

    fn settle(&mut self, phase: Phase, record: AttendanceRecord) {
        self.phase = phase;
        self.window.clear();
        self.record = Some(record);
    }
}

/// Converts per-frame match outcomes into at most one record per identity
/// per session.
///
/// Each (session, identity) pair is updated under its own shard lock, so the
/// transition to a settled state and the production of its record happen in
/// one step: concurrent sightings from several cameras cannot both confirm.
/// The session table is held shared while tracking and exclusively while
/// closing, so nothing is counted into a session after it closes.
///
/// All timing comes from observation timestamps; the tracker never reads
/// the wall clock.
pub struct Tracker {
    cfg: SmoothingConfig,
    sessions: RwLock<HashMap<String, Session>>,
    shards: Vec<Mutex<HashMap<TrackKey, TrackState>>>,
    hasher: RandomState,
    counters: Counters,
}

impl Tracker {
    pub fn new(cfg: SmoothingConfig) -> Result<Self, ConfigError> {
        cfg.validate()?;
        Ok(Self {
            cfg,
            sessions: RwLock::new(HashMap::new()),
            shards: (0..SHARDS).map(|_| Mutex::new(HashMap::new())).collect(),
            hasher: RandomState::new(),
            counters: Counters::default(),
        })
    }

    pub fn config(&self) -> &SmoothingConfig {
        &self.cfg
    }

    fn shard(&self, key: &TrackKey) -> &Mutex<HashMap<TrackKey, TrackState>> {
        let idx = self.hasher.hash_one(key) as usize % self.shards.len();
        &self.shards[idx]
    }

    /// Registers a session announced by the scheduler.
    pub fn open_session(&self, session: Session) -> Result<(), TrackError> {
        let mut sessions = self.sessions.write();
        if sessions.contains_key(&session.id) {
            return Err(TrackError::SessionExists(session.id));
        }
        info!(session = %session.id, start = %session.window_start, "session opened");
        sessions.insert(session.id.clone(), session);
        Ok(())
    }

    pub fn session(&self, id: &str) -> Option<Session> {
        self.sessions.read().get(id).cloned()
    }

    /// Returns all known sessions sorted by start time.
    pub fn sessions(&self) -> Vec<Session> {
        let mut all: Vec<Session> = self.sessions.read().values().cloned().collect();
        all.sort_by(|a, b| a.window_start.cmp(&b.window_start).then_with(|| a.id.cmp(&b.id)));
        all
    }

    /// Applies one resolved observation to the session.
    ///
    /// Observations for closed sessions never mutate state: those stamped
    /// after the cutoff fail with [`TrackError::LateObservation`], in-flight
    /// ones stamped before it with [`TrackError::SessionClosed`].
    pub fn track(
        &self,
        session_id: &str,
        camera_id: &str,
        observed_at: DateTime<Utc>,
        outcome: &MatchOutcome,
    ) -> Result<Tracked, TrackError> {
        let sessions = self.sessions.read();
        let session = sessions
            .get(session_id)
            .ok_or_else(|| TrackError::SessionNotFound(session_id.to_string()))?;
        self.admit(session, observed_at)?;
        bump(&self.counters.observations);

        let mut tracked = Tracked::default();
        match outcome {
            MatchOutcome::Accepted {
                identity_id,
                confidence,
                ..
            } => {
                tracked.updates.push(self.apply_hit(
                    session_id,
                    identity_id,
                    camera_id,
                    observed_at,
                    *confidence,
                ));
            }
            MatchOutcome::Unrecognized { nearest: Some(c) } => {
                tracked.updates.push(self.apply_miss(
                    session_id,
                    &c.identity_id,
                    camera_id,
                    observed_at,
                    None,
                ));
            }
            MatchOutcome::Unrecognized { nearest: None } => {}
            MatchOutcome::Ambiguous { candidates } => {
                for c in candidates {
                    let confidence = (1.0 - c.distance).clamp(0.0, 1.0);
                    tracked.updates.push(self.apply_miss(
                        session_id,
                        &c.identity_id,
                        camera_id,
                        observed_at,
                        Some(confidence),
                    ));
                }
            }
        }
        drop(sessions);
        Ok(tracked)
    }

    fn admit(&self, session: &Session, observed_at: DateTime<Utc>) -> Result<(), TrackError> {
        if let Some(cutoff) = session.cutoff() {
            if observed_at > cutoff {
                bump(&self.counters.late);
                warn!(
                    session = %session.id,
                    observed_at = %observed_at,
                    cutoff = %cutoff,
                    "late observation rejected"
                );
                return Err(TrackError::LateObservation {
                    session_id: session.id.clone(),
                    observed_at,
                    cutoff,
                });
            }
        }
        if session.state == SessionState::Closed {
            bump(&self.counters.discarded);
            debug!(session = %session.id, "in-flight observation discarded");
            return Err(TrackError::SessionClosed(session.id.clone()));
        }
        if observed_at < session.window_start {
            bump(&self.counters.outside_window);
            return Err(TrackError::OutsideWindow {
                session_id: session.id.clone(),
                observed_at,
            });
        }
        Ok(())
    }

    fn apply_hit(
        &self,
        session_id: &str,
        identity_id: &str,
        camera_id: &str,
        observed_at: DateTime<Utc>,
        confidence: f32,
    ) -> Update {
        let key = TrackKey {
            session_id: session_id.to_string(),
            identity_id: identity_id.to_string(),
        };
        let mut shard = self.shard(&key).lock();
        let state = shard
            .entry(key)
            .or_insert_with(|| TrackState::new(self.cfg.m));

        if state.phase != Phase::Pending {
            return Update::Settled {
                identity_id: identity_id.to_string(),
            };
        }
        if !state
            .window
            .push(Sighting::hit(camera_id, observed_at, confidence))
        {
            bump(&self.counters.duplicates);
            return Update::Duplicate {
                identity_id: identity_id.to_string(),
            };
        }
        state.saw(observed_at);

        let Some(confirmation) = state.window.evaluate(self.cfg.k, self.cfg.min_confidence) else {
            let hits = state.window.hits();
            debug!(session = session_id, identity = identity_id, hits, "sighting counted");
            return Update::Counted {
                identity_id: identity_id.to_string(),
                hits,
            };
        };

        let record = AttendanceRecord {
            identity_id: identity_id.to_string(),
            session_id: session_id.to_string(),
            first_seen_at: confirmation.first_seen_at,
            confirmed_at: observed_at.max(confirmation.first_seen_at),
            confidence: confirmation.confidence,
            status: RecordStatus::Confirmed,
            source_camera_id: camera_id.to_string(),
        };
        state.settle(Phase::Confirmed, record.clone());
        bump(&self.counters.confirmed);
        info!(
            session = session_id,
            identity = identity_id,
            camera = camera_id,
            confidence = record.confidence,
            "attendance confirmed"
        );
        Update::Emitted(record)
    }

    /// `ambiguous` carries the candidate's confidence when the miss came
    /// from an ambiguous outcome.
    fn apply_miss(
        &self,
        session_id: &str,
        identity_id: &str,
        camera_id: &str,
        observed_at: DateTime<Utc>,
        ambiguous: Option<f32>,
    ) -> Update {
        let key = TrackKey {
            session_id: session_id.to_string(),
            identity_id: identity_id.to_string(),
        };
        let mut shard = self.shard(&key).lock();
        let state = shard
            .entry(key)
            .or_insert_with(|| TrackState::new(self.cfg.m));

        if state.phase != Phase::Pending {
            return Update::Settled {
                identity_id: identity_id.to_string(),
            };
        }
        if !state.window.push(Sighting::miss(camera_id, observed_at)) {
            bump(&self.counters.duplicates);
            return Update::Duplicate {
                identity_id: identity_id.to_string(),
            };
        }

        let Some(confidence) = ambiguous else {
            return Update::Missed {
                identity_id: identity_id.to_string(),
                ambiguous: state.ambiguous,
            };
        };

        state.saw(observed_at);
        state.ambiguous += 1;
        if state.ambiguous <= self.cfg.ambiguity_limit {
            return Update::Missed {
                identity_id: identity_id.to_string(),
                ambiguous: state.ambiguous,
            };
        }

        let record = AttendanceRecord {
            identity_id: identity_id.to_string(),
            session_id: session_id.to_string(),
            first_seen_at: state.first_seen_at.unwrap_or(observed_at),
            confirmed_at: observed_at,
            confidence,
            status: RecordStatus::Ambiguous,
            source_camera_id: camera_id.to_string(),
        };
        state.settle(Phase::Flagged, record.clone());
        bump(&self.counters.flagged);
        warn!(
            session = session_id,
            identity = identity_id,
            ambiguous = state.ambiguous,
            "identity flagged for review"
        );
        Update::Emitted(record)
    }

    /// Closes a session at `closed_at`.
    ///
    /// Every pending window is dropped. With
    /// [`PartialPresence::Reject`], identities that had at least one
    /// accepted sighting get an explicit `Rejected` record, returned here.
    /// Closing an already closed session is a no-op.
    pub fn close_session(
        &self,
        session_id: &str,
        closed_at: DateTime<Utc>,
    ) -> Result<Vec<AttendanceRecord>, TrackError> {
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| TrackError::SessionNotFound(session_id.to_string()))?;
        if session.state == SessionState::Closed {
            return Ok(Vec::new());
        }
        session.state = SessionState::Closed;
        session.closed_at = Some(closed_at);

        let reject = self.cfg.partial_presence == PartialPresence::Reject;
        let mut records = Vec::new();
        for shard in &self.shards {
            let mut shard = shard.lock();
            shard.retain(|key, state| {
                if key.session_id != session_id || state.phase != Phase::Pending {
                    return true;
                }
                let first_hit = state.window.first_hit().map(|s| s.observed_at);
                match first_hit {
                    Some(first_seen_at) if reject => {
                        let record = AttendanceRecord {
                            identity_id: key.identity_id.clone(),
                            session_id: session_id.to_string(),
                            first_seen_at,
                            confirmed_at: closed_at,
                            confidence: state.window.mean_confidence(),
                            status: RecordStatus::Rejected,
                            source_camera_id: state
                                .window
                                .first_hit()
                                .map(|s| s.camera_id.clone())
                                .unwrap_or_default(),
                        };
                        state.settle(Phase::Rejected, record.clone());
                        records.push(record);
                        true
                    }
                    _ => false,
                }
            });
        }
        drop(sessions);

        records.sort_by(|a, b| a.identity_id.cmp(&b.identity_id));
        self.counters
            .rejected
            .fetch_add(records.len() as u64, Ordering::Relaxed);
        info!(
            session = session_id,
            rejected = records.len(),
            "session closed"
        );
        Ok(records)
    }

    /// Forgets a closed session and all of its per-identity state.
    ///
    /// After eviction, observations for the session fail with
    /// [`TrackError::SessionNotFound`].
    pub fn evict_session(&self, session_id: &str) -> Result<Session, TrackError> {
        let mut sessions = self.sessions.write();
        match sessions.get(session_id) {
            None => return Err(TrackError::SessionNotFound(session_id.to_string())),
            Some(s) if s.is_open() => return Err(TrackError::SessionOpen(session_id.to_string())),
            Some(_) => {}
        }
        for shard in &self.shards {
            shard.lock().retain(|key, _| key.session_id != session_id);
        }
        let session = sessions
            .remove(session_id)
            .ok_or_else(|| TrackError::SessionNotFound(session_id.to_string()))?;
        debug!(session = session_id, "session evicted");
        Ok(session)
    }

    /// Returns every record produced for the session, sorted by identity.
    pub fn records(&self, session_id: &str) -> Result<Vec<AttendanceRecord>, TrackError> {
        if !self.sessions.read().contains_key(session_id) {
            return Err(TrackError::SessionNotFound(session_id.to_string()));
        }
        let mut out = Vec::new();
        for shard in &self.shards {
            let shard = shard.lock();
            out.extend(
                shard
                    .iter()
                    .filter(|(key, _)| key.session_id == session_id)
                    .filter_map(|(_, state)| state.record.clone()),
            );
        }
        out.sort_by(|a, b| a.identity_id.cmp(&b.identity_id));
        Ok(out)
    }

    /// Classifies every roster member for the session.
    ///
    /// Identities outside the roster that nonetheless have records are
    /// still listed under their record status.
    pub fn summary(&self, session_id: &str, roster: &[String]) -> Result<SessionSummary, TrackError> {
        let state = self
            .session(session_id)
            .ok_or_else(|| TrackError::SessionNotFound(session_id.to_string()))?
            .state;

        let mut summary = SessionSummary {
            session_id: session_id.to_string(),
            state,
            total: 0,
            present: Vec::new(),
            flagged: Vec::new(),
            rejected: Vec::new(),
            pending: Vec::new(),
            absent: Vec::new(),
        };
        let mut seen: HashMap<String, Phase> = HashMap::new();
        for shard in &self.shards {
            let shard = shard.lock();
            for (key, st) in shard.iter().filter(|(k, _)| k.session_id == session_id) {
                if st.phase == Phase::Pending && st.window.hits() == 0 {
                    continue;
                }
                seen.insert(key.identity_id.clone(), st.phase);
            }
        }

        let mut ids: Vec<String> = roster.to_vec();
        ids.extend(seen.keys().filter(|id| !roster.contains(id)).cloned());
        ids.sort();
        ids.dedup();
        summary.total = ids.len();
        for id in ids {
            match seen.get(&id) {
                Some(Phase::Confirmed) => summary.present.push(id),
                Some(Phase::Flagged) => summary.flagged.push(id),
                Some(Phase::Rejected) => summary.rejected.push(id),
                Some(Phase::Pending) => summary.pending.push(id),
                None => summary.absent.push(id),
            }
        }
        Ok(summary)
    }

    pub fn stats(&self) -> TrackerStats {
        let c = &self.counters;
        TrackerStats {
            observations: c.observations.load(Ordering::Relaxed),
            duplicates: c.duplicates.load(Ordering::Relaxed),
            late: c.late.load(Ordering::Relaxed),
            discarded: c.discarded.load(Ordering::Relaxed),
            outside_window: c.outside_window.load(Ordering::Relaxed),
            confirmed: c.confirmed.load(Ordering::Relaxed),
            flagged: c.flagged.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
        }
    }
}
