use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of an attendance session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Open,
    Closed,
}

/// A bounded attendance-taking interval.
///
/// Sessions are scheduled elsewhere; the tracker only learns about them
/// through [`crate::Tracker::open_session`] and
/// [`crate::Tracker::close_session`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub window_start: DateTime<Utc>,

    /// Open-ended when `None`; the session then runs until explicitly closed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_end: Option<DateTime<Utc>>,

    #[serde(default = "default_state")]
    pub state: SessionState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
}

fn default_state() -> SessionState {
    SessionState::Open
}

impl Session {
    pub fn open(id: impl Into<String>, window_start: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            window_start,
            window_end: None,
            state: SessionState::Open,
            closed_at: None,
        }
    }

    pub fn with_end(mut self, window_end: DateTime<Utc>) -> Self {
        self.window_end = Some(window_end);
        self
    }

    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }

    /// The instant after which observations are late: the earlier of the
    /// scheduled end and the actual close.
    pub fn cutoff(&self) -> Option<DateTime<Utc>> {
        match (self.window_end, self.closed_at) {
            (Some(end), Some(closed)) => Some(end.min(closed)),
            (end, closed) => end.or(closed),
        }
    }
}

/// Status carried by an [`AttendanceRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Confirmed,
    Rejected,
    Ambiguous,
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Confirmed => write!(f, "confirmed"),
            Self::Rejected => write!(f, "rejected"),
            Self::Ambiguous => write!(f, "ambiguous"),
        }
    }
}

/// Output of the session tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub identity_id: String,
    pub session_id: String,

    /// Timestamp of the earliest sighting that contributed to the record.
    pub first_seen_at: DateTime<Utc>,

    /// Timestamp of the observation that settled the record.
    pub confirmed_at: DateTime<Utc>,

    /// Value in [0, 1].
    pub confidence: f32,

    pub status: RecordStatus,
    pub source_camera_id: String,
}

impl AttendanceRecord {
    /// Idempotency key for sinks: one record per identity, session and status.
    pub fn key(&self) -> RecordKey {
        RecordKey {
            identity_id: self.identity_id.clone(),
            session_id: self.session_id.clone(),
            status: self.status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub identity_id: String,
    pub session_id: String,
    pub status: RecordStatus,
}

/// One detected face, the unit of work the engine processes.
///
/// Ordering across cameras is not guaranteed; `timestamp`, not arrival
/// order, decides session membership.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub camera_id: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub embedding: Vec<f32>,
}

/// Ephemeral summary of one resolved observation, for diagnostics.
#[derive(Debug, Clone)]
pub struct MatchCandidate {
    pub detected_embedding: rollcall_gallery::Embedding,
    pub best_identity_id: Option<String>,
    pub best_distance: f32,

    /// `f32::INFINITY` when fewer than two identities are active.
    pub second_best_distance: f32,

    pub camera_id: String,
    pub observed_at: DateTime<Utc>,
}

impl MatchCandidate {
    pub fn from_ranking(
        embedding: rollcall_gallery::Embedding,
        ranking: &[rollcall_gallery::Candidate],
        camera_id: &str,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            detected_embedding: embedding,
            best_identity_id: ranking.first().map(|c| c.identity_id.clone()),
            best_distance: ranking.first().map_or(f32::INFINITY, |c| c.distance),
            second_best_distance: ranking.get(1).map_or(f32::INFINITY, |c| c.distance),
            camera_id: camera_id.to_string(),
            observed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::seconds(secs)
    }

    #[test]
    fn test_cutoff_prefers_earliest_bound() {
        let mut s = Session::open("s", t(0));
        assert_eq!(s.cutoff(), None);

        s = s.with_end(t(100));
        assert_eq!(s.cutoff(), Some(t(100)));

        s.closed_at = Some(t(50));
        assert_eq!(s.cutoff(), Some(t(50)));

        s.closed_at = Some(t(150));
        assert_eq!(s.cutoff(), Some(t(100)));
    }

    #[test]
    fn test_record_status_display() {
        assert_eq!(RecordStatus::Confirmed.to_string(), "confirmed");
        assert_eq!(RecordStatus::Rejected.to_string(), "rejected");
        assert_eq!(RecordStatus::Ambiguous.to_string(), "ambiguous");
    }

    #[test]
    fn test_record_serializes_snake_case_status() {
        let rec = AttendanceRecord {
            identity_id: "a".into(),
            session_id: "s".into(),
            first_seen_at: t(0),
            confirmed_at: t(1),
            confidence: 0.9,
            status: RecordStatus::Ambiguous,
            source_camera_id: "cam-1".into(),
        };
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["status"], "ambiguous");
    }
}
