use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Utc};

/// One entry in a [`SightingWindow`].
#[derive(Debug, Clone, PartialEq)]
pub struct Sighting {
    pub camera_id: String,
    pub observed_at: DateTime<Utc>,

    /// `Some(confidence)` for an accepted match, `None` for a miss
    /// (unrecognized or ambiguous for this identity).
    pub confidence: Option<f32>,
}

impl Sighting {
    pub fn hit(camera_id: &str, observed_at: DateTime<Utc>, confidence: f32) -> Self {
        Self {
            camera_id: camera_id.to_string(),
            observed_at,
            confidence: Some(confidence),
        }
    }

    pub fn miss(camera_id: &str, observed_at: DateTime<Utc>) -> Self {
        Self {
            camera_id: camera_id.to_string(),
            observed_at,
            confidence: None,
        }
    }

    pub fn is_hit(&self) -> bool {
        self.confidence.is_some()
    }
}

/// Evidence that a window satisfies the K-of-M rule.
#[derive(Debug, Clone, PartialEq)]
pub struct Confirmation {
    /// Earliest accepted sighting still in the window.
    pub first_seen_at: DateTime<Utc>,

    /// Mean confidence of the accepted sightings in the window.
    pub confidence: f32,

    pub hits: usize,
}

/// Bounded, timestamp-ordered history of one identity's recent outcomes
/// within one session.
///
/// Keeps the last `capacity` sightings by observation time, so outcomes
/// that arrive out of order across cameras land where they belong. A
/// sighting re-delivered with the same camera, timestamp and kind is
/// ignored.
#[derive(Debug)]
pub struct SightingWindow {
    entries: VecDeque<Sighting>,
    capacity: usize,
    seen: HashSet<(String, DateTime<Utc>, bool)>,
}

impl SightingWindow {
    /// Creates a window holding at most `capacity` sightings (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::new(),
            capacity,
            seen: HashSet::new(),
        }
    }

    /// Inserts a sighting in timestamp order, evicting the oldest beyond
    /// capacity. Returns false if it was already delivered.
    pub fn push(&mut self, sighting: Sighting) -> bool {
        let key = (
            sighting.camera_id.clone(),
            sighting.observed_at,
            sighting.is_hit(),
        );
        if !self.seen.insert(key) {
            return false;
        }

        let pos = self
            .entries
            .partition_point(|s| s.observed_at <= sighting.observed_at);
        self.entries.insert(pos, sighting);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
        self.prune_history();
        true
    }

    /// Forgets re-delivery keys older than the window. A stale re-delivery
    /// sorts before the front and is evicted again on insert, so dropping
    /// its key cannot let it be counted.
    fn prune_history(&mut self) {
        if self.entries.len() < self.capacity {
            return;
        }
        if let Some(front) = self.entries.front().map(|s| s.observed_at) {
            self.seen.retain(|(_, at, _)| *at >= front);
        }
    }

    /// Number of accepted sightings currently in the window.
    pub fn hits(&self) -> usize {
        self.entries.iter().filter(|s| s.is_hit()).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Checks the K-of-M rule: at least `k` hits in the window with mean
    /// confidence of at least `min_confidence`.
    pub fn evaluate(&self, k: usize, min_confidence: f32) -> Option<Confirmation> {
        let mut hits = 0usize;
        let mut sum = 0.0f64;
        let mut first_seen_at: Option<DateTime<Utc>> = None;
        for s in &self.entries {
            if let Some(c) = s.confidence {
                hits += 1;
                sum += c as f64;
                if first_seen_at.is_none() {
                    first_seen_at = Some(s.observed_at);
                }
            }
        }
        if hits < k || hits == 0 {
            return None;
        }
        let confidence = (sum / hits as f64) as f32;
        if confidence < min_confidence {
            return None;
        }
        Some(Confirmation {
            first_seen_at: first_seen_at?,
            confidence,
            hits,
        })
    }

    /// Earliest accepted sighting still in the window.
    pub fn first_hit(&self) -> Option<&Sighting> {
        self.entries.iter().find(|s| s.is_hit())
    }

    /// Mean confidence of the accepted sightings, or 0 if there are none.
    pub fn mean_confidence(&self) -> f32 {
        let (n, sum) = self
            .entries
            .iter()
            .filter_map(|s| s.confidence)
            .fold((0usize, 0.0f64), |(n, sum), c| (n + 1, sum + c as f64));
        if n == 0 { 0.0 } else { (sum / n as f64) as f32 }
    }

    /// Drops all sightings and the re-delivery history.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.seen.clear();
    }
}
