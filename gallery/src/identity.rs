use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::embedding::Embedding;

/// How an identity's distance is derived from its reference set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferencePolicy {
    /// Minimum distance across all reference embeddings.
    #[default]
    BestOfSet,
    /// Distance to the normalized mean of the reference embeddings.
    Centroid,
}

/// An enrolled person and their reference embeddings.
#[derive(Clone)]
pub struct Identity {
    /// Stable identifier (e.g. a roll number).
    pub id: String,

    /// Display name.
    pub name: String,

    /// Reference embeddings, one per captured pose. Never empty.
    pub references: Vec<Embedding>,

    /// Inactive identities are kept for history but never matched.
    pub active: bool,

    pub enrolled_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    centroid: Option<Embedding>,
}

impl Identity {
    pub(crate) fn new(
        id: String,
        name: String,
        references: Vec<Embedding>,
        now: DateTime<Utc>,
    ) -> Self {
        let centroid = Embedding::centroid(&references);
        Self {
            id,
            name,
            references,
            active: true,
            enrolled_at: now,
            updated_at: now,
            centroid,
        }
    }

    pub(crate) fn set_references(&mut self, references: Vec<Embedding>) {
        self.centroid = Embedding::centroid(&references);
        self.references = references;
    }

    /// Normalized mean of the references, if it is well defined.
    pub fn centroid(&self) -> Option<&Embedding> {
        self.centroid.as_ref()
    }

    /// Distance from `query` to this identity under `policy`.
    ///
    /// A degenerate centroid falls back to best-of-set.
    pub fn distance(&self, query: &Embedding, policy: ReferencePolicy) -> f32 {
        if policy == ReferencePolicy::Centroid {
            if let Some(c) = &self.centroid {
                return query.distance(c);
            }
        }
        self.references
            .iter()
            .map(|r| query.distance(r))
            .fold(2.0f32, f32::min)
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("references", &self.references.len())
            .field("active", &self.active)
            .finish()
    }
}

/// A ranked gallery entry returned by [`crate::Gallery::query`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub identity_id: String,

    /// Cosine distance in `[0, 2]`; lower is closer.
    pub distance: f32,
}
