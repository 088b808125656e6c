use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::embedding::Embedding;
use crate::error::GalleryError;
use crate::identity::{Candidate, Identity, ReferencePolicy};

/// Controls gallery behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GalleryConfig {
    /// Embedding dimension (e.g. 128 or 512 for face models).
    pub dim: usize,

    /// How multiple references per identity are scored. Default: best-of-set.
    #[serde(default)]
    pub reference_policy: ReferencePolicy,

    /// Upper bound on references kept per identity by [`Gallery::extend`].
    /// Default: 32.
    #[serde(default = "default_max_references")]
    pub max_references: usize,
}

fn default_max_references() -> usize {
    32
}

impl GalleryConfig {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            reference_policy: ReferencePolicy::default(),
            max_references: default_max_references(),
        }
    }

    pub fn validate(&self) -> Result<(), GalleryError> {
        if self.dim == 0 {
            return Err(GalleryError::InvalidEmbedding(
                "configured dimension must be positive".into(),
            ));
        }
        if self.max_references == 0 {
            return Err(GalleryError::InvalidEmbedding(
                "max_references must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Result of [`Gallery::enroll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enrollment {
    Created,
    Replaced,
    /// Identical name, references and active state; nothing changed.
    Unchanged,
}

#[derive(Clone, Default)]
pub(crate) struct State {
    pub(crate) version: u64,
    pub(crate) identities: HashMap<String, Identity>,
}

/// Authoritative store of enrolled identities.
///
/// Readers take a cheap `Arc` snapshot under a short read lock and score
/// without holding it, so queries never wait on each other. Writers
/// copy-on-write the state and swap it in, so no query ever observes a
/// half-updated identity.
pub struct Gallery {
    cfg: GalleryConfig,
    state: RwLock<Arc<State>>,
}

impl fmt::Debug for Gallery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.snapshot_state();
        f.debug_struct("Gallery")
            .field("dim", &self.cfg.dim)
            .field("version", &state.version)
            .field("identities", &state.identities.len())
            .finish()
    }
}

impl Gallery {
    /// Creates an empty gallery. Fails if the configuration is invalid.
    pub fn new(cfg: GalleryConfig) -> Result<Self, GalleryError> {
        cfg.validate()?;
        Ok(Self {
            cfg,
            state: RwLock::new(Arc::new(State::default())),
        })
    }

    pub(crate) fn from_state(cfg: GalleryConfig, state: State) -> Result<Self, GalleryError> {
        cfg.validate()?;
        Ok(Self {
            cfg,
            state: RwLock::new(Arc::new(state)),
        })
    }

    pub fn config(&self) -> &GalleryConfig {
        &self.cfg
    }

    pub fn dim(&self) -> usize {
        self.cfg.dim
    }

    /// Validates and normalizes a raw vector against the gallery dimension.
    pub fn embedding(&self, values: &[f32]) -> Result<Embedding, GalleryError> {
        Embedding::new(values, self.cfg.dim)
    }

    fn validate_all(&self, id: &str, raw: &[Vec<f32>]) -> Result<Vec<Embedding>, GalleryError> {
        if raw.is_empty() {
            return Err(GalleryError::EmptyReferences(id.to_string()));
        }
        raw.iter().map(|v| self.embedding(v)).collect()
    }

    pub(crate) fn snapshot_state(&self) -> Arc<State> {
        Arc::clone(&self.state.read())
    }

    /// Inserts or replaces an identity's reference set.
    ///
    /// Every vector is validated before anything is written. Enrolling a
    /// deactivated identity reactivates it.
    pub fn enroll(
        &self,
        id: &str,
        name: &str,
        embeddings: &[Vec<f32>],
    ) -> Result<Enrollment, GalleryError> {
        let refs = self.validate_all(id, embeddings)?;

        let mut guard = self.state.write();
        if let Some(existing) = guard.identities.get(id) {
            if existing.active && existing.name == name && existing.references == refs {
                debug!(identity = id, "enroll: unchanged");
                return Ok(Enrollment::Unchanged);
            }
        }

        let state = Arc::make_mut(&mut *guard);
        let now = Utc::now();
        let outcome = match state.identities.get_mut(id) {
            Some(existing) => {
                existing.name = name.to_string();
                existing.set_references(refs);
                existing.active = true;
                existing.updated_at = now;
                Enrollment::Replaced
            }
            None => {
                state.identities.insert(
                    id.to_string(),
                    Identity::new(id.to_string(), name.to_string(), refs, now),
                );
                Enrollment::Created
            }
        };
        state.version += 1;
        info!(
            identity = id,
            references = embeddings.len(),
            version = state.version,
            "enrolled identity ({:?})",
            outcome
        );
        Ok(outcome)
    }

    /// Appends reference embeddings to an existing identity.
    ///
    /// Keeps at most `max_references`, dropping the oldest. Returns the
    /// resulting reference count.
    pub fn extend(&self, id: &str, embeddings: &[Vec<f32>]) -> Result<usize, GalleryError> {
        let extra = self.validate_all(id, embeddings)?;

        let mut guard = self.state.write();
        if !guard.identities.contains_key(id) {
            return Err(GalleryError::NotFound(id.to_string()));
        }
        let state = Arc::make_mut(&mut *guard);
        let max = self.cfg.max_references;
        let count = match state.identities.get_mut(id) {
            Some(ident) => {
                let mut refs = ident.references.clone();
                refs.extend(extra);
                if refs.len() > max {
                    refs.drain(..refs.len() - max);
                }
                ident.set_references(refs);
                ident.updated_at = Utc::now();
                ident.references.len()
            }
            None => return Err(GalleryError::NotFound(id.to_string())),
        };
        state.version += 1;
        debug!(identity = id, references = count, "extended identity");
        Ok(count)
    }

    /// Marks an identity inactive. Its references stay in storage.
    pub fn deactivate(&self, id: &str) -> Result<(), GalleryError> {
        self.set_active(id, false)
    }

    /// Reverses [`Gallery::deactivate`].
    pub fn reactivate(&self, id: &str) -> Result<(), GalleryError> {
        self.set_active(id, true)
    }

    fn set_active(&self, id: &str, active: bool) -> Result<(), GalleryError> {
        let mut guard = self.state.write();
        match guard.identities.get(id) {
            None => return Err(GalleryError::NotFound(id.to_string())),
            Some(ident) if ident.active == active => return Ok(()),
            Some(_) => {}
        }
        let state = Arc::make_mut(&mut *guard);
        if let Some(ident) = state.identities.get_mut(id) {
            ident.active = active;
            ident.updated_at = Utc::now();
        }
        state.version += 1;
        info!(identity = id, active, "identity state changed");
        Ok(())
    }

    /// Ranks every active identity by distance to `query`, closest first.
    ///
    /// Ties are broken by identity id so rankings are deterministic.
    /// An empty gallery yields an empty ranking.
    pub fn query(&self, query: &Embedding) -> Vec<Candidate> {
        let state = self.snapshot_state();
        let policy = self.cfg.reference_policy;

        let mut ranked: Vec<Candidate> = state
            .identities
            .values()
            .filter(|ident| ident.active)
            .map(|ident| Candidate {
                identity_id: ident.id.clone(),
                distance: ident.distance(query, policy),
            })
            .collect();

        ranked.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.identity_id.cmp(&b.identity_id))
        });
        ranked
    }

    /// Validates a raw vector and ranks it; see [`Gallery::query`].
    pub fn query_raw(&self, values: &[f32]) -> Result<Vec<Candidate>, GalleryError> {
        let emb = self.embedding(values)?;
        Ok(self.query(&emb))
    }

    /// Returns a copy of an identity, active or not.
    pub fn get(&self, id: &str) -> Option<Identity> {
        self.snapshot_state().identities.get(id).cloned()
    }

    /// Returns the sorted ids of all active identities.
    pub fn active_ids(&self) -> Vec<String> {
        let state = self.snapshot_state();
        let mut ids: Vec<String> = state
            .identities
            .values()
            .filter(|i| i.active)
            .map(|i| i.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Returns all identities sorted by id.
    pub fn identities(&self) -> Vec<Identity> {
        let state = self.snapshot_state();
        let mut all: Vec<Identity> = state.identities.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Number of identities, including inactive ones.
    pub fn len(&self) -> usize {
        self.state.read().identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Monotonic counter bumped by every mutating operation.
    pub fn version(&self) -> u64 {
        self.state.read().version
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    fn gallery(dim: usize) -> Gallery {
        Gallery::new(GalleryConfig::new(dim)).unwrap()
    }

    #[test]
    fn test_empty_gallery_query() {
        let g = gallery(3);
        assert!(g.query_raw(&[1.0, 0.0, 0.0]).unwrap().is_empty());
        assert!(g.is_empty());
    }

    #[test]
    fn test_debug_summarizes_state() {
        let g = gallery(3);
        g.enroll("a", "A", &[vec![1.0, 0.0, 0.0]]).unwrap();
        let s = format!("{g:?}");
        assert!(s.contains("dim: 3"), "{s}");
        assert!(s.contains("version: 1"), "{s}");
        assert!(s.contains("identities: 1"), "{s}");
    }

    #[test]
    fn test_zero_dim_config_rejected() {
        assert!(Gallery::new(GalleryConfig::new(0)).is_err());
    }

    #[test]
    fn test_enroll_rejects_bad_vectors_without_mutation() {
        let g = gallery(3);
        let err = g
            .enroll("s1", "Asha", &[vec![1.0, 0.0, 0.0], vec![1.0, 0.0]])
            .unwrap_err();
        assert!(err.is_invalid_embedding());
        assert!(g.is_empty());

        let err = g.enroll("s1", "Asha", &[vec![0.0, 0.0, 0.0]]).unwrap_err();
        assert!(matches!(err, GalleryError::InvalidEmbedding(_)));

        let err = g.enroll("s1", "Asha", &[]).unwrap_err();
        assert!(matches!(err, GalleryError::EmptyReferences(_)));
        assert_eq!(g.version(), 0);
    }

    #[test]
    fn test_enroll_is_idempotent() {
        let g = gallery(3);
        let refs = vec![vec![1.0, 0.0, 0.0], vec![0.9, 0.1, 0.0]];
        assert_eq!(g.enroll("s1", "Asha", &refs).unwrap(), Enrollment::Created);
        let v = g.version();
        assert_eq!(g.enroll("s1", "Asha", &refs).unwrap(), Enrollment::Unchanged);
        assert_eq!(g.version(), v);
        assert_eq!(
            g.enroll("s1", "Asha", &[vec![0.0, 1.0, 0.0]]).unwrap(),
            Enrollment::Replaced
        );
        assert_eq!(g.get("s1").unwrap().references.len(), 1);
    }

    #[test]
    fn test_query_ranks_ascending() {
        let g = gallery(3);
        g.enroll("a", "A", &[vec![1.0, 0.0, 0.0]]).unwrap();
        g.enroll("b", "B", &[vec![0.0, 1.0, 0.0]]).unwrap();
        g.enroll("c", "C", &[vec![0.9, 0.1, 0.0]]).unwrap();

        let ranked = g.query_raw(&[1.0, 0.0, 0.0]).unwrap();
        let ids: Vec<&str> = ranked.iter().map(|c| c.identity_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "b"]);
        assert!(ranked.windows(2).all(|w| w[0].distance <= w[1].distance));
    }

    #[test]
    fn test_deactivated_identity_excluded() {
        let g = gallery(3);
        g.enroll("a", "A", &[vec![1.0, 0.0, 0.0]]).unwrap();
        g.enroll("b", "B", &[vec![0.0, 1.0, 0.0]]).unwrap();
        g.deactivate("a").unwrap();

        let ranked = g.query_raw(&[1.0, 0.0, 0.0]).unwrap();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].identity_id, "b");
        // References are retained.
        assert_eq!(g.get("a").unwrap().references.len(), 1);
        assert_eq!(g.active_ids(), vec!["b".to_string()]);

        g.reactivate("a").unwrap();
        assert_eq!(g.query_raw(&[1.0, 0.0, 0.0]).unwrap()[0].identity_id, "a");
    }

    #[test]
    fn test_deactivate_unknown_is_not_found() {
        let g = gallery(3);
        assert!(matches!(
            g.deactivate("ghost"),
            Err(GalleryError::NotFound(_))
        ));
        assert!(matches!(
            g.extend("ghost", &[vec![1.0, 0.0, 0.0]]),
            Err(GalleryError::NotFound(_))
        ));
    }

    #[test]
    fn test_reenroll_reactivates() {
        let g = gallery(2);
        g.enroll("a", "A", &[vec![1.0, 0.0]]).unwrap();
        g.deactivate("a").unwrap();
        assert_eq!(g.enroll("a", "A", &[vec![1.0, 0.0]]).unwrap(), Enrollment::Replaced);
        assert!(g.get("a").unwrap().active);
    }

    #[test]
    fn test_extend_caps_references() {
        let g = Gallery::new(GalleryConfig {
            dim: 2,
            reference_policy: ReferencePolicy::BestOfSet,
            max_references: 3,
        })
        .unwrap();
        g.enroll("a", "A", &[vec![1.0, 0.0], vec![0.9, 0.1]]).unwrap();
        let n = g
            .extend("a", &[vec![0.8, 0.2], vec![0.0, 1.0]])
            .unwrap();
        assert_eq!(n, 3);
        // Oldest pose was dropped.
        let refs = g.get("a").unwrap().references;
        assert!((refs[2].as_slice()[1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_concurrent_queries_see_whole_identities() {
        let g = Arc::new(gallery(2));
        g.enroll("a", "A", &[vec![1.0, 0.0]]).unwrap();

        let writer = {
            let g = Arc::clone(&g);
            thread::spawn(move || {
                for i in 0..200 {
                    let refs = if i % 2 == 0 {
                        vec![vec![0.0, 1.0], vec![0.0, 1.0]]
                    } else {
                        vec![vec![1.0, 0.0]]
                    };
                    g.enroll("a", "A", &refs).unwrap();
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let g = Arc::clone(&g);
                thread::spawn(move || {
                    for _ in 0..500 {
                        let ident = g.get("a").unwrap();
                        // Either the one-pose or the two-pose version, never mixed.
                        let first = ident.references[0].as_slice()[0];
                        if ident.references.len() == 2 {
                            assert!(first.abs() < 1e-6);
                        } else {
                            assert!((first - 1.0).abs() < 1e-6);
                        }
                        assert_eq!(g.query_raw(&[1.0, 0.0]).unwrap().len(), 1);
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
    }
}
