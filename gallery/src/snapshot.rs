//! JSON persistence for gallery contents.
//!
//! A snapshot is a plain serde document; loading runs every reference
//! through the same validation as [`Gallery::enroll`].

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::embedding::Embedding;
use crate::error::GalleryError;
use crate::gallery::{Gallery, GalleryConfig, State};
use crate::identity::Identity;

/// Serialized form of a whole gallery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GallerySnapshot {
    pub dim: usize,
    #[serde(default)]
    pub version: u64,
    pub identities: Vec<IdentityRecord>,
}

/// Serialized form of one [`Identity`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub id: String,
    pub name: String,
    #[serde(default = "default_active")]
    pub active: bool,
    pub enrolled_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub references: Vec<Vec<f32>>,
}

fn default_active() -> bool {
    true
}

impl Gallery {
    /// Captures the current contents, sorted by identity id.
    pub fn snapshot(&self) -> GallerySnapshot {
        let state = self.snapshot_state();
        let mut identities: Vec<IdentityRecord> = state
            .identities
            .values()
            .map(|ident| IdentityRecord {
                id: ident.id.clone(),
                name: ident.name.clone(),
                active: ident.active,
                enrolled_at: ident.enrolled_at,
                updated_at: ident.updated_at,
                references: ident.references.iter().map(|e| e.as_slice().to_vec()).collect(),
            })
            .collect();
        identities.sort_by(|a, b| a.id.cmp(&b.id));
        GallerySnapshot {
            dim: self.dim(),
            version: state.version,
            identities,
        }
    }

    /// Rebuilds a gallery from a snapshot.
    ///
    /// The snapshot dimension must match `cfg.dim`; a mismatch is a
    /// configuration error, not something to coerce.
    pub fn from_snapshot(cfg: GalleryConfig, snap: GallerySnapshot) -> Result<Self, GalleryError> {
        if snap.dim != cfg.dim {
            return Err(GalleryError::DimensionMismatch {
                expected: cfg.dim,
                got: snap.dim,
            });
        }

        let mut identities = HashMap::with_capacity(snap.identities.len());
        for rec in snap.identities {
            if rec.references.is_empty() {
                return Err(GalleryError::EmptyReferences(rec.id));
            }
            let refs = rec
                .references
                .iter()
                .map(|v| Embedding::new(v, cfg.dim))
                .collect::<Result<Vec<_>, _>>()?;
            let mut ident = Identity::new(rec.id.clone(), rec.name, refs, rec.enrolled_at);
            ident.active = rec.active;
            ident.updated_at = rec.updated_at;
            if identities.insert(rec.id.clone(), ident).is_some() {
                return Err(GalleryError::Format(format!("duplicate identity {}", rec.id)));
            }
        }

        Gallery::from_state(
            cfg,
            State {
                version: snap.version,
                identities,
            },
        )
    }

    /// Writes the snapshot as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), GalleryError> {
        let path = path.as_ref();
        let snap = self.snapshot();
        let data =
            serde_json::to_vec_pretty(&snap).map_err(|e| GalleryError::Format(e.to_string()))?;
        fs::write(path, data)?;
        info!(path = %path.display(), identities = snap.identities.len(), "gallery saved");
        Ok(())
    }

    /// Loads a gallery previously written by [`Gallery::save`].
    pub fn load(path: impl AsRef<Path>, cfg: GalleryConfig) -> Result<Self, GalleryError> {
        let path = path.as_ref();
        let data = fs::read(path)?;
        let snap: GallerySnapshot =
            serde_json::from_slice(&data).map_err(|e| GalleryError::Format(e.to_string()))?;
        let gallery = Self::from_snapshot(cfg, snap)?;
        info!(path = %path.display(), identities = gallery.len(), "gallery loaded");
        Ok(gallery)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn populated() -> Gallery {
        let g = Gallery::new(GalleryConfig::new(3)).unwrap();
        g.enroll("a", "Asha", &[vec![1.0, 0.0, 0.0], vec![0.9, 0.1, 0.0]])
            .unwrap();
        g.enroll("b", "Bilal", &[vec![0.0, 1.0, 0.0]]).unwrap();
        g.deactivate("b").unwrap();
        g
    }

    #[test]
    fn test_save_and_load_preserves_identities() {
        let g = populated();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gallery.json");
        g.save(&path).unwrap();

        let loaded = Gallery::load(&path, GalleryConfig::new(3)).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.version(), g.version());
        assert_eq!(loaded.active_ids(), vec!["a".to_string()]);

        let a = loaded.get("a").unwrap();
        assert_eq!(a.name, "Asha");
        let original = g.get("a").unwrap().references;
        assert_eq!(a.references.len(), original.len());
        for (x, y) in a.references.iter().zip(&original) {
            assert!(x.distance(y) < 1e-6);
        }
        assert!(!loaded.get("b").unwrap().active);
    }

    #[test]
    fn test_snapshot_dimension_must_match() {
        let snap = populated().snapshot();
        let err = Gallery::from_snapshot(GalleryConfig::new(4), snap).unwrap_err();
        assert!(matches!(
            err,
            GalleryError::DimensionMismatch { expected: 4, got: 3 }
        ));
    }

    #[test]
    fn test_corrupt_reference_rejected() {
        let mut snap = populated().snapshot();
        snap.identities[0].references[0] = vec![0.0, 0.0, 0.0];
        assert!(Gallery::from_snapshot(GalleryConfig::new(3), snap).is_err());
    }

    #[test]
    fn test_duplicate_identity_rejected() {
        let mut snap = populated().snapshot();
        let dup = snap.identities[0].clone();
        snap.identities.push(dup);
        assert!(matches!(
            Gallery::from_snapshot(GalleryConfig::new(3), snap),
            Err(GalleryError::Format(_))
        ));
    }

    #[test]
    fn test_load_garbage_is_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gallery.json");
        fs::write(&path, b"not json").unwrap();
        assert!(matches!(
            Gallery::load(&path, GalleryConfig::new(3)),
            Err(GalleryError::Format(_))
        ));
    }
}
