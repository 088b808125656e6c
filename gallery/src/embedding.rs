use std::fmt;
use std::sync::Arc;

use crate::cosine::{l2_norm, unit_distance};
use crate::error::GalleryError;

/// Norms below this are treated as degenerate and cannot be normalized.
const MIN_NORM: f64 = 1e-6;

/// An immutable, L2-normalized face embedding of fixed dimension.
///
/// Cloning is cheap: the values are shared behind an `Arc`.
#[derive(Clone, PartialEq)]
pub struct Embedding {
    values: Arc<[f32]>,
}

impl Embedding {
    /// Validates `values` against `dim` and returns the normalized embedding.
    ///
    /// Fails if the length differs from `dim`, if any value is not finite,
    /// or if the vector has (near) zero magnitude.
    pub fn new(values: &[f32], dim: usize) -> Result<Self, GalleryError> {
        if values.len() != dim {
            return Err(GalleryError::DimensionMismatch {
                expected: dim,
                got: values.len(),
            });
        }
        if let Some(i) = values.iter().position(|v| !v.is_finite()) {
            return Err(GalleryError::InvalidEmbedding(format!(
                "non-finite value at index {i}"
            )));
        }
        let norm = l2_norm(values);
        if norm < MIN_NORM {
            return Err(GalleryError::InvalidEmbedding(
                "zero-magnitude vector cannot be normalized".into(),
            ));
        }
        let values: Arc<[f32]> = values
            .iter()
            .map(|&v| (v as f64 / norm) as f32)
            .collect();
        Ok(Self { values })
    }

    /// Returns the number of components.
    pub fn dim(&self) -> usize {
        self.values.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    /// Cosine distance to another embedding, in `[0, 2]`.
    pub fn distance(&self, other: &Embedding) -> f32 {
        unit_distance(&self.values, &other.values)
    }

    /// Returns the normalized mean of `embeddings`, or `None` if the slice is
    /// empty or the mean collapses to zero (e.g. two opposite vectors).
    pub fn centroid(embeddings: &[Embedding]) -> Option<Embedding> {
        let first = embeddings.first()?;
        let mut sum = vec![0.0f32; first.dim()];
        for emb in embeddings {
            for (acc, &v) in sum.iter_mut().zip(emb.as_slice()) {
                *acc += v;
            }
        }
        Embedding::new(&sum, first.dim()).ok()
    }
}

impl fmt::Debug for Embedding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Embedding")
            .field("dim", &self.values.len())
            .finish()
    }
}

impl AsRef<[f32]> for Embedding {
    fn as_ref(&self) -> &[f32] {
        &self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalizes_on_creation() {
        let e = Embedding::new(&[3.0, 4.0], 2).unwrap();
        assert!((e.as_slice()[0] - 0.6).abs() < 1e-6);
        assert!((e.as_slice()[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_rejects_wrong_dimension() {
        let err = Embedding::new(&[1.0, 0.0], 3).unwrap_err();
        assert!(matches!(
            err,
            GalleryError::DimensionMismatch { expected: 3, got: 2 }
        ));
        assert!(err.is_invalid_embedding());
    }

    #[test]
    fn test_rejects_zero_and_nan() {
        assert!(Embedding::new(&[0.0, 0.0], 2).is_err());
        assert!(Embedding::new(&[f32::NAN, 1.0], 2).is_err());
        assert!(Embedding::new(&[f32::INFINITY, 1.0], 2).is_err());
    }

    #[test]
    fn test_distance_between_unit_vectors() {
        let a = Embedding::new(&[1.0, 0.0], 2).unwrap();
        let b = Embedding::new(&[0.0, 5.0], 2).unwrap();
        assert!((a.distance(&b) - 1.0).abs() < 1e-6);
        assert!(a.distance(&a).abs() < 1e-6);
    }

    #[test]
    fn test_centroid_of_two_poses() {
        let a = Embedding::new(&[1.0, 0.0], 2).unwrap();
        let b = Embedding::new(&[0.0, 1.0], 2).unwrap();
        let c = Embedding::centroid(&[a, b]).unwrap();
        let h = std::f32::consts::FRAC_1_SQRT_2;
        assert!((c.as_slice()[0] - h).abs() < 1e-6);
        assert!((c.as_slice()[1] - h).abs() < 1e-6);
    }

    #[test]
    fn test_centroid_of_opposites_is_none() {
        let a = Embedding::new(&[1.0, 0.0], 2).unwrap();
        let b = Embedding::new(&[-1.0, 0.0], 2).unwrap();
        assert!(Embedding::centroid(&[a, b]).is_none());
        assert!(Embedding::centroid(&[]).is_none());
    }
}
