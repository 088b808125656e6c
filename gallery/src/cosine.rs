/// Compute the cosine distance between two vectors.
///
/// Returns a value in `[0, 2]` where 0 means identical direction and
/// 2 means opposite direction.
///
/// Uses f64 intermediate precision.
/// Returns 2.0 for zero vectors or dimension mismatches.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 2.0;
    }

    let mut dot: f64 = 0.0;
    let mut norm_a: f64 = 0.0;
    let mut norm_b: f64 = 0.0;
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (x as f64, y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 2.0;
    }

    // Clamp to [-1, 1] to absorb rounding error.
    let similarity = (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0);
    (1.0 - similarity) as f32
}

/// Cosine distance for vectors that are already unit length.
///
/// Skips the norm computation; only valid for [`crate::Embedding`] values.
pub(crate) fn unit_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 2.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(&x, &y)| x as f64 * y as f64).sum();
    (1.0 - dot.clamp(-1.0, 1.0)) as f32
}

/// Returns the L2 norm of `v`, computed in f64.
pub(crate) fn l2_norm(v: &[f32]) -> f64 {
    v.iter().map(|&x| (x as f64) * (x as f64)).sum::<f64>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical() {
        let d = cosine_distance(&[1.0, 0.0, 0.0], &[1.0, 0.0, 0.0]);
        assert!(d.abs() < 0.001, "identical: got {d}");
    }

    #[test]
    fn test_orthogonal() {
        let d = cosine_distance(&[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0]);
        assert!((d - 1.0).abs() < 0.001, "orthogonal: got {d}");
    }

    #[test]
    fn test_opposite() {
        let d = cosine_distance(&[1.0, 0.0, 0.0], &[-1.0, 0.0, 0.0]);
        assert!((d - 2.0).abs() < 0.001, "opposite: got {d}");
    }

    #[test]
    fn test_magnitude_does_not_matter() {
        let d = cosine_distance(&[3.0, 4.0], &[0.3, 0.4]);
        assert!(d.abs() < 1e-6, "scaled copy: got {d}");
    }

    #[test]
    fn test_dimension_mismatch_is_max_distance() {
        assert_eq!(cosine_distance(&[1.0, 0.0], &[1.0, 0.0, 0.0]), 2.0);
        assert_eq!(unit_distance(&[1.0, 0.0], &[1.0, 0.0, 0.0]), 2.0);
    }

    #[test]
    fn test_zero_vector_is_max_distance() {
        assert_eq!(cosine_distance(&[0.0, 0.0, 0.0], &[1.0, 0.0, 0.0]), 2.0);
    }

    #[test]
    fn test_unit_distance_agrees_with_full() {
        let a = [0.6, 0.8, 0.0];
        let b = [0.0, 0.6, 0.8];
        assert!((unit_distance(&a, &b) - cosine_distance(&a, &b)).abs() < 1e-6);
    }
}
