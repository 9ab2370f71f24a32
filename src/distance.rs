//! Distance metrics for dense vectors.
//!
//! Indexes order candidates by a *distance* (lower is closer). Callers only
//! ever see a *similarity* (higher is closer), produced by
//! [`Metric::similarity_from_distance`], so every metric shares one ordering
//! direction at the API boundary:
//!
//! | Metric | Distance | Similarity |
//! |--------|----------|------------|
//! | Cosine | $1 - \cos(a,b)$ | $\cos(a,b)$ |
//! | Euclidean | $\lVert a-b \rVert$ | $1 / (1 + \lVert a-b \rVert)$ |
//! | Dot | $-\langle a,b\rangle$ | $\langle a,b\rangle$ |
//!
//! Cosine distance computes norms, so it stays correct for quantized vectors
//! whose decoded form is no longer exactly unit length.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::simd;

/// Distance metric for dense vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Cosine similarity. Vectors are L2-normalized on write.
    #[default]
    Cosine,
    /// Euclidean (L2) distance.
    Euclidean,
    /// Inner product (maximum inner product search).
    Dot,
}

impl Metric {
    /// Distance between two vectors; lower is closer.
    ///
    /// Mismatched lengths yield `f32::INFINITY` so the pair is never selected.
    #[inline]
    #[must_use]
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() {
            return f32::INFINITY;
        }
        match self {
            Metric::Cosine => {
                let c = simd::cosine(a, b);
                if c.is_finite() {
                    1.0 - c.clamp(-1.0, 1.0)
                } else {
                    1.0
                }
            }
            Metric::Euclidean => simd::l2_distance(a, b),
            Metric::Dot => -simd::dot(a, b),
        }
    }

    /// Distance between a query slice and a stream of components.
    #[inline]
    pub(crate) fn distance_iter<I: Iterator<Item = f32>>(self, a: &[f32], b: I) -> f32 {
        match self {
            Metric::Cosine => 1.0 - simd::cosine_iter(a, b).clamp(-1.0, 1.0),
            Metric::Euclidean => simd::l2_distance_iter(a, b),
            Metric::Dot => -simd::dot_iter(a, b),
        }
    }

    /// Convert a distance produced by this metric into a similarity.
    #[inline]
    #[must_use]
    pub fn similarity_from_distance(self, distance: f32) -> f32 {
        match self {
            Metric::Cosine => 1.0 - distance,
            Metric::Euclidean => 1.0 / (1.0 + distance),
            Metric::Dot => -distance,
        }
    }

    /// Similarity between two vectors; higher is closer.
    #[inline]
    #[must_use]
    pub fn similarity(self, a: &[f32], b: &[f32]) -> f32 {
        self.similarity_from_distance(self.distance(a, b))
    }

    /// Whether stored vectors are normalized on write.
    #[must_use]
    pub fn normalizes(self) -> bool {
        matches!(self, Metric::Cosine)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Cosine => write!(f, "cosine"),
            Metric::Euclidean => write!(f, "euclidean"),
            Metric::Dot => write!(f, "dot"),
        }
    }
}

/// Normalize a vector to unit L2 norm.
///
/// Zero vectors are returned unchanged.
#[inline]
#[must_use]
pub fn normalize(v: &[f32]) -> Vec<f32> {
    let mut out = v.to_vec();
    normalize_in_place(&mut out);
    out
}

/// Normalize a vector to unit L2 norm in place.
#[inline]
pub fn normalize_in_place(v: &mut [f32]) {
    let n = simd::norm(v);
    if n < 1e-10 {
        return;
    }
    for x in v.iter_mut() {
        *x /= n;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_distance_is_zero_for_identical() {
        let a = [1.0_f32, 2.0, 3.0];
        assert!(Metric::Cosine.distance(&a, &a).abs() < 1e-6);
        assert!((Metric::Cosine.similarity(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn euclidean_similarity_is_inverse_of_one_plus_distance() {
        let a = [0.0_f32, 0.0];
        let b = [3.0_f32, 4.0];
        assert!((Metric::Euclidean.distance(&a, &b) - 5.0).abs() < 1e-6);
        assert!((Metric::Euclidean.similarity(&a, &b) - 1.0 / 6.0).abs() < 1e-6);
    }

    #[test]
    fn dot_similarity_is_inner_product() {
        let a = [1.0_f32, 2.0];
        let b = [3.0_f32, -1.0];
        assert!((Metric::Dot.similarity(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn closer_means_higher_similarity_for_every_metric() {
        let q = [1.0_f32, 0.2, 0.0];
        let near = [0.9_f32, 0.25, 0.0];
        let far = [-0.5_f32, 1.0, 0.3];
        for metric in [Metric::Cosine, Metric::Euclidean] {
            assert!(metric.distance(&q, &near) < metric.distance(&q, &far));
            assert!(metric.similarity(&q, &near) > metric.similarity(&q, &far));
        }
    }

    #[test]
    fn mismatched_lengths_are_infinitely_far() {
        assert_eq!(Metric::Euclidean.distance(&[1.0], &[1.0, 2.0]), f32::INFINITY);
    }

    #[test]
    fn zero_vector_survives_normalization() {
        assert_eq!(normalize(&[0.0, 0.0]), vec![0.0, 0.0]);
    }
}
