//! Vector kernels.
//!
//! With the `innr` feature (default) the slice kernels are the SIMD
//! implementations from the `innr` crate; without it they fall back to
//! portable loops. The iterator forms score quantized vectors straight from
//! their codes without decoding into a buffer, and are always local.

#[cfg(feature = "innr")]
pub use innr::{cosine, dot, l2_distance, l2_distance_squared, norm};

#[cfg(not(feature = "innr"))]
mod fallback {
    /// Dot product.
    #[inline]
    #[must_use]
    pub fn dot(a: &[f32], b: &[f32]) -> f32 {
        super::dot_iter(a, b.iter().copied())
    }

    /// L2 norm.
    #[inline]
    #[must_use]
    pub fn norm(v: &[f32]) -> f32 {
        dot(v, v).sqrt()
    }

    /// Squared Euclidean distance.
    #[inline]
    #[must_use]
    pub fn l2_distance_squared(a: &[f32], b: &[f32]) -> f32 {
        super::l2_squared_iter(a, b.iter().copied())
    }

    #[inline]
    #[must_use]
    pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
        l2_distance_squared(a, b).sqrt()
    }

    /// Cosine similarity; zero when either side has no length.
    #[inline]
    #[must_use]
    pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
        super::cosine_iter(a, b.iter().copied())
    }
}

#[cfg(not(feature = "innr"))]
pub use fallback::*;

const NORM_EPSILON: f32 = 1e-10;

/// Cosine similarity between a slice and a stream of components.
#[inline]
pub(crate) fn cosine_iter<I: Iterator<Item = f32>>(a: &[f32], b: I) -> f32 {
    let (mut ab, mut aa, mut bb) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        ab += x * y;
        aa += x * x;
        bb += y * y;
    }
    let denom = aa.sqrt() * bb.sqrt();
    if denom > NORM_EPSILON {
        ab / denom
    } else {
        0.0
    }
}

#[inline]
pub(crate) fn dot_iter<I: Iterator<Item = f32>>(a: &[f32], b: I) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[inline]
fn l2_squared_iter<I: Iterator<Item = f32>>(a: &[f32], b: I) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

#[inline]
pub(crate) fn l2_distance_iter<I: Iterator<Item = f32>>(a: &[f32], b: I) -> f32 {
    l2_squared_iter(a, b).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iter_forms_match_slice_kernels() {
        let a = [0.3_f32, -1.2, 4.0, 0.5];
        let b = [1.0_f32, 0.25, -2.0, 3.0];
        assert!((dot(&a, &b) - dot_iter(&a, b.iter().copied())).abs() < 1e-5);
        assert!((l2_distance(&a, &b) - l2_distance_iter(&a, b.iter().copied())).abs() < 1e-5);
        assert!((l2_distance_squared(&a, &b) - l2_squared_iter(&a, b.iter().copied())).abs() < 1e-4);
        assert!((cosine(&a, &b) - cosine_iter(&a, b.iter().copied())).abs() < 1e-5);
    }

    #[test]
    fn slice_kernels_on_known_values() {
        assert!((dot(&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0]) - 32.0).abs() < 1e-6);
        assert!((norm(&[3.0, 4.0]) - 5.0).abs() < 1e-6);
        assert!((l2_distance(&[0.0, 0.0], &[3.0, 4.0]) - 5.0).abs() < 1e-6);
        assert!(cosine(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }

    #[test]
    fn streamed_cosine_of_zero_vector_is_zero() {
        assert_eq!(cosine_iter(&[0.0, 0.0], [1.0, 0.0].into_iter()), 0.0);
    }
}
