//! Similarity scoring under a metric and a quantization policy.

use std::borrow::Cow;

use crate::distance::Metric;
use crate::quantization::{binary, EncodedVector, Quantization, Quantizer};

/// Metric plus quantizer: everything needed to compare a query against
/// stored vectors.
///
/// Indexes rank by [`Scorer::distance`] (lower is closer); callers see
/// [`Scorer::similarity`] (higher is closer).
#[derive(Debug, Clone)]
pub struct Scorer {
    metric: Metric,
    quantizer: Quantizer,
}

impl Scorer {
    pub fn new(metric: Metric, quantizer: Quantizer) -> Self {
        Self { metric, quantizer }
    }

    /// Full-precision scorer.
    pub fn exact(metric: Metric, dimension: usize) -> Self {
        Self::new(metric, Quantizer::new(Quantization::None, dimension))
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn quantizer(&self) -> &Quantizer {
        &self.quantizer
    }

    pub fn quantization(&self) -> Quantization {
        self.quantizer.kind()
    }

    pub fn dimension(&self) -> usize {
        self.quantizer.dimension()
    }

    /// Quantize an already-prepared (normalized where required) vector.
    pub fn encode(&self, vector: &[f32]) -> EncodedVector {
        self.quantizer.encode(vector)
    }

    pub fn decode<'a>(&self, code: &'a EncodedVector) -> Cow<'a, [f32]> {
        self.quantizer.decode(code)
    }

    /// Distance from a full-precision query to a stored code; lower is closer.
    #[inline]
    pub fn distance(&self, query: &[f32], code: &EncodedVector) -> f32 {
        self.quantizer.distance(self.metric, query, code)
    }

    /// Distance between two stored codes (graph construction and repair).
    #[inline]
    pub fn code_distance(&self, a: &EncodedVector, b: &EncodedVector) -> f32 {
        if let (EncodedVector::Binary(x), EncodedVector::Binary(y)) = (a, b) {
            return binary::code_distance(self.metric, x, y);
        }
        let a = self.decode(a);
        self.distance(&a, b)
    }

    /// Similarity of a query to a stored code; higher is closer.
    #[inline]
    pub fn similarity(&self, query: &[f32], code: &EncodedVector) -> f32 {
        self.metric.similarity_from_distance(self.distance(query, code))
    }

    /// Similarity between two full-precision vectors after `b` passes
    /// through this scorer's quantization policy.
    pub fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        self.similarity(a, &self.encode(b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::normalize;

    #[test]
    fn scalar_round_trip_keeps_unit_axis_similarity() {
        let scorer = Scorer::new(Metric::Cosine, Quantizer::new(Quantization::Scalar, 4));
        let v = normalize(&[1.0, 0.0, 0.0, 0.0]);
        assert!(scorer.score(&v, &v) >= 0.98);
    }

    #[test]
    fn euclidean_scores_are_in_unit_interval() {
        let scorer = Scorer::exact(Metric::Euclidean, 2);
        let s = scorer.score(&[0.0, 0.0], &[3.0, 4.0]);
        assert!((s - 1.0 / 6.0).abs() < 1e-6);
    }

    #[test]
    fn binary_preserves_ranking_of_well_separated_vectors() {
        let scorer = Scorer::new(Metric::Cosine, Quantizer::new(Quantization::Binary, 8));
        let q = normalize(&[1.0, 1.0, 1.0, 1.0, -1.0, -1.0, -1.0, -1.0]);
        let near = normalize(&[0.9, 1.1, 0.8, 1.0, -0.7, -1.0, -1.2, -0.9]);
        let far = normalize(&[-1.0, -1.0, -1.0, -1.0, 1.0, 1.0, 1.0, 1.0]);
        assert!(scorer.score(&q, &near) > scorer.score(&q, &far));
    }
}
