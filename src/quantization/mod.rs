//! Vector quantization: compress vectors while preserving distance.
//!
//! | Policy | Bits/dim | Compression | Notes |
//! |--------|----------|-------------|-------|
//! | `none` | 32 | 1x | Baseline accuracy |
//! | `scalar` | 8 | ~4x | Per-vector min/max linear map to `u8` |
//! | `product` | 2-4 | 8-16x | Sub-block codebooks, pass-through until trained |
//! | `binary` | 1 | ~32x | Sign bits; coarse pre-filter, re-rank with `none` |
//!
//! Distances against an [`EncodedVector`] are computed asymmetrically (the
//! query stays full precision) by streaming decoded components straight into
//! the metric kernel, so scoring never allocates.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::distance::Metric;
use crate::error::{Result, StoreError};

pub mod binary;
pub mod product;
pub mod scalar;

pub use binary::{hamming_distance, BinaryCode};
pub use product::ProductQuantizer;
pub use scalar::ScalarCode;

/// Quantization policy applied to stored vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quantization {
    #[default]
    None,
    Scalar,
    Product,
    Binary,
}

impl Quantization {
    pub const ALL: [Quantization; 4] = [
        Quantization::None,
        Quantization::Scalar,
        Quantization::Product,
        Quantization::Binary,
    ];

    /// The next policy in order of increasing compression, wrapping around.
    #[must_use]
    pub fn next(self) -> Self {
        match self {
            Quantization::None => Quantization::Scalar,
            Quantization::Scalar => Quantization::Product,
            Quantization::Product => Quantization::Binary,
            Quantization::Binary => Quantization::None,
        }
    }

    /// Position in [`Quantization::ALL`].
    #[must_use]
    pub fn ordinal(self) -> usize {
        match self {
            Quantization::None => 0,
            Quantization::Scalar => 1,
            Quantization::Product => 2,
            Quantization::Binary => 3,
        }
    }
}

impl fmt::Display for Quantization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quantization::None => write!(f, "none"),
            Quantization::Scalar => write!(f, "scalar"),
            Quantization::Product => write!(f, "product"),
            Quantization::Binary => write!(f, "binary"),
        }
    }
}

/// A stored vector in its quantized representation.
#[derive(Debug, Clone, PartialEq)]
pub enum EncodedVector {
    /// Full-precision components.
    Full(Vec<f32>),
    /// 8-bit scalar codes.
    Scalar(ScalarCode),
    /// One codeword index per sub-block.
    Product(Vec<u8>),
    /// Packed sign bits.
    Binary(BinaryCode),
}

impl EncodedVector {
    /// Approximate heap footprint of the encoded payload.
    #[must_use]
    pub fn memory_bytes(&self) -> usize {
        match self {
            EncodedVector::Full(v) => v.len() * std::mem::size_of::<f32>(),
            EncodedVector::Scalar(code) => code.memory_bytes(),
            EncodedVector::Product(codes) => codes.len(),
            EncodedVector::Binary(code) => code.memory_bytes(),
        }
    }
}

/// Encodes, decodes and scores vectors under one quantization policy.
///
/// Cheap to clone: trained product codebooks are shared behind an `Arc`.
#[derive(Debug, Clone)]
pub struct Quantizer {
    kind: Quantization,
    dimension: usize,
    product: Option<Arc<ProductQuantizer>>,
}

impl Quantizer {
    pub fn new(kind: Quantization, dimension: usize) -> Self {
        Self {
            kind,
            dimension,
            product: None,
        }
    }

    /// Attach trained product codebooks.
    pub fn with_product_quantizer(mut self, pq: Arc<ProductQuantizer>) -> Result<Self> {
        if pq.dimension() != self.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                actual: pq.dimension(),
            });
        }
        self.product = Some(pq);
        Ok(self)
    }

    pub fn kind(&self) -> Quantization {
        self.kind
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn product_quantizer(&self) -> Option<&Arc<ProductQuantizer>> {
        self.product.as_ref()
    }

    /// Whether encoding actually compresses. Product quantization without
    /// trained codebooks passes vectors through unchanged.
    pub fn is_trained(&self) -> bool {
        self.kind != Quantization::Product || self.product.is_some()
    }

    /// Quantize a vector.
    pub fn encode(&self, vector: &[f32]) -> EncodedVector {
        match (self.kind, &self.product) {
            (Quantization::None, _) | (Quantization::Product, None) => {
                EncodedVector::Full(vector.to_vec())
            }
            (Quantization::Scalar, _) => EncodedVector::Scalar(ScalarCode::encode(vector)),
            (Quantization::Product, Some(pq)) => EncodedVector::Product(pq.quantize(vector)),
            (Quantization::Binary, _) => EncodedVector::Binary(BinaryCode::encode(vector)),
        }
    }

    /// Reconstruct an approximation of the original vector.
    pub fn decode<'a>(&self, code: &'a EncodedVector) -> Cow<'a, [f32]> {
        match code {
            EncodedVector::Full(v) => Cow::Borrowed(v.as_slice()),
            EncodedVector::Scalar(c) => Cow::Owned(c.values().collect()),
            EncodedVector::Binary(c) => Cow::Owned(c.values().collect()),
            EncodedVector::Product(codes) => match &self.product {
                Some(pq) => Cow::Owned(pq.reconstruct(codes).collect()),
                None => Cow::Owned(vec![0.0; self.dimension]),
            },
        }
    }

    /// Number of components `code` decodes to.
    pub fn encoded_dimension(&self, code: &EncodedVector) -> usize {
        match code {
            EncodedVector::Full(v) => v.len(),
            EncodedVector::Scalar(c) => c.codes.len(),
            EncodedVector::Binary(c) => c.dimension,
            EncodedVector::Product(_) => self.dimension,
        }
    }

    /// Asymmetric distance between a full-precision query and a stored code.
    #[inline]
    pub fn distance(&self, metric: Metric, query: &[f32], code: &EncodedVector) -> f32 {
        match code {
            EncodedVector::Full(v) => metric.distance(query, v),
            EncodedVector::Scalar(c) => metric.distance_iter(query, c.values()),
            EncodedVector::Binary(c) => metric.distance_iter(query, c.values()),
            EncodedVector::Product(codes) => match &self.product {
                Some(pq) => metric.distance_iter(query, pq.reconstruct(codes)),
                None => f32::INFINITY,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untrained_product_is_pass_through() {
        let q = Quantizer::new(Quantization::Product, 4);
        assert!(!q.is_trained());
        let v = [0.5_f32, -0.5, 0.5, -0.5];
        assert_eq!(q.encode(&v), EncodedVector::Full(v.to_vec()));
    }

    #[test]
    fn compression_ordering_by_memory() {
        let v: Vec<f32> = (0..128).map(|i| (i as f32 * 0.37).sin()).collect();
        let full = Quantizer::new(Quantization::None, 128).encode(&v).memory_bytes();
        let scalar = Quantizer::new(Quantization::Scalar, 128).encode(&v).memory_bytes();
        let binary = Quantizer::new(Quantization::Binary, 128).encode(&v).memory_bytes();
        assert_eq!(full, 512);
        assert!(scalar * 3 < full);
        assert!(binary * 20 < full);
    }

    #[test]
    fn scalar_distance_matches_decoded_distance() {
        let q = Quantizer::new(Quantization::Scalar, 3);
        let code = q.encode(&[0.1, 0.7, -0.3]);
        let query = [0.2_f32, 0.5, 0.0];
        let decoded = q.decode(&code);
        let direct = q.distance(Metric::Euclidean, &query, &code);
        let via_decode = Metric::Euclidean.distance(&query, &decoded);
        assert!((direct - via_decode).abs() < 1e-6);
    }

    #[test]
    fn next_cycles_through_every_policy() {
        let mut seen = vec![Quantization::None];
        let mut q = Quantization::None.next();
        while q != Quantization::None {
            seen.push(q);
            q = q.next();
        }
        assert_eq!(seen.len(), Quantization::ALL.len());
    }
}
