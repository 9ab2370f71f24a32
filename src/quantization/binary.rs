//! Sign-bit (1-bit) quantization.
//!
//! Each dimension keeps only its sign. A single magnitude per vector
//! (`norm / sqrt(d)`) is kept so decoded vectors have the original length,
//! which keeps Euclidean and dot scores on a comparable scale.

use crate::distance::Metric;

/// Packed sign bits of one vector.
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryCode {
    pub bits: Vec<u64>,
    pub dimension: usize,
    pub magnitude: f32,
}

impl BinaryCode {
    pub fn encode(vector: &[f32]) -> Self {
        let dimension = vector.len();
        let mut bits = vec![0u64; dimension.div_ceil(64)];
        for (i, &x) in vector.iter().enumerate() {
            if x > 0.0 {
                bits[i / 64] |= 1u64 << (i % 64);
            }
        }
        let norm = crate::simd::norm(vector);
        let magnitude = if dimension == 0 {
            0.0
        } else {
            norm / (dimension as f32).sqrt()
        };
        Self {
            bits,
            dimension,
            magnitude,
        }
    }

    #[inline]
    pub fn is_set(&self, i: usize) -> bool {
        self.bits[i / 64] & (1u64 << (i % 64)) != 0
    }

    /// Decoded components: `+magnitude` where the sign bit is set, else `-magnitude`.
    #[inline]
    pub fn values(&self) -> impl Iterator<Item = f32> + '_ {
        (0..self.dimension).map(move |i| {
            if self.is_set(i) {
                self.magnitude
            } else {
                -self.magnitude
            }
        })
    }

    pub fn memory_bytes(&self) -> usize {
        self.bits.len() * std::mem::size_of::<u64>() + std::mem::size_of::<f32>()
    }
}

/// Number of differing sign bits.
///
/// Codes of different dimensionality are maximally distant.
pub fn hamming_distance(a: &BinaryCode, b: &BinaryCode) -> u32 {
    if a.dimension != b.dimension {
        return u32::MAX;
    }
    a.bits
        .iter()
        .zip(b.bits.iter())
        .map(|(x, y)| (x ^ y).count_ones())
        .sum()
}

/// Metric distance between two decoded codes, from their Hamming distance.
///
/// Decoded components are `±magnitude`, so `h` disagreeing signs out of `d`
/// give `cos = (d - 2h) / d` and the dot and L2 forms follow directly.
pub fn code_distance(metric: Metric, a: &BinaryCode, b: &BinaryCode) -> f32 {
    let h = hamming_distance(a, b);
    if h == u32::MAX {
        return f32::INFINITY;
    }
    let (d, h) = (a.dimension as f32, h as f32);
    let (ma, mb) = (a.magnitude, b.magnitude);
    match metric {
        Metric::Cosine if ma > 0.0 && mb > 0.0 => 2.0 * h / d,
        Metric::Cosine => 1.0,
        Metric::Dot => -(ma * mb * (d - 2.0 * h)),
        Metric::Euclidean => ((d - h) * (ma - mb).powi(2) + h * (ma + mb).powi(2)).sqrt(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signs_survive_encoding() {
        let v = [0.5_f32, -0.1, 2.0, -3.0, 0.0];
        let code = BinaryCode::encode(&v);
        let signs: Vec<bool> = (0..v.len()).map(|i| code.is_set(i)).collect();
        assert_eq!(signs, vec![true, false, true, false, false]);
    }

    #[test]
    fn decoded_norm_matches_original() {
        let v: Vec<f32> = (0..100).map(|i| (i as f32).sin()).collect();
        let decoded: Vec<f32> = BinaryCode::encode(&v).values().collect();
        let n1 = crate::simd::norm(&v);
        let n2 = crate::simd::norm(&decoded);
        assert!((n1 - n2).abs() < 1e-3);
    }

    #[test]
    fn code_distance_matches_decoded_distance() {
        let a: Vec<f32> = (0..70).map(|i| (i as f32 * 0.7).sin()).collect();
        let b: Vec<f32> = (0..70).map(|i| (i as f32 * 1.3).cos() * 2.0).collect();
        let (ca, cb) = (BinaryCode::encode(&a), BinaryCode::encode(&b));
        let da: Vec<f32> = ca.values().collect();
        let db: Vec<f32> = cb.values().collect();
        for metric in [Metric::Cosine, Metric::Euclidean, Metric::Dot] {
            let expected = metric.distance(&da, &db);
            let got = code_distance(metric, &ca, &cb);
            assert!((expected - got).abs() < 1e-3 * expected.abs().max(1.0), "{metric}: {expected} vs {got}");
        }
    }

    #[test]
    fn hamming_counts_flipped_signs_across_words() {
        let a: Vec<f32> = (0..130).map(|_| 1.0).collect();
        let mut b = a.clone();
        b[0] = -1.0;
        b[64] = -1.0;
        b[129] = -1.0;
        assert_eq!(
            hamming_distance(&BinaryCode::encode(&a), &BinaryCode::encode(&b)),
            3
        );
    }
}
