//! Product quantization (PQ).
//!
//! Splits each vector into contiguous sub-blocks and replaces every sub-block
//! with the index of its nearest codeword. Codebooks are learned per
//! sub-block with k-means over a training sample.

use rayon::prelude::*;

use crate::distance::Metric;
use crate::error::{Result, StoreError};
use crate::partitioning::KMeans;

/// Codewords per sub-block; one `u8` code each.
pub const CODEBOOK_SIZE: usize = 256;

/// Trained product quantizer.
#[derive(Debug, Clone)]
pub struct ProductQuantizer {
    dimension: usize,
    num_blocks: usize,
    block_dim: usize,
    codebooks: Vec<Vec<Vec<f32>>>, // [block][codeword][block_dim]
}

impl ProductQuantizer {
    /// Sub-block width for a dimension: 4 when it divides evenly, else 2, else 1.
    pub fn block_width(dimension: usize) -> usize {
        if dimension % 4 == 0 {
            4
        } else if dimension % 2 == 0 {
            2
        } else {
            1
        }
    }

    /// Learn codebooks from `num_vectors` vectors laid out contiguously.
    pub fn train(dimension: usize, vectors: &[f32], num_vectors: usize, seed: u64) -> Result<Self> {
        if dimension == 0 {
            return Err(StoreError::InvalidParameter(
                "product quantizer dimension must be greater than 0".to_string(),
            ));
        }
        if num_vectors == 0 {
            return Err(StoreError::EmptyIndex);
        }
        if vectors.len() < num_vectors * dimension {
            return Err(StoreError::DimensionMismatch {
                expected: num_vectors * dimension,
                actual: vectors.len(),
            });
        }

        let block_dim = Self::block_width(dimension);
        let num_blocks = dimension / block_dim;

        let codebooks = (0..num_blocks)
            .into_par_iter()
            .map(|block| {
                let start = block * block_dim;
                let mut flat = Vec::with_capacity(num_vectors * block_dim);
                for i in 0..num_vectors {
                    let base = i * dimension + start;
                    flat.extend_from_slice(&vectors[base..base + block_dim]);
                }
                let mut kmeans = KMeans::new(block_dim, CODEBOOK_SIZE)?
                    .with_seed(seed.wrapping_add(block as u64));
                kmeans.fit(&flat, num_vectors)?;
                Ok(kmeans.into_centroids())
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            dimension,
            num_blocks,
            block_dim,
            codebooks,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn num_blocks(&self) -> usize {
        self.num_blocks
    }

    /// Codebook indices for each sub-block.
    pub fn quantize(&self, vector: &[f32]) -> Vec<u8> {
        self.codebooks
            .iter()
            .enumerate()
            .map(|(block, codebook)| {
                let start = block * self.block_dim;
                let sub = &vector[start..start + self.block_dim];
                let mut best = 0usize;
                let mut best_dist = f32::INFINITY;
                for (code, codeword) in codebook.iter().enumerate() {
                    let d = Metric::Euclidean.distance(sub, codeword);
                    if d < best_dist {
                        best_dist = d;
                        best = code;
                    }
                }
                best.min(CODEBOOK_SIZE - 1) as u8
            })
            .collect()
    }

    /// Stream the reconstructed components for a code.
    #[inline]
    pub fn reconstruct<'a>(&'a self, codes: &'a [u8]) -> impl Iterator<Item = f32> + 'a {
        codes
            .iter()
            .zip(self.codebooks.iter())
            .flat_map(|(&code, codebook)| codebook[usize::from(code)].iter().copied())
    }

    /// Bytes held by the codebooks.
    pub fn memory_bytes(&self) -> usize {
        self.codebooks
            .iter()
            .map(|cb| cb.len() * self.block_dim * std::mem::size_of::<f32>())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_width_prefers_four() {
        assert_eq!(ProductQuantizer::block_width(128), 4);
        assert_eq!(ProductQuantizer::block_width(6), 2);
        assert_eq!(ProductQuantizer::block_width(7), 1);
    }

    #[test]
    fn exact_reconstruction_when_codebook_covers_training_set() {
        // Fewer training vectors than codewords: every vector becomes a codeword.
        let data: Vec<f32> = (0..10 * 8).map(|i| (i as f32 * 0.13).sin()).collect();
        let pq = ProductQuantizer::train(8, &data, 10, 3).unwrap();
        assert_eq!(pq.num_blocks(), 2);

        for i in 0..10 {
            let v = &data[i * 8..(i + 1) * 8];
            let codes = pq.quantize(v);
            let back: Vec<f32> = pq.reconstruct(&codes).collect();
            for (a, b) in v.iter().zip(back.iter()) {
                assert!((a - b).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn rejects_empty_training_set() {
        assert!(matches!(
            ProductQuantizer::train(4, &[], 0, 0),
            Err(StoreError::EmptyIndex)
        ));
    }
}
