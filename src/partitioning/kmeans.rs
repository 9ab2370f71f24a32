//! k-means clustering implementation.
//!
//! Shared by the IVF coarse quantizer (cell centroids) and product
//! quantization (per-sub-block codebooks).

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::distance::Metric;
use crate::error::{Result, StoreError};

const DEFAULT_MAX_ITERATIONS: usize = 25;
const CONVERGENCE_EPSILON: f32 = 1e-5;

/// k-means clustering over vectors stored contiguously (SoA).
///
/// Uses k-means++ initialization and Lloyd refinement. Assignment runs in
/// parallel; the result is deterministic for a given seed.
#[derive(Debug, Clone)]
pub struct KMeans {
    centroids: Vec<Vec<f32>>,
    dimension: usize,
    k: usize,
    metric: Metric,
    max_iterations: usize,
    seed: u64,
}

impl KMeans {
    /// Create new k-means with k clusters.
    pub fn new(dimension: usize, k: usize) -> Result<Self> {
        if dimension == 0 || k == 0 {
            return Err(StoreError::InvalidParameter(
                "k-means dimension and k must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            centroids: Vec::new(),
            dimension,
            k,
            metric: Metric::Euclidean,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            seed: 0,
        })
    }

    /// Seed for k-means++ initialization.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Metric used for assignment. Cosine clusters by angle; every other
    /// metric clusters by Euclidean distance.
    #[must_use]
    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.metric = match metric {
            Metric::Cosine => Metric::Cosine,
            Metric::Euclidean | Metric::Dot => Metric::Euclidean,
        };
        self
    }

    #[must_use]
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    /// Train on `num_vectors` vectors laid out contiguously in `vectors`.
    ///
    /// When fewer vectors than clusters are supplied, `k` shrinks to the
    /// number of vectors.
    pub fn fit(&mut self, vectors: &[f32], num_vectors: usize) -> Result<()> {
        if num_vectors == 0 {
            return Err(StoreError::EmptyIndex);
        }
        if vectors.len() < num_vectors * self.dimension {
            return Err(StoreError::InvalidParameter(format!(
                "k-means expected {} floats, got {}",
                num_vectors * self.dimension,
                vectors.len()
            )));
        }
        self.k = self.k.min(num_vectors);

        self.centroids = self.kmeans_plus_plus(vectors, num_vectors);

        for _ in 0..self.max_iterations {
            let assignments = self.assign_clusters(vectors, num_vectors);
            let new_centroids = self.update_centroids(vectors, &assignments);

            let converged = self
                .centroids
                .iter()
                .zip(new_centroids.iter())
                .all(|(old, new)| Metric::Euclidean.distance(old, new) <= CONVERGENCE_EPSILON);

            self.centroids = new_centroids;
            if converged {
                break;
            }
        }

        Ok(())
    }

    fn kmeans_plus_plus(&self, vectors: &[f32], num_vectors: usize) -> Vec<Vec<f32>> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut centroids: Vec<Vec<f32>> = Vec::with_capacity(self.k);

        let first = rng.random_range(0..num_vectors);
        centroids.push(self.get_vector(vectors, first).to_vec());

        // Distance from each point to its nearest chosen centroid, kept current
        // incrementally instead of rescanning every centroid.
        let mut nearest: Vec<f32> = (0..num_vectors)
            .map(|i| self.distance(self.get_vector(vectors, i), &centroids[0]))
            .collect();

        while centroids.len() < self.k {
            let total: f64 = nearest.iter().map(|&d| f64::from(d * d)).sum();
            let chosen = if total <= f64::EPSILON {
                // Every point coincides with a centroid; fall back to uniform picks.
                rng.random_range(0..num_vectors)
            } else {
                let threshold = rng.random::<f64>() * total;
                let mut cumulative = 0.0;
                let mut chosen = num_vectors - 1;
                for (i, &d) in nearest.iter().enumerate() {
                    cumulative += f64::from(d * d);
                    if cumulative >= threshold {
                        chosen = i;
                        break;
                    }
                }
                chosen
            };

            let centroid = self.get_vector(vectors, chosen).to_vec();
            for (i, slot) in nearest.iter_mut().enumerate() {
                let d = self.distance(self.get_vector(vectors, i), &centroid);
                if d < *slot {
                    *slot = d;
                }
            }
            centroids.push(centroid);
        }

        centroids
    }

    /// Assign every vector to its nearest centroid.
    pub fn assign_clusters(&self, vectors: &[f32], num_vectors: usize) -> Vec<usize> {
        (0..num_vectors)
            .into_par_iter()
            .map(|i| self.assign(self.get_vector(vectors, i)))
            .collect()
    }

    /// Index of the centroid nearest to `vector`.
    pub fn assign(&self, vector: &[f32]) -> usize {
        nearest_centroid(&self.centroids, vector, self.metric)
    }

    fn update_centroids(&self, vectors: &[f32], assignments: &[usize]) -> Vec<Vec<f32>> {
        let mut sums = vec![vec![0.0f32; self.dimension]; self.centroids.len()];
        let mut counts = vec![0usize; self.centroids.len()];

        for (i, &cluster) in assignments.iter().enumerate() {
            counts[cluster] += 1;
            for (acc, &val) in sums[cluster].iter_mut().zip(self.get_vector(vectors, i)) {
                *acc += val;
            }
        }

        sums.into_iter()
            .zip(counts)
            .zip(self.centroids.iter())
            .map(|((sum, count), old)| {
                if count == 0 {
                    // Empty cluster keeps its previous position.
                    old.clone()
                } else {
                    sum.into_iter().map(|s| s / count as f32).collect()
                }
            })
            .collect()
    }

    fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        self.metric.distance(a, b)
    }

    fn get_vector<'a>(&self, vectors: &'a [f32], idx: usize) -> &'a [f32] {
        let start = idx * self.dimension;
        &vectors[start..start + self.dimension]
    }

    /// Trained centroids (empty before `fit`).
    pub fn centroids(&self) -> &[Vec<f32>] {
        &self.centroids
    }

    /// Consume the model, returning its centroids.
    pub fn into_centroids(self) -> Vec<Vec<f32>> {
        self.centroids
    }
}

/// Index of the centroid nearest to `vector` (ties go to the lower index).
pub(crate) fn nearest_centroid(centroids: &[Vec<f32>], vector: &[f32], metric: Metric) -> usize {
    let mut best = 0;
    let mut best_dist = f32::INFINITY;
    for (idx, centroid) in centroids.iter().enumerate() {
        let dist = metric.distance(vector, centroid);
        if dist < best_dist {
            best_dist = dist;
            best = idx;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn two_blobs() -> Vec<f32> {
        let mut v = Vec::new();
        for i in 0..20 {
            let jitter = i as f32 * 0.001;
            v.extend_from_slice(&[0.0 + jitter, 0.0]);
            v.extend_from_slice(&[10.0 + jitter, 10.0]);
        }
        v
    }

    #[test]
    fn separates_obvious_clusters() {
        let data = two_blobs();
        let mut km = KMeans::new(2, 2).unwrap().with_seed(7);
        km.fit(&data, 40).unwrap();

        let assignments = km.assign_clusters(&data, 40);
        // Even rows are blob A, odd rows blob B.
        let a = assignments[0];
        let b = assignments[1];
        assert_ne!(a, b);
        for (i, &c) in assignments.iter().enumerate() {
            assert_eq!(c, if i % 2 == 0 { a } else { b });
        }
    }

    #[test]
    fn k_shrinks_to_number_of_vectors() {
        let data = [1.0_f32, 0.0, 0.0, 1.0];
        let mut km = KMeans::new(2, 8).unwrap();
        km.fit(&data, 2).unwrap();
        assert_eq!(km.centroids().len(), 2);
    }

    #[test]
    fn rejects_zero_k() {
        assert!(KMeans::new(4, 0).is_err());
    }

    proptest! {
        #[test]
        fn prop_fit_is_deterministic_given_seed(
            seed in any::<u64>(),
            dimension in 1usize..8,
            num_vectors in 2usize..48,
            k in 1usize..8,
            raw in proptest::collection::vec(-1.0f32..1.0f32, 8 * 48),
        ) {
            prop_assume!(k <= num_vectors);
            let vectors = raw[..num_vectors * dimension].to_vec();

            let mut km1 = KMeans::new(dimension, k).unwrap().with_seed(seed);
            let mut km2 = KMeans::new(dimension, k).unwrap().with_seed(seed);
            km1.fit(&vectors, num_vectors).unwrap();
            km2.fit(&vectors, num_vectors).unwrap();

            prop_assert_eq!(
                km1.assign_clusters(&vectors, num_vectors),
                km2.assign_clusters(&vectors, num_vectors)
            );
        }
    }
}
