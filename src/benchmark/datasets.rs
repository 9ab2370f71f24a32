//! Synthetic workloads for recall checks, tuning probes and benches.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::distance::Metric;
use crate::simd;
use crate::store::Record;

/// Noise floor for sources with no length.
const MIN_NOISE_SCALE: f32 = 1e-3;

/// Stored vectors plus held-out queries drawn from the same mixture.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub train: Vec<Vec<f32>>,
    pub test: Vec<Vec<f32>>,
    pub dimension: usize,
}

impl Dataset {
    pub fn n_train(&self) -> usize {
        self.train.len()
    }

    pub fn n_test(&self) -> usize {
        self.test.len()
    }

    /// Stored vectors as records whose ids are their positions.
    pub fn records(&self) -> Vec<Record> {
        self.train
            .iter()
            .enumerate()
            .map(|(i, v)| Record::new(i.to_string(), v.clone()))
            .collect()
    }
}

/// Standard normal sample (Box-Muller).
fn gaussian(rng: &mut StdRng) -> f32 {
    let u1: f32 = 1.0 - rng.random::<f32>();
    let u2: f32 = rng.random();
    (-2.0 * u1.ln()).sqrt() * (std::f32::consts::TAU * u2).cos()
}

/// Gaussian mixture around `n_clusters` centers drawn from `[-1, 1]^d`.
///
/// Centers straddle the origin, so clusters separate under cosine as well
/// as Euclidean distance. Embedding workloads look like this far more than
/// uniform noise does, which is what the tuner's estimates assume.
pub fn create_clustered_dataset(
    n_train: usize,
    n_test: usize,
    dimension: usize,
    n_clusters: usize,
    cluster_std: f32,
    seed: u64,
) -> Dataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let centers: Vec<Vec<f32>> = (0..n_clusters.max(1))
        .map(|_| (0..dimension).map(|_| rng.random_range(-1.0..1.0)).collect())
        .collect();

    let point = |rng: &mut StdRng| -> Vec<f32> {
        let center = &centers[rng.random_range(0..centers.len())];
        center.iter().map(|&c| c + cluster_std * gaussian(rng)).collect()
    };
    let train = (0..n_train).map(|_| point(&mut rng)).collect();
    let test = (0..n_test).map(|_| point(&mut rng)).collect();

    Dataset {
        train,
        test,
        dimension,
    }
}

/// Held-out queries near `sources`.
///
/// Each source gets seeded Gaussian noise with per-component standard
/// deviation `relative_noise` times the source's RMS component, so no query
/// coincides with a stored vector while staying inside its neighborhood.
pub fn perturbed_queries<'a, I>(sources: I, relative_noise: f32, seed: u64) -> Vec<Vec<f32>>
where
    I: IntoIterator<Item = &'a [f32]>,
{
    let mut rng = StdRng::seed_from_u64(seed);
    sources
        .into_iter()
        .map(|v| {
            let rms = simd::norm(v) / (v.len().max(1) as f32).sqrt();
            let sigma = relative_noise * rms.max(MIN_NOISE_SCALE);
            v.iter().map(|&x| x + sigma * gaussian(&mut rng)).collect()
        })
        .collect()
}

/// Positions of the `k` nearest stored vectors, nearest first; equal
/// distances rank the earlier position first.
pub fn compute_ground_truth(query: &[f32], database: &[Vec<f32>], k: usize, metric: Metric) -> Vec<u32> {
    let mut ranked: Vec<(f32, u32)> = database
        .iter()
        .zip(0u32..)
        .map(|(v, i)| (metric.distance(query, v), i))
        .collect();
    ranked.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
    ranked.truncate(k);
    ranked.into_iter().map(|(_, i)| i).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_and_determinism() {
        let a = create_clustered_dataset(300, 30, 24, 6, 0.1, 42);
        assert_eq!((a.n_train(), a.n_test()), (300, 30));
        assert!(a.train.iter().chain(&a.test).all(|v| v.len() == 24));

        let b = create_clustered_dataset(300, 30, 24, 6, 0.1, 42);
        assert_eq!(a.train, b.train);
        assert_ne!(a.train, create_clustered_dataset(300, 30, 24, 6, 0.1, 43).train);
    }

    #[test]
    fn records_are_keyed_by_position() {
        let d = create_clustered_dataset(3, 0, 2, 1, 0.1, 1);
        let records = d.records();
        assert_eq!(records[2].id, "2");
        assert_eq!(records[2].values, d.train[2]);
    }

    #[test]
    fn perturbed_queries_stay_close_but_never_coincide() {
        let d = create_clustered_dataset(50, 0, 16, 4, 0.1, 8);
        let queries = perturbed_queries(d.train.iter().map(Vec::as_slice), 0.25, 3);
        assert_eq!(queries.len(), 50);
        for (q, v) in queries.iter().zip(&d.train) {
            assert!(!d.train.contains(q));
            assert!(Metric::Cosine.distance(q, v) < 0.2);
        }
        assert_eq!(queries, perturbed_queries(d.train.iter().map(Vec::as_slice), 0.25, 3));

        let zero = perturbed_queries([[0.0f32; 4].as_slice()], 1.0, 0);
        assert!(zero[0].iter().any(|&x| x != 0.0));
    }

    #[test]
    fn ground_truth_breaks_ties_on_position() {
        let database = vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.0, 0.0], vec![-1.0, 0.0]];
        let gt = compute_ground_truth(&[0.0, 0.0], &database, 3, Metric::Euclidean);
        assert_eq!(gt, vec![2, 0, 1]);
    }
}
