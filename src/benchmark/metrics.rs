//! Evaluation metrics for ANN quality.

use std::collections::HashSet;
use std::time::Duration;

/// Compute recall@k: fraction of true k-nearest neighbors that were retrieved.
///
/// recall@k = |retrieved ∩ ground_truth| / min(k, |ground_truth|)
///
/// When fewer than `k` true neighbors exist (tiny indexes), recall is
/// measured against the ones that do.
pub fn recall_at_k(ground_truth: &[u32], retrieved: &[u32], k: usize) -> f32 {
    let denom = k.min(ground_truth.len());
    if denom == 0 {
        return if ground_truth.is_empty() { 1.0 } else { 0.0 };
    }

    let gt_set: HashSet<u32> = ground_truth.iter().take(k).copied().collect();
    let hits = retrieved
        .iter()
        .take(k)
        .filter(|id| gt_set.contains(id))
        .count();
    hits as f32 / denom as f32
}

/// Mean recall@k across queries.
pub fn mean_recall(ground_truths: &[Vec<u32>], retrievals: &[Vec<u32>], k: usize) -> f32 {
    if ground_truths.is_empty() {
        return 1.0;
    }
    let total: f32 = ground_truths
        .iter()
        .zip(retrievals.iter())
        .map(|(gt, ret)| recall_at_k(gt, ret, k))
        .sum();
    total / ground_truths.len() as f32
}

/// Mean of a set of latency samples.
pub fn mean_latency(samples: &[Duration]) -> Duration {
    if samples.is_empty() {
        return Duration::ZERO;
    }
    samples.iter().sum::<Duration>() / samples.len() as u32
}
