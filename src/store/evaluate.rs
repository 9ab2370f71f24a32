//! Measuring configurations against the store's own data.
//!
//! Candidate indexes are built off to the side from a snapshot of the
//! catalog, so evaluation never blocks writers or touches the live index.
//! Probe queries are held out: sampled vectors with seeded noise added, so
//! no probe finds itself. Recall is measured against exact full-precision
//! search over the same snapshot; latency is wall-clock time of the index's
//! `search`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rayon::prelude::*;

use crate::benchmark::{mean_latency, perturbed_queries, recall_at_k};
use crate::distance::Metric;
use crate::error::{Result, StoreError};
use crate::index::{AnyIndex, IndexParams, IndexStrategy, IndexType, Item, RebuildGuard, TopK};
use crate::quantization::{ProductQuantizer, Quantization, Quantizer};
use crate::scorer::Scorer;
use crate::tuner::{Evaluator, TrialMetrics};
use crate::versioning::Performance;

/// Probe noise relative to the sampled vector's RMS component.
const PROBE_NOISE: f32 = 0.25;

/// Snapshot of stored vectors plus held-out probe queries with exact answers.
#[derive(Debug, Clone)]
pub struct StoreEvaluator {
    index_type: IndexType,
    metric: Metric,
    dimension: usize,
    seed: u64,
    trained_pq: Option<Arc<ProductQuantizer>>,
    items: Vec<(u32, Vec<f32>)>,
    queries: Vec<Vec<f32>>,
    ground_truth: Vec<Vec<u32>>,
    k: usize,
}

impl StoreEvaluator {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        index_type: IndexType,
        metric: Metric,
        dimension: usize,
        seed: u64,
        trained_pq: Option<Arc<ProductQuantizer>>,
        items: Vec<(u32, Vec<f32>)>,
        num_queries: usize,
        k: usize,
    ) -> Result<Self> {
        if items.is_empty() {
            return Err(StoreError::EmptyIndex);
        }
        let num_queries = num_queries.clamp(1, items.len());
        let step = (items.len() / num_queries).max(1);
        let queries = perturbed_queries(
            items.iter().step_by(step).take(num_queries).map(|(_, v)| v.as_slice()),
            PROBE_NOISE,
            seed,
        );

        let ground_truth = queries
            .par_iter()
            .map(|q| {
                let mut top = TopK::new(k);
                for (slot, v) in &items {
                    top.push(*slot, metric.distance(q, v));
                }
                top.into_sorted().into_iter().map(|(slot, _)| slot).collect::<Vec<u32>>()
            })
            .collect();

        Ok(Self {
            index_type,
            metric,
            dimension,
            seed,
            trained_pq,
            items,
            queries,
            ground_truth,
            k,
        })
    }

    pub fn num_queries(&self) -> usize {
        self.queries.len()
    }

    /// Mean recall@k and latency of `index` over the probe queries.
    pub fn measure(
        &self,
        index: &AnyIndex,
        breadth: Option<usize>,
        guard: &RebuildGuard,
    ) -> Result<(f32, Duration)> {
        let mut latencies = Vec::with_capacity(self.queries.len());
        let mut recall = 0.0;
        for (q, truth) in self.queries.iter().zip(&self.ground_truth) {
            guard.check()?;
            let start = Instant::now();
            let found = index.search(q, self.k, breadth);
            latencies.push(start.elapsed());
            let found: Vec<u32> = found.into_iter().map(|(slot, _)| slot).collect();
            recall += recall_at_k(truth, &found, self.k);
        }
        Ok((recall / self.queries.len() as f32, mean_latency(&latencies)))
    }

    /// Performance of the live index, as recorded on a model version.
    pub fn measure_live(&self, index: &AnyIndex) -> Result<Performance> {
        let (recall, latency) = self.measure(index, None, &RebuildGuard::unbounded())?;
        Ok(Performance {
            accuracy: f64::from(recall),
            latency_ms: latency.as_secs_f64() * 1_000.0,
            samples_seen: self.items.len() as u64,
            loss: None,
        })
    }

    fn scorer_for(&self, quantization: Quantization) -> Result<Scorer> {
        let quantizer = Quantizer::new(quantization, self.dimension);
        let quantizer = match (quantization, &self.trained_pq) {
            (Quantization::Product, Some(pq)) => quantizer.with_product_quantizer(Arc::clone(pq))?,
            _ => quantizer,
        };
        Ok(Scorer::new(self.metric, quantizer))
    }
}

impl Evaluator for StoreEvaluator {
    fn index_type(&self) -> IndexType {
        self.index_type
    }

    fn dataset_size(&self) -> usize {
        self.items.len()
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn evaluate(&mut self, params: &IndexParams, guard: &RebuildGuard) -> Result<TrialMetrics> {
        params.validate()?;
        let scorer = self.scorer_for(params.quantization)?;
        let start = Instant::now();
        let items: Vec<Item> = self
            .items
            .par_iter()
            .map(|(slot, v)| (*slot, Arc::new(scorer.encode(v))))
            .collect();
        guard.check()?;

        let index = AnyIndex::new(self.index_type, scorer, *params, self.seed)?.rebuild(items, guard)?;
        let build_time = start.elapsed();

        let (recall, query_latency) = self.measure(&index, params.breadth(self.index_type), guard)?;
        Ok(TrialMetrics {
            recall,
            query_latency,
            memory_bytes: index.memory_bytes(),
            build_time,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::benchmark::create_clustered_dataset;

    fn evaluator(index_type: IndexType) -> StoreEvaluator {
        let data = create_clustered_dataset(400, 0, 16, 8, 0.1, 3);
        let items = data
            .train
            .into_iter()
            .enumerate()
            .map(|(i, v)| (i as u32, v))
            .collect();
        StoreEvaluator::new(index_type, Metric::Euclidean, 16, 7, None, items, 20, 10).unwrap()
    }

    #[test]
    fn flat_configuration_is_exact() {
        let mut eval = evaluator(IndexType::Flat);
        let m = eval
            .evaluate(&IndexParams::default(), &RebuildGuard::unbounded())
            .unwrap();
        assert!((m.recall - 1.0).abs() < 1e-6);
        assert!(m.memory_bytes > 0);
    }

    #[test]
    fn wide_graph_search_is_near_exact() {
        let mut eval = evaluator(IndexType::Graph);
        let narrow = IndexParams {
            ef_search: 10,
            ..IndexParams::default()
        };
        let wide = IndexParams {
            ef_search: 200,
            ..IndexParams::default()
        };
        let guard = RebuildGuard::unbounded();
        let a = eval.evaluate(&narrow, &guard).unwrap();
        let b = eval.evaluate(&wide, &guard).unwrap();
        assert!(a.recall > 0.0);
        assert!(b.recall > 0.95);
        assert!(b.query_latency > Duration::ZERO);
    }

    #[test]
    fn evaluation_queries_are_not_stored_vectors() {
        let eval = evaluator(IndexType::Flat);
        let stored: Vec<&Vec<f32>> = eval.items.iter().map(|(_, v)| v).collect();
        assert_eq!(eval.num_queries(), 20);
        assert!(eval.queries.iter().all(|q| !stored.contains(&q)));
    }

    #[test]
    fn starved_graph_search_loses_recall() {
        let data = create_clustered_dataset(2_000, 0, 32, 40, 0.3, 5);
        let items = data
            .train
            .into_iter()
            .enumerate()
            .map(|(i, v)| (i as u32, v))
            .collect();
        let mut eval = StoreEvaluator::new(IndexType::Graph, Metric::Cosine, 32, 1, None, items, 32, 10).unwrap();
        let starved = IndexParams {
            m: 2,
            ef_construction: 4,
            ef_search: 1,
            ..IndexParams::default()
        };
        let m = eval.evaluate(&starved, &RebuildGuard::unbounded()).unwrap();
        assert!(m.recall < 1.0, "recall = {}", m.recall);
    }

    #[test]
    fn expired_budget_times_out() {
        let mut eval = evaluator(IndexType::Graph);
        let guard = RebuildGuard::unbounded().with_budget(Duration::ZERO);
        std::thread::sleep(Duration::from_millis(2));
        assert!(matches!(
            eval.evaluate(&IndexParams::default(), &guard),
            Err(StoreError::TuningEvaluationTimeout { .. })
        ));
    }

    #[test]
    fn empty_snapshot_is_rejected() {
        assert!(matches!(
            StoreEvaluator::new(IndexType::Flat, Metric::Cosine, 4, 0, None, Vec::new(), 5, 10),
            Err(StoreError::EmptyIndex)
        ));
    }
}
