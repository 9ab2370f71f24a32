//! The vector store: canonical records in front of a live ANN index.
//!
//! ```text
//!  add / update / delete ──▶ catalog ──▶ updater queue ──batch──▶ index
//!                                                                  │
//!  search ──▶ index snapshot + pending scan ──▶ catalog resolve ◀──┘
//! ```
//!
//! Writes land in the catalog immediately and reach the index through the
//! incremental updater. Searches merge the live index with a brute-force
//! scan of not-yet-applied inserts and resolve slots through the catalog,
//! so deleted or superseded vectors never surface even before the next
//! batch is applied.
//!
//! Parameter changes (tuner proposals, rollbacks, product-quantizer
//! training) rebuild off to the side under the updater's apply lock and
//! commit catalog and index together.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::distance::normalize_in_place;
use crate::error::{check_dimension, Result, StoreError};
use crate::index::{brute_force, AnyIndex, IndexParams, IndexStrategy, IndexType, Item, RebuildGuard};
use crate::quantization::{EncodedVector, ProductQuantizer, Quantization, Quantizer};
use crate::scorer::Scorer;
use crate::tuner::{
    Action, BayesianTuner, Evaluator, Observation, QLearningAgent, StateKey, TrialMetrics, TuningConstraints,
    TuningProposal,
};
use crate::updater::{BatchPlan, IncrementalUpdate, IncrementalUpdater, PendingOp, PerformanceImpact};
use crate::versioning::{ModelVersion, Performance, Regression, VersionHistory, VersionId, VersionManager};

mod catalog;
pub mod evaluate;
pub mod record;

use catalog::{Catalog, Entry};
pub use evaluate::StoreEvaluator;
pub use record::{Metadata, Record, SearchRequest, SearchResult, StoreStats};

/// Candidate over-fetch multiplier for metadata-filtered searches.
const FILTER_OVERFETCH: usize = 4;
/// Probe queries used when measuring or tuning against stored data.
const EVALUATION_QUERIES: usize = 32;
const EVALUATION_K: usize = 10;
/// Vectors sampled to train product-quantization codebooks.
pub const PQ_TRAINING_SAMPLE: usize = 4096;
const QUERY_LOG_CAPACITY: usize = 256;

/// Outcome of one Q-learning tuning step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningStep {
    pub action: Action,
    pub params: IndexParams,
    pub reward: f64,
    pub baseline_reward: f64,
    pub accepted: bool,
    pub version: Option<VersionId>,
}

#[derive(Debug, Clone, Copy)]
struct QuerySample {
    latency: Duration,
    k: usize,
    filtered: bool,
}

/// Recent query mix, feeding tuner observations.
#[derive(Debug, Default)]
struct QueryLog {
    samples: VecDeque<QuerySample>,
}

impl QueryLog {
    fn record(&mut self, sample: QuerySample) {
        if self.samples.len() >= QUERY_LOG_CAPACITY {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    fn mean_latency_ms(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let total: f64 = self.samples.iter().map(|s| s.latency.as_secs_f64()).sum();
        total * 1_000.0 / self.samples.len() as f64
    }

    /// Half from requested depth (k of 100 saturates), half from the share
    /// of filtered queries.
    fn complexity(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let n = self.samples.len() as f32;
        let depth = self.samples.iter().map(|s| s.k as f32).sum::<f32>() / n / 100.0;
        let filtered = self.samples.iter().filter(|s| s.filtered).count() as f32 / n;
        0.5 * depth.min(1.0) + 0.5 * filtered
    }
}

#[derive(Debug)]
pub struct VectorStore {
    config: StoreConfig,
    catalog: RwLock<Catalog>,
    updater: IncrementalUpdater,
    versions: Mutex<VersionManager>,
    queries: Mutex<QueryLog>,
}

impl VectorStore {
    pub fn new(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let scorer = Scorer::new(
            config.metric,
            Quantizer::new(config.quantization, config.dimensions),
        );
        let index = AnyIndex::new(
            config.index_type,
            scorer.clone(),
            config.index_params(),
            config.seed,
        )?;
        info!(
            dimensions = config.dimensions,
            metric = %config.metric,
            index_type = %config.index_type,
            quantization = %config.quantization,
            "created vector store"
        );
        Ok(Self {
            catalog: RwLock::new(Catalog::new(scorer)),
            updater: IncrementalUpdater::new(index, config.updater_config()),
            versions: Mutex::new(VersionManager::new(config.max_versions)),
            queries: Mutex::new(QueryLog::default()),
            config,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    pub fn len(&self) -> usize {
        self.catalog.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.catalog.read().contains(id)
    }

    pub fn updater(&self) -> &IncrementalUpdater {
        &self.updater
    }

    /// Parameters of the live index.
    pub fn params(&self) -> IndexParams {
        self.updater.index().params()
    }

    /// Validate length and finiteness, then normalize for cosine.
    fn prepare(&self, values: &[f32]) -> Result<Vec<f32>> {
        check_dimension(self.config.dimensions, values.len())?;
        if values.iter().any(|v| !v.is_finite()) {
            return Err(StoreError::InvalidParameter(
                "vector contains non-finite values".to_string(),
            ));
        }
        let mut values = values.to_vec();
        if self.config.metric.normalizes() {
            normalize_in_place(&mut values);
        }
        Ok(values)
    }

    pub fn add(&self, record: Record) -> Result<()> {
        let values = self.prepare(&record.values)?;
        {
            let mut catalog = self.catalog.write();
            if catalog.contains(&record.id) {
                return Err(StoreError::DuplicateId(record.id));
            }
            let slot = catalog.alloc_slots(1)?.start;
            let code = Arc::new(catalog.scorer().encode(&values));
            self.updater
                .enqueue([PendingOp::add(record.id.clone(), slot, Arc::clone(&code))]);
            catalog.insert(
                record.id,
                Entry {
                    slot,
                    values,
                    code,
                    metadata: record.metadata,
                },
            );
        }
        self.updater.maybe_apply();
        Ok(())
    }

    /// Add many records as one unit.
    ///
    /// Every record is validated before any is stored: one bad vector or
    /// duplicate id rejects the whole batch. Normalization and quantization
    /// run in parallel; the index receives the batch as a single bulk insert.
    pub fn add_batch(&self, records: Vec<Record>) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let prepared: Vec<Vec<f32>> = records
            .par_iter()
            .map(|r| self.prepare(&r.values))
            .collect::<Result<_>>()?;

        {
            let mut ids = HashSet::with_capacity(records.len());
            if let Some(dup) = records.iter().find(|r| !ids.insert(r.id.as_str())) {
                return Err(StoreError::DuplicateId(dup.id.clone()));
            }
        }

        let (scorer, generation) = {
            let catalog = self.catalog.read();
            (catalog.scorer().clone(), catalog.generation())
        };
        let mut codes: Vec<Arc<EncodedVector>> = prepared
            .par_iter()
            .map(|v| Arc::new(scorer.encode(v)))
            .collect();

        let count = records.len();
        {
            let mut catalog = self.catalog.write();
            if let Some(dup) = records.iter().find(|r| catalog.contains(&r.id)) {
                return Err(StoreError::DuplicateId(dup.id.clone()));
            }
            if catalog.generation() != generation {
                let scorer = catalog.scorer();
                codes = prepared.iter().map(|v| Arc::new(scorer.encode(v))).collect();
            }
            let slots = catalog.alloc_slots(count)?;
            let mut ops = Vec::with_capacity(count);
            for (((record, values), code), slot) in records.into_iter().zip(prepared).zip(codes).zip(slots) {
                ops.push(PendingOp::add(record.id.clone(), slot, Arc::clone(&code)));
                catalog.insert(
                    record.id,
                    Entry {
                        slot,
                        values,
                        code,
                        metadata: record.metadata,
                    },
                );
            }
            self.updater.enqueue(ops);
        }
        debug!(count, "queued batch insert");
        self.updater.maybe_apply();
        Ok(count)
    }

    /// Replace an existing record's values and metadata.
    pub fn update(&self, record: Record) -> Result<()> {
        let values = self.prepare(&record.values)?;
        {
            let mut catalog = self.catalog.write();
            let old_slot = catalog
                .get(&record.id)
                .map(|e| e.slot)
                .ok_or_else(|| StoreError::NotFound(record.id.clone()))?;
            let slot = catalog.alloc_slots(1)?.start;
            let code = Arc::new(catalog.scorer().encode(&values));
            self.updater.enqueue([PendingOp::update(
                record.id.clone(),
                slot,
                old_slot,
                Arc::clone(&code),
            )]);
            catalog.insert(
                record.id,
                Entry {
                    slot,
                    values,
                    code,
                    metadata: record.metadata,
                },
            );
        }
        self.updater.maybe_apply();
        Ok(())
    }

    /// Remove a record now; its index entry is dropped with the next batch.
    pub fn delete(&self, id: &str) -> Result<()> {
        {
            let mut catalog = self.catalog.write();
            let entry = catalog
                .remove(id)
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            self.updater.enqueue([PendingOp::delete(id, entry.slot)]);
        }
        self.updater.maybe_apply();
        Ok(())
    }

    /// The stored record with its processed (normalized, quantized) values.
    pub fn get(&self, id: &str) -> Option<Record> {
        let catalog = self.catalog.read();
        let entry = catalog.get(id)?;
        Some(Record {
            id: id.to_string(),
            values: catalog.scorer().decode(&entry.code).into_owned(),
            metadata: entry.metadata.clone(),
        })
    }

    pub fn search(&self, request: &SearchRequest) -> Result<Vec<SearchResult>> {
        let start = Instant::now();
        let query = self.prepare(&request.query)?;
        if request.k == 0 {
            return Ok(Vec::new());
        }

        let (index, pending) = self.updater.snapshot();
        let scorer = index.scorer();
        let metric = scorer.metric();
        let rerank = self.config.rerank && scorer.quantization() == Quantization::Binary;
        let filtered = !request.filters.is_empty();
        let plan = BatchPlan::from_ops(&pending);

        let mut fetch = request.k;
        if rerank {
            fetch = fetch.saturating_mul(self.config.rerank_factor.max(1));
        }
        if filtered {
            fetch = fetch.saturating_mul(FILTER_OVERFETCH);
        }
        // Nothing beyond every indexed and pending vector can come back.
        let fetch = fetch
            .saturating_add(plan.removals.len())
            .min(index.len().saturating_add(plan.inserts.len()));

        let breadth = match index.index_type() {
            IndexType::Flat => None,
            IndexType::Graph => request.ef_search,
            IndexType::Ivf => request.n_probe,
        };
        let mut candidates = index.search(&query, fetch, breadth);
        candidates.extend(brute_force(
            scorer,
            &query,
            fetch,
            plan.inserts.iter().map(|(slot, v)| (*slot, v.as_ref())),
        ));

        let catalog = self.catalog.read();
        let mut seen = HashSet::with_capacity(candidates.len());
        let mut hits: Vec<(f32, u32, &str, &Entry)> = Vec::with_capacity(candidates.len());
        for (slot, distance) in candidates {
            if !seen.insert(slot) {
                continue;
            }
            let Some((id, entry)) = catalog.by_slot(slot) else {
                continue;
            };
            if !request.matches(&entry.metadata) {
                continue;
            }
            let distance = if rerank {
                metric.distance(&query, &entry.values)
            } else {
                distance
            };
            hits.push((distance, slot, id, entry));
        }

        // Too few survivors after filtering or stale slots: scan exhaustively.
        if hits.len() < request.k && hits.len() < catalog.len() {
            let scorer = catalog.scorer();
            for (id, entry) in catalog.entries() {
                if seen.contains(&entry.slot) || !request.matches(&entry.metadata) {
                    continue;
                }
                let distance = if rerank {
                    metric.distance(&query, &entry.values)
                } else {
                    scorer.distance(&query, &entry.code)
                };
                hits.push((distance, entry.slot, id, entry));
            }
        }

        hits.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        let results: Vec<SearchResult> = hits
            .into_iter()
            .take(request.k)
            .map(|(distance, _, id, entry)| SearchResult {
                id: id.to_string(),
                score: metric.similarity_from_distance(distance),
                metadata: entry.metadata.clone(),
            })
            .filter(|r| request.threshold.map_or(true, |t| r.score >= t))
            .collect();
        drop(catalog);

        self.queries.lock().record(QuerySample {
            latency: start.elapsed(),
            k: request.k,
            filtered,
        });
        Ok(results)
    }

    pub fn get_stats(&self) -> StoreStats {
        let index = self.updater.index();
        let catalog = self.catalog.read();
        StoreStats {
            total_vectors: catalog.len(),
            dimensions: self.config.dimensions,
            index_type: index.index_type(),
            metric: self.config.metric,
            quantization: catalog.scorer().quantization(),
            indexed_vectors: index.len(),
            pending_ops: self.updater.pending_len(),
            memory_bytes: index.memory_bytes(),
            updater_state: self.updater.state(),
            current_version: self.versions.lock().current_id(),
        }
    }

    /// Apply every queued operation now.
    pub fn force_update(&self) -> Result<Option<IncrementalUpdate>> {
        self.updater.force_update()
    }

    /// One background maintenance step: flush or retry queued batches and
    /// compact when due.
    pub fn maintenance_tick(&self) -> Result<Option<IncrementalUpdate>> {
        self.updater.tick()
    }

    /// Rebuild the index from the catalog with the current parameters.
    pub fn rebuild(&self, guard: &RebuildGuard) -> Result<IncrementalUpdate> {
        self.rebuild_with(self.params(), None, guard)
    }

    /// Learn product-quantization codebooks from stored vectors and
    /// re-encode everything with them.
    pub fn train_product_quantizer(&self, sample_size: usize) -> Result<IncrementalUpdate> {
        let params = self.params();
        if params.quantization != Quantization::Product {
            return Err(StoreError::InvalidParameter(format!(
                "product quantizer training requires product quantization, store uses {}",
                params.quantization
            )));
        }
        let (n, sample) = self.catalog.read().training_sample(sample_size);
        if n == 0 {
            return Err(StoreError::EmptyIndex);
        }
        let pq = ProductQuantizer::train(self.config.dimensions, &sample, n, self.config.seed)?;
        let quantizer = Quantizer::new(Quantization::Product, self.config.dimensions)
            .with_product_quantizer(Arc::new(pq))?;
        info!(samples = n, "trained product quantizer");
        self.rebuild_with(
            params,
            Some(Scorer::new(self.config.metric, quantizer)),
            &RebuildGuard::unbounded(),
        )
    }

    /// Build a new index for `params` off to the side, then commit it with
    /// the catalog in one step.
    ///
    /// Runs under the updater's apply lock. Ops queued while building stay
    /// queued and are re-encoded if the encoding changed. On error (including
    /// cancellation) nothing is committed.
    fn rebuild_with(
        &self,
        params: IndexParams,
        scorer: Option<Scorer>,
        guard: &RebuildGuard,
    ) -> Result<IncrementalUpdate> {
        params.validate()?;
        let update = self.updater.exclusive(|handle| {
            let start = Instant::now();
            let (scorer, reencode, items, absorbed) = {
                let catalog = self.catalog.read();
                let scorer = match scorer {
                    Some(s) => s,
                    None => Scorer::new(self.config.metric, catalog.quantizer_for(params.quantization)?),
                };
                let reencode = catalog.encoding_differs(&scorer);
                let items: Vec<Item> = if reencode {
                    catalog
                        .values_by_slot()
                        .into_par_iter()
                        .map(|(slot, v)| (slot, Arc::new(scorer.encode(&v))))
                        .collect()
                } else {
                    catalog.items()
                };
                (scorer, reencode, items, handle.pending_len())
            };

            let before = handle.load();
            let template = AnyIndex::new(before.index_type(), scorer.clone(), params, self.config.seed)?;
            let next = template.rebuild(items, guard)?;
            guard.check()?;
            let index_rebuild_time = start.elapsed();
            let indexed = next.len();

            let mut catalog = self.catalog.write();
            let previous = catalog.scorer().clone();
            if reencode {
                catalog.set_scorer(scorer);
            }
            let catalog = &*catalog;
            handle.publish_with(Arc::new(next), absorbed, |op| {
                if !reencode {
                    return;
                }
                let Some(old) = op.vector.take() else {
                    return;
                };
                // Superseded ops are removed later in the same batch, but still
                // need a code the new encoding accepts.
                op.vector = Some(match catalog.by_slot(op.slot) {
                    Some((_, entry)) => Arc::clone(&entry.code),
                    None => Arc::new(catalog.scorer().encode(&previous.decode(&old))),
                });
            });
            info!(
                indexed,
                absorbed,
                reencoded = reencode,
                elapsed_ms = index_rebuild_time.as_millis() as u64,
                ?params,
                "rebuilt index"
            );
            Ok(IncrementalUpdate {
                added: indexed,
                updated: 0,
                deleted: before.len().saturating_sub(indexed),
                index_rebuild_time,
                performance_impact: PerformanceImpact::default(),
                compacted: true,
                timestamp: Utc::now(),
            })
        })?;
        self.updater.record(update.clone());
        Ok(update)
    }

    /// Switch query-time breadth without rebuilding.
    fn adopt_search_params(&self, params: IndexParams) -> Result<()> {
        self.updater.exclusive(|handle| {
            let mut next = (*handle.load()).clone();
            next.set_search_params(&params);
            handle.publish(Arc::new(next), 0);
            debug!(ef_search = params.ef_search, n_probe = params.n_probe, "adopted search parameters");
            Ok(())
        })
    }

    /// Make `params` live, rebuilding only when the change is structural.
    fn restore_params(&self, params: IndexParams, guard: &RebuildGuard) -> Result<()> {
        let current = self.params();
        if current.structural_change(&params, self.config.index_type) {
            self.rebuild_with(params, None, guard)?;
        } else if current != params {
            self.adopt_search_params(params)?;
        }
        Ok(())
    }

    /// Adopt `params` and record them as a new model version.
    pub fn apply_params(
        &self,
        params: IndexParams,
        performance: Performance,
        metadata: Metadata,
        guard: &RebuildGuard,
    ) -> Result<VersionId> {
        self.restore_params(params, guard)?;
        Ok(self.versions.lock().create_version(params, performance, metadata))
    }

    /// Snapshot of stored data for measuring configurations.
    pub fn evaluator(&self, num_queries: usize) -> Result<StoreEvaluator> {
        let (items, pq) = {
            let catalog = self.catalog.read();
            (catalog.values_by_slot(), catalog.trained_pq().cloned())
        };
        StoreEvaluator::new(
            self.config.index_type,
            self.config.metric,
            self.config.dimensions,
            self.config.seed,
            pq,
            items,
            num_queries,
            EVALUATION_K,
        )
    }

    /// Recall and latency of the live index on stored data.
    pub fn measure_performance(&self) -> Result<Performance> {
        self.evaluator(EVALUATION_QUERIES)?
            .measure_live(&self.updater.index())
    }

    /// Workload signals for the Q-learning tuner.
    pub fn observation(&self) -> Observation {
        let queries = self.queries.lock();
        Observation {
            query_complexity: queries.complexity(),
            dataset_size: self.len(),
            dimension: self.config.dimensions,
            params: self.params(),
            recent_latency_ms: queries.mean_latency_ms(),
        }
    }

    /// Record the live configuration as the first version if none exists.
    fn ensure_baseline(&self, evaluator: &StoreEvaluator) -> Result<()> {
        if !self.versions.lock().is_empty() {
            return Ok(());
        }
        let performance = evaluator.measure_live(&self.updater.index())?;
        let metadata = Metadata::from([("source".to_string(), "baseline".into())]);
        self.versions
            .lock()
            .create_version(self.params(), performance, metadata);
        Ok(())
    }

    /// Run a Bayesian tuning pass and adopt its proposal if it beats the
    /// live configuration. Returns the new version, if any.
    pub fn tune(&self, tuner: &mut BayesianTuner, token: &CancellationToken) -> Result<Option<VersionId>> {
        let mut evaluator = self.evaluator(EVALUATION_QUERIES)?;
        self.ensure_baseline(&evaluator)?;
        let current = self.params();

        let first = tuner.trials().len();
        let proposal = tuner.tune(&mut evaluator, current, token)?;
        let baseline = tuner.trials()[first..]
            .iter()
            .find(|t| t.params == current && !t.timed_out)
            .map(|t| t.score);
        let constraints = tuner.config().constraints;
        self.adopt_proposal(proposal, baseline, &evaluator, &constraints, token)
    }

    /// Adopt `proposal` if it scores above the live configuration.
    ///
    /// `baseline` is the live configuration's score from the same tuning
    /// pass. When that trial timed out, the live index itself is measured on
    /// the evaluator's probes instead.
    fn adopt_proposal(
        &self,
        proposal: TuningProposal,
        baseline: Option<f64>,
        evaluator: &StoreEvaluator,
        constraints: &TuningConstraints,
        token: &CancellationToken,
    ) -> Result<Option<VersionId>> {
        if proposal.params == self.params() {
            debug!(score = proposal.score, "live configuration kept");
            return Ok(None);
        }
        let baseline = match baseline {
            Some(score) => score,
            None => {
                let live = self.updater.index();
                let (recall, query_latency) =
                    evaluator.measure(&live, None, &RebuildGuard::with_token(token.clone()))?;
                let metrics = TrialMetrics {
                    recall,
                    query_latency,
                    memory_bytes: live.memory_bytes(),
                    build_time: Duration::ZERO,
                };
                let score = metrics.score(constraints);
                debug!(score, "live trial timed out, measured the live index");
                score
            }
        };
        if proposal.score <= baseline {
            debug!(score = proposal.score, baseline, "live configuration kept");
            return Ok(None);
        }

        let performance = Performance {
            accuracy: f64::from(proposal.metrics.recall),
            latency_ms: proposal.metrics.latency_ms(),
            samples_seen: evaluator.dataset_size() as u64,
            loss: None,
        };
        let metadata = Metadata::from([
            ("source".to_string(), "bayesian".into()),
            ("score".to_string(), proposal.score.into()),
            ("trials".to_string(), proposal.trials.into()),
        ]);
        let version = self.apply_params(
            proposal.params,
            performance,
            metadata,
            &RebuildGuard::with_token(token.clone()),
        )?;
        Ok(Some(version))
    }

    /// One Q-learning step: observe, act, measure, learn, and adopt the new
    /// configuration if it earns more reward than the live one.
    pub fn tune_step(&self, agent: &mut QLearningAgent, token: &CancellationToken) -> Result<TuningStep> {
        let mut evaluator = self.evaluator(EVALUATION_QUERIES)?;
        self.ensure_baseline(&evaluator)?;

        let observation = self.observation();
        let (state, action, params) = agent.propose(&observation);
        let guard = RebuildGuard::with_token(token.clone());
        let baseline = evaluator.evaluate(&observation.params, &guard)?;
        let candidate = evaluator.evaluate(&params, &guard)?;
        let baseline_reward = agent.reward(&baseline);
        let reward = agent.reward(&candidate);

        let next = Observation {
            params,
            recent_latency_ms: candidate.latency_ms(),
            ..observation
        };
        agent.observe(state, action, reward, StateKey::from(&next));

        let accepted = params != observation.params && reward > baseline_reward;
        let version = if accepted {
            let performance = Performance {
                accuracy: f64::from(candidate.recall),
                latency_ms: candidate.latency_ms(),
                samples_seen: evaluator.dataset_size() as u64,
                loss: None,
            };
            let metadata = Metadata::from([
                ("source".to_string(), "qlearning".into()),
                ("action".to_string(), action.to_string().into()),
                ("reward".to_string(), reward.into()),
            ]);
            Some(self.apply_params(params, performance, metadata, &guard)?)
        } else {
            None
        };
        debug!(%action, reward, baseline_reward, accepted, "q-learning step");
        Ok(TuningStep {
            action,
            params,
            reward,
            baseline_reward,
            accepted,
            version,
        })
    }

    pub fn current_version(&self) -> Option<ModelVersion> {
        self.versions.lock().current().cloned()
    }

    pub fn get_version(&self, version: VersionId) -> Option<ModelVersion> {
        self.versions.lock().get_version(version).cloned()
    }

    pub fn export_history(&self) -> VersionHistory {
        self.versions.lock().export_history()
    }

    /// Point the version pointer at `target` and make its parameters live.
    pub fn rollback(&self, target: VersionId, reason: &str) -> Result<ModelVersion> {
        let version = self.versions.lock().rollback(target, reason)?.clone();
        self.restore_params(version.params, &RebuildGuard::unbounded())?;
        Ok(version)
    }

    /// Compare `observed` with the current version; on regression roll back
    /// and make the restored parameters live.
    pub fn check_and_rollback(&self, observed: &Performance) -> Result<Option<Regression>> {
        let restored = {
            let mut versions = self.versions.lock();
            versions
                .check_and_rollback(observed)
                .and_then(|r| versions.current().map(|v| (r, v.params)))
        };
        let Some((regression, params)) = restored else {
            return Ok(None);
        };
        warn!(
            from = %regression.from,
            to = %regression.to,
            accuracy_drop = regression.accuracy_drop,
            "performance regression, restoring earlier configuration"
        );
        self.restore_params(params, &RebuildGuard::unbounded())?;
        Ok(Some(regression))
    }
}
