//! Incremental index updater.
//!
//! Mutations are queued as [`PendingOp`]s and applied to the index in
//! batches:
//!
//! ```text
//! Idle ──queue──▶ Queuing ──threshold / force / tick──▶ Applying ──▶ Idle
//! ```
//!
//! Applying copies the live index, removes first (deletes and superseded
//! update slots), inserts the rest with one `insert_batch`, optionally
//! compacts, then publishes the copy in one swap. Queries never see a
//! half-applied batch, and a failed batch leaves the live index and the
//! queue untouched.
//!
//! Failures are retried on later ticks with exponential backoff; after
//! `max_consecutive_failures` the background tick surfaces the error.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::benchmark::{mean_latency, perturbed_queries, recall_at_k};
use crate::error::{Result, StoreError};
use crate::index::{AnyIndex, IndexStrategy, RebuildGuard};

mod handle;
mod ops;

pub use handle::IndexHandle;
pub use ops::{IncrementalUpdate, OpKind, PendingOp, PerformanceImpact};
pub(crate) use ops::BatchPlan;

const PROBE_K: usize = 10;
/// Probe noise relative to the source vector's RMS component.
const PROBE_NOISE: f32 = 0.25;
const PROBE_SEED: u64 = 0x9e37_79b9;

#[derive(Debug, Clone, PartialEq)]
pub struct UpdaterConfig {
    /// Queue length that triggers an apply.
    pub batch_threshold: usize,
    /// Probe queries measured before and after each batch (0 disables).
    pub probe_queries: usize,
    /// Graph tombstone fraction that triggers a compacting rebuild.
    pub compaction_threshold: f32,
    /// Consecutive failures before `tick` surfaces the error.
    pub max_consecutive_failures: u32,
    /// Applied batches remembered by [`IncrementalUpdater::history`].
    pub history_capacity: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            batch_threshold: 64,
            probe_queries: 8,
            compaction_threshold: 0.2,
            max_consecutive_failures: 5,
            history_capacity: 128,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdaterState {
    Idle,
    Queuing,
    Applying,
}

#[derive(Debug)]
struct ApplyState {
    consecutive_failures: u32,
    backoff: ExponentialBackoff,
    retry_at: Option<Instant>,
}

impl ApplyState {
    fn new(config: &UpdaterConfig) -> Self {
        Self {
            consecutive_failures: 0,
            backoff: ExponentialBackoff {
                initial_interval: config.initial_backoff,
                max_interval: config.max_backoff,
                max_elapsed_time: None,
                ..Default::default()
            },
            retry_at: None,
        }
    }

    fn succeeded(&mut self) {
        self.consecutive_failures = 0;
        self.backoff.reset();
        self.retry_at = None;
    }

    fn in_backoff(&self) -> bool {
        self.retry_at.is_some_and(|t| Instant::now() < t)
    }
}

/// Batches mutations against a live, copy-on-write index.
#[derive(Debug)]
pub struct IncrementalUpdater {
    config: UpdaterConfig,
    handle: IndexHandle,
    apply: Mutex<ApplyState>,
    applying: AtomicBool,
    history: Mutex<VecDeque<IncrementalUpdate>>,
}

impl IncrementalUpdater {
    pub fn new(index: AnyIndex, config: UpdaterConfig) -> Self {
        Self {
            apply: Mutex::new(ApplyState::new(&config)),
            handle: IndexHandle::new(index),
            applying: AtomicBool::new(false),
            history: Mutex::new(VecDeque::with_capacity(config.history_capacity)),
            config,
        }
    }

    pub fn config(&self) -> &UpdaterConfig {
        &self.config
    }

    /// The live index as of the last applied batch.
    pub fn index(&self) -> Arc<AnyIndex> {
        self.handle.load()
    }

    /// Live index plus the ops it has not absorbed.
    pub fn snapshot(&self) -> (Arc<AnyIndex>, Vec<PendingOp>) {
        self.handle.snapshot()
    }

    pub fn pending_len(&self) -> usize {
        self.handle.pending_len()
    }

    pub fn state(&self) -> UpdaterState {
        if self.applying.load(Ordering::Acquire) {
            UpdaterState::Applying
        } else if self.pending_len() > 0 {
            UpdaterState::Queuing
        } else {
            UpdaterState::Idle
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.apply.lock().consecutive_failures
    }

    /// Applied batches, oldest first.
    pub fn history(&self) -> Vec<IncrementalUpdate> {
        self.history.lock().iter().cloned().collect()
    }

    /// Queue ops without checking the threshold.
    pub fn enqueue(&self, ops: impl IntoIterator<Item = PendingOp>) -> usize {
        self.handle.push(ops)
    }

    pub fn queue_add(&self, op: PendingOp) -> Option<IncrementalUpdate> {
        self.queue_bulk(std::iter::once(op))
    }

    pub fn queue_update(&self, op: PendingOp) -> Option<IncrementalUpdate> {
        self.queue_bulk(std::iter::once(op))
    }

    pub fn queue_delete(&self, op: PendingOp) -> Option<IncrementalUpdate> {
        self.queue_bulk(std::iter::once(op))
    }

    /// Queue ops and apply if the threshold is reached.
    pub fn queue_bulk(&self, ops: impl IntoIterator<Item = PendingOp>) -> Option<IncrementalUpdate> {
        self.enqueue(ops);
        self.maybe_apply()
    }

    /// Apply if the queue has reached the threshold and no retry is pending.
    ///
    /// Failures are logged and retried later.
    pub fn maybe_apply(&self) -> Option<IncrementalUpdate> {
        if self.pending_len() < self.config.batch_threshold {
            return None;
        }
        self.run(true).ok().flatten()
    }

    /// Flush a non-empty queue now, ignoring any backoff window.
    pub fn force_update(&self) -> Result<Option<IncrementalUpdate>> {
        self.run(false)
    }

    /// Periodic maintenance: flush pending ops and compact when due.
    ///
    /// Errors only once `max_consecutive_failures` is reached.
    pub fn tick(&self) -> Result<Option<IncrementalUpdate>> {
        match self.run(true) {
            Err(StoreError::IndexBuildFailure { attempts, reason })
                if attempts < self.config.max_consecutive_failures =>
            {
                debug!(attempts, %reason, "apply failed; will retry");
                Ok(None)
            }
            other => other,
        }
    }

    /// Run `f` with the apply path held, for rebuilds driven from outside.
    pub(crate) fn exclusive<R>(&self, f: impl FnOnce(&IndexHandle) -> Result<R>) -> Result<R> {
        let mut state = self.apply.lock();
        self.applying.store(true, Ordering::Release);
        let result = f(&self.handle);
        self.applying.store(false, Ordering::Release);
        if result.is_ok() && self.handle.pending_len() == 0 {
            state.succeeded();
        }
        result
    }

    pub(crate) fn record(&self, update: IncrementalUpdate) {
        let mut history = self.history.lock();
        if history.len() >= self.config.history_capacity.max(1) {
            history.pop_front();
        }
        history.push_back(update);
    }

    fn run(&self, respect_backoff: bool) -> Result<Option<IncrementalUpdate>> {
        let mut state = self.apply.lock();
        if respect_backoff && state.in_backoff() {
            return Ok(None);
        }

        self.applying.store(true, Ordering::Release);
        let result = self.apply_batch();
        self.applying.store(false, Ordering::Release);

        match result {
            Ok(update) => {
                state.succeeded();
                if let Some(update) = &update {
                    self.record(update.clone());
                }
                Ok(update)
            }
            Err(err) => {
                state.consecutive_failures += 1;
                let delay = state
                    .backoff
                    .next_backoff()
                    .unwrap_or(self.config.max_backoff);
                state.retry_at = Some(Instant::now() + delay);
                warn!(
                    error = %err,
                    attempts = state.consecutive_failures,
                    retry_in_ms = delay.as_millis() as u64,
                    pending = self.pending_len(),
                    "batch apply failed, queue preserved"
                );
                Err(StoreError::IndexBuildFailure {
                    attempts: state.consecutive_failures,
                    reason: err.to_string(),
                })
            }
        }
    }

    /// One batch: snapshot, mutate a copy, measure, publish.
    fn apply_batch(&self) -> Result<Option<IncrementalUpdate>> {
        let (current, ops) = self.handle.snapshot();
        let due = current.needs_rebuild(self.config.compaction_threshold);
        if ops.is_empty() && !due {
            return Ok(None);
        }

        let start = Instant::now();
        let plan = BatchPlan::from_ops(&ops);
        let probes = self.probe_queries(&current, &plan);

        let mut next = (*current).clone();
        next.remove_batch(&plan.removals);
        next.insert_batch(plan.inserts)?;

        let compacted = next.needs_rebuild(self.config.compaction_threshold);
        if compacted {
            next = next.rebuild(next.items(), &RebuildGuard::unbounded())?;
        }
        let index_rebuild_time = start.elapsed();

        let (latency_before, recall_before) = measure(&current, &probes);
        let (latency_after, recall_after) = measure(&next, &probes);

        self.handle.publish(Arc::new(next), ops.len());

        let update = IncrementalUpdate {
            added: plan.added,
            updated: plan.updated,
            deleted: plan.deleted,
            index_rebuild_time,
            performance_impact: PerformanceImpact {
                latency_before,
                latency_after,
                recall_before,
                recall_after,
            },
            compacted,
            timestamp: Utc::now(),
        };
        info!(
            added = update.added,
            updated = update.updated,
            deleted = update.deleted,
            compacted,
            elapsed_ms = index_rebuild_time.as_millis() as u64,
            recall_before,
            recall_after,
            "applied index batch"
        );
        Ok(Some(update))
    }

    /// Held-out probes near the batch's inserts, topped up from the live
    /// index. Seeded noise keeps every probe off the stored vectors.
    fn probe_queries(&self, current: &AnyIndex, plan: &BatchPlan) -> Vec<Vec<f32>> {
        let wanted = self.config.probe_queries;
        if wanted == 0 {
            return Vec::new();
        }
        let scorer = current.scorer();
        let mut sources: Vec<Vec<f32>> = plan
            .inserts
            .iter()
            .rev()
            .take(wanted)
            .filter(|(_, v)| current.check_vector(v).is_ok())
            .map(|(_, v)| scorer.decode(v).into_owned())
            .collect();

        if sources.len() < wanted && !current.is_empty() {
            let items = current.items();
            let step = (items.len() / (wanted - sources.len())).max(1);
            sources.extend(
                items
                    .iter()
                    .step_by(step)
                    .take(wanted - sources.len())
                    .map(|(_, v)| scorer.decode(v).into_owned()),
            );
        }
        perturbed_queries(sources.iter().map(Vec::as_slice), PROBE_NOISE, PROBE_SEED)
    }
}

/// Mean latency and recall@10 (against the index's own exact scan).
fn measure(index: &AnyIndex, probes: &[Vec<f32>]) -> (Duration, f32) {
    if probes.is_empty() || index.is_empty() {
        return (Duration::ZERO, 1.0);
    }
    let mut latencies = Vec::with_capacity(probes.len());
    let mut recall = 0.0;
    for q in probes {
        let start = Instant::now();
        let approx = index.search(q, PROBE_K, None);
        latencies.push(start.elapsed());
        let exact = index.exact_search(q, PROBE_K);
        let approx: Vec<u32> = approx.into_iter().map(|(s, _)| s).collect();
        let exact: Vec<u32> = exact.into_iter().map(|(s, _)| s).collect();
        recall += recall_at_k(&exact, &approx, PROBE_K);
    }
    (mean_latency(&latencies), recall / probes.len() as f32)
}
