//! Auto-tuning of index parameters.
//!
//! Two strategies share one vocabulary:
//!
//! - [`BayesianTuner`]: analytic seed ([`analytic`]) refined over a local
//!   grid, ranking untried candidates with a Gaussian-process surrogate.
//! - [`QLearningAgent`]: tabular Q-learning over bucketed workload state,
//!   nudging one parameter per step.
//!
//! Tuners never touch a live index. They evaluate candidates through an
//! [`Evaluator`] (which builds indexes off to the side) and return
//! proposals; the store applies an accepted proposal through its serialized
//! rebuild path and records it as a new model version.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::index::{IndexParams, IndexType, RebuildGuard};

pub mod analytic;
pub mod bayesian;
pub mod qlearning;

pub use analytic::{local_grid, seed_graph_params, seed_ivf_params, seed_params, WorkloadProfile};
pub use bayesian::{BayesianConfig, BayesianTuner, GaussianProcess};
pub use qlearning::{Action, Observation, QLearningAgent, QLearningConfig, RewardWeights, StateKey};

/// Score assigned to trials that timed out or could not be measured.
pub const WORST_SCORE: f64 = -1.0;

/// Budgets a configuration should respect.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TuningConstraints {
    pub min_recall: f32,
    /// Mean query latency budget, in milliseconds.
    pub max_latency_ms: f64,
    /// Index footprint budget; `None` is unbounded.
    pub max_memory_bytes: Option<usize>,
}

impl Default for TuningConstraints {
    fn default() -> Self {
        Self {
            min_recall: 0.9,
            max_latency_ms: 10.0,
            max_memory_bytes: None,
        }
    }
}

/// Measured behaviour of one configuration.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TrialMetrics {
    /// Mean recall@k against exact full-precision search.
    pub recall: f32,
    pub query_latency: Duration,
    pub memory_bytes: usize,
    pub build_time: Duration,
}

impl TrialMetrics {
    pub fn latency_ms(&self) -> f64 {
        self.query_latency.as_secs_f64() * 1_000.0
    }

    pub fn memory_mb(&self) -> f64 {
        self.memory_bytes as f64 / (1024.0 * 1024.0)
    }

    /// `recall - penalty(latency over budget) - penalty(memory over budget)`.
    ///
    /// Each penalty is the relative overshoot, so 20% over the latency budget
    /// costs 0.2. Floored at [`WORST_SCORE`].
    pub fn score(&self, constraints: &TuningConstraints) -> f64 {
        let latency_penalty = overshoot(self.latency_ms(), constraints.max_latency_ms);
        let memory_penalty = constraints
            .max_memory_bytes
            .map_or(0.0, |max| overshoot(self.memory_bytes as f64, max as f64));
        (f64::from(self.recall) - latency_penalty - memory_penalty).max(WORST_SCORE)
    }
}

fn overshoot(value: f64, budget: f64) -> f64 {
    if budget <= 0.0 || value <= budget {
        0.0
    } else {
        (value - budget) / budget
    }
}

/// One evaluated configuration. Never mutated after it is recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningTrial {
    pub params: IndexParams,
    /// `None` when the trial timed out.
    pub metrics: Option<TrialMetrics>,
    pub score: f64,
    pub trial_index: usize,
    pub timed_out: bool,
}

/// Best configuration found by a tuning run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningProposal {
    pub params: IndexParams,
    pub metrics: TrialMetrics,
    pub score: f64,
    pub trials: usize,
}

/// Measures a candidate configuration without touching the live index.
pub trait Evaluator {
    fn index_type(&self) -> IndexType;

    /// Number of vectors the evaluation runs over.
    fn dataset_size(&self) -> usize;

    fn dimension(&self) -> usize;

    /// Build and probe an index with `params`. Implementations check `guard`
    /// between phases and return `TuningEvaluationTimeout` or `Cancelled`.
    fn evaluate(&mut self, params: &IndexParams, guard: &RebuildGuard) -> Result<TrialMetrics>;
}

/// Per-deployment tuner selection.
#[derive(Debug)]
pub enum Tuner {
    Bayesian(BayesianTuner),
    QLearning(QLearningAgent),
}
