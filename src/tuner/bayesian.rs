//! Analytic seed plus Bayesian refinement.
//!
//! The seed from [`super::analytic`] and its local grid form the candidate
//! pool. The first few trials walk the pool in order; after that a Gaussian
//! process fitted to every recorded trial picks the candidate with the
//! highest expected improvement. Trials that blow their time budget are
//! kept in the history at [`WORST_SCORE`] so the surrogate learns to avoid
//! that region.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::analytic::{local_grid, seed_params, WorkloadProfile};
use super::{Evaluator, TuningConstraints, TuningProposal, TuningTrial, WORST_SCORE};
use crate::error::{Result, StoreError};
use crate::index::{IndexParams, IndexType, RebuildGuard};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BayesianConfig {
    pub constraints: TuningConstraints,
    /// Trials evaluated per `tune` call.
    pub max_trials: usize,
    /// Trials taken in grid order before the surrogate is consulted.
    pub initial_trials: usize,
    /// Wall-clock budget for one trial.
    pub trial_budget: Duration,
    /// Expected-improvement margin; larger explores more.
    pub exploration: f64,
    /// RBF length scale over normalized parameters.
    pub length_scale: f64,
}

impl Default for BayesianConfig {
    fn default() -> Self {
        Self {
            constraints: TuningConstraints::default(),
            max_trials: 12,
            initial_trials: 3,
            trial_budget: Duration::from_secs(10),
            exploration: 0.01,
            length_scale: 0.25,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BayesianTuner {
    config: BayesianConfig,
    trials: Vec<TuningTrial>,
}

impl BayesianTuner {
    pub fn new(config: BayesianConfig) -> Self {
        Self {
            config,
            trials: Vec::new(),
        }
    }

    pub fn config(&self) -> &BayesianConfig {
        &self.config
    }

    /// Every trial recorded so far, in evaluation order.
    pub fn trials(&self) -> &[TuningTrial] {
        &self.trials
    }

    /// Highest-scoring trial that produced metrics.
    pub fn best(&self) -> Option<&TuningTrial> {
        best_of(&self.trials)
    }

    /// Search around the analytic seed for `evaluator`'s data and return the
    /// best configuration evaluated in this call.
    ///
    /// `current` supplies the fields the search does not vary (quantization,
    /// and the parameters of the other strategy) and is itself a candidate.
    pub fn tune<E>(
        &mut self,
        evaluator: &mut E,
        current: IndexParams,
        token: &CancellationToken,
    ) -> Result<TuningProposal>
    where
        E: Evaluator + ?Sized,
    {
        let index_type = evaluator.index_type();
        let profile = WorkloadProfile {
            num_vectors: evaluator.dataset_size(),
            dimension: evaluator.dimension(),
        };
        let seed = seed_params(index_type, profile, &self.config.constraints, current);

        let mut pool = local_grid(&seed, index_type);
        if !pool.contains(&current) {
            pool.insert(1.min(pool.len()), current);
        }
        debug!(%index_type, candidates = pool.len(), ?seed, "starting bayesian tuning");

        let first = self.trials.len();
        for round in 0..self.config.max_trials {
            if pool.is_empty() {
                break;
            }
            if token.is_cancelled() {
                return Err(StoreError::Cancelled);
            }
            let pick = if round < self.config.initial_trials {
                0
            } else {
                self.pick_by_expected_improvement(&pool, index_type)
            };
            let params = pool.remove(pick);
            self.run_trial(evaluator, params, token)?;
        }

        let best = best_of(&self.trials[first..]).ok_or(StoreError::TuningEvaluationTimeout {
            budget: self.config.trial_budget,
        })?;
        let metrics = best.metrics.unwrap_or_default();
        info!(
            trials = self.trials.len() - first,
            score = best.score,
            recall = metrics.recall,
            latency_ms = metrics.latency_ms(),
            "bayesian tuning finished"
        );
        Ok(TuningProposal {
            params: best.params,
            metrics,
            score: best.score,
            trials: self.trials.len() - first,
        })
    }

    fn run_trial<E>(&mut self, evaluator: &mut E, params: IndexParams, token: &CancellationToken) -> Result<()>
    where
        E: Evaluator + ?Sized,
    {
        let guard = RebuildGuard::with_token(token.clone()).with_budget(self.config.trial_budget);
        let trial_index = self.trials.len();
        let trial = match evaluator.evaluate(&params, &guard) {
            Ok(metrics) => TuningTrial {
                params,
                score: metrics.score(&self.config.constraints),
                metrics: Some(metrics),
                trial_index,
                timed_out: false,
            },
            Err(StoreError::TuningEvaluationTimeout { budget }) => {
                warn!(trial_index, ?params, budget_ms = budget.as_millis() as u64, "trial timed out");
                TuningTrial {
                    params,
                    metrics: None,
                    score: WORST_SCORE,
                    trial_index,
                    timed_out: true,
                }
            }
            Err(err) => return Err(err),
        };
        debug!(trial_index, score = trial.score, ?params, "trial evaluated");
        self.trials.push(trial);
        Ok(())
    }

    fn pick_by_expected_improvement(&self, pool: &[IndexParams], index_type: IndexType) -> usize {
        let xs: Vec<Vec<f64>> = self
            .trials
            .iter()
            .map(|t| features(&t.params, index_type))
            .collect();
        let ys: Vec<f64> = self.trials.iter().map(|t| t.score).collect();
        let Some(gp) = GaussianProcess::fit(xs, &ys, self.config.length_scale, 1e-4) else {
            return 0;
        };
        let best = ys.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        let mut pick = 0;
        let mut pick_ei = f64::NEG_INFINITY;
        for (i, params) in pool.iter().enumerate() {
            let (mean, sd) = gp.predict(&features(params, index_type));
            let ei = expected_improvement(mean, sd, best, self.config.exploration);
            if ei > pick_ei {
                pick = i;
                pick_ei = ei;
            }
        }
        pick
    }
}

fn best_of(trials: &[TuningTrial]) -> Option<&TuningTrial> {
    trials
        .iter()
        .filter(|t| !t.timed_out)
        .max_by(|a, b| a.score.total_cmp(&b.score).then(b.trial_index.cmp(&a.trial_index)))
}

/// Parameters scaled to roughly [0, 1] so one length scale fits all axes.
fn features(params: &IndexParams, index_type: IndexType) -> Vec<f64> {
    let quantization = params.quantization.ordinal() as f64 / 3.0;
    match index_type {
        IndexType::Flat => vec![quantization],
        IndexType::Graph => vec![
            params.m as f64 / 64.0,
            params.ef_construction as f64 / 512.0,
            params.ef_search as f64 / 512.0,
            quantization,
        ],
        IndexType::Ivf => vec![
            (params.n_centroids as f64 + 1.0).ln() / 4097f64.ln(),
            params.n_probe as f64 / 256.0,
            quantization,
        ],
    }
}

/// Gaussian-process regressor with an RBF kernel and a constant mean.
#[derive(Debug, Clone)]
pub struct GaussianProcess {
    xs: Vec<Vec<f64>>,
    /// Lower Cholesky factor of `K + noise * I`.
    chol: Vec<Vec<f64>>,
    alpha: Vec<f64>,
    mean: f64,
    length_scale: f64,
}

impl GaussianProcess {
    /// Fit to observations. `None` when there is nothing to fit or the
    /// kernel matrix stays singular after adding jitter.
    pub fn fit(xs: Vec<Vec<f64>>, ys: &[f64], length_scale: f64, noise: f64) -> Option<Self> {
        if xs.is_empty() || xs.len() != ys.len() || length_scale <= 0.0 {
            return None;
        }
        let n = xs.len();
        let mean = ys.iter().sum::<f64>() / n as f64;
        let centered: Vec<f64> = ys.iter().map(|y| y - mean).collect();

        let mut jitter = noise.max(1e-10);
        for _ in 0..4 {
            let mut k = vec![vec![0.0; n]; n];
            for i in 0..n {
                for j in 0..=i {
                    let v = rbf(&xs[i], &xs[j], length_scale);
                    k[i][j] = v;
                    k[j][i] = v;
                }
                k[i][i] += jitter;
            }
            if let Some(chol) = cholesky(&k) {
                let alpha = solve_upper_t(&chol, &solve_lower(&chol, &centered));
                return Some(Self {
                    xs,
                    chol,
                    alpha,
                    mean,
                    length_scale,
                });
            }
            jitter *= 10.0;
        }
        None
    }

    /// Posterior mean and standard deviation at `x`.
    pub fn predict(&self, x: &[f64]) -> (f64, f64) {
        let k_star: Vec<f64> = self.xs.iter().map(|xi| rbf(xi, x, self.length_scale)).collect();
        let mean = self.mean + dot(&k_star, &self.alpha);
        let v = solve_lower(&self.chol, &k_star);
        let variance = (1.0 - dot(&v, &v)).max(1e-12);
        (mean, variance.sqrt())
    }
}

/// Expected improvement over `best` for a maximization problem.
pub fn expected_improvement(mean: f64, sd: f64, best: f64, xi: f64) -> f64 {
    let gain = mean - best - xi;
    if sd <= 1e-12 {
        return gain.max(0.0);
    }
    let z = gain / sd;
    gain * normal_cdf(z) + sd * normal_pdf(z)
}

fn rbf(a: &[f64], b: &[f64], length_scale: f64) -> f64 {
    let d2: f64 = a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum();
    (-d2 / (2.0 * length_scale * length_scale)).exp()
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn cholesky(a: &[Vec<f64>]) -> Option<Vec<Vec<f64>>> {
    let n = a.len();
    let mut l = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..=i {
            let s: f64 = (0..j).map(|k| l[i][k] * l[j][k]).sum();
            if i == j {
                let d = a[i][i] - s;
                if d <= 0.0 || !d.is_finite() {
                    return None;
                }
                l[i][j] = d.sqrt();
            } else {
                l[i][j] = (a[i][j] - s) / l[j][j];
            }
        }
    }
    Some(l)
}

/// Solve `L x = b`.
fn solve_lower(l: &[Vec<f64>], b: &[f64]) -> Vec<f64> {
    let mut x = vec![0.0; b.len()];
    for i in 0..b.len() {
        let s: f64 = (0..i).map(|k| l[i][k] * x[k]).sum();
        x[i] = (b[i] - s) / l[i][i];
    }
    x
}

/// Solve `L^T x = b`.
fn solve_upper_t(l: &[Vec<f64>], b: &[f64]) -> Vec<f64> {
    let n = b.len();
    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let s: f64 = (i + 1..n).map(|k| l[k][i] * x[k]).sum();
        x[i] = (b[i] - s) / l[i][i];
    }
    x
}

fn normal_pdf(z: f64) -> f64 {
    (-0.5 * z * z).exp() / (2.0 * std::f64::consts::PI).sqrt()
}

fn normal_cdf(z: f64) -> f64 {
    0.5 * (1.0 + erf(z / std::f64::consts::SQRT_2))
}

/// Abramowitz and Stegun 7.1.26; absolute error below 1.5e-7.
fn erf(x: f64) -> f64 {
    const A1: f64 = 0.254_829_592;
    const A2: f64 = -0.284_496_736;
    const A3: f64 = 1.421_413_741;
    const A4: f64 = -1.453_152_027;
    const A5: f64 = 1.061_405_429;
    const P: f64 = 0.327_591_1;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + P * x);
    let poly = ((((A5 * t + A4) * t + A3) * t + A2) * t + A1) * t;
    sign * (1.0 - poly * (-x * x).exp())
}
