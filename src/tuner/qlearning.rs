//! Tabular Q-learning over bucketed workload state.
//!
//! Each step the agent observes the store (query mix, size, dimension,
//! current parameters, recent latency), picks one parameter nudge with an
//! ε-greedy policy, and learns from the reward of the resulting
//! configuration. Transitions go into a bounded replay buffer; every
//! `update_frequency` steps a random minibatch is replayed through the TD
//! update `Q(s,a) += α (r + γ max Q(s',·) − Q(s,a))`.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::TrialMetrics;
use crate::error::Result;
use crate::index::IndexParams;

const EF_SEARCH_STEP: usize = 16;
const M_STEP: usize = 4;
const EF_CONSTRUCTION_STEP: usize = 32;
const MAX_M: usize = 64;
const MAX_EF: usize = 1024;

/// One parameter nudge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    IncreaseEfSearch,
    DecreaseEfSearch,
    IncreaseM,
    DecreaseM,
    IncreaseEfConstruction,
    DecreaseEfConstruction,
    ChangeQuantization,
}

impl Action {
    pub const ALL: [Action; 7] = [
        Action::IncreaseEfSearch,
        Action::DecreaseEfSearch,
        Action::IncreaseM,
        Action::DecreaseM,
        Action::IncreaseEfConstruction,
        Action::DecreaseEfConstruction,
        Action::ChangeQuantization,
    ];

    fn index(self) -> usize {
        self as usize
    }

    /// Parameters after taking this action, kept within valid bounds.
    pub fn apply(self, params: &IndexParams) -> IndexParams {
        let mut next = *params;
        match self {
            Action::IncreaseEfSearch => next.ef_search = (params.ef_search + EF_SEARCH_STEP).min(MAX_EF),
            Action::DecreaseEfSearch => {
                next.ef_search = params.ef_search.saturating_sub(EF_SEARCH_STEP).max(1)
            }
            Action::IncreaseM => next.m = (params.m + M_STEP).min(MAX_M),
            Action::DecreaseM => next.m = params.m.saturating_sub(M_STEP).max(2),
            Action::IncreaseEfConstruction => {
                next.ef_construction = (params.ef_construction + EF_CONSTRUCTION_STEP).min(MAX_EF)
            }
            Action::DecreaseEfConstruction => {
                next.ef_construction = params.ef_construction.saturating_sub(EF_CONSTRUCTION_STEP).max(1)
            }
            Action::ChangeQuantization => next.quantization = params.quantization.next(),
        }
        next
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::IncreaseEfSearch => "increase_ef_search",
            Action::DecreaseEfSearch => "decrease_ef_search",
            Action::IncreaseM => "increase_m",
            Action::DecreaseM => "decrease_m",
            Action::IncreaseEfConstruction => "increase_ef_construction",
            Action::DecreaseEfConstruction => "decrease_ef_construction",
            Action::ChangeQuantization => "change_quantization",
        };
        f.write_str(name)
    }
}

/// Raw workload signals, bucketed into a [`StateKey`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// In [0, 1]; see `VectorStore::observation`.
    pub query_complexity: f32,
    pub dataset_size: usize,
    pub dimension: usize,
    pub params: IndexParams,
    /// Mean latency of recent queries, in milliseconds.
    pub recent_latency_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateKey {
    pub complexity: u8,
    pub size: u8,
    pub dimension: u8,
    pub m: u8,
    pub ef_search: u8,
    pub quantization: u8,
    pub latency: u8,
}

impl From<&Observation> for StateKey {
    fn from(o: &Observation) -> Self {
        let latency = match o.recent_latency_ms {
            l if l < 1.0 => 0,
            l if l < 5.0 => 1,
            l if l < 20.0 => 2,
            _ => 3,
        };
        StateKey {
            complexity: ((o.query_complexity.clamp(0.0, 1.0) * 4.0) as u8).min(3),
            size: (o.dataset_size.max(1) as f64).log10() as u8,
            dimension: log2_bucket(o.dimension),
            m: (o.params.m / 8) as u8,
            ef_search: log2_bucket(o.params.ef_search),
            quantization: o.params.quantization.ordinal() as u8,
            latency,
        }
    }
}

fn log2_bucket(v: usize) -> u8 {
    (usize::BITS - v.max(1).leading_zeros()) as u8
}

/// Weights of `recall`, latency (ms) and memory (MB) in the reward.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RewardWeights {
    pub recall: f64,
    pub latency: f64,
    pub memory: f64,
}

impl Default for RewardWeights {
    fn default() -> Self {
        Self {
            recall: 1.0,
            latency: 0.01,
            memory: 0.001,
        }
    }
}

impl RewardWeights {
    pub fn reward(&self, metrics: &TrialMetrics) -> f64 {
        self.recall * f64::from(metrics.recall)
            - self.latency * metrics.latency_ms()
            - self.memory * metrics.memory_mb()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QLearningConfig {
    pub learning_rate: f64,
    pub discount: f64,
    pub epsilon: f64,
    pub epsilon_decay: f64,
    pub epsilon_min: f64,
    pub replay_capacity: usize,
    pub batch_size: usize,
    pub update_frequency: usize,
    pub weights: RewardWeights,
    pub seed: u64,
}

impl Default for QLearningConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            discount: 0.95,
            epsilon: 1.0,
            epsilon_decay: 0.995,
            epsilon_min: 0.01,
            replay_capacity: 10_000,
            batch_size: 32,
            update_frequency: 10,
            weights: RewardWeights::default(),
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experience {
    pub state: StateKey,
    pub action: Action,
    pub reward: f64,
    pub next_state: StateKey,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct QEntry {
    state: StateKey,
    values: [f64; 7],
}

/// Portable form of the learned table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct QTableSnapshot {
    epsilon: f64,
    steps: u64,
    entries: Vec<QEntry>,
}

#[derive(Debug, Clone)]
pub struct QLearningAgent {
    config: QLearningConfig,
    q_table: HashMap<StateKey, [f64; 7]>,
    replay: VecDeque<Experience>,
    epsilon: f64,
    steps: u64,
    rng: StdRng,
}

impl Default for QLearningAgent {
    fn default() -> Self {
        Self::new(QLearningConfig::default())
    }
}

impl QLearningAgent {
    pub fn new(config: QLearningConfig) -> Self {
        Self {
            epsilon: config.epsilon,
            rng: StdRng::seed_from_u64(config.seed),
            replay: VecDeque::with_capacity(config.replay_capacity.min(1024)),
            q_table: HashMap::new(),
            steps: 0,
            config,
        }
    }

    pub fn config(&self) -> &QLearningConfig {
        &self.config
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn replay_len(&self) -> usize {
        self.replay.len()
    }

    pub fn states_seen(&self) -> usize {
        self.q_table.len()
    }

    pub fn reward(&self, metrics: &TrialMetrics) -> f64 {
        self.config.weights.reward(metrics)
    }

    pub fn q_values(&self, state: &StateKey) -> [f64; 7] {
        self.q_table.get(state).copied().unwrap_or_default()
    }

    /// Greedy action; ties go to the earlier action in [`Action::ALL`].
    pub fn best_action(&self, state: &StateKey) -> Action {
        let q = self.q_values(state);
        let mut best = 0;
        for i in 1..q.len() {
            if q[i] > q[best] {
                best = i;
            }
        }
        Action::ALL[best]
    }

    /// ε-greedy choice.
    pub fn select_action(&mut self, state: &StateKey) -> Action {
        if self.rng.random::<f64>() < self.epsilon {
            Action::ALL[self.rng.random_range(0..Action::ALL.len())]
        } else {
            self.best_action(state)
        }
    }

    /// Pick an action for `observation` and the parameters it leads to.
    pub fn propose(&mut self, observation: &Observation) -> (StateKey, Action, IndexParams) {
        let state = StateKey::from(observation);
        let action = self.select_action(&state);
        (state, action, action.apply(&observation.params))
    }

    /// Record a transition, decay ε, and replay a minibatch every
    /// `update_frequency` steps.
    pub fn observe(&mut self, state: StateKey, action: Action, reward: f64, next_state: StateKey) {
        if self.replay.len() >= self.config.replay_capacity.max(1) {
            self.replay.pop_front();
        }
        self.replay.push_back(Experience {
            state,
            action,
            reward,
            next_state,
        });
        self.steps += 1;
        self.epsilon = (self.epsilon * self.config.epsilon_decay).max(self.config.epsilon_min);

        let every = self.config.update_frequency.max(1) as u64;
        if self.steps % every == 0 {
            self.replay_minibatch();
        }
    }

    fn replay_minibatch(&mut self) {
        let amount = self.config.batch_size.min(self.replay.len());
        if amount == 0 {
            return;
        }
        let picks = rand::seq::index::sample(&mut self.rng, self.replay.len(), amount);
        let batch: Vec<Experience> = picks.iter().map(|i| self.replay[i].clone()).collect();
        for exp in &batch {
            self.td_update(exp);
        }
        debug!(batch = amount, epsilon = self.epsilon, states = self.q_table.len(), "replayed minibatch");
    }

    fn td_update(&mut self, exp: &Experience) {
        let next_max = self
            .q_values(&exp.next_state)
            .into_iter()
            .fold(f64::NEG_INFINITY, f64::max);
        let target = exp.reward + self.config.discount * next_max;
        let row = self.q_table.entry(exp.state).or_default();
        let q = &mut row[exp.action.index()];
        *q += self.config.learning_rate * (target - *q);
    }

    /// Serialize the learned table, ε and step count.
    pub fn export_q_table(&self) -> Result<String> {
        let mut entries: Vec<QEntry> = self
            .q_table
            .iter()
            .map(|(state, values)| QEntry {
                state: *state,
                values: *values,
            })
            .collect();
        entries.sort_by_key(|e| e.state);
        let snapshot = QTableSnapshot {
            epsilon: self.epsilon,
            steps: self.steps,
            entries,
        };
        Ok(serde_json::to_string(&snapshot)?)
    }

    /// Replace the learned table with one produced by [`export_q_table`](Self::export_q_table).
    pub fn import_q_table(&mut self, json: &str) -> Result<()> {
        let snapshot: QTableSnapshot = serde_json::from_str(json)?;
        self.q_table = snapshot
            .entries
            .into_iter()
            .map(|e| (e.state, e.values))
            .collect();
        self.epsilon = snapshot.epsilon.max(self.config.epsilon_min);
        self.steps = snapshot.steps;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::quantization::Quantization;

    fn observation(ef_search: usize) -> Observation {
        Observation {
            query_complexity: 0.3,
            dataset_size: 5_000,
            dimension: 128,
            params: IndexParams {
                ef_search,
                ..IndexParams::default()
            },
            recent_latency_ms: 2.0,
        }
    }

    #[test]
    fn reward_weights() {
        let m = TrialMetrics {
            recall: 0.9,
            query_latency: Duration::from_millis(10),
            memory_bytes: 100 * 1024 * 1024,
            build_time: Duration::ZERO,
        };
        let r = RewardWeights::default().reward(&m);
        assert!((r - (0.9 - 0.1 - 0.1)).abs() < 1e-6);
    }

    #[test]
    fn actions_stay_in_bounds() {
        let p = IndexParams {
            m: 2,
            ef_search: 1,
            ef_construction: 1,
            ..IndexParams::default()
        };
        assert_eq!(Action::DecreaseM.apply(&p).m, 2);
        assert_eq!(Action::DecreaseEfSearch.apply(&p).ef_search, 1);
        assert_eq!(Action::DecreaseEfConstruction.apply(&p).ef_construction, 1);
        assert_eq!(
            Action::ChangeQuantization.apply(&p).quantization,
            Quantization::Scalar
        );
        assert!(Action::ALL.iter().all(|a| a.apply(&p).validate().is_ok()));
    }

    #[test]
    fn state_buckets() {
        let s = StateKey::from(&observation(64));
        assert_eq!(s.size, 3);
        assert_eq!(s.dimension, 8);
        assert_eq!(s.ef_search, 7);
        assert_eq!(s.m, 2);
        assert_eq!(s.latency, 1);
        assert_eq!(s.complexity, 1);
    }

    #[test]
    fn epsilon_decays_to_floor() {
        let mut agent = QLearningAgent::default();
        let s = StateKey::from(&observation(64));
        for _ in 0..2_000 {
            agent.observe(s, Action::IncreaseM, 0.0, s);
        }
        assert_eq!(agent.epsilon(), 0.01);
        assert_eq!(agent.steps(), 2_000);
    }

    #[test]
    fn replay_is_bounded() {
        let mut agent = QLearningAgent::new(QLearningConfig {
            replay_capacity: 50,
            ..QLearningConfig::default()
        });
        let s = StateKey::from(&observation(64));
        for _ in 0..120 {
            agent.observe(s, Action::IncreaseM, 1.0, s);
        }
        assert_eq!(agent.replay_len(), 50);
    }

    #[test]
    fn learns_the_rewarded_action() {
        let mut agent = QLearningAgent::new(QLearningConfig {
            epsilon: 0.0,
            ..QLearningConfig::default()
        });
        let s = StateKey::from(&observation(64));
        let t = StateKey::from(&observation(80));
        for i in 0..400 {
            let action = Action::ALL[i % Action::ALL.len()];
            let reward = if action == Action::IncreaseEfSearch { 1.0 } else { -0.5 };
            agent.observe(s, action, reward, t);
        }
        assert_eq!(agent.best_action(&s), Action::IncreaseEfSearch);
        assert_eq!(agent.select_action(&s), Action::IncreaseEfSearch);
    }

    #[test]
    fn q_table_survives_export_and_import() {
        let mut agent = QLearningAgent::default();
        let s = StateKey::from(&observation(64));
        for _ in 0..20 {
            agent.observe(s, Action::DecreaseM, 0.5, s);
        }
        let json = agent.export_q_table().unwrap();

        let mut other = QLearningAgent::default();
        other.import_q_table(&json).unwrap();
        assert_eq!(other.q_values(&s), agent.q_values(&s));
        assert_eq!(other.steps(), 20);
        assert!(other.import_q_table("not json").is_err());
    }
}
