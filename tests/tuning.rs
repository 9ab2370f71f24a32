//! Tuning, versioning and rollback through the store.

use std::time::Duration;

use attune::benchmark::create_clustered_dataset;
use attune::tuner::BayesianConfig;
use attune::{
    BayesianTuner, IndexParams, IndexStrategy, IndexType, Metadata, Performance, QLearningAgent, RebuildGuard,
    Record, StoreConfig, StoreError, VectorStore, VersionId,
};
use tokio_util::sync::CancellationToken;

fn populated(index_type: IndexType, n: usize) -> VectorStore {
    let data = create_clustered_dataset(n, 0, 16, 6, 0.15, 21);
    let store = VectorStore::new(StoreConfig::new(16).with_index_type(index_type)).unwrap();
    let records = data
        .train
        .into_iter()
        .enumerate()
        .map(|(i, v)| Record::new(format!("r{i}"), v))
        .collect();
    store.add_batch(records).unwrap();
    store.force_update().unwrap();
    store
}

fn performance(accuracy: f64) -> Performance {
    Performance {
        accuracy,
        latency_ms: 1.0,
        samples_seen: 100,
        loss: None,
    }
}

fn adopt(store: &VectorStore, ef_search: usize, accuracy: f64) -> VersionId {
    let params = IndexParams {
        ef_search,
        ..store.params()
    };
    store
        .apply_params(params, performance(accuracy), Metadata::new(), &RebuildGuard::unbounded())
        .unwrap()
}

#[test]
fn rollback_keeps_later_versions() {
    let store = populated(IndexType::Graph, 100);
    let ids: Vec<VersionId> = (1..=5).map(|i| adopt(&store, i * 10, 0.9)).collect();
    assert_eq!(ids[0], VersionId::INITIAL);
    assert_eq!(store.current_version().unwrap().version, ids[4]);

    let restored = store.rollback(ids[1], "manual").unwrap();
    assert_eq!(restored.version, ids[1]);
    assert_eq!(store.params().ef_search, 20);
    assert_eq!(store.updater().index().params().ef_search, 20);
    assert_eq!(store.current_version().unwrap().version, ids[1]);
    assert_eq!(store.get_version(ids[4]).unwrap().params.ef_search, 50);

    let history = store.export_history();
    assert_eq!(history.versions.len(), 5);
    assert_eq!(history.rollback_history.len(), 1);
    assert_eq!(history.rollback_history[0].from, ids[4]);
    assert_eq!(history.current_version, Some(ids[1]));

    let missing = ids[4].next_patch();
    assert!(matches!(
        store.rollback(missing, "nope"),
        Err(StoreError::VersionNotFound(_))
    ));
}

#[test]
fn regression_restores_best_prior_configuration() {
    let store = populated(IndexType::Graph, 100);
    let good = adopt(&store, 64, 0.95);
    let bad = adopt(&store, 8, 0.96);

    assert!(store.check_and_rollback(&performance(0.95)).unwrap().is_none());

    let regression = store.check_and_rollback(&performance(0.80)).unwrap().unwrap();
    assert_eq!(regression.from, bad);
    assert_eq!(regression.to, good);
    assert!((regression.accuracy_drop - 0.16).abs() < 1e-9);
    assert_eq!(store.params().ef_search, 64);
}

#[test]
fn structural_rollback_rebuilds() {
    let store = populated(IndexType::Graph, 120);
    let first = adopt(&store, 64, 0.9);
    let params = IndexParams { m: 8, ..store.params() };
    store
        .apply_params(params, performance(0.9), Metadata::new(), &RebuildGuard::unbounded())
        .unwrap();
    assert_eq!(store.params().m, 8);

    store.rollback(first, "undo").unwrap();
    assert_eq!(store.params().m, IndexParams::default().m);
    assert_eq!(store.updater().index().len(), 120);
}

#[test]
fn bayesian_tuning_records_versions() {
    let store = populated(IndexType::Graph, 300);
    let mut tuner = BayesianTuner::new(BayesianConfig {
        max_trials: 4,
        initial_trials: 2,
        ..BayesianConfig::default()
    });
    let token = CancellationToken::new();
    let adopted = store.tune(&mut tuner, &token).unwrap();

    assert_eq!(tuner.trials().len(), 4);
    let baseline = store.get_version(VersionId::INITIAL).unwrap();
    assert_eq!(baseline.metadata["source"], "baseline");
    match adopted {
        Some(v) => {
            assert_eq!(store.current_version().unwrap().version, v);
            assert_eq!(store.get_version(v).unwrap().params, store.params());
        }
        None => assert_eq!(store.current_version().unwrap().version, VersionId::INITIAL),
    }
}

#[test]
fn timed_out_trials_never_replace_live_configuration() {
    let store = populated(IndexType::Graph, 300);
    let before = store.params();
    let mut tuner = BayesianTuner::new(BayesianConfig {
        max_trials: 3,
        trial_budget: Duration::ZERO,
        ..BayesianConfig::default()
    });
    let err = store.tune(&mut tuner, &CancellationToken::new()).unwrap_err();
    assert!(matches!(err, StoreError::TuningEvaluationTimeout { .. }));
    assert!(tuner.trials().iter().all(|t| t.timed_out));
    assert_eq!(store.params(), before);
    assert_eq!(store.current_version().unwrap().version, VersionId::INITIAL);
}

#[test]
fn cancelled_tuning_changes_nothing() {
    let store = populated(IndexType::Ivf, 200);
    let before = store.params();
    let token = CancellationToken::new();
    token.cancel();
    let mut tuner = BayesianTuner::default();
    assert_eq!(store.tune(&mut tuner, &token).unwrap_err(), StoreError::Cancelled);
    assert_eq!(store.params(), before);
}

#[test]
fn q_learning_step_learns_and_versions() {
    let store = populated(IndexType::Graph, 200);
    let mut agent = QLearningAgent::default();
    let token = CancellationToken::new();

    for _ in 0..3 {
        let step = store.tune_step(&mut agent, &token).unwrap();
        if step.accepted {
            assert!(step.reward > step.baseline_reward);
            assert_eq!(store.params(), step.params);
            assert!(step.version.is_some());
        } else {
            assert!(step.version.is_none());
        }
    }
    assert_eq!(agent.steps(), 3);
    assert!(agent.epsilon() < 1.0);
    assert!(store.current_version().is_some());
}

#[test]
fn empty_store_cannot_be_tuned() {
    let store = VectorStore::new(StoreConfig::new(4)).unwrap();
    let mut agent = QLearningAgent::default();
    assert_eq!(
        store.tune_step(&mut agent, &CancellationToken::new()).unwrap_err(),
        StoreError::EmptyIndex
    );
}
