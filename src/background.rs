//! Periodic maintenance for a shared [`VectorStore`].
//!
//! A tokio task ticks on an interval and, on each tick, flushes or retries
//! the updater queue (compacting when due). When a tuner is attached it also
//! runs a tuning step every `tune_every` ticks, then re-measures the live
//! index and rolls back on regression. All store work is synchronous and
//! runs on the blocking pool.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::store::VectorStore;
use crate::tuner::Tuner;

#[derive(Debug)]
pub struct MaintenanceConfig {
    pub interval: Duration,
    /// Run a tuning step every this many ticks; 0 disables tuning.
    pub tune_every: u32,
    pub tuner: Option<Tuner>,
}

impl MaintenanceConfig {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            tune_every: 0,
            tuner: None,
        }
    }

    #[must_use]
    pub fn with_tuner(mut self, tuner: Tuner, tune_every: u32) -> Self {
        self.tuner = Some(tuner);
        self.tune_every = tune_every;
        self
    }
}

/// Running maintenance task.
#[derive(Debug)]
pub struct MaintenanceHandle {
    token: CancellationToken,
    task: JoinHandle<Option<Tuner>>,
}

impl MaintenanceHandle {
    /// Token observed by the loop and by in-flight rebuilds.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Stop the loop, wait for the current tick to finish, and hand back the
    /// tuner with whatever it learned.
    pub async fn shutdown(self) -> Option<Tuner> {
        info!("stopping maintenance");
        self.token.cancel();
        match self.task.await {
            Ok(tuner) => tuner,
            Err(e) => {
                warn!(error = %e, "maintenance task ended abnormally");
                None
            }
        }
    }
}

/// Start maintenance for `store`. Must be called from a tokio runtime.
pub fn spawn_maintenance(store: Arc<VectorStore>, config: MaintenanceConfig) -> MaintenanceHandle {
    let token = CancellationToken::new();
    let task = tokio::spawn(run(store, config, token.clone()));
    MaintenanceHandle { token, task }
}

async fn run(store: Arc<VectorStore>, config: MaintenanceConfig, token: CancellationToken) -> Option<Tuner> {
    let MaintenanceConfig {
        interval,
        tune_every,
        mut tuner,
    } = config;
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(interval_ms = interval.as_millis() as u64, tune_every, "maintenance started");

    let mut ticks: u64 = 0;
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        ticks += 1;
        let tune_now = tune_every > 0 && ticks % u64::from(tune_every) == 0;

        let s = Arc::clone(&store);
        let t = token.clone();
        let carried = if tune_now { tuner.take() } else { None };
        let result = tokio::task::spawn_blocking(move || {
            let mut carried = carried;
            maintain(&s, carried.as_mut(), &t);
            carried
        })
        .await;
        match result {
            Ok(Some(back)) => tuner = Some(back),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "maintenance tick panicked"),
        }
    }
    info!(ticks, "maintenance stopped");
    tuner
}

/// One tick's worth of synchronous work.
fn maintain(store: &VectorStore, tuner: Option<&mut Tuner>, token: &CancellationToken) {
    match store.maintenance_tick() {
        Ok(Some(update)) => debug!(
            added = update.added,
            updated = update.updated,
            deleted = update.deleted,
            compacted = update.compacted,
            "maintenance applied batch"
        ),
        Ok(None) => {}
        Err(e) => warn!(error = %e, "maintenance apply failed"),
    }

    let Some(tuner) = tuner else {
        return;
    };
    if store.is_empty() || token.is_cancelled() {
        return;
    }
    let tuned = match tuner {
        Tuner::Bayesian(t) => store.tune(t, token).map(|v| v.is_some()),
        Tuner::QLearning(agent) => store.tune_step(agent, token).map(|step| step.accepted),
    };
    match tuned {
        Ok(true) => match store.measure_performance().and_then(|p| store.check_and_rollback(&p)) {
            Ok(Some(regression)) => warn!(from = %regression.from, to = %regression.to, "rolled back tuned configuration"),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "post-tuning check failed"),
        },
        Ok(false) => {}
        Err(e) => warn!(error = %e, "tuning step failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::store::Record;
    use crate::tuner::QLearningAgent;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn flushes_pending_writes() {
        let store = Arc::new(VectorStore::new(StoreConfig::new(3).with_batch_threshold(1_000)).unwrap());
        for i in 0..5 {
            store
                .add(Record::new(format!("r{i}"), vec![i as f32 + 1.0, 1.0, 0.0]))
                .unwrap();
        }
        assert_eq!(store.get_stats().pending_ops, 5);

        let handle = spawn_maintenance(Arc::clone(&store), MaintenanceConfig::new(Duration::from_millis(10)));
        for _ in 0..200 {
            if store.get_stats().pending_ops == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(handle.shutdown().await.is_none());
        assert_eq!(store.get_stats().pending_ops, 0);
        assert_eq!(store.get_stats().indexed_vectors, 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_returns_the_tuner() {
        let store = Arc::new(VectorStore::new(StoreConfig::new(3).with_batch_threshold(1)).unwrap());
        for i in 0..20 {
            store
                .add(Record::new(format!("r{i}"), vec![i as f32, 1.0, -1.0]))
                .unwrap();
        }
        let config = MaintenanceConfig::new(Duration::from_millis(5))
            .with_tuner(Tuner::QLearning(QLearningAgent::default()), 1);
        let handle = spawn_maintenance(store, config);
        tokio::time::sleep(Duration::from_millis(100)).await;
        match handle.shutdown().await {
            Some(Tuner::QLearning(agent)) => assert!(agent.steps() > 0),
            other => panic!("unexpected tuner: {other:?}"),
        }
    }
}
