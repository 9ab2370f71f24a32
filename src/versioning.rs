//! Version manager: immutable snapshots of tuned configuration.
//!
//! Every adopted configuration is minted as a [`ModelVersion`] with the
//! performance observed when it was adopted. The manager keeps a bounded,
//! ordered history, tracks which version is current, and rolls back to the
//! best earlier version when observed performance regresses.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, StoreError};
use crate::index::IndexParams;

/// Accuracy drop (absolute) that counts as a regression.
pub const ACCURACY_DROP_THRESHOLD: f64 = 0.05;
/// Loss increase (absolute) that counts as a regression.
pub const LOSS_INCREASE_THRESHOLD: f64 = 0.5;

/// Monotonic semantic version id, displayed as `v1.0.3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VersionId {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl VersionId {
    pub const INITIAL: VersionId = VersionId {
        major: 1,
        minor: 0,
        patch: 0,
    };

    #[must_use]
    pub fn next_patch(self) -> Self {
        Self {
            patch: self.patch + 1,
            ..self
        }
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for VersionId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        let bad = || StoreError::InvalidParameter(format!("malformed version id `{s}`"));
        let trimmed = s.strip_prefix('v').unwrap_or(s);
        let mut parts = trimmed.split('.');
        let mut next = || -> Result<u32> { parts.next().ok_or_else(bad)?.parse().map_err(|_| bad()) };
        let id = VersionId {
            major: next()?,
            minor: next()?,
            patch: next()?,
        };
        if parts.next().is_some() {
            return Err(bad());
        }
        Ok(id)
    }
}

/// Performance observed for a configuration.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Performance {
    /// Recall against exact search, in [0, 1].
    pub accuracy: f64,
    /// Mean query latency in milliseconds.
    pub latency_ms: f64,
    pub samples_seen: u64,
    pub loss: Option<f64>,
}

/// Immutable snapshot of an adopted configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVersion {
    pub version: VersionId,
    pub timestamp: DateTime<Utc>,
    pub params: IndexParams,
    pub performance: Performance,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// Record of a pointer move.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackEvent {
    pub from: VersionId,
    pub to: VersionId,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// Regression signal returned by [`VersionManager::check_and_rollback`].
#[derive(Debug, Clone, PartialEq)]
pub struct Regression {
    pub from: VersionId,
    pub to: VersionId,
    pub accuracy_drop: f64,
    pub loss_increase: f64,
}

/// Serializable view for dashboards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionHistory {
    pub current_version: Option<VersionId>,
    pub versions: Vec<ModelVersion>,
    pub rollback_history: Vec<RollbackEvent>,
}

#[derive(Debug, Clone)]
pub struct VersionManager {
    versions: BTreeMap<VersionId, ModelVersion>,
    current: Option<VersionId>,
    latest: Option<VersionId>,
    max_versions: usize,
    rollbacks: Vec<RollbackEvent>,
}

impl VersionManager {
    pub fn new(max_versions: usize) -> Self {
        Self {
            versions: BTreeMap::new(),
            current: None,
            latest: None,
            max_versions: max_versions.max(1),
            rollbacks: Vec::new(),
        }
    }

    /// Mint a new version and make it current.
    pub fn create_version(
        &mut self,
        params: IndexParams,
        performance: Performance,
        metadata: BTreeMap<String, serde_json::Value>,
    ) -> VersionId {
        let version = self
            .latest
            .map(VersionId::next_patch)
            .unwrap_or(VersionId::INITIAL);
        self.versions.insert(
            version,
            ModelVersion {
                version,
                timestamp: Utc::now(),
                params,
                performance,
                metadata,
            },
        );
        self.latest = Some(version);
        self.current = Some(version);
        self.prune();
        info!(%version, accuracy = performance.accuracy, "created model version");
        version
    }

    pub fn get_version(&self, version: VersionId) -> Option<&ModelVersion> {
        self.versions.get(&version)
    }

    pub fn current(&self) -> Option<&ModelVersion> {
        self.current.and_then(|v| self.versions.get(&v))
    }

    pub fn current_id(&self) -> Option<VersionId> {
        self.current
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    pub fn versions(&self) -> impl Iterator<Item = &ModelVersion> {
        self.versions.values()
    }

    pub fn rollback_history(&self) -> &[RollbackEvent] {
        &self.rollbacks
    }

    /// Point `current` at an existing version. History is kept.
    pub fn rollback(&mut self, target: VersionId, reason: impl Into<String>) -> Result<&ModelVersion> {
        if !self.versions.contains_key(&target) {
            return Err(StoreError::VersionNotFound(target.to_string()));
        }
        let reason = reason.into();
        if let Some(from) = self.current {
            self.rollbacks.push(RollbackEvent {
                from,
                to: target,
                reason: reason.clone(),
                timestamp: Utc::now(),
            });
        }
        warn!(%target, %reason, "rolled back model version");
        self.current = Some(target);
        self.versions
            .get(&target)
            .ok_or_else(|| StoreError::VersionNotFound(target.to_string()))
    }

    /// Compare `observed` with the current version; on regression roll back
    /// to the best-accuracy other version and return the signal.
    ///
    /// Regression: accuracy dropped by more than 0.05, or loss rose by more
    /// than 0.5 (when both losses are known). Ties on accuracy prefer the
    /// newer version.
    pub fn check_and_rollback(&mut self, observed: &Performance) -> Option<Regression> {
        let current = self.current()?;
        let from = current.version;
        let accuracy_drop = current.performance.accuracy - observed.accuracy;
        let loss_increase = match (current.performance.loss, observed.loss) {
            (Some(before), Some(after)) => after - before,
            _ => 0.0,
        };
        if accuracy_drop <= ACCURACY_DROP_THRESHOLD && loss_increase <= LOSS_INCREASE_THRESHOLD {
            return None;
        }

        let to = self
            .versions
            .values()
            .filter(|v| v.version != from)
            .max_by(|a, b| {
                a.performance
                    .accuracy
                    .total_cmp(&b.performance.accuracy)
                    .then_with(|| a.version.cmp(&b.version))
            })?
            .version;

        let reason = format!(
            "regression detected: accuracy drop {accuracy_drop:.4}, loss increase {loss_increase:.4}"
        );
        self.rollback(to, reason).ok()?;
        Some(Regression {
            from,
            to,
            accuracy_drop,
            loss_increase,
        })
    }

    pub fn export_history(&self) -> VersionHistory {
        VersionHistory {
            current_version: self.current,
            versions: self.versions.values().cloned().collect(),
            rollback_history: self.rollbacks.clone(),
        }
    }

    /// Drop the oldest non-current versions beyond `max_versions`.
    fn prune(&mut self) {
        while self.versions.len() > self.max_versions {
            let Some(oldest) = self
                .versions
                .keys()
                .copied()
                .find(|v| Some(*v) != self.current)
            else {
                break;
            };
            self.versions.remove(&oldest);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn perf(accuracy: f64) -> Performance {
        Performance {
            accuracy,
            latency_ms: 1.0,
            samples_seen: 100,
            loss: None,
        }
    }

    fn manager_with(accuracies: &[f64]) -> VersionManager {
        let mut vm = VersionManager::new(10);
        for &a in accuracies {
            vm.create_version(IndexParams::default(), perf(a), BTreeMap::new());
        }
        vm
    }

    #[test]
    fn ids_increment_patch_and_parse() {
        let vm = manager_with(&[0.9, 0.9]);
        assert_eq!(vm.current_id().unwrap().to_string(), "v1.0.1");
        assert_eq!("v1.0.1".parse::<VersionId>().unwrap(), vm.current_id().unwrap());
        assert_eq!("1.0.1".parse::<VersionId>().unwrap(), vm.current_id().unwrap());
        assert!("v1.0".parse::<VersionId>().is_err());
    }

    #[test]
    fn small_drop_does_not_roll_back() {
        let mut vm = manager_with(&[0.90, 0.92]);
        assert!(vm.check_and_rollback(&perf(0.88)).is_none());
        assert_eq!(vm.current_id().unwrap().patch, 1);
    }

    #[test]
    fn loss_increase_triggers_rollback() {
        let mut vm = VersionManager::new(10);
        let with_loss = |a, l| Performance {
            loss: Some(l),
            ..perf(a)
        };
        vm.create_version(IndexParams::default(), with_loss(0.9, 0.2), BTreeMap::new());
        vm.create_version(IndexParams::default(), with_loss(0.9, 0.2), BTreeMap::new());
        let regression = vm.check_and_rollback(&with_loss(0.9, 0.9)).unwrap();
        assert_eq!(regression.to.patch, 0);
    }

    #[test]
    fn accuracy_ties_prefer_newer() {
        let mut vm = manager_with(&[0.8, 0.8, 0.95]);
        let r = vm.check_and_rollback(&perf(0.5)).unwrap();
        assert_eq!(r.to.to_string(), "v1.0.1");
    }

    #[test]
    fn pruning_drops_oldest_first() {
        let mut vm = manager_with(&[0.9, 0.9, 0.9]);
        vm.max_versions = 3;
        for _ in 0..2 {
            vm.create_version(IndexParams::default(), perf(0.9), BTreeMap::new());
        }
        assert_eq!(vm.len(), 3);
        assert!(vm.get_version(VersionId::INITIAL).is_none());
        assert!(vm.get_version("v1.0.1".parse().unwrap()).is_none());
        assert_eq!(vm.current_id(), Some("v1.0.4".parse().unwrap()));
    }

    #[test]
    fn single_slot_keeps_only_current() {
        let mut vm = VersionManager::new(1);
        for _ in 0..4 {
            vm.create_version(IndexParams::default(), perf(0.9), BTreeMap::new());
        }
        assert_eq!(vm.len(), 1);
        assert_eq!(vm.current().unwrap().version.patch, 3);
    }

    #[test]
    fn unknown_rollback_target_is_an_error() {
        let mut vm = manager_with(&[0.9]);
        assert!(matches!(
            vm.rollback("v9.9.9".parse().unwrap(), "x"),
            Err(StoreError::VersionNotFound(_))
        ));
    }

    #[test]
    fn history_round_trips_through_json() {
        let mut vm = manager_with(&[0.9, 0.99, 0.7]);
        vm.check_and_rollback(&perf(0.1));
        let json = serde_json::to_string_pretty(&vm.export_history()).unwrap();
        let back: VersionHistory = serde_json::from_str(&json).unwrap();
        assert_eq!(back.versions.len(), 3);
        assert_eq!(back.rollback_history.len(), 1);
        assert_eq!(back.current_version, Some("v1.0.1".parse().unwrap()));
    }
}
