//! Pending operations and batch records.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::index::Item;
use crate::quantization::EncodedVector;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Add,
    Update,
    Delete,
}

/// A queued mutation, not yet visible to the index.
#[derive(Debug, Clone)]
pub struct PendingOp {
    pub kind: OpKind,
    pub id: String,
    /// Slot inserted (add, update) or removed (delete).
    pub slot: u32,
    /// Slot an update supersedes.
    pub replaces: Option<u32>,
    pub vector: Option<Arc<EncodedVector>>,
    pub timestamp: DateTime<Utc>,
}

impl PendingOp {
    pub fn add(id: impl Into<String>, slot: u32, vector: Arc<EncodedVector>) -> Self {
        Self {
            kind: OpKind::Add,
            id: id.into(),
            slot,
            replaces: None,
            vector: Some(vector),
            timestamp: Utc::now(),
        }
    }

    pub fn update(
        id: impl Into<String>,
        slot: u32,
        replaces: u32,
        vector: Arc<EncodedVector>,
    ) -> Self {
        Self {
            kind: OpKind::Update,
            id: id.into(),
            slot,
            replaces: Some(replaces),
            vector: Some(vector),
            timestamp: Utc::now(),
        }
    }

    pub fn delete(id: impl Into<String>, slot: u32) -> Self {
        Self {
            kind: OpKind::Delete,
            id: id.into(),
            slot,
            replaces: None,
            vector: None,
            timestamp: Utc::now(),
        }
    }

    /// Slot this op takes out of the index, if any.
    pub fn removes(&self) -> Option<u32> {
        match self.kind {
            OpKind::Add => None,
            OpKind::Update => self.replaces,
            OpKind::Delete => Some(self.slot),
        }
    }

    /// Vector this op puts into the index, if any.
    pub fn inserts(&self) -> Option<(u32, &Arc<EncodedVector>)> {
        match self.kind {
            OpKind::Add | OpKind::Update => self.vector.as_ref().map(|v| (self.slot, v)),
            OpKind::Delete => None,
        }
    }
}

/// A batch of pending ops resolved into index mutations.
///
/// Removals are applied before insertions. A slot that is both inserted and
/// removed within the batch (added then deleted, or updated twice) is never
/// inserted.
#[derive(Debug, Default)]
pub(crate) struct BatchPlan {
    pub removals: Vec<u32>,
    pub inserts: Vec<Item>,
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl BatchPlan {
    pub fn from_ops(ops: &[PendingOp]) -> Self {
        let removed: HashSet<u32> = ops.iter().filter_map(PendingOp::removes).collect();
        let mut plan = BatchPlan {
            removals: removed.iter().copied().collect(),
            ..Default::default()
        };
        plan.removals.sort_unstable();

        for op in ops {
            match op.kind {
                OpKind::Add => plan.added += 1,
                OpKind::Update => plan.updated += 1,
                OpKind::Delete => plan.deleted += 1,
            }
            if let Some((slot, v)) = op.inserts() {
                if !removed.contains(&slot) {
                    plan.inserts.push((slot, Arc::clone(v)));
                }
            }
        }
        plan.inserts.sort_by_key(|(slot, _)| *slot);
        plan
    }
}

/// Before/after measurements around one batch.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PerformanceImpact {
    pub latency_before: Duration,
    pub latency_after: Duration,
    pub recall_before: f32,
    pub recall_after: f32,
}

impl PerformanceImpact {
    pub fn latency_delta_ms(&self) -> f64 {
        (self.latency_after.as_secs_f64() - self.latency_before.as_secs_f64()) * 1_000.0
    }

    pub fn recall_delta(&self) -> f32 {
        self.recall_after - self.recall_before
    }
}

/// Record of one applied batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncrementalUpdate {
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
    pub index_rebuild_time: Duration,
    pub performance_impact: PerformanceImpact,
    /// The batch also compacted or retrained the index.
    pub compacted: bool,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v() -> Arc<EncodedVector> {
        Arc::new(EncodedVector::Full(vec![1.0]))
    }

    #[test]
    fn plan_counts_and_orders() {
        let ops = vec![
            PendingOp::add("a", 3, v()),
            PendingOp::add("b", 1, v()),
            PendingOp::update("c", 4, 0, v()),
            PendingOp::delete("d", 2),
        ];
        let plan = BatchPlan::from_ops(&ops);
        assert_eq!((plan.added, plan.updated, plan.deleted), (2, 1, 1));
        assert_eq!(plan.removals, vec![0, 2]);
        let inserted: Vec<u32> = plan.inserts.iter().map(|(s, _)| *s).collect();
        assert_eq!(inserted, vec![1, 3, 4]);
    }

    #[test]
    fn add_then_delete_in_one_batch_inserts_nothing() {
        let ops = vec![
            PendingOp::add("a", 7, v()),
            PendingOp::update("a", 8, 7, v()),
            PendingOp::delete("a", 8),
        ];
        let plan = BatchPlan::from_ops(&ops);
        assert!(plan.inserts.is_empty());
        assert_eq!(plan.removals, vec![7, 8]);
    }
}
