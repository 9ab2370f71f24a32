//! Copy-on-write handle over the live index and its pending queue.
//!
//! Readers take a consistent snapshot (index + not-yet-applied ops) and
//! search without holding any lock. Writers build the next index on a copy
//! and publish it with the ops it absorbed in one step, so a reader sees
//! either the old index with those ops pending or the new index without
//! them.
//!
//! Lock order: `pending` before `index`.

use std::sync::Arc;

use parking_lot::RwLock;

use super::ops::PendingOp;
use crate::index::AnyIndex;

#[derive(Debug)]
pub struct IndexHandle {
    pending: RwLock<Vec<PendingOp>>,
    index: RwLock<Arc<AnyIndex>>,
}

impl IndexHandle {
    pub fn new(index: AnyIndex) -> Self {
        Self {
            pending: RwLock::new(Vec::new()),
            index: RwLock::new(Arc::new(index)),
        }
    }

    /// Current index.
    pub fn load(&self) -> Arc<AnyIndex> {
        Arc::clone(&self.index.read())
    }

    /// Current index together with the ops it has not absorbed yet.
    pub fn snapshot(&self) -> (Arc<AnyIndex>, Vec<PendingOp>) {
        let pending = self.pending.read();
        let index = Arc::clone(&self.index.read());
        (index, pending.clone())
    }

    pub fn push(&self, ops: impl IntoIterator<Item = PendingOp>) -> usize {
        let mut pending = self.pending.write();
        pending.extend(ops);
        pending.len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.read().len()
    }

    /// Swap in `next`, which absorbed the first `applied` pending ops.
    ///
    /// Only the serialized apply path calls this; ops are only ever appended
    /// elsewhere, so the first `applied` entries are the ones it saw.
    pub fn publish(&self, next: Arc<AnyIndex>, applied: usize) {
        let mut pending = self.pending.write();
        let mut index = self.index.write();
        let applied = applied.min(pending.len());
        pending.drain(..applied);
        *index = next;
    }

    /// Like [`publish`](Self::publish), then rewrite the ops that remain
    /// queued (they were encoded for the index being replaced).
    pub fn publish_with<F>(&self, next: Arc<AnyIndex>, applied: usize, mut fixup: F)
    where
        F: FnMut(&mut PendingOp),
    {
        let mut pending = self.pending.write();
        let mut index = self.index.write();
        let applied = applied.min(pending.len());
        pending.drain(..applied);
        pending.iter_mut().for_each(&mut fixup);
        *index = next;
    }
}
