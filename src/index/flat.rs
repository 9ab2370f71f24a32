//! Exhaustive (flat) index: exact results, ground truth for recall.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::{brute_force, IndexParams, IndexStrategy, IndexType, Item, RebuildGuard};
use crate::error::{Result, StoreError};
use crate::quantization::EncodedVector;
use crate::scorer::Scorer;

/// Scans every stored vector with a bounded heap of size `k`, O(n log k).
#[derive(Debug, Clone)]
pub struct FlatIndex {
    scorer: Scorer,
    params: IndexParams,
    vectors: BTreeMap<u32, Arc<EncodedVector>>,
}

impl FlatIndex {
    pub fn new(scorer: Scorer, params: IndexParams) -> Self {
        Self {
            scorer,
            params,
            vectors: BTreeMap::new(),
        }
    }
}

impl IndexStrategy for FlatIndex {
    fn index_type(&self) -> IndexType {
        IndexType::Flat
    }

    fn scorer(&self) -> &Scorer {
        &self.scorer
    }

    fn insert(&mut self, slot: u32, vector: Arc<EncodedVector>) -> Result<()> {
        self.check_vector(&vector)?;
        if self.vectors.contains_key(&slot) {
            return Err(StoreError::InvalidParameter(format!(
                "slot {slot} is already indexed"
            )));
        }
        self.vectors.insert(slot, vector);
        Ok(())
    }

    fn remove(&mut self, slot: u32) -> bool {
        self.vectors.remove(&slot).is_some()
    }

    fn search(&self, query: &[f32], k: usize, _breadth: Option<usize>) -> Vec<(u32, f32)> {
        self.exact_search(query, k)
    }

    fn exact_search(&self, query: &[f32], k: usize) -> Vec<(u32, f32)> {
        brute_force(
            &self.scorer,
            query,
            k,
            self.vectors.iter().map(|(&slot, v)| (slot, v.as_ref())),
        )
    }

    fn rebuild(&self, items: Vec<Item>, guard: &RebuildGuard) -> Result<Self> {
        guard.check()?;
        let mut fresh = Self::new(self.scorer.clone(), self.params);
        fresh.insert_batch(items)?;
        Ok(fresh)
    }

    fn len(&self) -> usize {
        self.vectors.len()
    }

    fn contains(&self, slot: u32) -> bool {
        self.vectors.contains_key(&slot)
    }

    fn items(&self) -> Vec<Item> {
        self.vectors
            .iter()
            .map(|(&slot, v)| (slot, Arc::clone(v)))
            .collect()
    }

    fn memory_bytes(&self) -> usize {
        self.vectors
            .values()
            .map(|v| v.memory_bytes() + std::mem::size_of::<u32>())
            .sum()
    }

    fn params(&self) -> IndexParams {
        self.params
    }

    fn set_search_params(&mut self, params: &IndexParams) {
        self.params.ef_search = params.ef_search;
        self.params.n_probe = params.n_probe;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::Metric;

    fn full(v: &[f32]) -> Arc<EncodedVector> {
        Arc::new(EncodedVector::Full(v.to_vec()))
    }

    #[test]
    fn returns_exact_top_k_in_order() {
        let mut index = FlatIndex::new(Scorer::exact(Metric::Euclidean, 1), IndexParams::default());
        for (slot, x) in [(0, 5.0), (1, 1.0), (2, 3.0), (3, 2.0)] {
            index.insert(slot, full(&[x])).unwrap();
        }
        let hits = index.search(&[0.0], 3, None);
        let slots: Vec<u32> = hits.iter().map(|(s, _)| *s).collect();
        assert_eq!(slots, vec![1, 3, 2]);
    }

    #[test]
    fn rejects_wrong_dimension() {
        let mut index = FlatIndex::new(Scorer::exact(Metric::Euclidean, 2), IndexParams::default());
        assert!(matches!(
            index.insert(0, full(&[1.0])),
            Err(StoreError::DimensionMismatch { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn batch_with_one_bad_vector_inserts_nothing() {
        let mut index = FlatIndex::new(Scorer::exact(Metric::Euclidean, 2), IndexParams::default());
        let items = vec![(0, full(&[1.0, 0.0])), (1, full(&[1.0]))];
        assert!(index.insert_batch(items).is_err());
        assert!(index.is_empty());
    }

    #[test]
    fn removed_slots_are_not_returned() {
        let mut index = FlatIndex::new(Scorer::exact(Metric::Euclidean, 1), IndexParams::default());
        index.insert(0, full(&[0.0])).unwrap();
        index.insert(1, full(&[1.0])).unwrap();
        assert!(index.remove(0));
        assert!(!index.remove(0));
        assert_eq!(index.search(&[0.0], 5, None), vec![(1, 1.0)]);
    }
}
