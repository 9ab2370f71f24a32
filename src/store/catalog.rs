//! Canonical record map and slot bookkeeping.

use std::collections::HashMap;
use std::sync::Arc;

use rayon::prelude::*;

use super::record::Metadata;
use crate::error::{Result, StoreError};
use crate::index::Item;
use crate::quantization::{EncodedVector, ProductQuantizer, Quantization, Quantizer};
use crate::scorer::Scorer;

#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub slot: u32,
    /// Normalized (for cosine) full-precision values.
    pub values: Vec<f32>,
    /// `values` under the current scorer's quantization.
    pub code: Arc<EncodedVector>,
    pub metadata: Metadata,
}

/// Records by id plus the live-slot reverse map.
///
/// Every live record owns exactly one slot. Slots are never reused, so an
/// index entry whose slot is missing here is stale.
#[derive(Debug)]
pub(crate) struct Catalog {
    scorer: Scorer,
    records: HashMap<String, Entry>,
    slots: HashMap<u32, String>,
    next_slot: u32,
    /// Bumped whenever `scorer` changes encoding.
    generation: u64,
    trained_pq: Option<Arc<ProductQuantizer>>,
}

impl Catalog {
    pub fn new(scorer: Scorer) -> Self {
        Self {
            scorer,
            records: HashMap::new(),
            slots: HashMap::new(),
            next_slot: 0,
            generation: 0,
            trained_pq: None,
        }
    }

    pub fn scorer(&self) -> &Scorer {
        &self.scorer
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn trained_pq(&self) -> Option<&Arc<ProductQuantizer>> {
        self.trained_pq.as_ref()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Entry> {
        self.records.get(id)
    }

    pub fn by_slot(&self, slot: u32) -> Option<(&str, &Entry)> {
        let id = self.slots.get(&slot)?;
        self.records.get(id).map(|e| (id.as_str(), e))
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &Entry)> {
        self.records.iter().map(|(id, e)| (id.as_str(), e))
    }

    /// Reserve `count` consecutive slots.
    pub fn alloc_slots(&mut self, count: usize) -> Result<std::ops::Range<u32>> {
        let start = self.next_slot;
        let end = u32::try_from(count)
            .ok()
            .and_then(|c| start.checked_add(c))
            .ok_or_else(|| StoreError::InvalidParameter("slot space exhausted".to_string()))?;
        self.next_slot = end;
        Ok(start..end)
    }

    /// Insert or replace; returns the previous entry for `id`.
    pub fn insert(&mut self, id: String, entry: Entry) -> Option<Entry> {
        self.slots.insert(entry.slot, id.clone());
        let previous = self.records.insert(id, entry);
        if let Some(prev) = &previous {
            self.slots.remove(&prev.slot);
        }
        previous
    }

    pub fn remove(&mut self, id: &str) -> Option<Entry> {
        let entry = self.records.remove(id)?;
        self.slots.remove(&entry.slot);
        Some(entry)
    }

    /// Live `(slot, values)` in slot order.
    pub fn values_by_slot(&self) -> Vec<(u32, Vec<f32>)> {
        let mut out: Vec<(u32, Vec<f32>)> = self
            .records
            .values()
            .map(|e| (e.slot, e.values.clone()))
            .collect();
        out.sort_unstable_by_key(|(slot, _)| *slot);
        out
    }

    /// Live index items in slot order.
    pub fn items(&self) -> Vec<Item> {
        let mut out: Vec<Item> = self
            .records
            .values()
            .map(|e| (e.slot, Arc::clone(&e.code)))
            .collect();
        out.sort_unstable_by_key(|(slot, _)| *slot);
        out
    }

    /// Up to `max` evenly spaced vectors, concatenated, for codebook training.
    pub fn training_sample(&self, max: usize) -> (usize, Vec<f32>) {
        let all = self.values_by_slot();
        if all.is_empty() || max == 0 {
            return (0, Vec::new());
        }
        let step = all.len().div_ceil(max).max(1);
        let mut flat = Vec::new();
        let mut n = 0;
        for (_, v) in all.iter().step_by(step) {
            flat.extend_from_slice(v);
            n += 1;
        }
        (n, flat)
    }

    /// Quantizer for `kind`, reusing trained product codebooks when present.
    pub fn quantizer_for(&self, kind: Quantization) -> Result<Quantizer> {
        let quantizer = Quantizer::new(kind, self.scorer.dimension());
        match (kind, &self.trained_pq) {
            (Quantization::Product, Some(pq)) => quantizer.with_product_quantizer(Arc::clone(pq)),
            _ => Ok(quantizer),
        }
    }

    /// Whether `scorer` encodes differently from the current one.
    pub fn encoding_differs(&self, scorer: &Scorer) -> bool {
        let a = self.scorer.quantizer();
        let b = scorer.quantizer();
        let same_pq = match (a.product_quantizer(), b.product_quantizer()) {
            (None, None) => true,
            (Some(x), Some(y)) => Arc::ptr_eq(x, y),
            _ => false,
        };
        a.kind() != b.kind() || !same_pq
    }

    /// Adopt `scorer` and re-encode every record under it.
    pub fn set_scorer(&mut self, scorer: Scorer) {
        if let Some(pq) = scorer.quantizer().product_quantizer() {
            self.trained_pq = Some(Arc::clone(pq));
        }
        self.records.par_iter_mut().for_each(|(_, entry)| {
            entry.code = Arc::new(scorer.encode(&entry.values));
        });
        self.scorer = scorer;
        self.generation += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::Metric;

    fn entry(catalog: &mut Catalog, values: Vec<f32>) -> Entry {
        let slot = catalog.alloc_slots(1).unwrap().start;
        Entry {
            slot,
            code: Arc::new(catalog.scorer().encode(&values)),
            values,
            metadata: Metadata::new(),
        }
    }

    #[test]
    fn replacing_a_record_retires_its_slot() {
        let mut c = Catalog::new(Scorer::exact(Metric::Euclidean, 2));
        let e = entry(&mut c, vec![1.0, 0.0]);
        c.insert("a".into(), e);
        let e = entry(&mut c, vec![0.0, 1.0]);
        let old = c.insert("a".into(), e).unwrap();
        assert_eq!(old.slot, 0);
        assert!(c.by_slot(0).is_none());
        assert_eq!(c.by_slot(1).map(|(id, _)| id), Some("a"));
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn scorer_change_reencodes_records() {
        let mut c = Catalog::new(Scorer::exact(Metric::Euclidean, 2));
        let e = entry(&mut c, vec![0.5, -0.5]);
        c.insert("a".into(), e);
        let binary = Scorer::new(Metric::Euclidean, Quantizer::new(Quantization::Binary, 2));
        assert!(c.encoding_differs(&binary));
        c.set_scorer(binary.clone());
        assert!(!c.encoding_differs(&binary));
        assert!(matches!(*c.get("a").unwrap().code, EncodedVector::Binary(_)));
        assert_eq!(c.generation(), 1);
    }

    #[test]
    fn training_sample_is_bounded() {
        let mut c = Catalog::new(Scorer::exact(Metric::Euclidean, 2));
        for i in 0..10 {
            let e = entry(&mut c, vec![i as f32, 0.0]);
            c.insert(format!("r{i}"), e);
        }
        let (n, flat) = c.training_sample(4);
        assert!(n <= 4 && n > 0);
        assert_eq!(flat.len(), n * 2);
    }
}
