//! Index strategies: exact flat scan, HNSW proximity graph, and IVF.
//!
//! Every strategy stores quantized vectors addressed by a `u32` slot and
//! answers `search` with `(slot, distance)` pairs in ascending distance.
//! Equal distances break on the smaller slot, i.e. the earlier insertion.
//!
//! Strategies are a closed set ([`AnyIndex`]) selected at construction. A
//! strategy is only replaced wholesale through `rebuild`, which builds a new
//! instance off to the side so callers can swap it in atomically.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::quantization::{EncodedVector, Quantization};
use crate::scorer::Scorer;

pub mod flat;
pub mod graph;
pub mod guard;
pub mod ivf;

pub use flat::FlatIndex;
pub use graph::GraphIndex;
pub use guard::RebuildGuard;
pub use ivf::IvfIndex;

/// A stored vector as handed to an index.
pub type Item = (u32, Arc<EncodedVector>);

/// Which strategy backs the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexType {
    Flat,
    #[default]
    Graph,
    Ivf,
}

impl fmt::Display for IndexType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexType::Flat => write!(f, "flat"),
            IndexType::Graph => write!(f, "graph"),
            IndexType::Ivf => write!(f, "ivf"),
        }
    }
}

/// Tunable index parameters.
///
/// One struct for all strategies; fields that do not apply to the active
/// strategy are carried but ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexParams {
    /// Graph fan-out. Upper layers keep `m` links, the base layer `2 * m`.
    pub m: usize,
    /// Candidate list size while inserting into the graph.
    pub ef_construction: usize,
    /// Candidate list size while searching the graph.
    pub ef_search: usize,
    /// IVF cells visited per query.
    pub n_probe: usize,
    /// IVF cell count; 0 picks `sqrt(n)` at training time.
    pub n_centroids: usize,
    pub quantization: Quantization,
}

impl Default for IndexParams {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            ef_search: 64,
            n_probe: 10,
            n_centroids: 0,
            quantization: Quantization::None,
        }
    }
}

impl IndexParams {
    pub fn validate(&self) -> Result<()> {
        if self.m < 2 {
            return Err(StoreError::InvalidParameter(format!(
                "m must be at least 2, got {}",
                self.m
            )));
        }
        if self.ef_construction == 0 || self.ef_search == 0 {
            return Err(StoreError::InvalidParameter(
                "ef_construction and ef_search must be greater than 0".to_string(),
            ));
        }
        if self.n_probe == 0 {
            return Err(StoreError::InvalidParameter(
                "n_probe must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether moving from `self` to `next` requires rebuilding the index
    /// (as opposed to only changing query-time breadth).
    pub fn structural_change(&self, next: &IndexParams, index_type: IndexType) -> bool {
        if self.quantization != next.quantization {
            return true;
        }
        match index_type {
            IndexType::Flat => false,
            IndexType::Graph => self.m != next.m || self.ef_construction != next.ef_construction,
            IndexType::Ivf => self.n_centroids != next.n_centroids,
        }
    }

    /// Query-time breadth for a strategy: `ef_search` for graphs, `n_probe` for IVF.
    pub fn breadth(&self, index_type: IndexType) -> Option<usize> {
        match index_type {
            IndexType::Flat => None,
            IndexType::Graph => Some(self.ef_search),
            IndexType::Ivf => Some(self.n_probe),
        }
    }
}

/// `(distance, id)` ordered by distance, then id.
///
/// In a `BinaryHeap` the top is the worst candidate; wrap in
/// `std::cmp::Reverse` for a min-heap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Scored {
    pub distance: f32,
    pub id: u32,
}

impl Eq for Scored {}

impl Ord for Scored {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Heap slots reserved up front; larger `k` grows on demand.
const TOPK_PREALLOC: usize = 1024;

/// Bounded max-heap keeping the `k` best candidates seen.
pub(crate) struct TopK {
    k: usize,
    heap: BinaryHeap<Scored>,
}

impl TopK {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            heap: BinaryHeap::with_capacity(k.min(TOPK_PREALLOC) + 1),
        }
    }

    #[inline]
    pub fn push(&mut self, id: u32, distance: f32) {
        if self.k == 0 || distance.is_nan() {
            return;
        }
        let cand = Scored { distance, id };
        if self.heap.len() < self.k {
            self.heap.push(cand);
        } else if let Some(worst) = self.heap.peek() {
            if cand < *worst {
                self.heap.pop();
                self.heap.push(cand);
            }
        }
    }

    /// Ascending by `(distance, id)`.
    pub fn into_sorted(self) -> Vec<(u32, f32)> {
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|s| (s.id, s.distance))
            .collect()
    }
}

/// Exact top-k over an iterator of items.
pub(crate) fn brute_force<'a, I>(scorer: &Scorer, query: &[f32], k: usize, items: I) -> Vec<(u32, f32)>
where
    I: IntoIterator<Item = (u32, &'a EncodedVector)>,
{
    let mut top = TopK::new(k);
    for (slot, code) in items {
        top.push(slot, scorer.distance(query, code));
    }
    top.into_sorted()
}

/// Common contract of every index strategy.
pub trait IndexStrategy: Send + Sync {
    fn index_type(&self) -> IndexType;

    fn scorer(&self) -> &Scorer;

    /// Add one vector under `slot`.
    fn insert(&mut self, slot: u32, vector: Arc<EncodedVector>) -> Result<()>;

    /// Add many vectors at once. Validates every item before inserting any.
    fn insert_batch(&mut self, items: Vec<Item>) -> Result<()> {
        for (_, v) in &items {
            self.check_vector(v)?;
        }
        for (slot, v) in items {
            self.insert(slot, v)?;
        }
        Ok(())
    }

    /// Remove `slot`; returns whether it was present.
    fn remove(&mut self, slot: u32) -> bool;

    fn remove_batch(&mut self, slots: &[u32]) -> usize {
        slots.iter().filter(|&&s| self.remove(s)).count()
    }

    /// Approximate top-`k` as `(slot, distance)`, ascending.
    ///
    /// `breadth` overrides the configured query-time breadth
    /// (`ef_search` for graphs, `n_probe` for IVF).
    fn search(&self, query: &[f32], k: usize, breadth: Option<usize>) -> Vec<(u32, f32)>;

    /// Exhaustive top-`k` over the same stored vectors.
    fn exact_search(&self, query: &[f32], k: usize) -> Vec<(u32, f32)>;

    /// Build a fresh index with the same configuration from `items`.
    fn rebuild(&self, items: Vec<Item>, guard: &RebuildGuard) -> Result<Self>
    where
        Self: Sized;

    /// Live vectors.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn contains(&self, slot: u32) -> bool;

    /// Live items in slot order.
    fn items(&self) -> Vec<Item>;

    /// Approximate heap footprint.
    fn memory_bytes(&self) -> usize;

    fn params(&self) -> IndexParams;

    /// Adopt new query-time parameters without restructuring.
    fn set_search_params(&mut self, params: &IndexParams);

    /// Whether accumulated churn warrants a full rebuild.
    fn needs_rebuild(&self, _compaction_threshold: f32) -> bool {
        false
    }

    fn check_vector(&self, vector: &EncodedVector) -> Result<()> {
        let expected = self.scorer().dimension();
        let actual = self.scorer().quantizer().encoded_dimension(vector);
        crate::error::check_dimension(expected, actual)
    }
}

/// The closed set of index strategies.
#[derive(Debug, Clone)]
pub enum AnyIndex {
    Flat(FlatIndex),
    Graph(GraphIndex),
    Ivf(IvfIndex),
}

macro_rules! dispatch {
    ($self:expr, $idx:ident => $body:expr) => {
        match $self {
            AnyIndex::Flat($idx) => $body,
            AnyIndex::Graph($idx) => $body,
            AnyIndex::Ivf($idx) => $body,
        }
    };
}

impl AnyIndex {
    /// Empty index of the given strategy.
    pub fn new(index_type: IndexType, scorer: Scorer, params: IndexParams, seed: u64) -> Result<Self> {
        params.validate()?;
        Ok(match index_type {
            IndexType::Flat => AnyIndex::Flat(FlatIndex::new(scorer, params)),
            IndexType::Graph => AnyIndex::Graph(GraphIndex::new(scorer, params, seed)),
            IndexType::Ivf => AnyIndex::Ivf(IvfIndex::new(scorer, params, seed)),
        })
    }
}

impl IndexStrategy for AnyIndex {
    fn index_type(&self) -> IndexType {
        dispatch!(self, i => i.index_type())
    }

    fn scorer(&self) -> &Scorer {
        dispatch!(self, i => i.scorer())
    }

    fn insert(&mut self, slot: u32, vector: Arc<EncodedVector>) -> Result<()> {
        dispatch!(self, i => i.insert(slot, vector))
    }

    fn insert_batch(&mut self, items: Vec<Item>) -> Result<()> {
        dispatch!(self, i => i.insert_batch(items))
    }

    fn remove(&mut self, slot: u32) -> bool {
        dispatch!(self, i => i.remove(slot))
    }

    fn remove_batch(&mut self, slots: &[u32]) -> usize {
        dispatch!(self, i => i.remove_batch(slots))
    }

    /// `k` and the breadth override are capped at the number of live
    /// vectors, so any `usize` is accepted.
    fn search(&self, query: &[f32], k: usize, breadth: Option<usize>) -> Vec<(u32, f32)> {
        let live = self.len();
        let k = k.min(live);
        let breadth = breadth.map(|b| b.min(live.max(1)));
        dispatch!(self, i => i.search(query, k, breadth))
    }

    fn exact_search(&self, query: &[f32], k: usize) -> Vec<(u32, f32)> {
        let k = k.min(self.len());
        dispatch!(self, i => i.exact_search(query, k))
    }

    fn rebuild(&self, items: Vec<Item>, guard: &RebuildGuard) -> Result<Self> {
        Ok(match self {
            AnyIndex::Flat(i) => AnyIndex::Flat(i.rebuild(items, guard)?),
            AnyIndex::Graph(i) => AnyIndex::Graph(i.rebuild(items, guard)?),
            AnyIndex::Ivf(i) => AnyIndex::Ivf(i.rebuild(items, guard)?),
        })
    }

    fn len(&self) -> usize {
        dispatch!(self, i => i.len())
    }

    fn contains(&self, slot: u32) -> bool {
        dispatch!(self, i => i.contains(slot))
    }

    fn items(&self) -> Vec<Item> {
        dispatch!(self, i => i.items())
    }

    fn memory_bytes(&self) -> usize {
        dispatch!(self, i => i.memory_bytes())
    }

    fn params(&self) -> IndexParams {
        dispatch!(self, i => i.params())
    }

    fn set_search_params(&mut self, params: &IndexParams) {
        dispatch!(self, i => i.set_search_params(params))
    }

    fn needs_rebuild(&self, compaction_threshold: f32) -> bool {
        dispatch!(self, i => i.needs_rebuild(compaction_threshold))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_k_breaks_ties_on_smaller_id() {
        let mut top = TopK::new(2);
        top.push(9, 0.5);
        top.push(3, 0.5);
        top.push(5, 0.5);
        assert_eq!(top.into_sorted(), vec![(3, 0.5), (5, 0.5)]);
    }

    #[test]
    fn query_breadth_change_is_not_structural() {
        let a = IndexParams::default();
        let b = IndexParams {
            ef_search: 128,
            n_probe: 20,
            ..a
        };
        assert!(!a.structural_change(&b, IndexType::Graph));
        assert!(!a.structural_change(&b, IndexType::Ivf));

        let c = IndexParams { m: 24, ..a };
        assert!(c.structural_change(&a, IndexType::Graph));
        assert!(!c.structural_change(&a, IndexType::Ivf));
    }

    #[test]
    fn params_deserialize_with_defaults() {
        let p: IndexParams = serde_json::from_str(r#"{"m": 32}"#).unwrap();
        assert_eq!(p.m, 32);
        assert_eq!(p.ef_construction, 200);
        assert_eq!(p.quantization, Quantization::None);
    }
}
