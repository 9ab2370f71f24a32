//! Hierarchical Navigable Small World (HNSW) graph index.
//!
//! # Algorithm
//!
//! Nodes live on a random number of layers (level drawn as
//! `floor(-ln(U) / ln(M))`, so each layer is roughly `M` times sparser than
//! the one below). Upper layers hold long-range links for navigation; the
//! base layer holds every node.
//!
//! - **Insert**: greedy descent with `ef = 1` down to the node's level, then an
//!   `ef_construction` beam search per layer, neighbor selection with the RND
//!   heuristic, and reverse links pruned back to the layer cap.
//! - **Search**: greedy descent to layer 1, then a beam of
//!   `max(ef_search, k)` on the base layer. The beam stops when the closest
//!   unexplored candidate is farther than the worst kept result.
//! - **Remove**: the node is tombstoned and unlinked; every node that pointed
//!   at it re-selects its neighbors from its remaining links plus the removed
//!   node's links (two-hop candidates). Tombstones are reclaimed by a full
//!   rebuild once they exceed the compaction threshold.
//!
//! Degree caps: `M` links on upper layers, `2·M` on the base layer.
//!
//! # References
//!
//! - Malkov & Yashunin (2016): "Efficient and robust approximate nearest neighbor search
//!   using Hierarchical Navigable Small World graphs"

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use smallvec::SmallVec;
use tracing::debug;

use super::{IndexParams, IndexStrategy, IndexType, Item, RebuildGuard};
use crate::error::{Result, StoreError};
use crate::quantization::EncodedVector;
use crate::scorer::Scorer;

mod construction;
mod search;

const MAX_LEVEL: usize = 16;
const REBUILD_CHUNK: usize = 128;

pub(crate) type Links = SmallVec<[u32; 32]>;

#[derive(Debug, Clone)]
pub(crate) struct Node {
    slot: u32,
    vector: Arc<EncodedVector>,
    /// One neighbor list per layer, `0..=level`.
    links: Vec<Links>,
    deleted: bool,
}

impl Node {
    fn level(&self) -> usize {
        self.links.len().saturating_sub(1)
    }
}

/// HNSW index over quantized vectors.
#[derive(Debug, Clone)]
pub struct GraphIndex {
    scorer: Scorer,
    params: IndexParams,
    seed: u64,
    rng: StdRng,
    nodes: Vec<Node>,
    node_of: HashMap<u32, u32>,
    entry_point: Option<u32>,
    tombstones: usize,
}

impl GraphIndex {
    pub fn new(scorer: Scorer, params: IndexParams, seed: u64) -> Self {
        Self {
            scorer,
            params,
            seed,
            rng: StdRng::seed_from_u64(seed),
            nodes: Vec::new(),
            node_of: HashMap::new(),
            entry_point: None,
            tombstones: 0,
        }
    }

    /// Highest layer of the current entry point.
    pub fn max_level(&self) -> usize {
        self.entry_point
            .map(|ep| self.nodes[ep as usize].level())
            .unwrap_or(0)
    }

    /// Removed nodes not yet reclaimed by a rebuild.
    pub fn tombstones(&self) -> usize {
        self.tombstones
    }

    /// Out-degree of `slot` on `layer`, if present.
    pub fn degree(&self, slot: u32, layer: usize) -> Option<usize> {
        let node = &self.nodes[*self.node_of.get(&slot)? as usize];
        node.links.get(layer).map(|l| l.len())
    }

    fn layer_cap(&self, layer: usize) -> usize {
        if layer == 0 {
            self.params.m * 2
        } else {
            self.params.m
        }
    }

    fn random_level(&mut self) -> usize {
        let level_mult = 1.0 / (self.params.m.max(2) as f64).ln();
        // `random` yields [0, 1); flip to (0, 1] so the log is finite.
        let u = 1.0 - self.rng.random::<f64>();
        ((-u.ln() * level_mult).floor() as usize).min(MAX_LEVEL)
    }

    #[inline]
    fn distance_to(&self, query: &[f32], node: u32) -> f32 {
        self.scorer
            .distance(query, &self.nodes[node as usize].vector)
    }

    fn reassign_entry_point(&mut self) {
        self.entry_point = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| !n.deleted)
            // max_by_key keeps the last maximum; iterate in reverse so the
            // earliest node wins among equal levels.
            .rev()
            .max_by_key(|(_, n)| n.level())
            .map(|(idx, _)| idx as u32);
    }
}

impl IndexStrategy for GraphIndex {
    fn index_type(&self) -> IndexType {
        IndexType::Graph
    }

    fn scorer(&self) -> &Scorer {
        &self.scorer
    }

    fn insert(&mut self, slot: u32, vector: Arc<EncodedVector>) -> Result<()> {
        self.check_vector(&vector)?;
        if self.node_of.contains_key(&slot) {
            return Err(StoreError::InvalidParameter(format!(
                "slot {slot} is already indexed"
            )));
        }

        let level = self.random_level();
        let idx = self.nodes.len() as u32;
        self.nodes.push(Node {
            slot,
            vector,
            links: vec![Links::new(); level + 1],
            deleted: false,
        });
        self.node_of.insert(slot, idx);
        self.link_new_node(idx);
        Ok(())
    }

    fn insert_batch(&mut self, mut items: Vec<Item>) -> Result<()> {
        for (_, v) in &items {
            self.check_vector(v)?;
        }
        items.sort_by_key(|(slot, _)| *slot);
        for (slot, v) in items {
            self.insert(slot, v)?;
        }
        Ok(())
    }

    fn remove(&mut self, slot: u32) -> bool {
        self.remove_batch(&[slot]) == 1
    }

    fn remove_batch(&mut self, slots: &[u32]) -> usize {
        let mut removed: HashSet<u32> = HashSet::with_capacity(slots.len());
        for slot in slots {
            if let Some(node) = self.node_of.remove(slot) {
                self.nodes[node as usize].deleted = true;
                removed.insert(node);
            }
        }
        if removed.is_empty() {
            return 0;
        }

        self.unlink(&removed);
        self.tombstones += removed.len();

        if self.entry_point.is_some_and(|ep| removed.contains(&ep)) {
            self.reassign_entry_point();
        }
        debug!(
            removed = removed.len(),
            tombstones = self.tombstones,
            "unlinked graph nodes"
        );
        removed.len()
    }

    fn search(&self, query: &[f32], k: usize, breadth: Option<usize>) -> Vec<(u32, f32)> {
        let k = k.min(self.len());
        let ef = breadth
            .unwrap_or(self.params.ef_search)
            .max(k)
            .min(self.nodes.len().max(1));
        self.knn(query, k, ef)
    }

    fn exact_search(&self, query: &[f32], k: usize) -> Vec<(u32, f32)> {
        super::brute_force(
            &self.scorer,
            query,
            k,
            self.nodes
                .iter()
                .filter(|n| !n.deleted)
                .map(|n| (n.slot, n.vector.as_ref())),
        )
    }

    fn rebuild(&self, mut items: Vec<Item>, guard: &RebuildGuard) -> Result<Self> {
        let mut fresh = Self::new(self.scorer.clone(), self.params, self.seed);
        for (_, v) in &items {
            fresh.check_vector(v)?;
        }
        items.sort_by_key(|(slot, _)| *slot);
        for chunk in items.chunks(REBUILD_CHUNK) {
            guard.check()?;
            for (slot, v) in chunk {
                fresh.insert(*slot, Arc::clone(v))?;
            }
        }
        Ok(fresh)
    }

    fn len(&self) -> usize {
        self.node_of.len()
    }

    fn contains(&self, slot: u32) -> bool {
        self.node_of.contains_key(&slot)
    }

    fn items(&self) -> Vec<Item> {
        let mut items: Vec<Item> = self
            .nodes
            .iter()
            .filter(|n| !n.deleted)
            .map(|n| (n.slot, Arc::clone(&n.vector)))
            .collect();
        items.sort_by_key(|(slot, _)| *slot);
        items
    }

    fn memory_bytes(&self) -> usize {
        self.nodes
            .iter()
            .map(|n| {
                let links: usize = n.links.iter().map(|l| l.len()).sum();
                n.vector.memory_bytes() + links * std::mem::size_of::<u32>()
            })
            .sum::<usize>()
            + self.node_of.len() * 2 * std::mem::size_of::<u32>()
    }

    fn params(&self) -> IndexParams {
        self.params
    }

    fn set_search_params(&mut self, params: &IndexParams) {
        self.params.ef_search = params.ef_search;
        self.params.n_probe = params.n_probe;
    }

    fn needs_rebuild(&self, compaction_threshold: f32) -> bool {
        !self.nodes.is_empty()
            && self.tombstones as f32 / self.nodes.len() as f32 > compaction_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::{normalize, Metric};
    use rand::Rng;

    fn random_items(n: usize, dim: usize, seed: u64) -> Vec<Item> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n as u32)
            .map(|slot| {
                let v: Vec<f32> = (0..dim).map(|_| rng.random_range(-1.0..1.0)).collect();
                (slot, Arc::new(EncodedVector::Full(normalize(&v))))
            })
            .collect()
    }

    fn build(n: usize, dim: usize) -> GraphIndex {
        let mut index = GraphIndex::new(Scorer::exact(Metric::Cosine, dim), IndexParams::default(), 42);
        index.insert_batch(random_items(n, dim, 7)).unwrap();
        index
    }

    #[test]
    fn finds_itself() {
        let index = build(300, 16);
        for (slot, v) in index.items().into_iter().take(20) {
            let query = index.scorer().decode(&v).into_owned();
            let hits = index.search(&query, 1, None);
            assert_eq!(hits[0].0, slot);
        }
    }

    #[test]
    fn degree_caps_hold() {
        let index = build(500, 8);
        let m = index.params().m;
        for slot in 0..500 {
            assert!(index.degree(slot, 0).unwrap() <= 2 * m);
            if let Some(d) = index.degree(slot, 1) {
                assert!(d <= m);
            }
        }
    }

    #[test]
    fn removed_nodes_never_returned_and_entry_survives() {
        let mut index = build(200, 8);
        let entry_slot = index.nodes[index.entry_point.unwrap() as usize].slot;
        let victims: Vec<u32> = (0..100).chain(std::iter::once(entry_slot)).collect();
        index.remove_batch(&victims);

        assert!(index.entry_point.is_some());
        assert!(!index.nodes[index.entry_point.unwrap() as usize].deleted);
        for (_, v) in index.items() {
            let query = index.scorer().decode(&v).into_owned();
            for (slot, _) in index.search(&query, 10, None) {
                assert!(!victims.contains(&slot));
            }
        }
    }

    #[test]
    fn removing_everything_empties_the_graph() {
        let mut index = build(20, 4);
        let all: Vec<u32> = (0..20).collect();
        assert_eq!(index.remove_batch(&all), 20);
        assert!(index.is_empty());
        assert!(index.search(&[1.0, 0.0, 0.0, 0.0], 5, None).is_empty());
        assert!(index.needs_rebuild(0.2));
    }

    #[test]
    fn equal_distances_prefer_earlier_slots() {
        let mut index = GraphIndex::new(Scorer::exact(Metric::Euclidean, 2), IndexParams::default(), 1);
        for slot in 0..5 {
            index
                .insert(slot, Arc::new(EncodedVector::Full(vec![1.0, 1.0])))
                .unwrap();
        }
        let hits = index.search(&[0.0, 0.0], 3, None);
        let slots: Vec<u32> = hits.iter().map(|(s, _)| *s).collect();
        assert_eq!(slots, vec![0, 1, 2]);
    }

    #[test]
    fn rebuild_honors_cancellation() {
        let index = build(50, 4);
        let guard = RebuildGuard::unbounded();
        guard.token().cancel();
        assert_eq!(
            index.rebuild(index.items(), &guard).err(),
            Some(StoreError::Cancelled)
        );
    }
}
