//! HNSW beam search.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};

use super::GraphIndex;
use crate::index::Scored;

impl GraphIndex {
    /// Beam search within one layer.
    ///
    /// - min-heap of candidates (explore closest first)
    /// - max-heap of results (track the worst kept result for pruning)
    /// - stop once the best unexplored candidate is worse than the worst result
    ///
    /// Returns up to `ef` nodes ascending by `(distance, node)`.
    pub(super) fn search_layer(
        &self,
        query: &[f32],
        entries: &[Scored],
        ef: usize,
        layer: usize,
    ) -> Vec<Scored> {
        let nodes = self.nodes.len().max(1);
        let ef = ef.clamp(1, nodes);
        let mut visited: HashSet<u32> = HashSet::with_capacity(ef.saturating_mul(4).min(nodes));
        let mut candidates: BinaryHeap<Reverse<Scored>> =
            BinaryHeap::with_capacity(ef.saturating_mul(2).min(nodes));
        let mut results: BinaryHeap<Scored> = BinaryHeap::with_capacity(ef + 1);

        for &e in entries {
            if visited.insert(e.id) {
                candidates.push(Reverse(e));
                results.push(e);
                if results.len() > ef {
                    results.pop();
                }
            }
        }

        while let Some(Reverse(current)) = candidates.pop() {
            if results.len() >= ef && results.peek().is_some_and(|worst| current > *worst) {
                break;
            }

            let Some(links) = self.nodes[current.id as usize].links.get(layer) else {
                continue;
            };
            for &neighbor in links {
                if !visited.insert(neighbor) || self.nodes[neighbor as usize].deleted {
                    continue;
                }
                let cand = Scored {
                    distance: self.distance_to(query, neighbor),
                    id: neighbor,
                };
                let admit = results.len() < ef || results.peek().is_some_and(|w| cand < *w);
                if admit {
                    candidates.push(Reverse(cand));
                    results.push(cand);
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        results.into_sorted_vec()
    }

    /// Top-`k` slots with a base-layer beam of `ef`.
    pub(super) fn knn(&self, query: &[f32], k: usize, ef: usize) -> Vec<(u32, f32)> {
        let Some(entry) = self.entry_point else {
            return Vec::new();
        };
        if k == 0 {
            return Vec::new();
        }

        let mut entries = vec![Scored {
            distance: self.distance_to(query, entry),
            id: entry,
        }];
        for layer in (1..=self.max_level()).rev() {
            entries = self.search_layer(query, &entries, 1, layer);
        }

        let mut hits: Vec<(u32, f32)> = self
            .search_layer(query, &entries, ef, 0)
            .into_iter()
            .map(|s| (self.nodes[s.id as usize].slot, s.distance))
            .collect();
        hits.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        hits.truncate(k);
        hits
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::distance::Metric;
    use crate::index::{GraphIndex, IndexParams, IndexStrategy};
    use crate::quantization::EncodedVector;
    use crate::scorer::Scorer;

    #[test]
    fn empty_graph_returns_nothing() {
        let index = GraphIndex::new(Scorer::exact(Metric::Dot, 3), IndexParams::default(), 0);
        assert!(index.search(&[1.0, 0.0, 0.0], 10, None).is_empty());
    }

    #[test]
    fn line_graph_is_searched_in_distance_order() {
        let mut index = GraphIndex::new(Scorer::exact(Metric::Euclidean, 1), IndexParams::default(), 3);
        for slot in 0..50u32 {
            index
                .insert(slot, Arc::new(EncodedVector::Full(vec![slot as f32])))
                .unwrap();
        }
        let hits = index.search(&[20.2], 3, None);
        let slots: Vec<u32> = hits.iter().map(|(s, _)| *s).collect();
        assert_eq!(slots, vec![20, 21, 19]);
    }
}
