//! HNSW insertion, neighbor selection and repair.

use std::collections::{HashMap, HashSet};

use super::{GraphIndex, Links};
use crate::index::Scored;

impl GraphIndex {
    /// Select up to `m` neighbors from `candidates` (ascending by distance to
    /// the base point) using RND (Relative Neighborhood Diversification).
    ///
    /// Criterion: include candidate \(X_j\) if it is closer to the base point
    /// than to every already-selected neighbor \(X_i\). Remaining slots are
    /// filled with the closest rejected candidates.
    pub(super) fn select_neighbors(&self, candidates: &[Scored], m: usize) -> Vec<Scored> {
        let mut selected: Vec<Scored> = Vec::with_capacity(m.min(candidates.len()));
        let mut rejected: Vec<Scored> = Vec::new();

        for &cand in candidates {
            if selected.len() >= m {
                break;
            }
            let cand_vec = &self.nodes[cand.id as usize].vector;
            let diverse = selected.iter().all(|sel| {
                let inter = self
                    .scorer
                    .code_distance(&self.nodes[sel.id as usize].vector, cand_vec);
                cand.distance < inter
            });
            if diverse {
                selected.push(cand);
            } else {
                rejected.push(cand);
            }
        }

        for cand in rejected {
            if selected.len() >= m {
                break;
            }
            selected.push(cand);
        }
        selected.sort();
        selected
    }

    /// Wire node `q` (already pushed, unlinked) into every layer up to its level.
    pub(super) fn link_new_node(&mut self, q: u32) {
        let Some(entry) = self.entry_point else {
            self.entry_point = Some(q);
            return;
        };

        let level = self.nodes[q as usize].level();
        let top = self.nodes[entry as usize].level();
        let query = self
            .scorer
            .decode(&self.nodes[q as usize].vector)
            .into_owned();

        // 1) Descend with ef = 1 above the node's level; no edges are added.
        let mut entries = vec![Scored {
            distance: self.distance_to(&query, entry),
            id: entry,
        }];
        for layer in ((level + 1)..=top).rev() {
            entries = self.search_layer(&query, &entries, 1, layer);
        }

        // 2) Beam search and connect on every shared layer.
        for layer in (0..=level.min(top)).rev() {
            let candidates =
                self.search_layer(&query, &entries, self.params.ef_construction, layer);
            let selected = self.select_neighbors(&candidates, self.layer_cap(layer));

            self.nodes[q as usize].links[layer] = selected.iter().map(|s| s.id).collect();
            for s in &selected {
                self.add_reverse_link(s.id, q, layer);
            }
            if !candidates.is_empty() {
                entries = candidates;
            }
        }

        if level > top {
            self.entry_point = Some(q);
        }
    }

    /// Link `from -> to` on `layer`, pruning `from` back to the layer cap.
    fn add_reverse_link(&mut self, from: u32, to: u32, layer: usize) {
        let cap = self.layer_cap(layer);
        let links = &mut self.nodes[from as usize].links[layer];
        if links.contains(&to) {
            return;
        }
        links.push(to);
        if links.len() <= cap {
            return;
        }

        let pool: Vec<u32> = links.iter().copied().collect();
        let pruned = self.reselect(from, layer, pool);
        self.nodes[from as usize].links[layer] = pruned;
    }

    /// Re-run neighbor selection for `node` over `pool`.
    fn reselect(&self, node: u32, layer: usize, pool: Vec<u32>) -> Links {
        let base = self
            .scorer
            .decode(&self.nodes[node as usize].vector)
            .into_owned();
        let mut candidates: Vec<Scored> = pool
            .into_iter()
            .map(|id| Scored {
                distance: self.distance_to(&base, id),
                id,
            })
            .collect();
        candidates.sort();
        self.select_neighbors(&candidates, self.layer_cap(layer))
            .into_iter()
            .map(|s| s.id)
            .collect()
    }

    /// Remove every edge into `removed` and repair the nodes that lost one.
    ///
    /// Each affected node re-selects from its surviving links plus the links
    /// of the removed nodes it pointed at.
    pub(super) fn unlink(&mut self, removed: &HashSet<u32>) {
        let mut repairs: HashMap<(u32, usize), Vec<u32>> = HashMap::new();

        for (idx, node) in self.nodes.iter().enumerate() {
            if node.deleted {
                continue;
            }
            let idx = idx as u32;
            for (layer, links) in node.links.iter().enumerate() {
                if !links.iter().any(|l| removed.contains(l)) {
                    continue;
                }
                let mut pool: Vec<u32> = links
                    .iter()
                    .copied()
                    .filter(|l| !removed.contains(l))
                    .collect();
                for gone in links.iter().filter(|l| removed.contains(l)) {
                    if let Some(two_hop) = self.nodes[*gone as usize].links.get(layer) {
                        pool.extend(
                            two_hop
                                .iter()
                                .copied()
                                .filter(|&n| n != idx && !self.nodes[n as usize].deleted),
                        );
                    }
                }
                pool.sort_unstable();
                pool.dedup();
                repairs.insert((idx, layer), pool);
            }
        }

        for &gone in removed {
            for links in &mut self.nodes[gone as usize].links {
                links.clear();
            }
        }

        let mut repairs: Vec<_> = repairs.into_iter().collect();
        repairs.sort_unstable_by_key(|(key, _)| *key);
        for ((node, layer), pool) in repairs {
            let links = self.reselect(node, layer, pool);
            self.nodes[node as usize].links[layer] = links;
        }
    }
}
