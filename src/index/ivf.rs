//! Inverted-file (IVF) index.
//!
//! A k-means coarse quantizer partitions space into cells; each cell keeps an
//! inverted list of slots. Queries rank centroids and scan the `n_probe`
//! nearest cells exhaustively.
//!
//! Vectors that arrive before there is enough data to train live in a spill
//! list that every query scans. Training happens inside the insert call that
//! first brings the index to `max(4 · n_centroids, 32)` vectors; afterwards
//! new vectors are assigned to their nearest cell. Once the index has grown
//! to four times the size it was trained on, it asks for a rebuild so the
//! centroids follow the data.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use tracing::debug;

use super::{brute_force, IndexParams, IndexStrategy, IndexType, Item, RebuildGuard, TopK};
use crate::distance::Metric;
use crate::error::{Result, StoreError};
use crate::partitioning::kmeans::nearest_centroid;
use crate::partitioning::KMeans;
use crate::quantization::EncodedVector;
use crate::scorer::Scorer;

const MIN_TRAINING_VECTORS: usize = 32;
const MAX_AUTO_CENTROIDS: usize = 1024;
const TRAINING_SAMPLE_PER_CENTROID: usize = 64;
const MIN_TRAINING_SAMPLE: usize = 2048;
const RETRAIN_GROWTH: usize = 4;

#[derive(Debug, Clone)]
struct Entry {
    vector: Arc<EncodedVector>,
    cell: Option<u32>,
}

/// IVF index with a k-means coarse quantizer.
#[derive(Debug, Clone)]
pub struct IvfIndex {
    scorer: Scorer,
    params: IndexParams,
    seed: u64,
    entries: HashMap<u32, Entry>,
    centroids: Vec<Vec<f32>>,
    cells: Vec<Vec<u32>>,
    spill: Vec<u32>,
    trained_on: usize,
}

impl IvfIndex {
    pub fn new(scorer: Scorer, params: IndexParams, seed: u64) -> Self {
        Self {
            scorer,
            params,
            seed,
            entries: HashMap::new(),
            centroids: Vec::new(),
            cells: Vec::new(),
            spill: Vec::new(),
            trained_on: 0,
        }
    }

    pub fn is_trained(&self) -> bool {
        !self.centroids.is_empty()
    }

    /// Number of trained cells (0 before training).
    pub fn n_cells(&self) -> usize {
        self.centroids.len()
    }

    /// Vectors waiting in the untrained spill list.
    pub fn spill_len(&self) -> usize {
        self.spill.len()
    }

    /// Cell count for `n` vectors: the configured value, or `sqrt(n)`.
    pub fn target_centroids(&self, n: usize) -> usize {
        let k = if self.params.n_centroids > 0 {
            self.params.n_centroids
        } else {
            (n as f64).sqrt().round() as usize
        };
        k.clamp(1, MAX_AUTO_CENTROIDS)
    }

    fn centroid_metric(&self) -> Metric {
        match self.scorer.metric() {
            Metric::Cosine => Metric::Cosine,
            Metric::Euclidean | Metric::Dot => Metric::Euclidean,
        }
    }

    fn assign(&self, vector: &EncodedVector) -> u32 {
        let decoded = self.scorer.decode(vector);
        nearest_centroid(&self.centroids, &decoded, self.centroid_metric()) as u32
    }

    fn maybe_train(&mut self) -> Result<()> {
        let n = self.entries.len();
        if self.is_trained() || n < (4 * self.target_centroids(n)).max(MIN_TRAINING_VECTORS) {
            return Ok(());
        }
        self.train()
    }

    /// Fit centroids on a sample of the stored vectors and reassign every vector.
    fn train(&mut self) -> Result<()> {
        let n = self.entries.len();
        if n == 0 {
            return Err(StoreError::EmptyIndex);
        }
        let k = self.target_centroids(n);
        let dim = self.scorer.dimension();

        let mut slots: Vec<u32> = self.entries.keys().copied().collect();
        slots.sort_unstable();

        let sample_size = n.min((k * TRAINING_SAMPLE_PER_CENTROID).max(MIN_TRAINING_SAMPLE));
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut picks = rand::seq::index::sample(&mut rng, n, sample_size).into_vec();
        picks.sort_unstable();

        let mut flat = Vec::with_capacity(sample_size * dim);
        for &i in &picks {
            flat.extend_from_slice(&self.scorer.decode(&self.entries[&slots[i]].vector));
        }

        let mut kmeans = KMeans::new(dim, k)?
            .with_seed(self.seed)
            .with_metric(self.scorer.metric());
        kmeans.fit(&flat, sample_size)?;
        self.centroids = kmeans.into_centroids();

        let assignments: Vec<(u32, u32)> = slots
            .par_iter()
            .map(|&slot| (slot, self.assign(&self.entries[&slot].vector)))
            .collect();

        self.cells = vec![Vec::new(); self.centroids.len()];
        for (slot, cell) in assignments {
            self.cells[cell as usize].push(slot);
            if let Some(entry) = self.entries.get_mut(&slot) {
                entry.cell = Some(cell);
            }
        }
        self.spill.clear();
        self.trained_on = n;

        debug!(
            vectors = n,
            sample = sample_size,
            cells = self.centroids.len(),
            "trained IVF coarse quantizer"
        );
        Ok(())
    }

    fn place(&mut self, slot: u32, vector: Arc<EncodedVector>, cell: Option<u32>) {
        match cell {
            Some(c) => self.cells[c as usize].push(slot),
            None => self.spill.push(slot),
        }
        self.entries.insert(slot, Entry { vector, cell });
    }

    fn check_new(&self, slot: u32, vector: &EncodedVector) -> Result<()> {
        self.check_vector(vector)?;
        if self.entries.contains_key(&slot) {
            return Err(StoreError::InvalidParameter(format!(
                "slot {slot} is already indexed"
            )));
        }
        Ok(())
    }
}

impl IndexStrategy for IvfIndex {
    fn index_type(&self) -> IndexType {
        IndexType::Ivf
    }

    fn scorer(&self) -> &Scorer {
        &self.scorer
    }

    fn insert(&mut self, slot: u32, vector: Arc<EncodedVector>) -> Result<()> {
        self.check_new(slot, &vector)?;
        let cell = self.is_trained().then(|| self.assign(&vector));
        self.place(slot, vector, cell);
        self.maybe_train()
    }

    fn insert_batch(&mut self, items: Vec<Item>) -> Result<()> {
        let mut seen = HashSet::with_capacity(items.len());
        for (slot, v) in &items {
            self.check_new(*slot, v)?;
            if !seen.insert(*slot) {
                return Err(StoreError::InvalidParameter(format!(
                    "slot {slot} appears twice in one batch"
                )));
            }
        }

        if self.is_trained() {
            let cells: Vec<u32> = items.par_iter().map(|(_, v)| self.assign(v)).collect();
            for ((slot, v), cell) in items.into_iter().zip(cells) {
                self.place(slot, v, Some(cell));
            }
        } else {
            for (slot, v) in items {
                self.place(slot, v, None);
            }
        }
        self.maybe_train()
    }

    fn remove(&mut self, slot: u32) -> bool {
        let Some(entry) = self.entries.remove(&slot) else {
            return false;
        };
        match entry.cell {
            Some(c) => self.cells[c as usize].retain(|&s| s != slot),
            None => self.spill.retain(|&s| s != slot),
        }
        true
    }

    fn remove_batch(&mut self, slots: &[u32]) -> usize {
        let mut gone: HashSet<u32> = HashSet::with_capacity(slots.len());
        let mut touched: HashSet<Option<u32>> = HashSet::new();
        for slot in slots {
            if let Some(entry) = self.entries.remove(slot) {
                gone.insert(*slot);
                touched.insert(entry.cell);
            }
        }
        for cell in touched {
            match cell {
                Some(c) => self.cells[c as usize].retain(|s| !gone.contains(s)),
                None => self.spill.retain(|s| !gone.contains(s)),
            }
        }
        gone.len()
    }

    fn search(&self, query: &[f32], k: usize, breadth: Option<usize>) -> Vec<(u32, f32)> {
        if !self.is_trained() {
            return self.exact_search(query, k);
        }
        let n_probe = breadth.unwrap_or(self.params.n_probe).max(1);
        let metric = self.centroid_metric();

        let mut ranked: Vec<(usize, f32)> = self
            .centroids
            .iter()
            .enumerate()
            .map(|(i, c)| (i, metric.distance(query, c)))
            .collect();
        ranked.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        let mut top = TopK::new(k);
        let probed = ranked
            .iter()
            .take(n_probe)
            .flat_map(|&(cell, _)| self.cells[cell].iter());
        for &slot in probed.chain(self.spill.iter()) {
            top.push(slot, self.scorer.distance(query, &self.entries[&slot].vector));
        }
        top.into_sorted()
    }

    fn exact_search(&self, query: &[f32], k: usize) -> Vec<(u32, f32)> {
        brute_force(
            &self.scorer,
            query,
            k,
            self.entries.iter().map(|(&slot, e)| (slot, e.vector.as_ref())),
        )
    }

    fn rebuild(&self, items: Vec<Item>, guard: &RebuildGuard) -> Result<Self> {
        guard.check()?;
        let mut fresh = Self::new(self.scorer.clone(), self.params, self.seed);
        for (slot, v) in &items {
            fresh.check_new(*slot, v)?;
        }
        for (slot, v) in items {
            fresh.place(slot, v, None);
        }
        guard.check()?;
        fresh.maybe_train()?;
        guard.check()?;
        Ok(fresh)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn contains(&self, slot: u32) -> bool {
        self.entries.contains_key(&slot)
    }

    fn items(&self) -> Vec<Item> {
        let mut items: Vec<Item> = self
            .entries
            .iter()
            .map(|(&slot, e)| (slot, Arc::clone(&e.vector)))
            .collect();
        items.sort_by_key(|(slot, _)| *slot);
        items
    }

    fn memory_bytes(&self) -> usize {
        let vectors: usize = self.entries.values().map(|e| e.vector.memory_bytes()).sum();
        let centroids = self.centroids.len() * self.scorer.dimension() * std::mem::size_of::<f32>();
        let lists = self.entries.len() * std::mem::size_of::<u32>() * 2;
        vectors + centroids + lists
    }

    fn params(&self) -> IndexParams {
        self.params
    }

    fn set_search_params(&mut self, params: &IndexParams) {
        self.params.ef_search = params.ef_search;
        self.params.n_probe = params.n_probe;
    }

    fn needs_rebuild(&self, _compaction_threshold: f32) -> bool {
        self.is_trained() && self.entries.len() > self.trained_on * RETRAIN_GROWTH
    }
}
