//! Closed-form starting points and the local refinement grid.

use serde::{Deserialize, Serialize};

use super::TuningConstraints;
use crate::index::{IndexParams, IndexType};

const MIN_M: usize = 8;
const MAX_M: usize = 64;
const HIGH_DIMENSION: usize = 512;
const LARGE_DATASET: usize = 1_000_000;
const HIGH_RECALL: f32 = 0.95;
const TIGHT_LATENCY_MS: f64 = 5.0;
const TIGHT_LATENCY_EF_CAP: usize = 50;

const GRID_M_STEP: usize = 4;
const GRID_EF_CONSTRUCTION_STEP: usize = 50;
const GRID_EF_SEARCH_STEP: usize = 20;

/// Size and shape of the data being tuned for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadProfile {
    pub num_vectors: usize,
    pub dimension: usize,
}

/// Graph parameters from dataset size, dimension and constraints.
///
/// `M = round(2 log2 N)` clamped to [8, 64], plus 4 above 512 dimensions;
/// `ef_construction = 2M`, half again above a million vectors;
/// `ef_search = M`, doubled for recall targets above 0.95 and capped at 50
/// under a latency budget tighter than 5 ms.
pub fn seed_graph_params(
    profile: WorkloadProfile,
    constraints: &TuningConstraints,
    base: IndexParams,
) -> IndexParams {
    let n = profile.num_vectors.max(2) as f64;
    let mut m = ((2.0 * n.log2()).round() as usize).clamp(MIN_M, MAX_M);
    if profile.dimension > HIGH_DIMENSION {
        m += 4;
    }

    let mut ef_construction = 2 * m;
    if profile.num_vectors > LARGE_DATASET {
        ef_construction = ef_construction * 3 / 2;
    }

    let mut ef_search = m;
    if constraints.min_recall > HIGH_RECALL {
        ef_search *= 2;
    }
    if constraints.max_latency_ms < TIGHT_LATENCY_MS {
        ef_search = ef_search.min(TIGHT_LATENCY_EF_CAP);
    }

    IndexParams {
        m,
        ef_construction,
        ef_search,
        ..base
    }
}

/// IVF parameters: `sqrt(n)` cells, probing a tenth of them.
pub fn seed_ivf_params(profile: WorkloadProfile, base: IndexParams) -> IndexParams {
    let n_centroids = ((profile.num_vectors as f64).sqrt().round() as usize).max(1);
    IndexParams {
        n_centroids,
        n_probe: (n_centroids / 10).max(1),
        ..base
    }
}

pub fn seed_params(
    index_type: IndexType,
    profile: WorkloadProfile,
    constraints: &TuningConstraints,
    base: IndexParams,
) -> IndexParams {
    match index_type {
        IndexType::Flat => base,
        IndexType::Graph => seed_graph_params(profile, constraints, base),
        IndexType::Ivf => seed_ivf_params(profile, base),
    }
}

/// Neighbourhood of `center`: `M±4`, `ef_construction±50`, `ef_search±20`
/// for graphs; halving and doubling `n_probe` and `n_centroids` for IVF.
///
/// Invalid combinations are dropped and `center` comes first.
pub fn local_grid(center: &IndexParams, index_type: IndexType) -> Vec<IndexParams> {
    let mut grid = vec![*center];
    match index_type {
        IndexType::Flat => {}
        IndexType::Graph => {
            for m in steps(center.m, GRID_M_STEP) {
                for ef_construction in steps(center.ef_construction, GRID_EF_CONSTRUCTION_STEP) {
                    for ef_search in steps(center.ef_search, GRID_EF_SEARCH_STEP) {
                        grid.push(IndexParams {
                            m: m.max(2),
                            ef_construction: ef_construction.max(m),
                            ef_search: ef_search.max(1),
                            ..*center
                        });
                    }
                }
            }
        }
        IndexType::Ivf => {
            let cells = center.n_centroids.max(1);
            for n_centroids in [cells / 2, cells, cells * 2] {
                for n_probe in [center.n_probe / 2, center.n_probe, center.n_probe * 2] {
                    grid.push(IndexParams {
                        n_centroids: n_centroids.max(1),
                        n_probe: n_probe.clamp(1, n_centroids.max(1)),
                        ..*center
                    });
                }
            }
        }
    }
    let mut seen = std::collections::HashSet::new();
    grid.retain(|p| p.validate().is_ok() && seen.insert(*p));
    grid
}

fn steps(value: usize, step: usize) -> [usize; 3] {
    [value.saturating_sub(step), value, value + step]
}
