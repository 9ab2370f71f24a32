//! Recall@10 of the approximate strategies at default parameters.
//!
//! The 10k x 128 runs are slow in debug builds and are ignored by default:
//! `cargo test --release --test recall -- --ignored`.

use attune::benchmark::{compute_ground_truth, create_clustered_dataset, Dataset};
use attune::{IndexType, Metric, SearchRequest, StoreConfig, VectorStore};

const K: usize = 10;

fn recall_of(index_type: IndexType, data: &Dataset) -> f32 {
    let store = VectorStore::new(StoreConfig::new(data.dimension).with_index_type(index_type)).unwrap();
    store.add_batch(data.records()).unwrap();
    store.force_update().unwrap();
    assert_eq!(store.get_stats().indexed_vectors, data.n_train());

    let mut total = 0.0;
    for q in &data.test {
        let truth = compute_ground_truth(q, &data.train, K, Metric::Cosine);
        let hits = store.search(&SearchRequest::new(q.clone(), K)).unwrap();
        let found: Vec<u32> = hits.iter().map(|h| h.id.parse().unwrap()).collect();
        total += attune::benchmark::recall_at_k(&truth, &found, K);
    }
    total / data.n_test() as f32
}

#[test]
fn graph_recall_small() {
    let data = create_clustered_dataset(2_000, 50, 32, 20, 0.1, 42);
    let recall = recall_of(IndexType::Graph, &data);
    assert!(recall >= 0.9, "graph recall@10 = {recall}");
}

#[test]
fn ivf_recall_small() {
    let data = create_clustered_dataset(2_000, 50, 32, 20, 0.1, 42);
    let recall = recall_of(IndexType::Ivf, &data);
    assert!(recall >= 0.9, "ivf recall@10 = {recall}");
}

#[test]
fn flat_recall_is_perfect() {
    let data = create_clustered_dataset(500, 20, 16, 5, 0.2, 1);
    assert!((recall_of(IndexType::Flat, &data) - 1.0).abs() < 1e-6);
}

#[test]
#[ignore = "10k x 128; run with --release"]
fn graph_recall_10k() {
    let data = create_clustered_dataset(10_000, 100, 128, 100, 0.1, 42);
    let recall = recall_of(IndexType::Graph, &data);
    assert!(recall >= 0.9, "graph recall@10 = {recall}");
}

#[test]
#[ignore = "10k x 128; run with --release"]
fn ivf_recall_10k() {
    let data = create_clustered_dataset(10_000, 100, 128, 100, 0.1, 42);
    let recall = recall_of(IndexType::Ivf, &data);
    assert!(recall >= 0.9, "ivf recall@10 = {recall}");
}
