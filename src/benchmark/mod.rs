//! Recall and latency measurement.
//!
//! Used by the incremental updater (before/after impact of each batch), the
//! auto-tuner (trial scoring) and the test suite (recall against the flat
//! index as ground truth).

pub mod datasets;
pub mod metrics;

pub use datasets::{compute_ground_truth, create_clustered_dataset, perturbed_queries, Dataset};
pub use metrics::{mean_latency, mean_recall, recall_at_k};
