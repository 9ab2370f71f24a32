//! attune: a self-tuning approximate nearest neighbor vector store.
//!
//! Records (id, vector, metadata) live in a [`VectorStore`] backed by one of
//! three index strategies:
//!
//! - `Flat`: exhaustive scan; exact, and the ground truth for recall
//! - `Graph`: HNSW proximity graph with incremental insert and removal
//! - `Ivf`: k-means coarse quantizer with inverted lists
//!
//! Vectors may be stored quantized (`scalar`, `product`, `binary`); binary
//! candidates are re-ranked at full precision.
//!
//! Writes are visible to searches immediately but reach the index in
//! batches through the [`IncrementalUpdater`], which measures each batch's
//! effect on latency and recall and retries failures with backoff. The
//! [`tuner`] module proposes index parameters (analytic seed with Bayesian
//! refinement, or Q-learning); adopted configurations are recorded by the
//! [`VersionManager`], which rolls back when performance regresses.
//!
//! # Critical Nuances
//!
//! ## Recall is relative
//!
//! Recall figures reported by the store, the updater and the tuner are
//! measured against exact search over the *same* stored vectors. With
//! lossy quantization the exact answer is itself approximate; re-ranking
//! only recovers what the coarse candidate set contains.
//!
//! ## Rebuilds are not free
//!
//! Query-time breadth (`ef_search`, `n_probe`) changes apply instantly.
//! Anything structural (graph degree, construction beam, centroid count,
//! quantization) rebuilds the whole index off to the side. Writers are not
//! blocked, but the next batch waits for the rebuild.
//!
//! ## Deletion in graphs
//!
//! Removing a node repairs its neighbors from two-hop candidates, which
//! slowly degrades graph quality. Past `compaction_threshold` tombstones the
//! updater compacts with a full rebuild.
//!
//! # Example
//!
//! ```
//! use attune::{Record, SearchRequest, StoreConfig, VectorStore};
//!
//! let store = VectorStore::new(StoreConfig::new(3).with_batch_threshold(2))?;
//! store.add(Record::new("a", vec![1.0, 0.0, 0.0]))?;
//! store.add(Record::new("b", vec![0.0, 1.0, 0.0]))?;
//!
//! let hits = store.search(&SearchRequest::new(vec![0.9, 0.1, 0.0], 1))?;
//! assert_eq!(hits[0].id, "a");
//! # Ok::<(), attune::StoreError>(())
//! ```

pub mod background;
pub mod benchmark;
pub mod config;
pub mod distance;
pub mod error;
pub mod index;
pub mod partitioning;
pub mod quantization;
pub mod scorer;
pub mod simd;
pub mod store;
pub mod tuner;
pub mod updater;
pub mod versioning;

pub use background::{spawn_maintenance, MaintenanceConfig, MaintenanceHandle};
pub use config::StoreConfig;
pub use distance::Metric;
pub use error::{Result, StoreError};
pub use index::{AnyIndex, IndexParams, IndexStrategy, IndexType, RebuildGuard};
pub use quantization::Quantization;
pub use scorer::Scorer;
pub use store::{Metadata, Record, SearchRequest, SearchResult, StoreStats, TuningStep, VectorStore};
pub use tuner::{BayesianTuner, QLearningAgent, Tuner, TuningConstraints};
pub use updater::{IncrementalUpdate, IncrementalUpdater, UpdaterState};
pub use versioning::{ModelVersion, Performance, Regression, VersionHistory, VersionId, VersionManager};
