//! Records, queries and results exchanged with callers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::distance::Metric;
use crate::index::IndexType;
use crate::quantization::Quantization;
use crate::updater::UpdaterState;
use crate::versioning::VersionId;

pub type Metadata = BTreeMap<String, serde_json::Value>;

/// A stored vector with its caller-supplied id and metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub values: Vec<f32>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Record {
    pub fn new(id: impl Into<String>, values: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            values,
            metadata: Metadata::new(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: Vec<f32>,
    pub k: usize,
    /// Drop results scoring below this.
    #[serde(default)]
    pub threshold: Option<f32>,
    /// Exact-match constraints on metadata keys.
    #[serde(default)]
    pub filters: Metadata,
    /// Per-query graph breadth.
    #[serde(default)]
    pub ef_search: Option<usize>,
    /// Per-query IVF breadth.
    #[serde(default)]
    pub n_probe: Option<usize>,
}

impl SearchRequest {
    pub fn new(query: Vec<f32>, k: usize) -> Self {
        Self {
            query,
            k,
            threshold: None,
            filters: Metadata::new(),
            ef_search: None,
            n_probe: None,
        }
    }

    #[must_use]
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = Some(threshold);
        self
    }

    #[must_use]
    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.filters.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_ef_search(mut self, ef_search: usize) -> Self {
        self.ef_search = Some(ef_search);
        self
    }

    #[must_use]
    pub fn with_n_probe(mut self, n_probe: usize) -> Self {
        self.n_probe = Some(n_probe);
        self
    }

    pub(crate) fn matches(&self, metadata: &Metadata) -> bool {
        self.filters
            .iter()
            .all(|(key, want)| metadata.get(key) == Some(want))
    }
}

/// One hit; `score` is higher-is-better under every metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub score: f32,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    /// Records in the store, including ones not yet indexed.
    pub total_vectors: usize,
    pub dimensions: usize,
    pub index_type: IndexType,
    pub metric: Metric,
    pub quantization: Quantization,
    /// Vectors in the live index.
    pub indexed_vectors: usize,
    pub pending_ops: usize,
    pub memory_bytes: usize,
    pub updater_state: UpdaterState,
    pub current_version: Option<VersionId>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn filters_require_every_key() {
        let meta: Metadata = [("kind".to_string(), json!("gene")), ("len".to_string(), json!(12))]
            .into_iter()
            .collect();
        let req = SearchRequest::new(vec![], 1).with_filter("kind", "gene");
        assert!(req.matches(&meta));
        assert!(!req.clone().with_filter("len", 13).matches(&meta));
        assert!(SearchRequest::new(vec![], 1).matches(&Metadata::new()));
    }

    #[test]
    fn request_deserializes_with_defaults() {
        let req: SearchRequest = serde_json::from_str(r#"{"query": [1.0, 0.0], "k": 3}"#).unwrap();
        assert_eq!(req.k, 3);
        assert!(req.filters.is_empty());
        assert!(req.threshold.is_none());
    }
}
