//! Store configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::distance::Metric;
use crate::error::{Result, StoreError};
use crate::index::{IndexParams, IndexType};
use crate::quantization::Quantization;
use crate::updater::UpdaterConfig;

/// Static configuration supplied when a store is created.
///
/// Everything except `dimensions` has a default, so a minimal JSON config is
/// `{"dimensions": 128}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Vector length; required.
    pub dimensions: usize,
    pub metric: Metric,
    pub quantization: Quantization,
    pub index_type: IndexType,
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
    pub n_probe: usize,
    /// 0 = `sqrt(n)` at training time.
    pub n_centroids: usize,
    /// Pending operations that trigger a batch apply.
    pub batch_threshold: usize,
    /// Probe queries sampled before and after each batch.
    pub probe_queries: usize,
    /// Re-score binary-quantized candidates at full precision.
    pub rerank: bool,
    /// Candidate over-fetch multiplier when re-ranking.
    pub rerank_factor: usize,
    /// Graph tombstone fraction that triggers a compacting rebuild.
    pub compaction_threshold: f32,
    /// Consecutive apply failures before the error is surfaced.
    pub max_consecutive_failures: u32,
    /// Model versions retained by the version manager.
    pub max_versions: usize,
    /// Background maintenance period, in milliseconds.
    pub maintenance_interval_ms: u64,
    pub seed: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let params = IndexParams::default();
        Self {
            dimensions: 0,
            metric: Metric::Cosine,
            quantization: Quantization::None,
            index_type: IndexType::Graph,
            m: params.m,
            ef_construction: params.ef_construction,
            ef_search: params.ef_search,
            n_probe: params.n_probe,
            n_centroids: params.n_centroids,
            batch_threshold: 64,
            probe_queries: 8,
            rerank: true,
            rerank_factor: 4,
            compaction_threshold: 0.2,
            max_consecutive_failures: 5,
            max_versions: 10,
            maintenance_interval_ms: 1_000,
            seed: 42,
        }
    }
}

impl StoreConfig {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.metric = metric;
        self
    }

    #[must_use]
    pub fn with_quantization(mut self, quantization: Quantization) -> Self {
        self.quantization = quantization;
        self
    }

    #[must_use]
    pub fn with_index_type(mut self, index_type: IndexType) -> Self {
        self.index_type = index_type;
        self
    }

    #[must_use]
    pub fn with_batch_threshold(mut self, batch_threshold: usize) -> Self {
        self.batch_threshold = batch_threshold;
        self
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Parse from JSON and validate.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.dimensions == 0 {
            return Err(StoreError::InvalidParameter(
                "dimensions is required and must be greater than 0".to_string(),
            ));
        }
        if self.batch_threshold == 0 {
            return Err(StoreError::InvalidParameter(
                "batch_threshold must be greater than 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.compaction_threshold) {
            return Err(StoreError::InvalidParameter(format!(
                "compaction_threshold must be within [0, 1], got {}",
                self.compaction_threshold
            )));
        }
        if self.max_versions == 0 {
            return Err(StoreError::InvalidParameter(
                "max_versions must be greater than 0".to_string(),
            ));
        }
        self.index_params().validate()
    }

    pub fn index_params(&self) -> IndexParams {
        IndexParams {
            m: self.m,
            ef_construction: self.ef_construction,
            ef_search: self.ef_search,
            n_probe: self.n_probe,
            n_centroids: self.n_centroids,
            quantization: self.quantization,
        }
    }

    pub fn updater_config(&self) -> UpdaterConfig {
        UpdaterConfig {
            batch_threshold: self.batch_threshold,
            probe_queries: self.probe_queries,
            compaction_threshold: self.compaction_threshold,
            max_consecutive_failures: self.max_consecutive_failures,
            ..UpdaterConfig::default()
        }
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_millis(self.maintenance_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documented_defaults() {
        let c = StoreConfig::from_json(r#"{"dimensions": 128}"#).unwrap();
        assert_eq!(c.metric, Metric::Cosine);
        assert_eq!(c.quantization, Quantization::None);
        assert_eq!(c.index_type, IndexType::Graph);
        assert_eq!((c.m, c.ef_construction, c.n_probe), (16, 200, 10));
    }

    #[test]
    fn missing_dimensions_is_rejected() {
        assert!(matches!(
            StoreConfig::from_json("{}"),
            Err(StoreError::InvalidParameter(_))
        ));
    }

    #[test]
    fn lowercase_enum_names() {
        let c = StoreConfig::from_json(
            r#"{"dimensions": 4, "metric": "euclidean", "index_type": "ivf", "quantization": "binary"}"#,
        )
        .unwrap();
        assert_eq!(c.metric, Metric::Euclidean);
        assert_eq!(c.index_type, IndexType::Ivf);
        assert_eq!(c.quantization, Quantization::Binary);
    }
}
