//! Error types for attune.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while storing, indexing, tuning or versioning vectors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// A vector's length does not match the store's configured dimensionality.
    ///
    /// Caller error: never retried automatically.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// `add` was called with an id that already exists (use `update` instead).
    #[error("record `{0}` already exists")]
    DuplicateId(String),

    /// The referenced record does not exist.
    #[error("record `{0}` not found")]
    NotFound(String),

    /// The operation needs at least one vector.
    #[error("index is empty")]
    EmptyIndex,

    /// Invalid parameter or configuration value.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Applying a batch or rebuilding the index failed.
    ///
    /// The pending queue is preserved; the updater retries with backoff.
    #[error("index build failed after {attempts} attempt(s): {reason}")]
    IndexBuildFailure { attempts: u32, reason: String },

    /// A tuning trial exceeded its evaluation budget and was discarded.
    #[error("tuning evaluation exceeded its {budget:?} budget")]
    TuningEvaluationTimeout { budget: Duration },

    /// A cancellable operation (typically a rebuild) was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// The referenced model version does not exist.
    #[error("version `{0}` not found")]
    VersionNotFound(String),

    /// JSON (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

pub(crate) fn check_dimension(expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(StoreError::DimensionMismatch { expected, actual })
    }
}
