//! Cancellation and deadline checks for long-running rebuilds.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::error::{Result, StoreError};

/// Checked periodically by `rebuild` implementations.
///
/// A rebuild that observes cancellation or an expired deadline returns early;
/// the live index is untouched because rebuilds construct a fresh instance.
#[derive(Debug, Clone, Default)]
pub struct RebuildGuard {
    token: CancellationToken,
    budget: Option<(Instant, Duration)>,
}

impl RebuildGuard {
    /// Never cancelled, no deadline.
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            budget: None,
        }
    }

    /// Fail with [`StoreError::TuningEvaluationTimeout`] once `budget` has
    /// elapsed from now.
    #[must_use]
    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = Some((Instant::now(), budget));
        self
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn check(&self) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        if let Some((start, budget)) = self.budget {
            if start.elapsed() > budget {
                return Err(StoreError::TuningEvaluationTimeout { budget });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_token_fails_check() {
        let token = CancellationToken::new();
        let guard = RebuildGuard::with_token(token.clone());
        assert!(guard.check().is_ok());
        token.cancel();
        assert_eq!(guard.check(), Err(StoreError::Cancelled));
    }

    #[test]
    fn zero_budget_times_out() {
        let guard = RebuildGuard::unbounded().with_budget(Duration::ZERO);
        std::thread::sleep(Duration::from_millis(2));
        assert!(matches!(
            guard.check(),
            Err(StoreError::TuningEvaluationTimeout { .. })
        ));
    }
}
