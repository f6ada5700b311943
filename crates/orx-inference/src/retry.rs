//! Bounded exponential backoff for single inference calls

use std::future::Future;
use std::time::Duration;

use orx_core::{InferenceError, OrchestratorConfig};

/// Retry policy applied to each request of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts including the first one
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&OrchestratorConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// Backoff to wait after the given failed attempt (1-based)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Run `f` until it succeeds, fails permanently or attempts run out
    ///
    /// Returns the final outcome together with the number of attempts made.
    pub async fn run<T, F, Fut>(&self, label: &str, mut f: F) -> (Result<T, InferenceError>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, InferenceError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match f().await {
                Ok(value) => return (Ok(value), attempt),
                Err(e) if !e.is_retryable() || attempt >= self.max_attempts => {
                    return (Err(e), attempt);
                }
                Err(e) => {
                    let backoff = self.backoff_for(attempt);
                    tracing::warn!(
                        request = label,
                        attempt,
                        max_attempts = self.max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Request failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}
