//! Bounded-concurrency batch dispatch
//!
//! A batch of [`PromptSpec`]s is persisted, dispatched with at most
//! `max_concurrency` requests in flight, and drained into exactly one
//! [`BatchResult`] per correlation id. Results are re-keyed by correlation
//! id and returned in submission order regardless of arrival order.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use orx_core::{
    FailureKind, InferenceError, InferenceProvider, OrchestratorConfig, OrxError, PromptSpec,
    Result,
};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::artifact::BatchArtifacts;
use crate::retry::RetryPolicy;

// ============================================================================
// Results
// ============================================================================

/// Terminal outcome of one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success { payload: serde_json::Value },
    Failure { kind: FailureKind, message: String },
}

/// Result for one correlation id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub correlation_id: String,

    /// Provider calls made, including retries
    pub attempts: u32,

    /// Caller metadata copied from the request
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,

    #[serde(flatten)]
    pub outcome: Outcome,
}

impl BatchResult {
    fn from_call(
        spec: &PromptSpec,
        result: std::result::Result<serde_json::Value, InferenceError>,
        attempts: u32,
    ) -> Self {
        let outcome = match result {
            Ok(payload) => Outcome::Success { payload },
            Err(e) => Outcome::Failure {
                kind: e.kind(),
                message: e.to_string(),
            },
        };
        Self {
            correlation_id: spec.correlation_id.clone(),
            attempts,
            metadata: spec.metadata.clone(),
            outcome,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success { .. })
    }

    pub fn payload(&self) -> Option<&serde_json::Value> {
        match &self.outcome {
            Outcome::Success { payload } => Some(payload),
            Outcome::Failure { .. } => None,
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match &self.outcome {
            Outcome::Success { .. } => None,
            Outcome::Failure { kind, .. } => Some(*kind),
        }
    }
}

/// Per-kind counts of a drained batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub succeeded: usize,
    pub timeouts: usize,
    pub malformed: usize,
    pub provider_errors: usize,
}

impl BatchReport {
    pub fn from_results(results: &[BatchResult]) -> Self {
        let mut report = Self {
            total: results.len(),
            ..Self::default()
        };
        for result in results {
            match result.failure_kind() {
                None => report.succeeded += 1,
                Some(FailureKind::Timeout) => report.timeouts += 1,
                Some(FailureKind::MalformedResponse) => report.malformed += 1,
                Some(FailureKind::ProviderError) => report.provider_errors += 1,
            }
        }
        report
    }

    pub fn failed(&self) -> usize {
        self.total - self.succeeded
    }
}

/// True when a non-empty batch never reached a working provider
pub fn total_provider_failure(results: &[BatchResult]) -> bool {
    !results.is_empty()
        && results.iter().all(|r| {
            matches!(
                r.failure_kind(),
                Some(FailureKind::ProviderError | FailureKind::Timeout)
            )
        })
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Issues inference batches against one provider
pub struct RequestOrchestrator {
    provider: Arc<dyn InferenceProvider>,
    config: OrchestratorConfig,
    retry: RetryPolicy,
}

impl RequestOrchestrator {
    pub fn new(provider: Arc<dyn InferenceProvider>, config: OrchestratorConfig) -> Self {
        let retry = RetryPolicy::from_config(&config);
        Self {
            provider,
            config,
            retry,
        }
    }

    /// Override the retry policy derived from config
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Dispatch a batch and drain it
    ///
    /// Fails only on duplicate correlation ids or artifact I/O; per-request
    /// failures are returned as [`Outcome::Failure`].
    pub async fn submit(
        &self,
        batch: Vec<PromptSpec>,
        artifacts: &BatchArtifacts,
    ) -> Result<Vec<BatchResult>> {
        check_unique(&batch)?;
        artifacts.write_requests(&batch)?;

        let total = batch.len();
        let concurrency = self.config.max_concurrency.max(1);
        let progress_every = self.config.progress_every.max(1);
        let deadline = self
            .config
            .batch_timeout_secs
            .map(|secs| Instant::now() + Duration::from_secs(secs));

        tracing::info!(
            total,
            concurrency,
            requests = %artifacts.requests_path.display(),
            "Dispatching batch"
        );

        let mut by_id: HashMap<String, BatchResult> = HashMap::with_capacity(total);
        let mut completed = stream::iter(batch.iter().map(|spec| self.dispatch(spec, deadline)))
            .buffer_unordered(concurrency);

        while let Some(result) = completed.next().await {
            if let Outcome::Failure { kind, message } = &result.outcome {
                tracing::warn!(
                    correlation_id = %result.correlation_id,
                    attempts = result.attempts,
                    kind = %kind,
                    "Request failed: {}",
                    message
                );
            }
            by_id.insert(result.correlation_id.clone(), result);
            if by_id.len() % progress_every == 0 {
                tracing::info!(completed = by_id.len(), total, "Batch progress");
            }
        }
        drop(completed);

        // Re-key into submission order
        let results: Vec<BatchResult> = batch
            .iter()
            .map(|spec| {
                by_id.remove(&spec.correlation_id).unwrap_or_else(|| {
                    BatchResult::from_call(
                        spec,
                        Err(InferenceError::Timeout("no result before drain".to_string())),
                        0,
                    )
                })
            })
            .collect();

        artifacts.write_results(&results)?;

        let report = BatchReport::from_results(&results);
        tracing::info!(
            total = report.total,
            succeeded = report.succeeded,
            timeouts = report.timeouts,
            malformed = report.malformed,
            provider_errors = report.provider_errors,
            results = %artifacts.results_path.display(),
            "Batch drained"
        );

        Ok(results)
    }

    async fn dispatch(&self, spec: &PromptSpec, deadline: Option<Instant>) -> BatchResult {
        // Requests still queued at the deadline never reach the provider
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return BatchResult::from_call(
                spec,
                Err(InferenceError::Timeout(
                    "batch deadline reached before dispatch".to_string(),
                )),
                0,
            );
        }

        let calls = AtomicU32::new(0);
        let call = self.retry.run(&spec.correlation_id, || {
            calls.fetch_add(1, Ordering::Relaxed);
            self.provider.complete_json(&spec.prompt)
        });

        let (result, attempts) = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, call).await {
                Ok(done) => done,
                Err(_) => (
                    Err(InferenceError::Timeout("batch deadline reached".to_string())),
                    calls.load(Ordering::Relaxed),
                ),
            },
            None => call.await,
        };

        BatchResult::from_call(spec, result, attempts)
    }
}

fn check_unique(batch: &[PromptSpec]) -> Result<()> {
    let mut seen = HashSet::with_capacity(batch.len());
    for spec in batch {
        if !seen.insert(spec.correlation_id.as_str()) {
            return Err(OrxError::ValidationError(format!(
                "duplicate correlation id in batch: {}",
                spec.correlation_id
            )));
        }
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
