//! ORX Inference - Providers and batch request orchestration
//!
//! Talks to the LLM inference service. Each request is a [`PromptSpec`]
//! with a caller-assigned correlation id; the orchestrator dispatches a
//! batch with bounded concurrency, retries transient failures, and
//! persists requests/results artifacts around the batch.
//!
//! [`PromptSpec`]: orx_core::PromptSpec

pub mod artifact;
pub mod orchestrator;
pub mod provider;
pub mod retry;

pub use artifact::BatchArtifacts;
pub use orchestrator::{
    total_provider_failure, BatchReport, BatchResult, Outcome, RequestOrchestrator,
};
pub use provider::{create_provider, OllamaProvider, OpenAiProvider};
pub use retry::RetryPolicy;
