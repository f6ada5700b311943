//! ORX Core - Domain models, traits, and shared types
//!
//! This crate defines the core abstractions used throughout ORX:
//! - Documents, sentences and the relation triples written to the graph
//! - The inference provider boundary (prompt specs, typed failures)
//! - Common error types
//! - The schema store (ontology model, annotation guideline, ID policy)
//! - Configuration management

pub mod config;
pub mod jsonl;
pub mod schema;

pub use config::{
    AggregationMode, AppConfig, ArtifactConfig, ConfigError, LlmConfig, LlmProvider,
    LoggingConfig, OrchestratorConfig, PipelineConfig, SchemaConfig,
};
pub use schema::{EntityClass, IdPolicy, OntologyModel, Predicate, SchemaStore, TypePolicy};

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Fatal errors for ORX operations
///
/// Per-item failures (a single sentence's NER call, a single pair's
/// judgment) are carried as data and never surface here.
#[derive(Error, Debug)]
pub enum OrxError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Inference provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<ConfigError> for OrxError {
    fn from(err: ConfigError) -> Self {
        Self::ConfigError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, OrxError>;

// ============================================================================
// Documents and Sentences
// ============================================================================

/// A source document (abstract) supplied by article acquisition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Document identifier (PMID for PubMed abstracts)
    #[serde(alias = "pmid")]
    pub doc_id: String,

    /// Raw text
    #[serde(alias = "abstract", default)]
    pub text: String,
}

impl Document {
    pub fn new(doc_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            doc_id: doc_id.into(),
            text: text.into(),
        }
    }
}

/// Reference to a sentence: `(doc_id, sentence_index)`
///
/// Orders by document id, then by position within the document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SentenceRef {
    pub doc_id: String,
    pub sentence_index: u32,
}

impl SentenceRef {
    pub fn new(doc_id: impl Into<String>, sentence_index: u32) -> Self {
        Self {
            doc_id: doc_id.into(),
            sentence_index,
        }
    }
}

impl std::fmt::Display for SentenceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.doc_id, self.sentence_index)
    }
}

/// A sentence, the unit of NER and RE prompting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sentence {
    pub doc_id: String,
    pub sentence_index: u32,
    pub text: String,
}

impl Sentence {
    pub fn new(doc_id: impl Into<String>, sentence_index: u32, text: impl Into<String>) -> Self {
        Self {
            doc_id: doc_id.into(),
            sentence_index,
            text: text.into(),
        }
    }

    /// Reference used to key this sentence everywhere downstream
    pub fn sentence_ref(&self) -> SentenceRef {
        SentenceRef::new(self.doc_id.clone(), self.sentence_index)
    }
}

// ============================================================================
// Knowledge Graph Output
// ============================================================================

/// Model identity attached to every judgment
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub model_name: String,
    pub model_version: String,
    pub prompt_version: String,
}

/// A relationship triple (Subject, Predicate, Object)
///
/// The deduplication key of the output graph. Order-sensitive: subject
/// and object are not interchangeable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelationTriple {
    pub subject_id: String,
    pub predicate: String,
    pub object_id: String,
}

impl RelationTriple {
    pub fn new(
        subject_id: impl Into<String>,
        predicate: impl Into<String>,
        object_id: impl Into<String>,
    ) -> Self {
        Self {
            subject_id: subject_id.into(),
            predicate: predicate.into(),
            object_id: object_id.into(),
        }
    }
}

impl std::fmt::Display for RelationTriple {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({}, {}, {})",
            self.subject_id, self.predicate, self.object_id
        )
    }
}

/// One sentence-level piece of evidence for a consolidated relation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub sentence_ref: SentenceRef,
    pub sentence: String,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub explanation: String,
}

/// A deduplicated, confidence-scored relation in the output graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatedRelation {
    #[serde(flatten)]
    pub triple: RelationTriple,

    /// Ontology class of the subject
    pub subject_type: String,

    /// Representative surface form of the subject
    pub subject_name: String,

    /// Ontology class of the object
    pub object_type: String,

    /// Representative surface form of the object
    pub object_name: String,

    /// Aggregated confidence (0.0 - 1.0)
    pub confidence: f64,

    /// Documents asserting this triple
    pub supporting_pmids: BTreeSet<String>,

    /// Sentences asserting this triple
    pub supporting_sentences: BTreeSet<SentenceRef>,

    /// Per-judgment evidence, ordered by sentence
    pub evidence: Vec<Evidence>,

    /// Distinct contributing model identities
    pub model_metadata: Vec<ModelMetadata>,
}

// ============================================================================
// Inference Boundary
// ============================================================================

/// One request handed to the inference provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptSpec {
    /// Caller-assigned id linking the request to its result
    pub correlation_id: String,

    /// Prompt text
    pub prompt: String,

    /// Opaque caller context persisted alongside the request
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
}

impl PromptSpec {
    pub fn new(correlation_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            prompt: prompt.into(),
            metadata: serde_json::Value::Null,
        }
    }

    /// Attach caller metadata
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Terminal failure kinds recorded in results artifacts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    MalformedResponse,
    ProviderError,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::MalformedResponse => "malformed_response",
            Self::ProviderError => "provider_error",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors raised by a single inference call
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InferenceError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("transient provider error: {0}")]
    Transient(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("provider error: {0}")]
    Provider(String),
}

impl InferenceError {
    /// Whether the call may be retried
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Transient(_))
    }

    /// Kind recorded once retries are exhausted
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Timeout(_) => FailureKind::Timeout,
            Self::Malformed(_) => FailureKind::MalformedResponse,
            Self::Transient(_) | Self::Provider(_) => FailureKind::ProviderError,
        }
    }
}

/// Trait for inference providers
///
/// Implementations return the parsed JSON object produced by the model,
/// or a typed failure. Free text never crosses this boundary.
#[async_trait::async_trait]
pub trait InferenceProvider: Send + Sync {
    /// Run one prompt and return its structured payload
    async fn complete_json(
        &self,
        prompt: &str,
    ) -> std::result::Result<serde_json::Value, InferenceError>;

    /// Model identifier for metadata and logs
    fn model_name(&self) -> &str;
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_accepts_pubmed_field_names() {
        let doc: Document =
            serde_json::from_str(r#"{"pmid": "123", "abstract": "ABCB1 matters."}"#).unwrap();
        assert_eq!(doc.doc_id, "123");
        assert_eq!(doc.text, "ABCB1 matters.");
    }

    #[test]
    fn test_sentence_ref_ordering() {
        let a = SentenceRef::new("100", 2);
        let b = SentenceRef::new("100", 10);
        let c = SentenceRef::new("200", 0);
        assert!(a < b);
        assert!(b < c);
        assert_eq!(a.to_string(), "100:2");
    }

    #[test]
    fn test_inference_error_retryable() {
        assert!(InferenceError::Timeout("slow".into()).is_retryable());
        assert!(InferenceError::Transient("503".into()).is_retryable());
        assert!(!InferenceError::Malformed("not json".into()).is_retryable());
        assert!(!InferenceError::Provider("401".into()).is_retryable());
    }

    #[test]
    fn test_inference_error_kind() {
        assert_eq!(
            InferenceError::Transient("503".into()).kind(),
            FailureKind::ProviderError
        );
        assert_eq!(
            InferenceError::Malformed("x".into()).kind(),
            FailureKind::MalformedResponse
        );
        assert_eq!(FailureKind::Timeout.to_string(), "timeout");
    }

    #[test]
    fn test_consolidated_relation_flattens_triple() {
        let relation = ConsolidatedRelation {
            triple: RelationTriple::new("HGNC:40", "increases_resistance_to", "CHEBI:1"),
            subject_type: "Gene".to_string(),
            subject_name: "ABCB1".to_string(),
            object_type: "Drug".to_string(),
            object_name: "talazoparib".to_string(),
            confidence: 0.92,
            supporting_pmids: BTreeSet::from(["1".to_string()]),
            supporting_sentences: BTreeSet::from([SentenceRef::new("1", 0)]),
            evidence: Vec::new(),
            model_metadata: Vec::new(),
        };

        let json = serde_json::to_value(&relation).unwrap();
        assert_eq!(json["subject_id"], "HGNC:40");
        assert_eq!(json["predicate"], "increases_resistance_to");
        assert_eq!(json["supporting_pmids"][0], "1");
    }
}
