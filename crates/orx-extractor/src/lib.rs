//! ORX Extractor - Two-stage relation extraction pipeline
//!
//! Sentences are sent through an entity (NER) stage, mentions are
//! normalized to canonical ids, ontology-eligible pairs are judged by a
//! relation (RE) stage, and judgments are consolidated into one
//! confidence-scored triple per `(subject, predicate, object)`.

use std::collections::{BTreeMap, BTreeSet};

use orx_core::{FailureKind, ModelMetadata, RelationTriple, Sentence, SentenceRef};
use serde::{Deserialize, Serialize};

pub mod consolidate;
pub mod export;
pub mod ner;
pub mod normalizer;
pub mod pairing;
pub mod pipeline;
pub mod relation;
pub mod relation_log;
pub mod segmenter;

pub use consolidate::Consolidator;
pub use export::{render_cypher, write_cypher};
pub use ner::NerExtractor;
pub use normalizer::{EntityNormalizer, Resolution, UnresolvedReason};
pub use pairing::PairGenerator;
pub use pipeline::{Pipeline, RunSummary};
pub use relation::{JudgmentError, RelationExtractor};
pub use relation_log::{AuditLogRecord, AuditOutcome, RelationLogger};
pub use segmenter::SentenceSegmenter;

// ============================================================================
// Mentions and Entities
// ============================================================================

/// Byte range within a sentence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

/// Raw NER output for one mention
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMention {
    pub sentence_ref: SentenceRef,
    pub surface_text: String,
    pub entity_type: String,

    /// Location in the sentence, when it could be found
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,

    /// Namespace to identifier, as reported by the model
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub ids: BTreeMap<String, String>,
}

/// All mentions of one canonical entity within one sentence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedEntity {
    pub canonical_id: String,
    pub entity_type: String,

    /// Surface form of the earliest mention
    pub surface_text: String,

    /// Merged mentions, earliest first
    pub mentions: Vec<EntityMention>,
}

impl NormalizedEntity {
    /// Span of the representative mention
    pub fn span(&self) -> Option<Span> {
        self.mentions.iter().filter_map(|m| m.span).min()
    }

    pub fn entity_ref(&self) -> EntityRef {
        EntityRef {
            canonical_id: self.canonical_id.clone(),
            entity_type: self.entity_type.clone(),
            surface_text: self.surface_text.clone(),
        }
    }
}

/// Compact entity identity carried by judgments and audit records
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    pub canonical_id: String,
    pub entity_type: String,
    pub surface_text: String,
}

/// A mention the normalizer could not resolve
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedMention {
    #[serde(flatten)]
    pub mention: EntityMention,
    pub reason: UnresolvedReason,
    pub unresolved: bool,
}

impl UnresolvedMention {
    pub fn new(mention: EntityMention, reason: UnresolvedReason) -> Self {
        Self {
            mention,
            reason,
            unresolved: true,
        }
    }
}

/// NER phase output for one sentence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentenceEntities {
    pub sentence: Sentence,

    /// Resolved entities ordered by canonical id
    #[serde(default)]
    pub entities: Vec<NormalizedEntity>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unresolved: Vec<UnresolvedMention>,

    /// Set when the NER request for this sentence failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
}

impl SentenceEntities {
    pub fn new(sentence: Sentence) -> Self {
        Self {
            sentence,
            entities: Vec::new(),
            unresolved: Vec::new(),
            failure: None,
        }
    }

    pub fn failed(sentence: Sentence, kind: FailureKind) -> Self {
        Self {
            failure: Some(kind),
            ..Self::new(sentence)
        }
    }
}

// ============================================================================
// Pairs and Judgments
// ============================================================================

/// An ordered entity pair submitted to the relation stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidatePair {
    pub pair_id: String,
    pub sentence_ref: SentenceRef,
    pub subject: NormalizedEntity,
    pub object: NormalizedEntity,

    /// Predicates whose domain/range admit the pair, never empty
    pub eligible_predicates: BTreeSet<String>,
}

/// Structured relation judgment for one pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationJudgment {
    pub pair_id: String,
    pub sentence_ref: SentenceRef,
    pub sentence: String,
    pub subject: EntityRef,
    pub object: EntityRef,

    /// `None` when the model found no eligible relation
    pub predicate: Option<String>,

    pub confidence: f64,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub explanation: String,

    pub model: ModelMetadata,
}

impl RelationJudgment {
    /// Triple asserted by this judgment, if any
    pub fn triple(&self) -> Option<RelationTriple> {
        self.predicate.as_ref().map(|predicate| {
            RelationTriple::new(
                self.subject.canonical_id.clone(),
                predicate.clone(),
                self.object.canonical_id.clone(),
            )
        })
    }
}
