//! Named Entity Recognition (NER) stage
//!
//! Builds one prompt per sentence listing the ontology classes, and turns
//! the model's `{"entities": [...]}` payload into [`EntityMention`]s
//! anchored in the sentence text.

use std::collections::BTreeMap;
use std::sync::Arc;

use orx_core::{InferenceError, PromptSpec, SchemaStore, Sentence};
use regex::RegexBuilder;
use serde::Deserialize;
use serde_json::Value;

use crate::{EntityMention, Span};

// ============================================================================
// Payload
// ============================================================================

#[derive(Debug, Deserialize)]
struct NerPayload {
    entities: Vec<RawEntity>,
}

#[derive(Debug, Deserialize)]
struct RawEntity {
    text: String,
    #[serde(rename = "class", alias = "type")]
    entity_type: String,
    #[serde(default)]
    start: Option<Value>,
    #[serde(default)]
    end: Option<Value>,
    #[serde(default)]
    ids: Option<RawIds>,
}

/// Identifier payloads the model has been seen to produce
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawIds {
    Map(BTreeMap<String, Value>),
    List(Vec<Value>),
    Single(String),
}

impl RawIds {
    fn into_map(self) -> BTreeMap<String, String> {
        match self {
            Self::Map(map) => map
                .into_iter()
                .filter_map(|(namespace, id)| Some((namespace, scalar_string(&id)?)))
                .collect(),
            Self::List(items) => items
                .iter()
                .filter_map(|item| {
                    let namespace = ["type", "namespace", "name"]
                        .iter()
                        .find_map(|key| item.get(*key).and_then(scalar_string))?;
                    let id = ["id", "value"]
                        .iter()
                        .find_map(|key| item.get(*key).and_then(scalar_string))?;
                    Some((namespace, id))
                })
                .collect(),
            Self::Single(id) if !id.trim().is_empty() => {
                BTreeMap::from([("id".to_string(), id.trim().to_string())])
            }
            Self::Single(_) => BTreeMap::new(),
        }
    }
}

fn scalar_string(value: &Value) -> Option<String> {
    let s = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!s.is_empty()).then_some(s)
}

// ============================================================================
// NER Extractor
// ============================================================================

/// Prompt builder and payload parser for the entity stage
pub struct NerExtractor {
    schema: Arc<SchemaStore>,
}

impl NerExtractor {
    pub fn new(schema: Arc<SchemaStore>) -> Self {
        Self { schema }
    }

    /// Correlation id of a sentence's NER request
    pub fn correlation_id(sentence: &Sentence) -> String {
        format!("ner:{}:{:05}", sentence.doc_id, sentence.sentence_index)
    }

    /// Build the entity prompt for one sentence
    pub fn build_prompt(&self, sentence: &Sentence) -> PromptSpec {
        let classes = self.schema.ontology.class_names().join(", ");
        let prompt = format!(
            "Identify biomedical entities in the sentence.\n\
             Classes: {classes}\n\
             Return JSON with an `entities` list of {{text, class, start, end, ids}}. \
             `text` must be copied verbatim from the sentence, `class` must be one of the \
             classes above, `start`/`end` are offsets of `text` in the sentence and `ids` \
             maps identifier namespaces (e.g. HGNC, CHEBI) to identifiers. \
             Return {{\"entities\": []}} when the sentence has none.\n\
             Sentence: {}",
            sentence.text
        );

        PromptSpec::new(Self::correlation_id(sentence), prompt).with_metadata(serde_json::json!({
            "doc_id": sentence.doc_id,
            "sentence_index": sentence.sentence_index,
        }))
    }

    /// Parse an NER payload into mentions located in the sentence
    ///
    /// An invalid payload shape is a malformed response. Mentions with
    /// empty text or that do not occur in the sentence are dropped.
    pub fn parse_mentions(
        &self,
        sentence: &Sentence,
        payload: &Value,
    ) -> Result<Vec<EntityMention>, InferenceError> {
        let parsed = NerPayload::deserialize(payload)
            .map_err(|e| InferenceError::Malformed(format!("NER payload: {e}")))?;

        let sentence_ref = sentence.sentence_ref();
        let mut mentions: Vec<EntityMention> = Vec::with_capacity(parsed.entities.len());

        for raw in parsed.entities {
            let surface = raw.text.trim();
            let entity_type = raw.entity_type.trim();
            if surface.is_empty() || entity_type.is_empty() {
                tracing::debug!(sentence = %sentence_ref, "Skipping empty mention");
                continue;
            }

            let start = raw.start.as_ref().and_then(Value::as_u64);
            let end = raw.end.as_ref().and_then(Value::as_u64);
            let Some(span) = locate(&sentence.text, surface, start, end) else {
                tracing::debug!(
                    sentence = %sentence_ref,
                    mention = surface,
                    "Dropping mention not found in sentence"
                );
                continue;
            };

            let mention = EntityMention {
                sentence_ref: sentence_ref.clone(),
                surface_text: sentence.text[span.start..span.end].to_string(),
                entity_type: entity_type.to_string(),
                span: Some(span),
                ids: raw.ids.map(RawIds::into_map).unwrap_or_default(),
            };
            if !mentions.contains(&mention) {
                mentions.push(mention);
            }
        }

        Ok(mentions)
    }
}

/// Find `surface` in `text`
///
/// Reported offsets are trusted only when they delimit the surface text,
/// read either as byte or as character offsets. Otherwise the first
/// case-insensitive occurrence is used.
fn locate(text: &str, surface: &str, start: Option<u64>, end: Option<u64>) -> Option<Span> {
    if let (Some(start), Some(end)) = (start, end) {
        let (start, end) = (start as usize, end as usize);
        if text.get(start..end) == Some(surface) {
            return Some(Span::new(start, end));
        }
        if let (Some(byte_start), Some(byte_end)) = (char_to_byte(text, start), char_to_byte(text, end)) {
            if text.get(byte_start..byte_end) == Some(surface) {
                return Some(Span::new(byte_start, byte_end));
            }
        }
    }

    let pattern = RegexBuilder::new(&regex::escape(surface))
        .case_insensitive(true)
        .build()
        .ok()?;
    pattern.find(text).map(|m| Span::new(m.start(), m.end()))
}

fn char_to_byte(text: &str, char_index: usize) -> Option<usize> {
    text.char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .nth(char_index)
}
