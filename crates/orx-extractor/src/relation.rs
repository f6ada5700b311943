//! Relation Extraction (RE) stage
//!
//! One prompt per candidate pair: the sentence with the subject and object
//! marked, the eligible predicates with their guideline descriptions, and
//! an explicit `none` option. The structured answer is validated against
//! the pair's eligible set.

use std::sync::Arc;

use orx_core::{ModelMetadata, PromptSpec, SchemaStore};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::{CandidatePair, NormalizedEntity, RelationJudgment, Span};

/// Guideline descriptions are cut to this many characters in prompts
pub const DESCRIPTION_LIMIT: usize = 140;

/// Why a payload did not yield a judgment
#[derive(Error, Debug, Clone, PartialEq)]
pub enum JudgmentError {
    #[error("malformed judgment: {0}")]
    Malformed(String),

    #[error("predicate {predicate} is not eligible (allowed: {})", .eligible.join(", "))]
    SchemaViolation {
        predicate: String,
        eligible: Vec<String>,
    },
}

#[derive(Debug, Deserialize)]
struct RawJudgment {
    #[serde(default)]
    predicate: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    explanation: Option<String>,
}

/// Prompt builder and judgment parser for the relation stage
pub struct RelationExtractor {
    schema: Arc<SchemaStore>,
    model: ModelMetadata,
}

impl RelationExtractor {
    pub fn new(schema: Arc<SchemaStore>, model: ModelMetadata) -> Self {
        Self { schema, model }
    }

    pub fn model(&self) -> &ModelMetadata {
        &self.model
    }

    /// Build the relation prompt for a pair in its sentence
    pub fn build_prompt(&self, pair: &CandidatePair, sentence: &str) -> PromptSpec {
        let allowed: Vec<String> = pair
            .eligible_predicates
            .iter()
            .map(|name| {
                let description = self
                    .schema
                    .ontology
                    .predicate(name)
                    .map(|p| truncate_chars(&p.description, DESCRIPTION_LIMIT))
                    .unwrap_or_default();
                if description.is_empty() {
                    format!("- {name}")
                } else {
                    format!("- {name}: {description}")
                }
            })
            .collect();

        let prompt = format!(
            "Determine which predicate (if any) relates the marked subject to the marked object.\n\
             Sentence: {sentence}\n\
             Subject: {subject} ({subject_type})\n\
             Object: {object} ({object_type})\n\
             Allowed predicates:\n{allowed}\n\
             - none: the sentence supports none of the predicates above\n\
             Respond as JSON {{\"predicate\": string or null, \"confidence\": number between 0 and 1, \
             \"explanation\": string}}.",
            sentence = mark_sentence(sentence, &pair.subject, &pair.object),
            subject = pair.subject.surface_text,
            subject_type = pair.subject.entity_type,
            object = pair.object.surface_text,
            object_type = pair.object.entity_type,
            allowed = allowed.join("\n"),
        );

        PromptSpec::new(pair.pair_id.clone(), prompt).with_metadata(serde_json::json!({
            "doc_id": pair.sentence_ref.doc_id,
            "sentence_index": pair.sentence_ref.sentence_index,
            "subject_id": pair.subject.canonical_id,
            "object_id": pair.object.canonical_id,
        }))
    }

    /// Validate a relation payload for `pair`
    ///
    /// A `null` or `"none"` predicate is a NONE judgment. A predicate outside
    /// the eligible set is a schema violation; a missing, non-finite or
    /// out-of-range confidence is malformed.
    pub fn parse_judgment(
        &self,
        pair: &CandidatePair,
        sentence: &str,
        payload: &Value,
    ) -> Result<RelationJudgment, JudgmentError> {
        let raw = RawJudgment::deserialize(payload)
            .map_err(|e| JudgmentError::Malformed(e.to_string()))?;

        let confidence = match raw.confidence {
            Some(c) if c.is_finite() && (0.0..=1.0).contains(&c) => c,
            Some(c) => {
                return Err(JudgmentError::Malformed(format!(
                    "confidence {c} outside [0, 1]"
                )))
            }
            None => return Err(JudgmentError::Malformed("missing confidence".to_string())),
        };

        let predicate = raw
            .predicate
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty() && !p.eq_ignore_ascii_case("none"));

        if let Some(predicate) = &predicate {
            if !pair.eligible_predicates.contains(predicate) {
                return Err(JudgmentError::SchemaViolation {
                    predicate: predicate.clone(),
                    eligible: pair.eligible_predicates.iter().cloned().collect(),
                });
            }
        }

        Ok(RelationJudgment {
            pair_id: pair.pair_id.clone(),
            sentence_ref: pair.sentence_ref.clone(),
            sentence: sentence.to_string(),
            subject: pair.subject.entity_ref(),
            object: pair.object.entity_ref(),
            predicate,
            confidence,
            explanation: raw.explanation.unwrap_or_default().trim().to_string(),
            model: self.model.clone(),
        })
    }
}

/// First `limit` characters of `text`
fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((index, _)) => text[..index].to_string(),
        None => text.to_string(),
    }
}

/// Wrap subject and object in `[SUBJ]`/`[OBJ]` markers
///
/// Uses the entities' spans when both are known and disjoint, otherwise
/// marks the first occurrence of each surface form. An object occurrence
/// overlapping the marked subject is never marked.
fn mark_sentence(text: &str, subject: &NormalizedEntity, object: &NormalizedEntity) -> String {
    let valid = |span: Option<Span>| span.filter(|s| text.get(s.start..s.end).is_some());

    if let (Some(s), Some(o)) = (valid(subject.span()), valid(object.span())) {
        if disjoint(s, o) {
            return insert_marks(text, vec![(s, "[SUBJ]", "[/SUBJ]"), (o, "[OBJ]", "[/OBJ]")]);
        }
    }

    let subject_span = find_from(text, &subject.surface_text, 0);
    let object_span = match subject_span {
        Some(s) => find_from(text, &object.surface_text, 0)
            .filter(|o| disjoint(s, *o))
            .or_else(|| find_from(text, &object.surface_text, s.end)),
        None => find_from(text, &object.surface_text, 0),
    };

    let mut marks = Vec::with_capacity(2);
    if let Some(s) = subject_span {
        marks.push((s, "[SUBJ]", "[/SUBJ]"));
    }
    if let Some(o) = object_span {
        marks.push((o, "[OBJ]", "[/OBJ]"));
    }
    insert_marks(text, marks)
}

fn disjoint(a: Span, b: Span) -> bool {
    a.end <= b.start || b.end <= a.start
}

/// First occurrence of `needle` at or after byte `from`
fn find_from(text: &str, needle: &str, from: usize) -> Option<Span> {
    if needle.is_empty() {
        return None;
    }
    let start = from + text.get(from..)?.find(needle)?;
    Some(Span::new(start, start + needle.len()))
}

/// Insert open/close markers around disjoint spans
fn insert_marks(text: &str, mut marks: Vec<(Span, &str, &str)>) -> String {
    marks.sort_by_key(|(span, _, _)| span.start);

    let mut marked = String::with_capacity(text.len() + 26);
    let mut cursor = 0;
    for (span, open, close) in marks {
        marked.push_str(&text[cursor..span.start]);
        marked.push_str(open);
        marked.push_str(&text[span.start..span.end]);
        marked.push_str(close);
        cursor = span.end;
    }
    marked.push_str(&text[cursor..]);
    marked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{test_support, EntityMention};
    use orx_core::SentenceRef;
    use serde_json::json;
    use std::collections::{BTreeMap, BTreeSet};

    const SENTENCE: &str = "Overexpression of ABCB1 confers resistance to talazoparib.";

    fn entity(id: &str, entity_type: &str, surface: &str, span: Option<Span>) -> NormalizedEntity {
        NormalizedEntity {
            canonical_id: id.to_string(),
            entity_type: entity_type.to_string(),
            surface_text: surface.to_string(),
            mentions: vec![EntityMention {
                sentence_ref: SentenceRef::new("1", 0),
                surface_text: surface.to_string(),
                entity_type: entity_type.to_string(),
                span,
                ids: BTreeMap::new(),
            }],
        }
    }

    fn pair() -> CandidatePair {
        CandidatePair {
            pair_id: "re:1:00000:0000".to_string(),
            sentence_ref: SentenceRef::new("1", 0),
            subject: entity("HGNC:40", "Gene", "ABCB1", Some(Span::new(18, 23))),
            object: entity("CHEBI:142427", "Drug", "talazoparib", Some(Span::new(46, 57))),
            eligible_predicates: BTreeSet::from([
                "confers_resistance_to".to_string(),
                "increases_resistance_to".to_string(),
            ]),
        }
    }

    fn extractor() -> RelationExtractor {
        RelationExtractor::new(
            Arc::new(test_support::store()),
            ModelMetadata {
                model_name: "gpt-4o-mini".to_string(),
                model_version: "v1".to_string(),
                prompt_version: "v1".to_string(),
            },
        )
    }

    #[test]
    fn test_prompt_marks_entities_and_lists_predicates() {
        let spec = extractor().build_prompt(&pair(), SENTENCE);

        assert_eq!(spec.correlation_id, "re:1:00000:0000");
        assert!(spec.prompt.contains(
            "Sentence: Overexpression of [SUBJ]ABCB1[/SUBJ] confers resistance to [OBJ]talazoparib[/OBJ]."
        ));
        assert!(spec.prompt.contains("Subject: ABCB1 (Gene)"));
        assert!(spec
            .prompt
            .contains("- increases_resistance_to: The subject gene increases"));
        assert!(spec.prompt.contains("- none:"));
        assert!(!spec.prompt.contains("treats"));
    }

    #[test]
    fn test_marking_falls_back_without_spans() {
        let mut p = pair();
        p.subject = entity("HGNC:40", "Gene", "ABCB1", None);
        let marked = mark_sentence(SENTENCE, &p.subject, &p.object);
        assert_eq!(
            marked,
            "Overexpression of [SUBJ]ABCB1[/SUBJ] confers resistance to [OBJ]talazoparib[/OBJ]."
        );
    }

    #[test]
    fn test_object_inside_subject_is_not_nested() {
        let subject = entity("HGNC:40", "Gene", "ABCB1", None);
        let object = entity("CHEBI:1", "Drug", "ABCB1 inhibitor", None);

        let marked = mark_sentence("ABCB1 inhibitor restores sensitivity.", &subject, &object);
        assert_eq!(marked, "[SUBJ]ABCB1[/SUBJ] inhibitor restores sensitivity.");

        let marked = mark_sentence("ABCB1 is blocked by an ABCB1 inhibitor.", &subject, &object);
        assert_eq!(
            marked,
            "[SUBJ]ABCB1[/SUBJ] is blocked by an [OBJ]ABCB1 inhibitor[/OBJ]."
        );

        // Subject contained in an earlier object occurrence
        let marked = mark_sentence("An ABCB1 inhibitor targets ABCB1.", &object, &subject);
        assert_eq!(
            marked,
            "An [SUBJ]ABCB1 inhibitor[/SUBJ] targets [OBJ]ABCB1[/OBJ]."
        );
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("abcdef", 3), "abc");
        assert_eq!(truncate_chars("αβγδ", 2), "αβ");
        assert_eq!(truncate_chars("ab", 140), "ab");
    }

    #[test]
    fn test_parse_valid_judgment() {
        let judgment = extractor()
            .parse_judgment(
                &pair(),
                SENTENCE,
                &json!({"predicate": "increases_resistance_to", "confidence": 0.92, "explanation": " overexpression "}),
            )
            .unwrap();

        assert_eq!(judgment.predicate.as_deref(), Some("increases_resistance_to"));
        assert_eq!(judgment.confidence, 0.92);
        assert_eq!(judgment.explanation, "overexpression");
        assert_eq!(judgment.subject.canonical_id, "HGNC:40");
        assert_eq!(judgment.model.model_name, "gpt-4o-mini");
        assert_eq!(
            judgment.triple().unwrap().to_string(),
            "(HGNC:40, increases_resistance_to, CHEBI:142427)"
        );
    }

    #[test]
    fn test_parse_none_judgment() {
        let ex = extractor();
        for payload in [
            json!({"predicate": null, "confidence": 0.8}),
            json!({"predicate": "NONE", "confidence": 0.8}),
        ] {
            let judgment = ex.parse_judgment(&pair(), SENTENCE, &payload).unwrap();
            assert!(judgment.predicate.is_none());
            assert!(judgment.triple().is_none());
        }
    }

    #[test]
    fn test_ineligible_predicate_is_schema_violation() {
        let err = extractor()
            .parse_judgment(&pair(), SENTENCE, &json!({"predicate": "treats", "confidence": 0.9}))
            .unwrap_err();
        assert!(matches!(err, JudgmentError::SchemaViolation { ref predicate, .. } if predicate == "treats"));
    }

    #[test]
    fn test_bad_confidence_is_malformed() {
        let ex = extractor();
        for payload in [
            json!({"predicate": "confers_resistance_to"}),
            json!({"predicate": "confers_resistance_to", "confidence": 1.5}),
            json!({"predicate": "confers_resistance_to", "confidence": "high"}),
            json!({"predicate": 7, "confidence": 0.5}),
        ] {
            let err = ex.parse_judgment(&pair(), SENTENCE, &payload).unwrap_err();
            assert!(matches!(err, JudgmentError::Malformed(_)), "{payload}");
        }
    }
}
