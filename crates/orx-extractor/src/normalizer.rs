//! Entity normalization against the ID policy
//!
//! Resolution order for a mention of a known class:
//! 1. the class's static lookup table (lower-cased, whitespace collapsed)
//! 2. model-reported ids in the `primary` namespace, then `alternates`
//! 3. the closest lookup key within `fuzzy_max_distance` edits
//!
//! Anything else stays unresolved. No id is ever synthesized.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use orx_core::schema::surface_key;
use orx_core::{SchemaStore, Sentence, TypePolicy};
use serde::{Deserialize, Serialize};

use crate::{EntityMention, NormalizedEntity, SentenceEntities, UnresolvedMention};

/// Why a mention has no canonical id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedReason {
    /// Entity type is not an ontology class
    UnknownType,
    /// The class has no ID policy entry
    NoPolicy,
    /// No lookup entry, reported id or fuzzy match
    NoMatch,
}

/// Outcome of normalizing one mention
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(String),
    Unresolved(UnresolvedReason),
}

/// Maps mentions to canonical ids
pub struct EntityNormalizer {
    schema: Arc<SchemaStore>,
}

impl EntityNormalizer {
    pub fn new(schema: Arc<SchemaStore>) -> Self {
        Self { schema }
    }

    pub fn normalize(&self, mention: &EntityMention) -> Resolution {
        if !self.schema.ontology.has_class(&mention.entity_type) {
            return Resolution::Unresolved(UnresolvedReason::UnknownType);
        }
        let Some(policy) = self.schema.id_policy.for_type(&mention.entity_type) else {
            return Resolution::Unresolved(UnresolvedReason::NoPolicy);
        };

        let key = surface_key(&mention.surface_text);
        if let Some(id) = policy.lookup.get(&key) {
            return Resolution::Resolved(id.clone());
        }
        if let Some(id) = reported_id(policy, &mention.ids) {
            return Resolution::Resolved(id);
        }
        if let Some(id) = fuzzy_lookup(policy, &key) {
            return Resolution::Resolved(id);
        }

        Resolution::Unresolved(UnresolvedReason::NoMatch)
    }

    /// Normalize one sentence's mentions, merging by canonical id
    ///
    /// Entities come out ordered by canonical id; each keeps the type and
    /// surface text of its earliest mention.
    pub fn normalize_sentence(
        &self,
        sentence: Sentence,
        mentions: Vec<EntityMention>,
    ) -> SentenceEntities {
        let mut groups: BTreeMap<String, Vec<EntityMention>> = BTreeMap::new();
        let mut unresolved = Vec::new();

        for mention in mentions {
            match self.normalize(&mention) {
                Resolution::Resolved(id) => groups.entry(id).or_default().push(mention),
                Resolution::Unresolved(reason) => {
                    tracing::debug!(
                        sentence = %mention.sentence_ref,
                        mention = %mention.surface_text,
                        entity_type = %mention.entity_type,
                        ?reason,
                        "Unresolved mention"
                    );
                    unresolved.push(UnresolvedMention::new(mention, reason));
                }
            }
        }

        let entities = groups
            .into_iter()
            .filter_map(|(canonical_id, mut mentions)| {
                mentions.sort_by(mention_order);
                mentions.dedup();
                let first = mentions.first()?;
                Some(NormalizedEntity {
                    entity_type: first.entity_type.clone(),
                    surface_text: first.surface_text.clone(),
                    canonical_id,
                    mentions,
                })
            })
            .collect();

        SentenceEntities {
            sentence,
            entities,
            unresolved,
            failure: None,
        }
    }
}

/// Earliest span first; unknown spans last; ties by surface text
fn mention_order(a: &EntityMention, b: &EntityMention) -> Ordering {
    let start = |m: &EntityMention| m.span.map_or(usize::MAX, |s| s.start);
    start(a)
        .cmp(&start(b))
        .then_with(|| a.surface_text.cmp(&b.surface_text))
        .then_with(|| a.entity_type.cmp(&b.entity_type))
}

fn reported_id(policy: &TypePolicy, ids: &BTreeMap<String, String>) -> Option<String> {
    policy
        .primary
        .iter()
        .chain(&policy.alternates)
        .find_map(|namespace| {
            ids.iter()
                .find(|(key, value)| key.eq_ignore_ascii_case(namespace) && !value.is_empty())
                .map(|(_, value)| value.clone())
        })
}

fn fuzzy_lookup(policy: &TypePolicy, key: &str) -> Option<String> {
    if policy.fuzzy_max_distance == 0 || key.is_empty() {
        return None;
    }

    let mut best: Option<(usize, &String)> = None;
    for (candidate, id) in &policy.lookup {
        let distance = strsim::levenshtein(candidate, key);
        if distance <= policy.fuzzy_max_distance && best.map_or(true, |(d, _)| distance < d) {
            best = Some((distance, id));
        }
    }
    best.map(|(_, id)| id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{test_support, Span};
    use orx_core::SentenceRef;

    fn normalizer() -> EntityNormalizer {
        EntityNormalizer::new(Arc::new(test_support::store()))
    }

    fn mention(surface: &str, entity_type: &str, start: usize) -> EntityMention {
        EntityMention {
            sentence_ref: SentenceRef::new("1", 0),
            surface_text: surface.to_string(),
            entity_type: entity_type.to_string(),
            span: Some(Span::new(start, start + surface.len())),
            ids: BTreeMap::new(),
        }
    }

    fn with_ids(mut m: EntityMention, ids: &[(&str, &str)]) -> EntityMention {
        m.ids = ids
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        m
    }

    #[test]
    fn test_lookup_table_first() {
        let n = normalizer();
        let m = with_ids(mention("  abcb1 ", "Gene", 0), &[("HGNC", "HGNC:999")]);
        assert_eq!(n.normalize(&m), Resolution::Resolved("HGNC:40".to_string()));
    }

    #[test]
    fn test_primary_then_alternate_namespace() {
        let n = normalizer();
        let m = with_ids(
            mention("BRCA2", "Gene", 0),
            &[("ENTREZ", "675"), ("hgnc", "HGNC:1101")],
        );
        assert_eq!(n.normalize(&m), Resolution::Resolved("HGNC:1101".to_string()));

        let m = with_ids(mention("BRCA2", "Gene", 0), &[("ENTREZ", "675")]);
        assert_eq!(n.normalize(&m), Resolution::Resolved("675".to_string()));
    }

    #[test]
    fn test_fuzzy_prefers_closest_key() {
        let policy = TypePolicy {
            lookup: BTreeMap::from([
                ("abcb1".to_string(), "HGNC:40".to_string()),
                ("abcc1".to_string(), "HGNC:51".to_string()),
            ]),
            fuzzy_max_distance: 2,
            ..TypePolicy::default()
        };

        assert_eq!(fuzzy_lookup(&policy, "abcb"), Some("HGNC:40".to_string()));
        assert_eq!(fuzzy_lookup(&policy, "abcc"), Some("HGNC:51".to_string()));
        assert_eq!(fuzzy_lookup(&policy, "mdr1"), None);
        assert_eq!(fuzzy_lookup(&policy, ""), None);
    }

    #[test]
    fn test_fuzzy_within_tolerance_only() {
        let n = normalizer();
        assert_eq!(
            n.normalize(&mention("ABCB-1", "Gene", 0)),
            Resolution::Resolved("HGNC:40".to_string())
        );
        assert_eq!(
            n.normalize(&mention("ABCG2", "Gene", 0)),
            Resolution::Unresolved(UnresolvedReason::NoMatch)
        );
        // Drug policy has fuzzy matching disabled
        assert_eq!(
            n.normalize(&mention("talazoparb", "Drug", 0)),
            Resolution::Unresolved(UnresolvedReason::NoMatch)
        );
    }

    #[test]
    fn test_unknown_type_and_missing_policy() {
        let n = normalizer();
        assert_eq!(
            n.normalize(&mention("IL-6", "Cytokine", 0)),
            Resolution::Unresolved(UnresolvedReason::UnknownType)
        );
        assert_eq!(
            n.normalize(&mention("P-gp", "Protein", 0)),
            Resolution::Unresolved(UnresolvedReason::NoPolicy)
        );
    }

    #[test]
    fn test_normalize_sentence_merges_by_canonical_id() {
        let n = normalizer();
        let sentence = Sentence::new("1", 0, "MDR1 (ABCB1) confers resistance to talazoparib.");
        let mentions = vec![
            mention("talazoparib", "Drug", 35),
            mention("ABCB1", "Gene", 6),
            mention("MDR1", "Gene", 0),
            mention("olaparib", "Drug", 60),
        ];

        let result = n.normalize_sentence(sentence, mentions);

        let ids: Vec<&str> = result.entities.iter().map(|e| e.canonical_id.as_str()).collect();
        assert_eq!(ids, vec!["CHEBI:142427", "HGNC:40"]);

        let gene = &result.entities[1];
        assert_eq!(gene.mentions.len(), 2);
        assert_eq!(gene.surface_text, "MDR1");
        assert_eq!(gene.span(), Some(Span::new(0, 4)));

        assert_eq!(result.unresolved.len(), 1);
        assert_eq!(result.unresolved[0].reason, UnresolvedReason::NoMatch);
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let n = normalizer();
        let sentence = Sentence::new("1", 0, "ABCB1 and MDR1.");
        let mentions = vec![mention("MDR1", "Gene", 10), mention("ABCB1", "Gene", 0)];

        let first = n.normalize_sentence(sentence.clone(), mentions);
        let again_mentions: Vec<EntityMention> = first
            .entities
            .iter()
            .flat_map(|e| e.mentions.iter().cloned())
            .collect();
        let second = n.normalize_sentence(sentence, again_mentions);

        assert_eq!(first, second);
    }
}
