//! Candidate pair generation
//!
//! Every ordered pair of distinct entities in a sentence whose types
//! satisfy at least one predicate's domain/range becomes a candidate.

use std::sync::Arc;

use orx_core::SchemaStore;

use crate::{CandidatePair, NormalizedEntity, SentenceEntities};

/// Enumerates ontology-eligible entity pairs
pub struct PairGenerator {
    schema: Arc<SchemaStore>,
    max_distance: Option<usize>,
}

impl PairGenerator {
    pub fn new(schema: Arc<SchemaStore>) -> Self {
        Self {
            schema,
            max_distance: None,
        }
    }

    /// Skip pairs whose outermost spans are further apart than `distance` bytes
    pub fn with_max_distance(mut self, distance: Option<usize>) -> Self {
        self.max_distance = distance;
        self
    }

    /// Pairs of one sentence, ordered by subject then object canonical id
    pub fn generate(&self, sentence_entities: &SentenceEntities) -> Vec<CandidatePair> {
        let mut entities: Vec<&NormalizedEntity> = sentence_entities.entities.iter().collect();
        entities.sort_by(|a, b| a.canonical_id.cmp(&b.canonical_id));

        let sentence_ref = sentence_entities.sentence.sentence_ref();
        let mut pairs = Vec::new();

        for subject in &entities {
            for object in &entities {
                if subject.canonical_id == object.canonical_id {
                    continue;
                }
                if !self.within_distance(subject, object) {
                    continue;
                }

                let eligible = self
                    .schema
                    .ontology
                    .eligible_predicates(&subject.entity_type, &object.entity_type);
                if eligible.is_empty() {
                    continue;
                }

                pairs.push(CandidatePair {
                    pair_id: format!(
                        "re:{}:{:05}:{:04}",
                        sentence_ref.doc_id,
                        sentence_ref.sentence_index,
                        pairs.len()
                    ),
                    sentence_ref: sentence_ref.clone(),
                    subject: (*subject).clone(),
                    object: (*object).clone(),
                    eligible_predicates: eligible,
                });
            }
        }

        pairs
    }

    fn within_distance(&self, subject: &NormalizedEntity, object: &NormalizedEntity) -> bool {
        let (Some(limit), Some(a), Some(b)) = (self.max_distance, subject.span(), object.span())
        else {
            return true;
        };
        let start = a.start.min(b.start);
        let end = a.end.max(b.end);
        end - start <= limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{test_support, EntityMention, Span};
    use orx_core::{Sentence, SentenceRef};
    use std::collections::BTreeMap;

    fn entity(id: &str, entity_type: &str, surface: &str, start: usize) -> NormalizedEntity {
        NormalizedEntity {
            canonical_id: id.to_string(),
            entity_type: entity_type.to_string(),
            surface_text: surface.to_string(),
            mentions: vec![EntityMention {
                sentence_ref: SentenceRef::new("7", 2),
                surface_text: surface.to_string(),
                entity_type: entity_type.to_string(),
                span: Some(Span::new(start, start + surface.len())),
                ids: BTreeMap::new(),
            }],
        }
    }

    fn sentence_entities(entities: Vec<NormalizedEntity>) -> SentenceEntities {
        SentenceEntities {
            entities,
            ..SentenceEntities::new(Sentence::new("7", 2, "placeholder"))
        }
    }

    #[test]
    fn test_pairs_follow_domain_and_range() {
        let generator = PairGenerator::new(Arc::new(test_support::store()));
        let input = sentence_entities(vec![
            entity("HGNC:40", "Gene", "ABCB1", 0),
            entity("CHEBI:142427", "Drug", "talazoparib", 30),
            entity("MONDO:0007254", "Disease", "breast cancer", 60),
        ]);

        let pairs = generator.generate(&input);
        let summary: Vec<(&str, &str)> = pairs
            .iter()
            .map(|p| (p.subject.canonical_id.as_str(), p.object.canonical_id.as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("CHEBI:142427", "MONDO:0007254"),
                ("HGNC:40", "CHEBI:142427"),
            ]
        );

        let gene_drug = &pairs[1];
        assert_eq!(gene_drug.pair_id, "re:7:00002:0001");
        assert_eq!(
            gene_drug.eligible_predicates.iter().collect::<Vec<_>>(),
            vec!["confers_resistance_to", "increases_resistance_to"]
        );
        assert!(pairs.iter().all(|p| !p.eligible_predicates.is_empty()));
    }

    #[test]
    fn test_no_self_pairs() {
        let generator = PairGenerator::new(Arc::new(test_support::store()));
        let input = sentence_entities(vec![entity("HGNC:40", "Gene", "ABCB1", 0)]);
        assert!(generator.generate(&input).is_empty());
    }

    #[test]
    fn test_max_distance_prunes_far_pairs() {
        let generator =
            PairGenerator::new(Arc::new(test_support::store())).with_max_distance(Some(40));
        let input = sentence_entities(vec![
            entity("HGNC:40", "Gene", "ABCB1", 0),
            entity("CHEBI:142427", "Drug", "talazoparib", 100),
        ]);
        assert!(generator.generate(&input).is_empty());

        let near = sentence_entities(vec![
            entity("HGNC:40", "Gene", "ABCB1", 0),
            entity("CHEBI:142427", "Drug", "talazoparib", 20),
        ]);
        assert_eq!(generator.generate(&near).len(), 1);
    }
}
