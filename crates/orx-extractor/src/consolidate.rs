//! Consolidation of sentence-level judgments into graph relations
//!
//! NONE and sub-threshold judgments are dropped, the rest are grouped by
//! exact triple and aggregated. The output does not depend on the order
//! judgments arrive in.

use std::collections::{BTreeMap, BTreeSet};

use orx_core::{AggregationMode, ConsolidatedRelation, Evidence, PipelineConfig, RelationTriple};

use crate::RelationJudgment;

/// Threshold filter plus merge-by-triple
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Consolidator {
    pub threshold: f64,
    pub aggregation: AggregationMode,
}

impl Default for Consolidator {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

impl Consolidator {
    pub fn new(threshold: f64, aggregation: AggregationMode) -> Self {
        Self {
            threshold,
            aggregation,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.threshold, config.aggregation)
    }

    /// One relation per distinct triple, ordered by triple
    pub fn consolidate(&self, judgments: &[RelationJudgment]) -> Vec<ConsolidatedRelation> {
        let mut groups: BTreeMap<RelationTriple, Vec<&RelationJudgment>> = BTreeMap::new();
        let mut below_threshold = 0usize;

        for judgment in judgments {
            let Some(triple) = judgment.triple() else {
                continue;
            };
            if judgment.confidence < self.threshold {
                below_threshold += 1;
                continue;
            }
            groups.entry(triple).or_default().push(judgment);
        }

        tracing::debug!(
            judgments = judgments.len(),
            below_threshold,
            triples = groups.len(),
            "Consolidating judgments"
        );

        groups
            .into_iter()
            .filter_map(|(triple, members)| self.merge(triple, members))
            .collect()
    }

    fn merge(
        &self,
        triple: RelationTriple,
        members: Vec<&RelationJudgment>,
    ) -> Option<ConsolidatedRelation> {
        let mut confidences: Vec<f64> = members.iter().map(|j| j.confidence).collect();
        confidences.sort_by(f64::total_cmp);
        let confidence = match self.aggregation {
            AggregationMode::Max => *confidences.last()?,
            AggregationMode::Mean => confidences.iter().sum::<f64>() / confidences.len() as f64,
        };

        // Representative names: lexicographically smallest surface form
        let subject = members
            .iter()
            .map(|j| &j.subject)
            .min_by(|a, b| (&a.surface_text, &a.entity_type).cmp(&(&b.surface_text, &b.entity_type)))?;
        let object = members
            .iter()
            .map(|j| &j.object)
            .min_by(|a, b| (&a.surface_text, &a.entity_type).cmp(&(&b.surface_text, &b.entity_type)))?;

        let mut evidence: Vec<Evidence> = members
            .iter()
            .map(|j| Evidence {
                sentence_ref: j.sentence_ref.clone(),
                sentence: j.sentence.clone(),
                confidence: j.confidence,
                explanation: j.explanation.clone(),
            })
            .collect();
        evidence.sort_by(|a, b| {
            a.sentence_ref
                .cmp(&b.sentence_ref)
                .then_with(|| b.confidence.total_cmp(&a.confidence))
                .then_with(|| a.explanation.cmp(&b.explanation))
                .then_with(|| a.sentence.cmp(&b.sentence))
        });

        let model_metadata: BTreeSet<_> = members.iter().map(|j| j.model.clone()).collect();

        Some(ConsolidatedRelation {
            subject_type: subject.entity_type.clone(),
            subject_name: subject.surface_text.clone(),
            object_type: object.entity_type.clone(),
            object_name: object.surface_text.clone(),
            confidence,
            supporting_pmids: members.iter().map(|j| j.sentence_ref.doc_id.clone()).collect(),
            supporting_sentences: members.iter().map(|j| j.sentence_ref.clone()).collect(),
            evidence,
            model_metadata: model_metadata.into_iter().collect(),
            triple,
        })
    }
}
