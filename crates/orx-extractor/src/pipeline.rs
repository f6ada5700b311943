//! Pipeline driver
//!
//! documents -> sentences -> NER batch -> normalized entities -> candidate
//! pairs -> RE batch -> judgments -> consolidated relations.
//!
//! Each phase persists its output under the artifact directory so it can be
//! re-run from the previous phase's file:
//! - `ner/requests.jsonl`, `ner/results.jsonl`, `ner/entities.jsonl`
//! - `re/requests.jsonl`, `re/results.jsonl`, `re/judgments.jsonl`

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use orx_core::jsonl::write_jsonl;
use orx_core::{
    AppConfig, ConsolidatedRelation, Document, InferenceProvider, ModelMetadata, OrxError,
    PipelineConfig, Result, SchemaStore, Sentence,
};
use orx_inference::{
    create_provider, total_provider_failure, BatchArtifacts, BatchResult, Outcome,
    RequestOrchestrator,
};
use serde::Serialize;

use crate::{
    AuditOutcome, CandidatePair, Consolidator, EntityNormalizer, NerExtractor, PairGenerator,
    RelationExtractor, RelationJudgment, RelationLogger, SentenceEntities, SentenceSegmenter,
};

/// Counts reported at the end of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub documents: usize,
    pub sentences: usize,
    pub mentions: usize,
    pub unresolved: usize,
    pub ner_failures: usize,
    pub pairs: usize,
    pub judgments: usize,
    pub re_failures: usize,
    pub relations: usize,
}

struct RelationPhase {
    pairs: usize,
    judgments: Vec<RelationJudgment>,
    failures: usize,
}

/// The extraction-and-consolidation pipeline
pub struct Pipeline {
    orchestrator: RequestOrchestrator,
    segmenter: SentenceSegmenter,
    ner: NerExtractor,
    normalizer: EntityNormalizer,
    pairs: PairGenerator,
    relations: RelationExtractor,
    consolidator: Consolidator,
    settings: PipelineConfig,
    artifact_dir: PathBuf,
    relation_log: PathBuf,
}

impl Pipeline {
    pub fn new(
        config: &AppConfig,
        schema: Arc<SchemaStore>,
        provider: Arc<dyn InferenceProvider>,
    ) -> Self {
        let model = ModelMetadata {
            model_name: provider.model_name().to_string(),
            model_version: config.llm.model_version.clone(),
            prompt_version: config.llm.prompt_version.clone(),
        };

        Self {
            orchestrator: RequestOrchestrator::new(provider, config.orchestrator.clone()),
            segmenter: SentenceSegmenter::new(),
            ner: NerExtractor::new(schema.clone()),
            normalizer: EntityNormalizer::new(schema.clone()),
            pairs: PairGenerator::new(schema.clone())
                .with_max_distance(config.pipeline.max_pair_distance),
            relations: RelationExtractor::new(schema, model),
            consolidator: Consolidator::from_config(&config.pipeline),
            settings: config.pipeline.clone(),
            artifact_dir: config.artifacts.dir.clone(),
            relation_log: config.artifacts.relation_log.clone(),
        }
    }

    /// Load the schema store and provider named by `config`
    ///
    /// All configuration errors surface here, before any request is sent.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        config.validate()?;
        let schema = Arc::new(SchemaStore::load(&config.schema)?);
        let provider = create_provider(&config.llm)?;
        Ok(Self::new(config, schema, provider))
    }

    /// Override the consolidator (threshold, aggregation)
    pub fn with_consolidator(mut self, consolidator: Consolidator) -> Self {
        self.consolidator = consolidator;
        self
    }

    pub fn entities_path(&self) -> PathBuf {
        self.artifact_dir.join("ner").join("entities.jsonl")
    }

    pub fn judgments_path(&self) -> PathBuf {
        self.artifact_dir.join("re").join("judgments.jsonl")
    }

    /// Run every phase and write the consolidated relations to `output`
    pub async fn run(&self, documents: &[Document], output: &Path) -> Result<RunSummary> {
        let sentences = self.segment(documents);

        let entities = self.run_ner(&sentences).await?;
        let phase = self.relation_phase(&entities).await?;
        let relations = self.consolidate(&phase.judgments, output)?;

        let summary = RunSummary {
            documents: documents.len(),
            sentences: sentences.len(),
            mentions: entities
                .iter()
                .map(|s| s.entities.iter().map(|e| e.mentions.len()).sum::<usize>())
                .sum(),
            unresolved: entities.iter().map(|s| s.unresolved.len()).sum(),
            ner_failures: entities.iter().filter(|s| s.failure.is_some()).count(),
            pairs: phase.pairs,
            judgments: phase.judgments.len(),
            re_failures: phase.failures,
            relations: relations.len(),
        };

        tracing::info!(
            documents = summary.documents,
            sentences = summary.sentences,
            mentions = summary.mentions,
            unresolved = summary.unresolved,
            pairs = summary.pairs,
            judgments = summary.judgments,
            relations = summary.relations,
            output = %output.display(),
            "Pipeline run complete"
        );

        Ok(summary)
    }

    /// Split documents into sentences
    ///
    /// A document whose `doc_id` was already seen is skipped so that
    /// sentence references stay unique.
    pub fn segment(&self, documents: &[Document]) -> Vec<Sentence> {
        let mut seen = HashSet::with_capacity(documents.len());
        let sentences: Vec<Sentence> = documents
            .iter()
            .filter(|doc| {
                let first = seen.insert(doc.doc_id.as_str());
                if !first {
                    tracing::warn!(doc_id = %doc.doc_id, "Skipping document with duplicate doc_id");
                }
                first
            })
            .flat_map(|doc| self.segmenter.segment(doc))
            .collect();
        tracing::info!(
            documents = documents.len(),
            sentences = sentences.len(),
            "Segmented documents"
        );
        sentences
    }

    /// NER phase: one request per sentence, then normalization
    pub async fn run_ner(&self, sentences: &[Sentence]) -> Result<Vec<SentenceEntities>> {
        let batch = sentences.iter().map(|s| self.ner.build_prompt(s)).collect();
        let artifacts = BatchArtifacts::for_phase(&self.artifact_dir, "ner");
        let results = self.orchestrator.submit(batch, &artifacts).await?;
        self.check_provider(&results, "NER")?;

        let entities: Vec<SentenceEntities> = sentences
            .iter()
            .zip(&results)
            .map(|(sentence, result)| self.sentence_entities(sentence, result))
            .collect();

        let path = self.entities_path();
        write_jsonl(&path, &entities)?;
        tracing::info!(
            sentences = entities.len(),
            entities = entities.iter().map(|s| s.entities.len()).sum::<usize>(),
            path = %path.display(),
            "NER phase complete"
        );

        Ok(entities)
    }

    fn sentence_entities(&self, sentence: &Sentence, result: &BatchResult) -> SentenceEntities {
        let payload = match &result.outcome {
            Outcome::Success { payload } => payload,
            Outcome::Failure { kind, .. } => return SentenceEntities::failed(sentence.clone(), *kind),
        };

        match self.ner.parse_mentions(sentence, payload) {
            Ok(mentions) => self.normalizer.normalize_sentence(sentence.clone(), mentions),
            Err(e) => {
                tracing::warn!(
                    correlation_id = %result.correlation_id,
                    error = %e,
                    "Discarding NER response"
                );
                SentenceEntities::failed(sentence.clone(), e.kind())
            }
        }
    }

    /// RE phase: one request per candidate pair; every pair is audited
    pub async fn run_re(
        &self,
        sentence_entities: &[SentenceEntities],
    ) -> Result<Vec<RelationJudgment>> {
        Ok(self.relation_phase(sentence_entities).await?.judgments)
    }

    async fn relation_phase(&self, sentence_entities: &[SentenceEntities]) -> Result<RelationPhase> {
        let candidates: Vec<(CandidatePair, &str)> = sentence_entities
            .iter()
            .filter(|s| s.failure.is_none())
            .flat_map(|s| {
                self.pairs
                    .generate(s)
                    .into_iter()
                    .map(move |pair| (pair, s.sentence.text.as_str()))
            })
            .collect();
        tracing::info!(pairs = candidates.len(), "Generated candidate pairs");

        let batch = candidates
            .iter()
            .map(|(pair, sentence)| self.relations.build_prompt(pair, sentence))
            .collect();
        let artifacts = BatchArtifacts::for_phase(&self.artifact_dir, "re");
        let results = self.orchestrator.submit(batch, &artifacts).await?;
        self.check_provider(&results, "RE")?;

        let logger = RelationLogger::open(&self.relation_log)?;
        let mut judgments = Vec::new();
        let mut failures = 0;

        for ((pair, sentence), result) in candidates.iter().zip(&results) {
            let outcome = match &result.outcome {
                Outcome::Failure { kind, message } => {
                    failures += 1;
                    AuditOutcome::failed(*kind, message.clone())
                }
                Outcome::Success { payload } => {
                    match self.relations.parse_judgment(pair, sentence, payload) {
                        Ok(judgment) => {
                            let outcome = AuditOutcome::judged(&judgment);
                            judgments.push(judgment);
                            outcome
                        }
                        Err(e) => {
                            failures += 1;
                            tracing::warn!(pair_id = %pair.pair_id, error = %e, "Rejected judgment");
                            AuditOutcome::rejected(&e)
                        }
                    }
                }
            };
            logger.record(&pair.sentence_ref, pair, outcome)?;
        }

        let path = self.judgments_path();
        write_jsonl(&path, &judgments)?;
        tracing::info!(
            pairs = candidates.len(),
            judgments = judgments.len(),
            failures,
            run_id = %logger.run_id(),
            path = %path.display(),
            "RE phase complete"
        );

        Ok(RelationPhase {
            pairs: candidates.len(),
            judgments,
            failures,
        })
    }

    /// Consolidate judgments and write the relations to `output`
    pub fn consolidate(
        &self,
        judgments: &[RelationJudgment],
        output: &Path,
    ) -> Result<Vec<ConsolidatedRelation>> {
        let relations = self.consolidator.consolidate(judgments);
        write_jsonl(output, &relations)?;
        tracing::info!(
            judgments = judgments.len(),
            relations = relations.len(),
            threshold = self.consolidator.threshold,
            output = %output.display(),
            "Consolidation complete"
        );
        Ok(relations)
    }

    fn check_provider(&self, results: &[BatchResult], phase: &str) -> Result<()> {
        if self.settings.abort_on_total_failure && total_provider_failure(results) {
            return Err(OrxError::ProviderUnavailable(format!(
                "all {} {phase} requests failed at the provider",
                results.len()
            )));
        }
        Ok(())
    }
}
