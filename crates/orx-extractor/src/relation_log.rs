//! Append-only audit log of evaluated pairs
//!
//! One JSONL record per pair sent to the relation stage, whatever the
//! outcome. Records are also emitted as `tracing` events under the
//! `relation_audit` target. The pipeline never reads this file back.

use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use orx_core::jsonl::ensure_parent;
use orx_core::{FailureKind, OrxError, Result, SentenceRef};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{CandidatePair, EntityRef, JudgmentError, RelationJudgment};

// ============================================================================
// Records
// ============================================================================

/// What happened to one evaluated pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AuditOutcome {
    Judged {
        predicate: Option<String>,
        confidence: f64,
    },
    MalformedResponse {
        message: String,
    },
    SchemaViolation {
        predicate: String,
    },
    Timeout {
        message: String,
    },
    ProviderError {
        message: String,
    },
}

impl AuditOutcome {
    pub fn judged(judgment: &RelationJudgment) -> Self {
        Self::Judged {
            predicate: judgment.predicate.clone(),
            confidence: judgment.confidence,
        }
    }

    /// Outcome of a request that never produced a payload
    pub fn failed(kind: FailureKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            FailureKind::Timeout => Self::Timeout { message },
            FailureKind::MalformedResponse => Self::MalformedResponse { message },
            FailureKind::ProviderError => Self::ProviderError { message },
        }
    }

    pub fn rejected(error: &JudgmentError) -> Self {
        match error {
            JudgmentError::Malformed(message) => Self::MalformedResponse {
                message: message.clone(),
            },
            JudgmentError::SchemaViolation { predicate, .. } => Self::SchemaViolation {
                predicate: predicate.clone(),
            },
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Judged { .. } => "judged",
            Self::MalformedResponse { .. } => "malformed_response",
            Self::SchemaViolation { .. } => "schema_violation",
            Self::Timeout { .. } => "timeout",
            Self::ProviderError { .. } => "provider_error",
        }
    }
}

/// The pair as recorded in the audit log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairSummary {
    pub pair_id: String,
    pub subject: EntityRef,
    pub object: EntityRef,
    pub eligible_predicates: BTreeSet<String>,
}

impl From<&CandidatePair> for PairSummary {
    fn from(pair: &CandidatePair) -> Self {
        Self {
            pair_id: pair.pair_id.clone(),
            subject: pair.subject.entity_ref(),
            object: pair.object.entity_ref(),
            eligible_predicates: pair.eligible_predicates.clone(),
        }
    }
}

/// One line of the relation log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogRecord {
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub sentence_ref: SentenceRef,
    pub candidate_pair: PairSummary,
    pub outcome: AuditOutcome,
}

// ============================================================================
// Logger
// ============================================================================

/// Thread-safe append-only JSONL writer
pub struct RelationLogger {
    path: PathBuf,
    run_id: Uuid,
    writer: Mutex<BufWriter<File>>,
}

impl RelationLogger {
    /// Open `path` for appending under a fresh run id
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        ensure_parent(&path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| io_error(&path, e))?;

        Ok(Self {
            path,
            run_id: Uuid::new_v4(),
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record
    pub fn record(
        &self,
        sentence_ref: &SentenceRef,
        pair: &CandidatePair,
        outcome: AuditOutcome,
    ) -> Result<()> {
        let record = AuditLogRecord {
            run_id: self.run_id,
            timestamp: Utc::now(),
            sentence_ref: sentence_ref.clone(),
            candidate_pair: PairSummary::from(pair),
            outcome,
        };

        let line =
            serde_json::to_string(&record).map_err(|e| OrxError::Serialization(e.to_string()))?;

        {
            let mut writer = self
                .writer
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            writeln!(writer, "{line}").map_err(|e| io_error(&self.path, e))?;
            writer.flush().map_err(|e| io_error(&self.path, e))?;
        }

        tracing::info!(
            target: "relation_audit",
            run_id = %record.run_id,
            sentence = %record.sentence_ref,
            pair_id = %record.candidate_pair.pair_id,
            subject = %record.candidate_pair.subject.canonical_id,
            object = %record.candidate_pair.object.canonical_id,
            outcome = record.outcome.as_str(),
            "Pair evaluated"
        );

        Ok(())
    }
}

fn io_error(path: &Path, source: std::io::Error) -> OrxError {
    OrxError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EntityMention, NormalizedEntity};
    use orx_core::jsonl::read_jsonl;

    fn entity(id: &str, entity_type: &str, surface: &str) -> NormalizedEntity {
        NormalizedEntity {
            canonical_id: id.to_string(),
            entity_type: entity_type.to_string(),
            surface_text: surface.to_string(),
            mentions: vec![EntityMention {
                sentence_ref: SentenceRef::new("9", 1),
                surface_text: surface.to_string(),
                entity_type: entity_type.to_string(),
                span: None,
                ids: Default::default(),
            }],
        }
    }

    fn pair() -> CandidatePair {
        CandidatePair {
            pair_id: "re:9:00001:0000".to_string(),
            sentence_ref: SentenceRef::new("9", 1),
            subject: entity("HGNC:40", "Gene", "ABCB1"),
            object: entity("CHEBI:142427", "Drug", "talazoparib"),
            eligible_predicates: BTreeSet::from(["increases_resistance_to".to_string()]),
        }
    }

    #[test]
    fn test_records_append_across_runs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/relation_log.jsonl");
        let pair = pair();

        let first = RelationLogger::open(&path).unwrap();
        first
            .record(
                &pair.sentence_ref,
                &pair,
                AuditOutcome::Judged {
                    predicate: Some("increases_resistance_to".to_string()),
                    confidence: 0.92,
                },
            )
            .unwrap();
        first
            .record(
                &pair.sentence_ref,
                &pair,
                AuditOutcome::failed(FailureKind::Timeout, "deadline"),
            )
            .unwrap();
        drop(first);

        let second = RelationLogger::open(&path).unwrap();
        second
            .record(
                &pair.sentence_ref,
                &pair,
                AuditOutcome::rejected(&JudgmentError::SchemaViolation {
                    predicate: "treats".to_string(),
                    eligible: vec!["increases_resistance_to".to_string()],
                }),
            )
            .unwrap();

        let records: Vec<AuditLogRecord> = read_jsonl(&path).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].outcome.as_str(), "judged");
        assert_eq!(records[1].outcome.as_str(), "timeout");
        assert_eq!(records[2].outcome.as_str(), "schema_violation");
        assert_eq!(records[0].run_id, records[1].run_id);
        assert_ne!(records[1].run_id, records[2].run_id);
        assert_eq!(records[2].candidate_pair.subject.canonical_id, "HGNC:40");
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_value(AuditOutcome::failed(
            FailureKind::MalformedResponse,
            "not json",
        ))
        .unwrap();
        assert_eq!(json["status"], "malformed_response");
        assert_eq!(json["message"], "not json");
    }
}
