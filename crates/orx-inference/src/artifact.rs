//! Requests/results snapshots written around every batch

use std::path::{Path, PathBuf};

use orx_core::jsonl::{read_jsonl, write_jsonl};
use orx_core::{PromptSpec, Result};

use crate::orchestrator::BatchResult;

/// Artifact paths for one batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchArtifacts {
    pub requests_path: PathBuf,
    pub results_path: PathBuf,
}

impl BatchArtifacts {
    pub fn new(requests_path: impl Into<PathBuf>, results_path: impl Into<PathBuf>) -> Self {
        Self {
            requests_path: requests_path.into(),
            results_path: results_path.into(),
        }
    }

    /// `{dir}/{phase}/requests.jsonl` and `{dir}/{phase}/results.jsonl`
    pub fn for_phase(dir: &Path, phase: &str) -> Self {
        let phase_dir = dir.join(phase);
        Self::new(
            phase_dir.join("requests.jsonl"),
            phase_dir.join("results.jsonl"),
        )
    }

    /// Persist the batch as submitted
    pub fn write_requests(&self, batch: &[PromptSpec]) -> Result<usize> {
        write_jsonl(&self.requests_path, batch)
    }

    /// Persist results sorted by correlation id
    pub fn write_results(&self, results: &[BatchResult]) -> Result<usize> {
        let mut sorted: Vec<&BatchResult> = results.iter().collect();
        sorted.sort_by(|a, b| a.correlation_id.cmp(&b.correlation_id));
        write_jsonl(&self.results_path, sorted)
    }

    pub fn read_requests(&self) -> Result<Vec<PromptSpec>> {
        read_jsonl(&self.requests_path)
    }

    pub fn read_results(&self) -> Result<Vec<BatchResult>> {
        read_jsonl(&self.results_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::Outcome;
    use orx_core::FailureKind;

    #[test]
    fn test_for_phase_layout() {
        let artifacts = BatchArtifacts::for_phase(Path::new("tmp"), "ner");
        assert_eq!(artifacts.requests_path, PathBuf::from("tmp/ner/requests.jsonl"));
        assert_eq!(artifacts.results_path, PathBuf::from("tmp/ner/results.jsonl"));
    }

    #[test]
    fn test_results_sorted_by_correlation_id() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = BatchArtifacts::for_phase(dir.path(), "re");

        let results = vec![
            BatchResult {
                correlation_id: "b".to_string(),
                attempts: 1,
                metadata: serde_json::Value::Null,
                outcome: Outcome::Success {
                    payload: serde_json::json!({"predicate": null, "confidence": 0.1}),
                },
            },
            BatchResult {
                correlation_id: "a".to_string(),
                attempts: 3,
                metadata: serde_json::json!({"doc_id": "1"}),
                outcome: Outcome::Failure {
                    kind: FailureKind::Timeout,
                    message: "slow".to_string(),
                },
            },
        ];
        artifacts.write_results(&results).unwrap();

        let read = artifacts.read_results().unwrap();
        let ids: Vec<&str> = read.iter().map(|r| r.correlation_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(read[0], results[1]);

        let raw = std::fs::read_to_string(&artifacts.results_path).unwrap();
        assert!(raw.lines().next().unwrap().contains("\"status\":\"failure\""));
    }
}
