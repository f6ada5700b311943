//! Knowledge-graph export
//!
//! Renders consolidated relations as a cypher-shell script: one `:param`
//! map followed by one `MERGE` statement per relation. Nodes are merged by
//! class label and canonical id; the relationship type is the predicate
//! upper-cased. Values only ever reach the query as parameters.

use std::fmt::Write as _;
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use orx_core::jsonl::ensure_parent;
use orx_core::{ConsolidatedRelation, OrxError, Result};

/// Extractor tag stored on every relationship
pub const EXTRACTOR: &str = "LLM";

/// Render every relation, in input order
pub fn render_cypher(relations: &[ConsolidatedRelation], created_at: DateTime<Utc>) -> String {
    let created_at = created_at.to_rfc3339_opts(SecondsFormat::Secs, true);
    relations
        .iter()
        .map(|relation| render_relation(relation, &created_at))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render relations into `path`, replacing any previous content
pub fn write_cypher(
    path: &Path,
    relations: &[ConsolidatedRelation],
    created_at: DateTime<Utc>,
) -> Result<usize> {
    ensure_parent(path)?;
    std::fs::write(path, render_cypher(relations, created_at)).map_err(|source| OrxError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::info!(relations = relations.len(), path = %path.display(), "Wrote Cypher export");
    Ok(relations.len())
}

fn render_relation(relation: &ConsolidatedRelation, created_at: &str) -> String {
    let model = relation.model_metadata.first();
    let sentences: Vec<&str> = relation
        .evidence
        .iter()
        .map(|e| e.sentence.as_str())
        .collect();

    let params = [
        ("s_id", string(&relation.triple.subject_id)),
        ("s_name", string(&relation.subject_name)),
        ("o_id", string(&relation.triple.object_id)),
        ("o_name", string(&relation.object_name)),
        ("confidence", format!("{:?}", relation.confidence)),
        ("pmids", list(relation.supporting_pmids.iter().map(String::as_str))),
        ("sentences", list(sentences)),
        ("extractor", string(EXTRACTOR)),
        ("model_name", optional(model.map(|m| m.model_name.as_str()))),
        ("model_version", optional(model.map(|m| m.model_version.as_str()))),
        ("created_at", string(created_at)),
    ];

    let mut out = String::from(":param {");
    for (i, (key, value)) in params.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "{key}: {value}");
    }
    out.push_str("}\n");

    let subject = identifier(&relation.subject_type);
    let object = identifier(&relation.object_type);
    let rel_type = identifier(&relation.triple.predicate.to_uppercase());
    let _ = write!(
        out,
        "MERGE (s:{subject} {{id: $s_id}})
  ON CREATE SET s.name = $s_name
MERGE (o:{object} {{id: $o_id}})
  ON CREATE SET o.name = $o_name
MERGE (s)-[r:{rel_type}]->(o)
SET r.confidence = $confidence,
    r.pmids = $pmids,
    r.sentences = $sentences,
    r.extractor = $extractor,
    r.model_name = $model_name,
    r.model_version = $model_version,
    r.created_at = $created_at;
"
    );
    out
}

/// Backtick-quoted label or relationship type
fn identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Single-quoted string literal
fn string(value: &str) -> String {
    let mut literal = String::with_capacity(value.len() + 2);
    literal.push('\'');
    for c in value.chars() {
        match c {
            '\\' => literal.push_str("\\\\"),
            '\'' => literal.push_str("\\'"),
            '\n' => literal.push_str("\\n"),
            '\r' => literal.push_str("\\r"),
            '\t' => literal.push_str("\\t"),
            c => literal.push(c),
        }
    }
    literal.push('\'');
    literal
}

fn list<'a>(values: impl IntoIterator<Item = &'a str>) -> String {
    let items: Vec<String> = values.into_iter().map(string).collect();
    format!("[{}]", items.join(", "))
}

fn optional(value: Option<&str>) -> String {
    value.map_or_else(|| "null".to_string(), string)
}
