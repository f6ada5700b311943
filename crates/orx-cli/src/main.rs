//! ORX CLI - Command-line interface
//!
//! Usage:
//!   orx run --input docs.jsonl --output relations.jsonl
//!   orx ner --input docs.jsonl
//!   orx re [--entities tmp/ner/entities.jsonl]
//!   orx consolidate --judgments tmp/re/judgments.jsonl --output relations.jsonl
//!   orx export --relations relations.jsonl --cypher relations.cypher
//!   orx schema check

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use orx_core::jsonl::{read_jsonl, write_jsonl};
use orx_core::{
    AggregationMode, AppConfig, ConsolidatedRelation, Document, LoggingConfig, SchemaStore,
};
use orx_extractor::{write_cypher, Consolidator, Pipeline, RelationJudgment, SentenceEntities};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "orx")]
#[command(about = "Oncology drug-resistance relation extraction")]
#[command(version)]
struct Cli {
    /// TOML configuration file (environment variables still apply)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every phase from documents to consolidated relations
    Run {
        /// Input documents (JSONL with doc_id/text or pmid/abstract)
        #[arg(long)]
        input: PathBuf,
        /// Output relations (JSONL)
        #[arg(long)]
        output: PathBuf,
        /// Relation audit log (overrides config)
        #[arg(long)]
        log: Option<PathBuf>,
        /// Minimum judgment confidence
        #[arg(long)]
        threshold: Option<f64>,
        /// Confidence aggregation for duplicate triples (max, mean)
        #[arg(long)]
        aggregation: Option<AggregationMode>,
    },
    /// Run the entity phase only
    Ner {
        #[arg(long)]
        input: PathBuf,
    },
    /// Run the relation phase from a persisted entities artifact
    Re {
        /// Defaults to {artifact_dir}/ner/entities.jsonl
        #[arg(long)]
        entities: Option<PathBuf>,
        #[arg(long)]
        log: Option<PathBuf>,
    },
    /// Consolidate persisted judgments without calling the provider
    Consolidate {
        /// Defaults to {artifact_dir}/re/judgments.jsonl
        #[arg(long)]
        judgments: Option<PathBuf>,
        #[arg(long)]
        output: PathBuf,
        #[arg(long)]
        threshold: Option<f64>,
        #[arg(long)]
        aggregation: Option<AggregationMode>,
    },
    /// Render consolidated relations as a Cypher import script
    Export {
        /// Consolidated relations (JSONL)
        #[arg(long)]
        relations: PathBuf,
        /// Output script of `MERGE` statements
        #[arg(long)]
        cypher: PathBuf,
    },
    /// Schema store commands
    Schema {
        #[command(subcommand)]
        action: SchemaAction,
    },
}

#[derive(Subcommand)]
enum SchemaAction {
    /// Load and validate the ontology, guideline and ID policy
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref())?;
    let level_from_cli = cli.log_level.is_some();
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    init_tracing(&config.logging, level_from_cli);

    match cli.command {
        Commands::Run {
            input,
            output,
            log,
            threshold,
            aggregation,
        } => {
            apply_overrides(&mut config, log, threshold, aggregation);
            let pipeline = Pipeline::from_config(&config)?;
            let documents = read_documents(&input)?;
            let summary = pipeline.run(&documents, &output).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Ner { input } => {
            let pipeline = Pipeline::from_config(&config)?;
            let documents = read_documents(&input)?;
            let sentences = pipeline.segment(&documents);
            let entities = pipeline.run_ner(&sentences).await?;
            println!(
                "{} sentences -> {}",
                entities.len(),
                pipeline.entities_path().display()
            );
        }
        Commands::Re { entities, log } => {
            apply_overrides(&mut config, log, None, None);
            let pipeline = Pipeline::from_config(&config)?;
            let path = entities.unwrap_or_else(|| pipeline.entities_path());
            let sentence_entities: Vec<SentenceEntities> = read_jsonl(&path)
                .with_context(|| format!("reading entities from {}", path.display()))?;
            let judgments = pipeline.run_re(&sentence_entities).await?;
            println!(
                "{} judgments -> {}",
                judgments.len(),
                pipeline.judgments_path().display()
            );
        }
        Commands::Consolidate {
            judgments,
            output,
            threshold,
            aggregation,
        } => {
            apply_overrides(&mut config, None, threshold, aggregation);
            config.validate()?;
            let path =
                judgments.unwrap_or_else(|| config.artifacts.dir.join("re").join("judgments.jsonl"));
            let judgments: Vec<RelationJudgment> = read_jsonl(&path)
                .with_context(|| format!("reading judgments from {}", path.display()))?;
            let relations = Consolidator::from_config(&config.pipeline).consolidate(&judgments);
            write_jsonl(&output, &relations)?;
            println!("{} relations -> {}", relations.len(), output.display());
        }
        Commands::Export {
            relations: path,
            cypher,
        } => {
            let relations: Vec<ConsolidatedRelation> = read_jsonl(&path)
                .with_context(|| format!("reading relations from {}", path.display()))?;
            let written = write_cypher(&cypher, &relations, chrono::Utc::now())?;
            println!("{} relations -> {}", written, cypher.display());
        }
        Commands::Schema {
            action: SchemaAction::Check,
        } => {
            let store = SchemaStore::load(&config.schema)?;
            println!(
                "ok: {} classes, {} predicates",
                store.ontology.classes().count(),
                store.ontology.predicates().count()
            );
            for predicate in store.ontology.predicates() {
                println!(
                    "  {}: [{}] -> [{}]",
                    predicate.name,
                    predicate.domain.join(", "),
                    predicate.range.join(", ")
                );
            }
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::from_file(path)?.with_env_override()?,
        None => AppConfig::from_env()?,
    };
    Ok(config)
}

fn apply_overrides(
    config: &mut AppConfig,
    log: Option<PathBuf>,
    threshold: Option<f64>,
    aggregation: Option<AggregationMode>,
) {
    if let Some(log) = log {
        config.artifacts.relation_log = log;
    }
    if let Some(threshold) = threshold {
        config.pipeline.threshold = threshold;
    }
    if let Some(aggregation) = aggregation {
        config.pipeline.aggregation = aggregation;
    }
}

fn read_documents(path: &Path) -> anyhow::Result<Vec<Document>> {
    let documents: Vec<Document> = read_jsonl(path)
        .with_context(|| format!("reading documents from {}", path.display()))?;
    tracing::info!(documents = documents.len(), path = %path.display(), "Loaded documents");
    Ok(documents)
}

/// `--log-level` beats `RUST_LOG`, which beats the configured level
fn env_filter(config: &LoggingConfig, level_from_cli: bool) -> EnvFilter {
    if level_from_cli {
        return EnvFilter::new(&config.level);
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}

fn init_tracing(config: &LoggingConfig, level_from_cli: bool) {
    let filter = env_filter(config, level_from_cli);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_file(config.include_location)
        .with_line_number(config.include_location);

    if config.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}
