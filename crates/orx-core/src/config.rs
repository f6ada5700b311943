//! ORX Configuration Management
//!
//! Handles configuration from environment variables and TOML files
//! with sensible defaults for development.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// LLM provider configuration
    pub llm: LlmConfig,

    /// Request orchestration (concurrency, retries, timeouts)
    pub orchestrator: OrchestratorConfig,

    /// Extraction and consolidation settings
    pub pipeline: PipelineConfig,

    /// Schema store file locations
    pub schema: SchemaConfig,

    /// Artifact and audit log locations
    pub artifacts: ArtifactConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        // LLM
        if let Ok(provider) = std::env::var("LLM_PROVIDER") {
            config.llm.provider = provider.parse()?;
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            config.llm.openai_api_key = Some(key);
        }
        if let Ok(url) = std::env::var("OPENAI_BASE_URL") {
            config.llm.openai_base_url = Some(url);
        }
        if let Ok(url) = std::env::var("OLLAMA_URL") {
            config.llm.ollama_url = url;
        }
        if let Ok(model) = std::env::var("LLM_MODEL") {
            config.llm.model = model;
        }

        // Orchestrator
        if let Ok(value) = std::env::var("ORX_MAX_CONCURRENCY") {
            config.orchestrator.max_concurrency =
                value.parse().map_err(|_| ConfigError::InvalidValue {
                    key: "ORX_MAX_CONCURRENCY".to_string(),
                    value,
                })?;
        }

        // Pipeline
        if let Ok(value) = std::env::var("ORX_THRESHOLD") {
            config.pipeline.threshold = value.parse().map_err(|_| ConfigError::InvalidValue {
                key: "ORX_THRESHOLD".to_string(),
                value,
            })?;
        }

        // Logging
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.logging.level = level;
        }

        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        let env_config = Self::from_env()?;
        let defaults = Self::default();

        // Only override if env values differ from defaults
        if env_config.llm.provider != defaults.llm.provider {
            self.llm.provider = env_config.llm.provider;
        }
        if env_config.llm.model != defaults.llm.model {
            self.llm.model = env_config.llm.model;
        }
        if env_config.llm.ollama_url != defaults.llm.ollama_url {
            self.llm.ollama_url = env_config.llm.ollama_url;
        }
        if env_config.orchestrator.max_concurrency != defaults.orchestrator.max_concurrency {
            self.orchestrator.max_concurrency = env_config.orchestrator.max_concurrency;
        }
        if env_config.pipeline.threshold != defaults.pipeline.threshold {
            self.pipeline.threshold = env_config.pipeline.threshold;
        }
        if env_config.logging.level != defaults.logging.level {
            self.logging.level = env_config.logging.level;
        }

        // Always use env for sensitive values
        if env_config.llm.openai_api_key.is_some() {
            self.llm.openai_api_key = env_config.llm.openai_api_key;
        }
        if env_config.llm.openai_base_url.is_some() {
            self.llm.openai_base_url = env_config.llm.openai_base_url;
        }

        Ok(self)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let threshold = self.pipeline.threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::InvalidValue {
                key: "pipeline.threshold".to_string(),
                value: threshold.to_string(),
            });
        }
        if self.orchestrator.max_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                key: "orchestrator.max_concurrency".to_string(),
                value: "0".to_string(),
            });
        }
        if self.orchestrator.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "orchestrator.max_attempts".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// LLM provider to use
    pub provider: LlmProvider,

    /// OpenAI API key
    pub openai_api_key: Option<String>,

    /// OpenAI API base URL (for Azure or compatible APIs)
    pub openai_base_url: Option<String>,

    /// Ollama server URL
    pub ollama_url: String,

    /// Model name to use
    pub model: String,

    /// Model version recorded in judgment metadata
    pub model_version: String,

    /// Prompt version recorded in judgment metadata
    pub prompt_version: String,

    /// Maximum tokens for completion
    pub max_tokens: u32,

    /// Temperature for generation
    pub temperature: f32,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::OpenAI,
            openai_api_key: None,
            openai_base_url: None,
            ollama_url: "http://localhost:11434".to_string(),
            model: "gpt-4o-mini".to_string(),
            model_version: "v1".to_string(),
            prompt_version: "v1".to_string(),
            max_tokens: 1024,
            temperature: 0.0,
            timeout_secs: 60,
        }
    }
}

/// Supported LLM providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    OpenAI,
    Ollama,
    Azure,
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "ollama" => Ok(Self::Ollama),
            "azure" => Ok(Self::Azure),
            _ => Err(ConfigError::InvalidValue {
                key: "LLM_PROVIDER".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Request orchestration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Maximum number of outstanding requests
    pub max_concurrency: usize,

    /// Attempts per request, including the first one
    pub max_attempts: u32,

    /// Backoff before the first retry (milliseconds)
    pub initial_backoff_ms: u64,

    /// Upper bound for the backoff (milliseconds)
    pub max_backoff_ms: u64,

    /// Deadline for a whole batch; outstanding requests become timeouts
    pub batch_timeout_secs: Option<u64>,

    /// Log progress every N completed requests
    pub progress_every: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
            batch_timeout_secs: None,
            progress_every: 50,
        }
    }
}

/// How duplicate judgments of one triple combine their confidences
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationMode {
    #[default]
    Max,
    Mean,
}

impl std::str::FromStr for AggregationMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "max" => Ok(Self::Max),
            "mean" => Ok(Self::Mean),
            _ => Err(ConfigError::InvalidValue {
                key: "aggregation".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Extraction and consolidation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Minimum judgment confidence kept by consolidation
    pub threshold: f64,

    /// Confidence aggregation for duplicate triples
    pub aggregation: AggregationMode,

    /// Maximum span distance (characters) between pair members
    pub max_pair_distance: Option<usize>,

    /// Abort the run when every request of a batch fails at the provider
    pub abort_on_total_failure: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            threshold: 0.55,
            aggregation: AggregationMode::Max,
            max_pair_distance: None,
            abort_on_total_failure: true,
        }
    }
}

/// Schema store file locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    /// Ontology model (classes and predicate slots)
    pub model_path: PathBuf,

    /// Annotation guideline (predicate descriptions)
    pub guideline_path: PathBuf,

    /// ID normalization policy
    pub idpolicy_path: PathBuf,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("schema/model.yaml"),
            guideline_path: PathBuf::from("schema/annotation_guideline.yaml"),
            idpolicy_path: PathBuf::from("schema/idpolicy.yaml"),
        }
    }
}

/// Artifact locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    /// Directory for per-phase requests/results snapshots
    pub dir: PathBuf,

    /// Relation evaluation audit log
    pub relation_log: PathBuf,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("tmp"),
            relation_log: PathBuf::from("data/relation_log.jsonl"),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,

    /// Include file/line in logs
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            include_location: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}
