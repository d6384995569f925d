//! Configuration for the graph reader pipeline
//!
//! Loads configuration from config.yml; credentials may come from the
//! environment or a `.env` file.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::analysis::{IndexSpec, IndexerConfig, Metric};
use crate::graph::EdgeMatching;
use crate::integrations::ModelSettings;
use crate::{Error, Result};

pub const CONFIG_FILE: &str = "config.yml";
pub const DEFAULT_CHUNK_LEN: usize = 1000;
pub const DEFAULT_MAX_AGENT_STEPS: usize = 25;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Chat and embedding model settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct OpenAISection {
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub embedding_model: String,
    pub base_url: Option<String>,
}

impl Default for OpenAISection {
    fn default() -> Self {
        let model = ModelSettings::default();
        Self {
            api_key: None,
            model: model.model,
            temperature: model.temperature,
            max_tokens: model.max_tokens,
            embedding_model: "text-embedding-3-small".to_string(),
            base_url: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct QdrantSection {
    pub url: Option<String>,
    pub api_key: Option<String>,
}

/// Where node vectors live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    /// JSON snapshot on disk
    #[default]
    Local,
    Qdrant,
}

/// Which embedder turns node text into vectors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedderKind {
    #[default]
    OpenAI,
    /// Hashed bag-of-words, no network
    Local,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct IndexSection {
    pub backend: IndexBackend,
    pub embedder: EmbedderKind,
    pub name: String,
    pub dimension: usize,
    pub metric: Metric,
    pub region: String,
    pub batch_size: usize,
    pub top_k: usize,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
}

impl Default for IndexSection {
    fn default() -> Self {
        let defaults = IndexerConfig::default();
        Self {
            backend: IndexBackend::default(),
            embedder: EmbedderKind::default(),
            name: defaults.index.name,
            dimension: defaults.index.dimension,
            metric: defaults.index.metric,
            region: defaults.index.region,
            batch_size: defaults.batch_size,
            top_k: defaults.top_k,
            max_retries: defaults.max_retries,
            backoff_base_ms: defaults.backoff_base_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DocumentSection {
    pub chunk_len: usize,
}

impl Default for DocumentSection {
    fn default() -> Self {
        Self {
            chunk_len: DEFAULT_CHUNK_LEN,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct GraphSection {
    pub edge_matching: EdgeMatching,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReaderSection {
    pub max_agent_steps: usize,
    pub notes_path: PathBuf,
}

impl Default for ReaderSection {
    fn default() -> Self {
        Self {
            max_agent_steps: DEFAULT_MAX_AGENT_STEPS,
            notes_path: PathBuf::from("notes.txt"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ExtractionSection {
    pub concurrency: usize,
}

impl Default for ExtractionSection {
    fn default() -> Self {
        Self { concurrency: 1 }
    }
}

/// Artifact locations shared by the CLI commands.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub chunks: PathBuf,
    pub graph: PathBuf,
    pub local_index: PathBuf,
    pub prompts: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            chunks: PathBuf::from("data/chunks.json"),
            graph: PathBuf::from("data/graph.gml"),
            local_index: PathBuf::from("data/index.json"),
            prompts: crate::prompts::prompts_dir(),
        }
    }
}

/// Main configuration struct
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub openai: OpenAISection,
    pub qdrant: QdrantSection,
    pub index: IndexSection,
    pub document: DocumentSection,
    pub graph: GraphSection,
    pub reader: ReaderSection,
    pub extraction: ExtractionSection,
    pub paths: PathsConfig,
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            openai: OpenAISection::default(),
            qdrant: QdrantSection::default(),
            index: IndexSection::default(),
            document: DocumentSection::default(),
            graph: GraphSection::default(),
            reader: ReaderSection::default(),
            extraction: ExtractionSection::default(),
            paths: PathsConfig::default(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl Config {
    /// Load config.yml from the current or parent directory, falling back to
    /// defaults. Environment variables take precedence over file values.
    pub fn load() -> Result<Self> {
        Self::load_dotenv();
        let candidates = [PathBuf::from(CONFIG_FILE), Path::new("..").join(CONFIG_FILE)];
        let mut config = match candidates.iter().find(|p| p.exists()) {
            Some(path) => Self::parse_file(path)?,
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Load configuration from a specific file; the file must exist.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::load_dotenv();
        let mut config = Self::parse_file(path.as_ref())?;
        config.apply_env();
        Ok(config)
    }

    /// Parse YAML text without consulting the environment.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn parse_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_yaml_str(&content)
    }

    /// Load .env file into environment variables using dotenvy
    fn load_dotenv() {
        if dotenvy::dotenv().is_err() {
            let _ = dotenvy::from_filename("../.env");
        }
    }

    fn validate(&self) -> Result<()> {
        if self.document.chunk_len == 0 {
            return Err(Error::Configuration(
                "document.chunk_len must be positive".to_string(),
            ));
        }
        if self.index.dimension == 0 {
            return Err(Error::Configuration(
                "index.dimension must be positive".to_string(),
            ));
        }
        if self.reader.max_agent_steps == 0 {
            return Err(Error::Configuration(
                "reader.max_agent_steps must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve `${VAR}` placeholders and apply well-known env overrides.
    fn apply_env(&mut self) {
        self.openai.api_key = resolve_env(self.openai.api_key.take(), "OPENAI_API_KEY");
        self.openai.base_url = resolve_env(self.openai.base_url.take(), "OPENAI_BASE_URL");
        self.qdrant.url = resolve_env(self.qdrant.url.take(), "QDRANT_URL");
        self.qdrant.api_key = resolve_env(self.qdrant.api_key.take(), "QDRANT_API_KEY");
    }

    /// OpenAI key, or a configuration error when absent.
    pub fn require_openai_key(&self) -> Result<&str> {
        self.openai
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                Error::Configuration(
                    "OpenAI API key is missing: set OPENAI_API_KEY or openai.api_key".to_string(),
                )
            })
    }

    /// Qdrant URL and optional API key, or a configuration error when the URL is absent.
    pub fn require_qdrant(&self) -> Result<(&str, Option<&str>)> {
        let url = self
            .qdrant
            .url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| {
                Error::Configuration(
                    "Qdrant URL is missing: set QDRANT_URL or qdrant.url".to_string(),
                )
            })?;
        let api_key = self.qdrant.api_key.as_deref().filter(|k| !k.is_empty());
        Ok((url, api_key))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn model_settings(&self) -> ModelSettings {
        ModelSettings {
            model: self.openai.model.clone(),
            temperature: self.openai.temperature,
            max_tokens: self.openai.max_tokens,
        }
    }

    pub fn indexer_config(&self) -> IndexerConfig {
        IndexerConfig {
            index: IndexSpec {
                name: self.index.name.clone(),
                dimension: self.index.dimension,
                metric: self.index.metric,
                region: self.index.region.clone(),
            },
            batch_size: self.index.batch_size,
            top_k: self.index.top_k,
            max_retries: self.index.max_retries,
            backoff_base_ms: self.index.backoff_base_ms,
        }
    }
}

/// Resolve a value: a `${VAR}` placeholder reads VAR, and `env_key` wins
/// over anything in the file when it is set.
fn resolve_env(value: Option<String>, env_key: &str) -> Option<String> {
    if let Some(env_val) = std::env::var(env_key).ok().filter(|v| !v.is_empty()) {
        return Some(env_val);
    }
    match value {
        Some(v) if v.starts_with("${") && v.ends_with('}') => {
            let var_name = &v[2..v.len() - 1];
            std::env::var(var_name).ok().filter(|v| !v.is_empty())
        }
        other => other,
    }
}
