//! Embedding providers for graph nodes and queries

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use async_openai::{
    config::OpenAIConfig,
    types::{CreateEmbeddingRequestArgs, EmbeddingInput},
    Client as OpenAIClient,
};
use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::DEFAULT_REQUEST_TIMEOUT_SECS;
use crate::metrics;
use crate::{Error, Result};

/// Longest text (in characters) sent for embedding.
const MAX_EMBED_CHARS: usize = 8000;

/// Turns text into fixed-dimension vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Length of every produced vector
    fn dimension(&self) -> usize;

    /// Embed several texts; output order follows input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Service("No embedding returned".to_string()))
    }
}

/// Service for generating text embeddings with OpenAI
pub struct EmbeddingService {
    client: OpenAIClient<OpenAIConfig>,
    config: OpenAIConfig,
    http: reqwest::Client,
    model: String,
    dimension: usize,
}

impl EmbeddingService {
    /// Create a new embedding service with the default request timeout
    pub fn new(api_key: &str, model: impl Into<String>) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(Error::Configuration("OPENAI_API_KEY is empty".to_string()));
        }
        let config = OpenAIConfig::new().with_api_key(api_key);
        let http = http_client(Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS))?;
        let model = model.into();

        Ok(Self {
            client: openai_client(&config, &http),
            config,
            http,
            dimension: model_dimension(&model),
            model,
        })
    }

    /// Send requests to a compatible endpoint instead of api.openai.com
    pub fn with_api_base(mut self, api_base: &str, api_key: &str) -> Self {
        self.config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(api_base);
        self.client = openai_client(&self.config, &self.http);
        self
    }

    /// Bound every embedding request by `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.http = http_client(timeout)?;
        self.client = openai_client(&self.config, &self.http);
        Ok(self)
    }

    /// Request shortened vectors (text-embedding-3 models) or declare the
    /// dimension of a model not known to [`model_dimension`]
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

/// Embedding dimension of well-known OpenAI models
pub fn model_dimension(model: &str) -> usize {
    match model {
        "text-embedding-3-small" => 1536,
        "text-embedding-3-large" => 3072,
        "text-embedding-ada-002" => 1536,
        _ => 1536, // default
    }
}

fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

fn openai_client(config: &OpenAIConfig, http: &reqwest::Client) -> OpenAIClient<OpenAIConfig> {
    OpenAIClient::with_config(config.clone()).with_http_client(http.clone())
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[async_trait]
impl Embedder for EmbeddingService {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Generating embeddings for {} texts", texts.len());

        // Filter out empty texts and truncate long ones
        let processed: Vec<String> = texts
            .iter()
            .map(|t| truncate_chars(t.trim(), MAX_EMBED_CHARS).to_string())
            .filter(|t| !t.is_empty())
            .collect();

        if processed.is_empty() {
            return Ok(vec![Vec::new(); texts.len()]);
        }

        let mut args = CreateEmbeddingRequestArgs::default();
        args.model(&self.model)
            .input(EmbeddingInput::StringArray(processed));
        if self.dimension != model_dimension(&self.model) {
            args.dimensions(self.dimension as u32);
        }
        let request = args.build()?;

        let response = self.client.embeddings().create(request).await;
        metrics::record_oracle_call("embed", response.is_ok());
        let response = response?;

        info!(
            "Generated {} embeddings, tokens used: {}",
            response.data.len(),
            response.usage.total_tokens
        );

        // Map back to original indices (empty texts get empty vectors)
        let mut result = Vec::with_capacity(texts.len());
        let mut embed_iter = response.data.into_iter();

        for text in texts {
            if text.trim().is_empty() {
                result.push(Vec::new());
            } else if let Some(embed) = embed_iter.next() {
                result.push(embed.embedding);
            } else {
                return Err(Error::Service(
                    "OpenAI returned fewer embeddings than requested".to_string(),
                ));
            }
        }

        Ok(result)
    }
}

/// Deterministic hashed bag-of-words embedding for offline use.
#[derive(Debug, Clone)]
pub struct LocalEmbedder {
    dim: usize,
}

impl LocalEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(8) }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vec = vec![0.0f32; self.dim];
        for token in text.split_whitespace() {
            let token = token
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase();
            if token.is_empty() {
                continue;
            }
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let idx = (hasher.finish() as usize) % self.dim;
            vec[idx] += 1.0;
        }

        normalize(&mut vec);
        vec
    }
}

#[async_trait]
impl Embedder for LocalEmbedder {
    fn dimension(&self) -> usize {
        self.dim
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

fn normalize(vec: &mut [f32]) {
    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vec.iter_mut() {
            *v /= norm;
        }
    }
}
