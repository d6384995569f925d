//! Command implementations
//!
//! Each module corresponds to a subcommand in the CLI. The helpers below wire
//! services from [`Config`]; every service is built explicitly per command.

pub mod ask;
pub mod build;
pub mod chunk;
pub mod index;
pub mod inspect;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::analysis::{
    Embedder, EmbeddingService, LocalEmbedder, LocalIndex, NodeIndexer, QdrantIndex,
    SimilarityIndex,
};
use crate::config::{Config, EmbedderKind, IndexBackend};
use crate::integrations::{OpenAIClient, OpenAIModel};
use crate::llm::LanguageModel;
use crate::prompts::PromptSet;

/// Chat model configured for OpenAI.
pub fn language_model(config: &Config) -> Result<Arc<dyn LanguageModel>> {
    let api_key = config.require_openai_key()?;
    let mut client = OpenAIClient::new(api_key, config.request_timeout())?;
    if let Some(base_url) = config.openai.base_url.as_deref() {
        client = client.with_base_url(base_url);
    }
    Ok(Arc::new(OpenAIModel::new(client, config.model_settings())))
}

/// Embedder producing vectors of the configured index dimension.
pub fn embedder(config: &Config) -> Result<Arc<dyn Embedder>> {
    match config.index.embedder {
        EmbedderKind::Local => Ok(Arc::new(LocalEmbedder::new(config.index.dimension))),
        EmbedderKind::OpenAI => {
            let api_key = config.require_openai_key()?;
            let mut service = EmbeddingService::new(api_key, &config.openai.embedding_model)?
                .with_dimension(config.index.dimension)
                .with_timeout(config.request_timeout())?;
            if let Some(base_url) = config.openai.base_url.as_deref() {
                service = service.with_api_base(base_url, api_key);
            }
            Ok(Arc::new(service))
        }
    }
}

pub fn similarity_index(config: &Config) -> Result<Arc<dyn SimilarityIndex>> {
    match config.index.backend {
        IndexBackend::Local => {
            let path = &config.paths.local_index;
            let index = LocalIndex::open(path)
                .with_context(|| format!("Failed to open local index {}", path.display()))?;
            Ok(Arc::new(index))
        }
        IndexBackend::Qdrant => {
            let (url, api_key) = config.require_qdrant()?;
            info!("Using Qdrant at {}", url);
            Ok(Arc::new(QdrantIndex::connect(url, api_key, config.request_timeout())?))
        }
    }
}

pub fn node_indexer(config: &Config) -> Result<NodeIndexer> {
    Ok(NodeIndexer::new(
        embedder(config)?,
        similarity_index(config)?,
        config.indexer_config(),
    )?)
}

pub fn prompts(config: &Config) -> Result<PromptSet> {
    PromptSet::load(&config.paths.prompts).with_context(|| {
        format!(
            "Failed to load prompts from {}",
            config.paths.prompts.display()
        )
    })
}
