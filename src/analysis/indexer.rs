//! Node indexing and shortlist search

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, info, warn};

use super::embeddings::Embedder;
use super::vector_db::{IndexEntry, IndexSpec, Metric, ScoredMatch, SimilarityIndex};
use crate::graph::KnowledgeGraph;
use crate::{Error, Result};

/// Metadata field holding the node key.
pub const NODE_FIELD: &str = "node";

/// Indexing and search parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexerConfig {
    pub index: IndexSpec,
    /// Entries per upsert request
    pub batch_size: usize,
    /// Shortlist size for [`NodeIndexer::search`]
    pub top_k: usize,
    /// Retries after the first failed attempt of an index call
    pub max_retries: u32,
    pub backoff_base_ms: u64,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            index: IndexSpec {
                name: "graph-reader".to_string(),
                dimension: 384,
                metric: Metric::Cosine,
                region: "us-east-1".to_string(),
            },
            batch_size: 1000,
            top_k: 20,
            max_retries: 3,
            backoff_base_ms: 1000,
        }
    }
}

/// Embeds graph nodes into a similarity index and searches it.
pub struct NodeIndexer {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn SimilarityIndex>,
    config: IndexerConfig,
}

impl NodeIndexer {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn SimilarityIndex>,
        config: IndexerConfig,
    ) -> Result<Self> {
        if embedder.dimension() != config.index.dimension {
            return Err(Error::Configuration(format!(
                "embedder produces {}-dimensional vectors but index '{}' is {}-dimensional",
                embedder.dimension(),
                config.index.name,
                config.index.dimension
            )));
        }
        Ok(Self {
            embedder,
            index,
            config,
        })
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    /// Embed every node and upsert it in batches; returns the number of entries.
    ///
    /// Entry ids are the node positions, so re-indexing the same graph
    /// overwrites instead of duplicating.
    pub async fn index_graph(&self, graph: &KnowledgeGraph) -> Result<usize> {
        let spec = &self.config.index;
        self.with_retry("create_index", || self.index.create_index(spec))
            .await?;

        let nodes: Vec<_> = graph.nodes().collect();
        let batch_size = self.config.batch_size.max(1);
        let mut indexed = 0usize;

        for (batch_no, batch) in nodes.chunks(batch_size).enumerate() {
            let documents: Vec<String> = batch.iter().map(|n| n.document()).collect();
            let vectors = self.embedder.embed_batch(&documents).await?;

            let entries: Vec<IndexEntry> = batch
                .iter()
                .zip(vectors)
                .enumerate()
                .map(|(offset, (node, vector))| IndexEntry {
                    id: (batch_no * batch_size + offset).to_string(),
                    vector,
                    metadata: BTreeMap::from([(NODE_FIELD.to_string(), node.key.clone())]),
                })
                .collect();

            self.with_retry("upsert", || self.index.upsert(&spec.name, &entries))
                .await?;
            indexed += entries.len();
            debug!("Upserted batch {} ({} entries)", batch_no, entries.len());
        }

        info!("Indexed {} nodes into '{}'", indexed, spec.name);
        Ok(indexed)
    }

    /// Top matches for `text` with their metadata.
    pub async fn search_matches(&self, text: &str, top_k: usize) -> Result<Vec<ScoredMatch>> {
        let vector = self.embedder.embed(text).await?;
        let name = &self.config.index.name;
        self.with_retry("query", || self.index.query(name, &vector, top_k, true))
            .await
    }

    /// Node keys most similar to `text`, best first.
    pub async fn search(&self, text: &str) -> Result<Vec<String>> {
        let matches = self.search_matches(text, self.config.top_k).await?;
        Ok(matches
            .into_iter()
            .filter_map(|m| m.metadata.get(NODE_FIELD).cloned())
            .collect())
    }

    async fn with_retry<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt <= self.config.max_retries => {
                    let backoff = calculate_backoff(self.config.backoff_base_ms, attempt);
                    warn!(
                        attempt = attempt,
                        wait_ms = backoff,
                        "Index {} failed ({}), retrying after backoff",
                        what,
                        e
                    );
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Exponential backoff with up to 10% jitter.
fn calculate_backoff(base_ms: u64, attempt: u32) -> u64 {
    let delay = base_ms.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
    let jitter = (delay / 10).max(1);
    delay + rand::thread_rng().gen_range(0..jitter)
}
