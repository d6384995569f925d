//! Knowledge-graph construction.
//!
//! Pipeline: chunks → [`FactExtractor`] (raw `key → facts` table) →
//! [`KeyNormalizer`] (canonical keys) → [`KnowledgeGraph::build`] (nodes and
//! co-occurrence edges). The graph is persisted as GML.

pub mod extractor;
pub mod facts;
pub mod gml;
#[allow(clippy::module_inception)]
pub mod graph;
pub mod normalizer;

pub use extractor::{parse_key_facts, FactExtractor, RawKeyedFact};
pub use facts::{AtomicFact, FactTable};
pub use graph::{EdgeMatching, GraphNode, KnowledgeGraph};
pub use normalizer::{clean_string, KeyMerger, KeyNormalizer, Lemmatizer, RuleLemmatizer};

use tracing::info;

use crate::document::ChunkStore;
use crate::Result;

/// Builds a knowledge graph from a chunk store.
pub struct GraphBuilder {
    extractor: FactExtractor,
    normalizer: KeyNormalizer,
    matching: EdgeMatching,
}

impl GraphBuilder {
    pub fn new(extractor: FactExtractor, normalizer: KeyNormalizer, matching: EdgeMatching) -> Self {
        Self {
            extractor,
            normalizer,
            matching,
        }
    }

    /// Extract facts from every chunk, normalize keys, then build the graph.
    pub async fn build(&self, store: &ChunkStore) -> Result<KnowledgeGraph> {
        let raw = self.extractor.extract_all(store).await?;
        let canonical = self.normalizer.normalize(raw);
        info!("Canonical keys: {}", canonical.len());
        Ok(KnowledgeGraph::build(canonical, self.matching))
    }
}
