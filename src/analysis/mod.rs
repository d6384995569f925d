//! Embeddings and similarity search over graph nodes
//!
//! Provides tools for:
//! - Generating embeddings with OpenAI or a local hashing embedder
//! - Storing node vectors in Qdrant or an in-process index
//! - Shortlisting candidate nodes for a query

pub mod embeddings;
pub mod indexer;
pub mod vector_db;

pub use embeddings::{Embedder, EmbeddingService, LocalEmbedder};
pub use indexer::{IndexerConfig, NodeIndexer, NODE_FIELD};
pub use vector_db::{
    IndexEntry, IndexSpec, LocalIndex, Metric, QdrantIndex, ScoredMatch, SimilarityIndex,
};
