//! Build the knowledge graph from the chunk store.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use super::{language_model, node_indexer, prompts};
use crate::config::Config;
use crate::document::ChunkStore;
use crate::graph::{FactExtractor, GraphBuilder, KeyNormalizer, KnowledgeGraph};
use crate::llm::LanguageModel;

pub struct BuildArgs {
    /// Overrides `paths.chunks`
    pub chunks: Option<PathBuf>,
    /// Overrides `paths.graph`
    pub graph_out: Option<PathBuf>,
    /// Skip indexing the built graph
    pub no_index: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSummary {
    pub nodes: usize,
    pub edges: usize,
    pub indexed: Option<usize>,
}

/// Extract facts, normalize keys and build the graph from `store`.
///
/// The graph is checked against the store before it is returned.
pub async fn build_graph(
    config: &Config,
    llm: Arc<dyn LanguageModel>,
    key_atomic_prompt: &str,
    store: &ChunkStore,
) -> Result<KnowledgeGraph> {
    let extractor = FactExtractor::new(llm, key_atomic_prompt)
        .with_concurrency(config.extraction.concurrency);
    let builder = GraphBuilder::new(extractor, KeyNormalizer::new(), config.graph.edge_matching);

    let graph = builder
        .build(store)
        .await
        .context("Graph construction aborted")?;
    graph.validate_chunks(store)?;
    Ok(graph)
}

pub async fn run(config: &Config, args: BuildArgs) -> Result<BuildSummary> {
    let chunks_path = args.chunks.unwrap_or_else(|| config.paths.chunks.clone());
    let store = ChunkStore::load(&chunks_path)
        .with_context(|| format!("Run `graph_reader chunk` first to create {}", chunks_path.display()))?;

    let prompts = prompts(config)?;
    let graph = build_graph(config, language_model(config)?, &prompts.key_atomic, &store).await?;

    let graph_path = args.graph_out.unwrap_or_else(|| config.paths.graph.clone());
    graph
        .export_gml(&graph_path)
        .with_context(|| format!("Failed to export graph to {}", graph_path.display()))?;

    let indexed = if args.no_index {
        None
    } else {
        Some(node_indexer(config)?.index_graph(&graph).await?)
    };

    let summary = BuildSummary {
        nodes: graph.len(),
        edges: graph.edge_count(),
        indexed,
    };
    info!(?summary, "Graph built");
    println!(
        "Graph with {} nodes and {} edges written to {}",
        summary.nodes,
        summary.edges,
        graph_path.display()
    );
    if let Some(count) = indexed {
        println!("{} nodes indexed into '{}'", count, config.index.name);
    }
    Ok(summary)
}
