//! Index an exported graph into the similarity index.

use std::path::PathBuf;

use anyhow::{Context, Result};

use super::node_indexer;
use crate::config::Config;
use crate::graph::KnowledgeGraph;

/// Re-embed every node of the graph at `graph` (default `paths.graph`).
pub async fn run(config: &Config, graph: Option<PathBuf>) -> Result<usize> {
    let graph_path = graph.unwrap_or_else(|| config.paths.graph.clone());
    let graph = KnowledgeGraph::load_gml(&graph_path)
        .with_context(|| format!("Failed to load graph {}", graph_path.display()))?;

    let indexed = node_indexer(config)?.index_graph(&graph).await?;
    println!(
        "{} nodes from {} indexed into '{}'",
        indexed,
        graph_path.display(),
        config.index.name
    );
    Ok(indexed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::LocalIndex;
    use crate::config::EmbedderKind;
    use crate::graph::{AtomicFact, EdgeMatching, FactTable};
    use tempfile::tempdir;

    #[tokio::test]
    async fn indexes_exported_graph_into_local_snapshot() {
        let dir = tempdir().unwrap();
        let mut config = Config::default();
        config.index.embedder = EmbedderKind::Local;
        config.index.dimension = 16;
        config.paths.local_index = dir.path().join("index.json");
        config.paths.graph = dir.path().join("graph.gml");

        let mut table = FactTable::new();
        table.push("tokyo", AtomicFact::new("Tokyo is in Japan", 0));
        table.push("japan", AtomicFact::new("Japan is an island nation", 1));
        KnowledgeGraph::build(table, EdgeMatching::Exact)
            .export_gml(&config.paths.graph)
            .unwrap();

        assert_eq!(run(&config, None).await.unwrap(), 2);

        let snapshot = LocalIndex::open(&config.paths.local_index).unwrap();
        assert_eq!(snapshot.len(&config.index.name).await, Some(2));
    }

    #[tokio::test]
    async fn missing_graph_is_reported() {
        let dir = tempdir().unwrap();
        let err = run(&Config::default(), Some(dir.path().join("none.gml")))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("none.gml"));
    }
}
