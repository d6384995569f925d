//! Graph statistics and node inspection.

use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use crate::config::Config;
use crate::graph::KnowledgeGraph;

const TOP_NODES: usize = 10;

pub fn run(config: &Config, graph: Option<PathBuf>, node: Option<&str>) -> Result<()> {
    let graph_path = graph.unwrap_or_else(|| config.paths.graph.clone());
    let graph = KnowledgeGraph::load_gml(&graph_path)
        .with_context(|| format!("Failed to load graph {}", graph_path.display()))?;

    let text = match node {
        Some(key) => node_report(&graph, key)?,
        None => summary(&graph),
    };
    print!("{}", text);
    Ok(())
}

/// Node, fact and edge counts plus the best-connected nodes.
pub fn summary(graph: &KnowledgeGraph) -> String {
    let facts: usize = graph.nodes().map(|n| n.facts.len()).sum();
    let mut degrees: Vec<(&str, usize)> = graph
        .nodes()
        .map(|n| {
            let degree = graph.neighbors(&n.key).map(|v| v.len()).unwrap_or(0);
            (n.key.as_str(), degree)
        })
        .collect();
    degrees.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    let mut out = String::new();
    let _ = writeln!(out, "Nodes: {}", graph.len());
    let _ = writeln!(out, "Edges: {}", graph.edge_count());
    let _ = writeln!(out, "Facts: {}", facts);
    let isolated = degrees.iter().filter(|(_, d)| *d == 0).count();
    let _ = writeln!(out, "Isolated nodes: {}", isolated);
    if !degrees.is_empty() {
        let _ = writeln!(out, "Most connected:");
        for (key, degree) in degrees.iter().take(TOP_NODES) {
            let _ = writeln!(out, "  {} ({})", key, degree);
        }
    }
    out
}

/// Facts of `key` and the names of its neighbours.
pub fn node_report(graph: &KnowledgeGraph, key: &str) -> Result<String> {
    let Some(node) = graph.node(key) else {
        bail!("Node '{}' is not in the graph", key);
    };

    let mut out = String::new();
    let _ = writeln!(out, "{}", node.key);
    for fact in &node.facts {
        let _ = writeln!(out, "  [{}] {}", fact.chunk_id, fact.atom_fact);
    }
    let neighbours: Vec<&str> = graph
        .neighbors(key)
        .unwrap_or_default()
        .into_iter()
        .map(|n| n.key.as_str())
        .collect();
    let _ = writeln!(out, "Neighbours: {}", neighbours.join(", "));
    Ok(out)
}
