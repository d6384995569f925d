//! Answer a question over the built graph.

use std::sync::Arc;

use anyhow::{Context, Result};

use super::{language_model, node_indexer, prompts};
use crate::config::Config;
use crate::document::ChunkStore;
use crate::graph::KnowledgeGraph;
use crate::reader::{GraphReader, NotesSink, QuerySession, ReaderSettings};

/// Load the graph, chunks and index named by `config` into a reader.
pub fn reader(config: &Config) -> Result<GraphReader> {
    let graph = KnowledgeGraph::load_gml(&config.paths.graph)
        .with_context(|| format!("Failed to load graph {}", config.paths.graph.display()))?;
    let chunks = ChunkStore::load(&config.paths.chunks)
        .with_context(|| format!("Failed to load chunks {}", config.paths.chunks.display()))?;
    graph.validate_chunks(&chunks)?;

    let reader = GraphReader::new(
        language_model(config)?,
        Arc::new(graph),
        Arc::new(chunks),
        Arc::new(node_indexer(config)?),
        Arc::new(prompts(config)?),
        NotesSink::new(&config.reader.notes_path),
    )
    .with_settings(ReaderSettings {
        max_agent_steps: config.reader.max_agent_steps,
    });
    Ok(reader)
}

pub async fn run(config: &Config, query: &str, show_trace: bool) -> Result<String> {
    let session = reader(config)?.run(query).await?;
    if show_trace {
        print_trace(&session);
    }
    let answer = session.answer.unwrap_or_default();
    println!("{}", answer);
    Ok(answer)
}

fn print_trace(session: &QuerySession) {
    let stages: Vec<&str> = session.trace().iter().map(|s| s.as_str()).collect();
    println!("Query {}", session.id);
    println!("Stages: {}", stages.join(" -> "));
    println!("Plan: {}", session.plan);
    println!("Shortlist: {}", session.shortlisted_nodes.join(", "));
    println!("Selected: {}", session.selected_nodes.join(", "));
    println!("Chunks: {:?}", session.selected_chunk_ids);
    for action in &session.actions {
        println!("  {}", action);
    }
    println!();
}
