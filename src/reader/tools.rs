//! Tools offered to the reading agents and their executors.

use schemars::JsonSchema;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

use super::notes::NotesSink;
use crate::document::ChunkStore;
use crate::graph::{AtomicFact, KnowledgeGraph};
use crate::llm::{ToolCall, ToolSpec};
use crate::{Error, Result};

pub const READ_NODE: &str = "read_node";
pub const SEARCH_NEIGHBORS: &str = "search_neighbors";
pub const READ_CHUNK: &str = "read_chunk";
pub const READ_NEXT_CHUNK: &str = "read_next_chunk";
pub const READ_PREVIOUS_CHUNK: &str = "read_previous_chunk";
pub const WRITE_NOTES: &str = "write_notes";

#[derive(Debug, Deserialize, JsonSchema)]
pub struct NodeArgs {
    /// Exact name of a graph node
    pub node_name: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ChunkArgs {
    /// Id of a document chunk
    #[serde(deserialize_with = "chunk_id")]
    #[schemars(with = "i64")]
    pub chunk_id: i64,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct NotesArgs {
    /// Insight to keep for the final answer
    pub text: String,
}

/// Models sometimes quote integers.
fn chunk_id<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Int(id) => Ok(id),
        Raw::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| D::Error::custom(format!("invalid chunk id '{}'", text))),
    }
}

/// A decoded tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    ReadNode(String),
    SearchNeighbors(String),
    ReadChunk(i64),
    ReadNextChunk(i64),
    ReadPreviousChunk(i64),
    WriteNotes(String),
}

impl Action {
    /// Decode a tool call; unknown names and bad arguments are schema violations.
    pub fn parse(call: &ToolCall) -> Result<Self> {
        let name = call.function.name.as_str();
        let raw = call.function.arguments.as_str();
        let action = match name {
            READ_NODE => Action::ReadNode(decode::<NodeArgs>(name, raw)?.node_name),
            SEARCH_NEIGHBORS => Action::SearchNeighbors(decode::<NodeArgs>(name, raw)?.node_name),
            READ_CHUNK => Action::ReadChunk(decode::<ChunkArgs>(name, raw)?.chunk_id),
            READ_NEXT_CHUNK => Action::ReadNextChunk(decode::<ChunkArgs>(name, raw)?.chunk_id),
            READ_PREVIOUS_CHUNK => {
                Action::ReadPreviousChunk(decode::<ChunkArgs>(name, raw)?.chunk_id)
            }
            WRITE_NOTES => Action::WriteNotes(decode::<NotesArgs>(name, raw)?.text),
            other => {
                return Err(Error::SchemaViolation(format!("unknown tool '{}'", other)));
            }
        };
        Ok(action)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Action::ReadNode(_) => READ_NODE,
            Action::SearchNeighbors(_) => SEARCH_NEIGHBORS,
            Action::ReadChunk(_) => READ_CHUNK,
            Action::ReadNextChunk(_) => READ_NEXT_CHUNK,
            Action::ReadPreviousChunk(_) => READ_PREVIOUS_CHUNK,
            Action::WriteNotes(_) => WRITE_NOTES,
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::ReadNode(node) | Action::SearchNeighbors(node) => {
                write!(f, "{}({})", self.name(), node)
            }
            Action::ReadChunk(id) | Action::ReadNextChunk(id) | Action::ReadPreviousChunk(id) => {
                write!(f, "{}({})", self.name(), id)
            }
            Action::WriteNotes(text) => write!(f, "{}({} chars)", self.name(), text.len()),
        }
    }
}

fn decode<T: for<'de> Deserialize<'de>>(tool: &str, raw: &str) -> Result<T> {
    let raw = if raw.trim().is_empty() { "{}" } else { raw };
    serde_json::from_str(raw)
        .map_err(|e| Error::SchemaViolation(format!("bad arguments for {}: {}", tool, e)))
}

/// Tools of the fact-exploration stage.
pub fn explore_tools() -> Vec<ToolSpec> {
    vec![
        ToolSpec::of::<NodeArgs>(
            READ_NODE,
            "Read the atomic facts of a node with the chunk id each fact came from.",
        ),
        ToolSpec::of::<NodeArgs>(
            SEARCH_NEIGHBORS,
            "Read the atomic facts of every node connected to the given node.",
        ),
    ]
}

/// Tools of the chunk-reading stage.
pub fn chunk_tools() -> Vec<ToolSpec> {
    vec![
        ToolSpec::of::<ChunkArgs>(READ_CHUNK, "Read the text of a document chunk."),
        ToolSpec::of::<ChunkArgs>(
            READ_NEXT_CHUNK,
            "Read the chunk that follows the given chunk.",
        ),
        ToolSpec::of::<ChunkArgs>(
            READ_PREVIOUS_CHUNK,
            "Read the chunk that precedes the given chunk.",
        ),
        ToolSpec::of::<NotesArgs>(WRITE_NOTES, "Save an insight to the notebook."),
    ]
}

/// Runs decoded actions and produces the observation text for the model.
pub trait ToolExecutor: Send {
    fn execute(&mut self, action: &Action) -> Result<String>;
}

#[derive(Serialize)]
struct NodeFacts<'a> {
    node: &'a str,
    facts: &'a [AtomicFact],
}

/// Executes `read_node` and `search_neighbors` over a graph.
pub struct GraphExplorer<'a> {
    graph: &'a KnowledgeGraph,
}

impl<'a> GraphExplorer<'a> {
    pub fn new(graph: &'a KnowledgeGraph) -> Self {
        Self { graph }
    }
}

impl ToolExecutor for GraphExplorer<'_> {
    fn execute(&mut self, action: &Action) -> Result<String> {
        match action {
            Action::ReadNode(key) => match self.graph.node(key) {
                Some(node) => Ok(serde_json::to_string(&node.facts)?),
                None => Ok(format!("Node '{}' does not exist in the graph.", key)),
            },
            Action::SearchNeighbors(key) => match self.graph.neighbors(key) {
                Some(neighbors) if neighbors.is_empty() => {
                    Ok(format!("Node '{}' has no neighbours.", key))
                }
                Some(neighbors) => {
                    let listing: Vec<NodeFacts> = neighbors
                        .iter()
                        .map(|n| NodeFacts {
                            node: &n.key,
                            facts: &n.facts,
                        })
                        .collect();
                    Ok(serde_json::to_string(&listing)?)
                }
                None => Ok(format!("Node '{}' does not exist in the graph.", key)),
            },
            other => Err(Error::SchemaViolation(format!(
                "{} is not available while exploring facts",
                other.name()
            ))),
        }
    }
}

/// Executes chunk reads and note writes.
pub struct ChunkReader<'a> {
    chunks: &'a ChunkStore,
    notes: &'a NotesSink,
}

impl<'a> ChunkReader<'a> {
    pub fn new(chunks: &'a ChunkStore, notes: &'a NotesSink) -> Self {
        Self { chunks, notes }
    }
}

impl ToolExecutor for ChunkReader<'_> {
    fn execute(&mut self, action: &Action) -> Result<String> {
        match action {
            Action::ReadChunk(id) => Ok(self.chunks.get(*id)?.to_string()),
            Action::ReadNextChunk(id) => Ok(self.chunks.next(*id)?.to_string()),
            Action::ReadPreviousChunk(id) => Ok(self.chunks.previous(*id)?.to_string()),
            Action::WriteNotes(text) => {
                self.notes.append(text)?;
                Ok("Note saved.".to_string())
            }
            other => Err(Error::SchemaViolation(format!(
                "{} is not available while reading chunks",
                other.name()
            ))),
        }
    }
}
