//! Query-time graph reading.
//!
//! [`GraphReader`] plans, shortlists nodes through the similarity index, lets
//! the model pick nodes, explores their facts and neighbours with tools, then
//! reads the referenced chunks to answer.

pub mod agent;
pub mod controller;
pub mod notes;
pub mod tools;

pub use agent::{run_agent, AgentOutcome};
pub use controller::{parse_chunk_ids, GraphReader, QuerySession, QueryStage, ReaderSettings};
pub use notes::NotesSink;
pub use tools::{chunk_tools, explore_tools, Action, ChunkReader, GraphExplorer, ToolExecutor};
